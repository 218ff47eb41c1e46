//! Types de données pour le crate shpfile

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use encoding_rs::Encoding;
use geo::Geometry;

use crate::ShpError;

/// Couche vectorielle décodée : features + système de coordonnées déclaré
#[derive(Debug, Clone)]
pub struct Layer {
    /// Nom de la couche (stem du fichier .shp)
    pub name: String,

    /// Système de coordonnées des géométries
    pub crs: Crs,

    /// Encodage des attributs texte
    pub encoding: CharacterEncoding,

    /// Features dans l'ordre des enregistrements
    pub features: Vec<Feature>,
}

impl Layer {
    pub fn new(name: impl Into<String>, crs: Crs, encoding: CharacterEncoding) -> Self {
        Self {
            name: name.into(),
            crs,
            encoding,
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Nouvelle couche avec les mêmes métadonnées et d'autres features
    pub fn with_features(&self, features: Vec<Feature>) -> Self {
        Self {
            name: self.name.clone(),
            crs: self.crs.clone(),
            encoding: self.encoding,
            features,
        }
    }
}

/// Une feature avec sa géométrie et ses attributs
#[derive(Debug, Clone)]
pub struct Feature {
    /// Numéro d'enregistrement (1-based)
    pub id: u64,

    pub geometry: Geometry,

    /// Attributs (nom de champ -> valeur)
    pub attributes: BTreeMap<String, AttributeValue>,
}

impl Feature {
    pub fn new(id: u64, geometry: Geometry) -> Self {
        Self {
            id,
            geometry,
            attributes: BTreeMap::new(),
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.attributes.get(name)
    }
}

/// Valeur scalaire d'un attribut DBF
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Number(f64),
    Bool(bool),
    Null,
}

impl AttributeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Number(_) => "number",
            Self::Bool(_) => "bool",
            Self::Null => "null",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_text(&self) -> Result<&str, ShpError> {
        match self {
            Self::Text(s) => Ok(s),
            other => Err(other.mismatch("text")),
        }
    }

    pub fn as_f64(&self) -> Result<f64, ShpError> {
        match self {
            Self::Number(n) => Ok(*n),
            other => Err(other.mismatch("number")),
        }
    }

    pub fn as_bool(&self) -> Result<bool, ShpError> {
        match self {
            Self::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    /// Conversion vers une valeur JSON (propriétés GeoJSON)
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::String(s.clone()),
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Null => serde_json::Value::Null,
        }
    }

    /// Conversion depuis une valeur JSON ; les objets et tableaux sont gardés en texte
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number).unwrap_or(Self::Null),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }

    fn mismatch(&self, expected: &'static str) -> ShpError {
        ShpError::AttributeTypeMismatch {
            expected,
            found: self.type_name(),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "{}", s),
            Self::Number(n) => write!(f, "{}", n),
            Self::Bool(b) => write!(f, "{}", b),
            Self::Null => Ok(()),
        }
    }
}

/// Système de coordonnées de référence
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Crs {
    /// Code EPSG
    Epsg(u32),

    /// Définition WKT brute (contenu du .prj)
    Wkt(String),

    /// Chaîne PROJ.4 (`+proj=...`)
    Proj4(String),
}

impl Crs {
    pub const WGS84: Crs = Crs::Epsg(4326);

    pub fn epsg(&self) -> Option<u32> {
        match self {
            Self::Epsg(code) => Some(*code),
            _ => None,
        }
    }

    /// Nom OGC utilisé dans le membre `crs` des GeoJSON
    pub fn urn(&self) -> String {
        match self {
            Self::Epsg(code) => format!("urn:ogc:def:crs:EPSG::{}", code),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Epsg(code) => write!(f, "EPSG:{}", code),
            Self::Wkt(wkt) => write!(f, "{}", wkt),
            Self::Proj4(def) => write!(f, "{}", def),
        }
    }
}

impl FromStr for Crs {
    type Err = ShpError;

    /// Accepte `EPSG:4326`, `urn:ogc:def:crs:EPSG::4326`, `+proj=...` ou du WKT
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ShpError::MissingCrs(String::new()));
        }

        let upper = trimmed.to_ascii_uppercase();
        if upper.starts_with("EPSG:") || upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
            let code = upper
                .rsplit(':')
                .next()
                .and_then(|c| c.parse::<u32>().ok())
                .ok_or_else(|| ShpError::format("crs", format!("invalid EPSG code: {}", s)))?;
            return Ok(Self::Epsg(code));
        }
        if upper == "URN:OGC:DEF:CRS:OGC:1.3:CRS84" || upper == "CRS84" {
            return Ok(Self::WGS84);
        }
        if trimmed.starts_with('+') {
            return Ok(Self::Proj4(trimmed.to_string()));
        }
        if upper.starts_with("PROJCS[") || upper.starts_with("GEOGCS[") {
            return Ok(Self::Wkt(trimmed.to_string()));
        }

        Err(ShpError::format("crs", format!("unrecognized CRS: {}", s)))
    }
}

/// Encodage des attributs texte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CharacterEncoding {
    #[default]
    Utf8,
    /// Cyrillique Windows (cp1251)
    Windows1251,
}

impl CharacterEncoding {
    /// Résout un libellé (`utf-8`, `cp1251`, `1251`, `ANSI 1251`...)
    pub fn from_label(label: &str) -> Result<Self, ShpError> {
        let normalized = label.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "utf-8" | "utf8" => return Ok(Self::Utf8),
            "cp1251" | "1251" | "ansi 1251" | "windows-1251" | "win1251" => {
                return Ok(Self::Windows1251)
            }
            _ => {}
        }

        match Encoding::for_label(normalized.as_bytes()) {
            Some(enc) if enc == encoding_rs::UTF_8 => Ok(Self::Utf8),
            Some(enc) if enc == encoding_rs::WINDOWS_1251 => Ok(Self::Windows1251),
            _ => Err(ShpError::UnknownEncoding(label.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Windows1251 => "cp1251",
        }
    }

    /// Contenu du fichier .cpg
    pub fn cpg(&self) -> &'static str {
        match self {
            Self::Utf8 => "UTF-8",
            Self::Windows1251 => "1251",
        }
    }

    pub fn encoding(&self) -> &'static Encoding {
        match self {
            Self::Utf8 => encoding_rs::UTF_8,
            Self::Windows1251 => encoding_rs::WINDOWS_1251,
        }
    }

    /// Décode le texte d'un champ
    pub fn decode(&self, bytes: &[u8], field: &str) -> Result<String, ShpError> {
        match self {
            Self::Utf8 => simdutf8::basic::from_utf8(bytes)
                .map(str::to_owned)
                .map_err(|_| ShpError::encoding(field, self.label())),
            Self::Windows1251 => {
                let (decoded, had_errors) =
                    encoding_rs::WINDOWS_1251.decode_without_bom_handling(bytes);
                if had_errors {
                    return Err(ShpError::encoding(field, self.label()));
                }
                Ok(decoded.into_owned())
            }
        }
    }

    /// Encode le texte d'un champ ; un caractère non représentable est une erreur
    pub fn encode(&self, text: &str, field: &str) -> Result<Vec<u8>, ShpError> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::Windows1251 => {
                let (encoded, _, unmappable) = encoding_rs::WINDOWS_1251.encode(text);
                if unmappable {
                    return Err(ShpError::encoding(field, self.label()));
                }
                Ok(encoded.into_owned())
            }
        }
    }
}

impl FromStr for CharacterEncoding {
    type Err = ShpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_label(s)
    }
}

impl fmt::Display for CharacterEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Format de sortie de `serialize`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// FeatureCollection GeoJSON
    GeoJson,
    /// Bundle .shp/.shx/.dbf/.prj/.cpg dans une archive tar
    Shapefile,
}

/// Nom du type d'une géométrie `geo`
pub fn geometry_type_name(geometry: &Geometry) -> &'static str {
    match geometry {
        Geometry::Point(_) => "Point",
        Geometry::Line(_) => "Line",
        Geometry::LineString(_) => "LineString",
        Geometry::Polygon(_) => "Polygon",
        Geometry::MultiPoint(_) => "MultiPoint",
        Geometry::MultiLineString(_) => "MultiLineString",
        Geometry::MultiPolygon(_) => "MultiPolygon",
        Geometry::GeometryCollection(_) => "GeometryCollection",
        Geometry::Rect(_) => "Rect",
        Geometry::Triangle(_) => "Triangle",
    }
}
