//! # shpfile
//!
//! Lecture et écriture de couches vectorielles au format ESRI Shapefile.
//!
//! ## Features
//!
//! - Bundles `.shp` / `.shx` / `.dbf` / `.prj` / `.cpg`, isolés ou en archive tar(.bz2)
//! - Attributs dBASE en UTF-8 ou en cyrillique Windows-1251 (`memchr`, `simdutf8`, `encoding_rs`)
//! - Détection du système de coordonnées depuis le WKT du `.prj`
//! - Types `geo` pour l'interopérabilité avec l'écosystème Rust géospatial
//! - Export GeoJSON et WKT via `geozero`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shpfile::{parse, CharacterEncoding, OutputFormat};
//!
//! let bytes = std::fs::read("zouit.tar.bz2")?;
//! let layer = shpfile::parse(&bytes, CharacterEncoding::Utf8)?;
//! println!("{}: {} features en {}", layer.name, layer.len(), layer.crs);
//!
//! let geojson = shpfile::serialize(&layer, OutputFormat::GeoJson)?;
//! ```

pub mod archive;
pub mod error;
pub mod parser;
pub mod topology;
pub mod types;
pub mod writer;

pub use archive::{ShapefileBundle, SourceKind};
pub use error::ShpError;
pub use types::{
    geometry_type_name, AttributeValue, CharacterEncoding, Crs, Feature, Layer, OutputFormat,
};
pub use writer::to_wkt;

use std::path::Path;

/// Parse une source vectorielle (archive tar / tar.bz2, .shp seul ou GeoJSON).
///
/// # Errors
///
/// - `Format` si le conteneur est illisible
/// - `Encoding` si un texte d'attribut n'est pas décodable dans `encoding`
/// - `MissingCrs` si aucun système de coordonnées n'est déclaré
pub fn parse(source: &[u8], encoding: CharacterEncoding) -> Result<Layer, ShpError> {
    parse_named("layer", source, encoding, None)
}

/// Comme [`parse`], avec un CRS explicite pour les bundles sans `.prj`
pub fn parse_with_fallback(
    source: &[u8],
    encoding: CharacterEncoding,
    fallback_crs: &Crs,
) -> Result<Layer, ShpError> {
    parse_named("layer", source, encoding, Some(fallback_crs))
}

/// Parse une source en donnant son nom à la couche (utilisé pour .shp seul et GeoJSON)
pub fn parse_named(
    name: &str,
    source: &[u8],
    encoding: CharacterEncoding,
    fallback_crs: Option<&Crs>,
) -> Result<Layer, ShpError> {
    match archive::sniff(source) {
        Some(SourceKind::Bzip2Tar | SourceKind::Tar) => {
            let bundle = ShapefileBundle::from_archive(source)?;
            parser::parse_bundle(&bundle, encoding, fallback_crs)
        }
        Some(SourceKind::Shp) => {
            let bundle = ShapefileBundle::from_shp(name, source.to_vec());
            parser::parse_bundle(&bundle, encoding, fallback_crs)
        }
        Some(SourceKind::GeoJson) => parser::geojson::parse(name, source, encoding),
        None => Err(ShpError::format(name, "unrecognized vector container")),
    }
}

/// Lit une couche depuis le disque : `.shp` avec ses fichiers voisins, archive ou GeoJSON
pub fn read_layer(
    path: &Path,
    encoding: CharacterEncoding,
    fallback_crs: Option<&Crs>,
) -> Result<Layer, ShpError> {
    let is_shp = path
        .extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"));

    if is_shp {
        let bundle = ShapefileBundle::from_path(path)?;
        return parser::parse_bundle(&bundle, encoding, fallback_crs);
    }

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();
    let name = name
        .trim_end_matches(".bz2")
        .trim_end_matches(".tar")
        .trim_end_matches(".geojson")
        .trim_end_matches(".json");
    let data = std::fs::read(path)?;
    parse_named(name, &data, encoding, fallback_crs)
}

/// Sérialise une couche
pub fn serialize(layer: &Layer, format: OutputFormat) -> Result<Vec<u8>, ShpError> {
    match format {
        OutputFormat::GeoJson => {
            let mut out = Vec::new();
            writer::geojson::write_layer(&mut out, layer)?;
            Ok(out)
        }
        OutputFormat::Shapefile => writer::to_bundle(layer)?.to_tar(),
    }
}
