//! Sources de couches : fichiers sur disque ou flux uploadés

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use shpfile::{CharacterEncoding, Crs, Layer, ShapefileBundle};
use tracing::debug;

use crate::config::{Config, SolutionConfig};
use crate::error::{FreeplotError, Result};
use crate::report::LayerWarning;

/// Origine des octets d'une couche
#[derive(Debug, Clone)]
pub enum LayerSource {
    /// `.shp` avec ses voisins, ou archive tar / tar.bz2
    Path(PathBuf),
    /// Flux nommé (archive, `.shp` seul ou GeoJSON)
    Bytes { name: String, data: Bytes },
}

/// Couche à lire : source, nom affiché, encodage et CRS de repli
#[derive(Debug, Clone)]
pub struct LayerSpec {
    pub name: String,
    pub source: LayerSource,
    pub encoding: CharacterEncoding,
    pub fallback_crs: Option<Crs>,
}

/// Contenu brut d'une source, prêt à être haché puis décodé
pub(crate) enum Payload {
    Bundle(ShapefileBundle),
    Raw(Bytes),
}

impl Payload {
    pub(crate) fn digest(&self) -> blake3::Hash {
        match self {
            Payload::Raw(data) => blake3::hash(data),
            Payload::Bundle(bundle) => {
                // Chaque membre : présence, longueur puis contenu
                let members = [
                    Some(bundle.shp.as_slice()),
                    bundle.shx.as_deref(),
                    bundle.dbf.as_deref(),
                    bundle.prj.as_deref().map(str::as_bytes),
                    bundle.cpg.as_deref().map(str::as_bytes),
                ];
                let mut hasher = blake3::Hasher::new();
                for member in members {
                    hasher.update(&[member.is_some() as u8]);
                    let data = member.unwrap_or_default();
                    hasher.update(&(data.len() as u64).to_le_bytes());
                    hasher.update(data);
                }
                hasher.finalize()
            }
        }
    }
}

impl LayerSpec {
    /// Couche lue depuis le disque ; nom = stem du fichier
    pub fn from_path(path: impl Into<PathBuf>, encoding: CharacterEncoding) -> Self {
        let path = path.into();
        let name = layer_stem(&path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default());
        Self {
            name,
            source: LayerSource::Path(path),
            encoding,
            fallback_crs: None,
        }
    }

    /// Couche uploadée
    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>, encoding: CharacterEncoding) -> Self {
        let name = name.into();
        Self {
            source: LayerSource::Bytes {
                name: name.clone(),
                data: data.into(),
            },
            name,
            encoding,
            fallback_crs: None,
        }
    }

    pub fn with_fallback_crs(mut self, crs: Option<Crs>) -> Self {
        self.fallback_crs = crs;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Clé du registre de couches, ou chemin vers un fichier
    pub fn resolve(config: &Config, key_or_path: &str) -> Result<Self> {
        let fallback = config.default_crs()?;
        if let Some(entry) = config.layer(key_or_path) {
            let spec = Self::from_path(config.layer_path(entry), entry.encoding()?)
                .with_name(key_or_path)
                .with_fallback_crs(fallback);
            debug!(key = key_or_path, path = ?spec.source, "Layer resolved from registry");
            return Ok(spec);
        }
        Ok(Self::from_path(key_or_path, config.solution_encoding()?).with_fallback_crs(fallback))
    }

    pub(crate) fn load(&self) -> Result<Payload> {
        match &self.source {
            LayerSource::Bytes { data, .. } => Ok(Payload::Raw(data.clone())),
            LayerSource::Path(path) => {
                let is_shp = path
                    .extension()
                    .map_or(false, |ext| ext.eq_ignore_ascii_case("shp"));
                if is_shp {
                    Ok(Payload::Bundle(ShapefileBundle::from_path(path)?))
                } else {
                    Ok(Payload::Raw(Bytes::from(std::fs::read(path)?)))
                }
            }
        }
    }

    pub(crate) fn decode(&self, payload: &Payload) -> Result<Layer> {
        let fallback = self.fallback_crs.as_ref();
        let mut layer = match payload {
            Payload::Bundle(bundle) => shpfile::parser::parse_bundle(bundle, self.encoding, fallback)?,
            Payload::Raw(data) => shpfile::parse_named(&self.name, data, self.encoding, fallback)?,
        };
        layer.name = self.name.clone();
        Ok(layer)
    }

    /// Lit et décode la couche, sans cache
    pub fn read(&self) -> Result<Layer> {
        self.decode(&self.load()?)
    }
}

fn layer_stem(file_name: &str) -> String {
    file_name
        .trim_end_matches(".bz2")
        .trim_end_matches(".tar")
        .trim_end_matches(".shp")
        .trim_end_matches(".geojson")
        .to_string()
}

/// Base et exclusions prêtes pour un run
#[derive(Debug, Clone)]
pub struct SolutionSources {
    pub base: LayerSpec,
    pub exclusions: Vec<LayerSpec>,
    /// Exclusions attendues mais absentes
    pub warnings: Vec<LayerWarning>,
}

/// Fichiers uploadés, indexés par nom de fichier
#[derive(Debug, Clone, Default)]
pub struct UploadRegistry {
    files: BTreeMap<String, Bytes>,
}

impl UploadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ajoute ou remplace un fichier
    pub fn insert(&mut self, filename: impl Into<String>, data: impl Into<Bytes>) {
        self.files.insert(filename.into(), data.into());
    }

    pub fn remove(&mut self, filename: &str) -> Option<Bytes> {
        self.files.remove(filename)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn filenames(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// Assemble la couche `stem` : archive, puis `.shp` avec ses voisins
    pub fn layer(&self, stem: &str, encoding: CharacterEncoding) -> Result<Option<LayerSpec>> {
        for archive in [format!("{}.tar.bz2", stem), format!("{}.tar", stem)] {
            if let Some(data) = self.files.get(&archive) {
                return Ok(Some(LayerSpec::from_bytes(stem, data.clone(), encoding)));
            }
        }

        let Some(shp) = self.files.get(&format!("{}.shp", stem)) else {
            return Ok(None);
        };

        let mut bundle = ShapefileBundle::from_shp(stem, shp.to_vec());
        for extension in ["shx", "dbf", "prj", "cpg"] {
            if let Some(data) = self.files.get(&format!("{}.{}", stem, extension)) {
                bundle.insert_sidecar(extension, data.to_vec());
            }
        }

        // Un .shp seul reste un .shp (pas d'archive à construire)
        if bundle.shx.is_none() && bundle.dbf.is_none() && bundle.prj.is_none() && bundle.cpg.is_none() {
            return Ok(Some(LayerSpec::from_bytes(stem, shp.clone(), encoding)));
        }

        let tar = bundle.to_tar()?;
        Ok(Some(LayerSpec::from_bytes(stem, tar, encoding)))
    }

    /// Base et exclusions du calcul de surfaces libres, dans l'ordre de `layout`
    pub fn solution_sources(
        &self,
        layout: &SolutionConfig,
        encoding: CharacterEncoding,
        fallback_crs: Option<&Crs>,
    ) -> Result<SolutionSources> {
        let base = self.layer(&layout.base, encoding)?.ok_or_else(|| {
            FreeplotError::pipeline(
                layout.base.clone(),
                FreeplotError::NotFound(format!("upload {}", layout.base)),
            )
        })?;

        let mut exclusions = Vec::with_capacity(layout.exclusions.len());
        let mut warnings = Vec::new();
        for name in &layout.exclusions {
            match self.layer(name, encoding)? {
                Some(spec) => exclusions.push(spec.with_fallback_crs(fallback_crs.cloned())),
                None => {
                    debug!(layer = %name, "Exclusion layer not uploaded");
                    warnings.push(LayerWarning::missing(name.clone()));
                }
            }
        }

        Ok(SolutionSources {
            base: base.with_fallback_crs(fallback_crs.cloned()),
            exclusions,
            warnings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{Geometry, LineString, Polygon};
    use shpfile::{Feature, OutputFormat};

    fn square_tar(name: &str) -> Vec<u8> {
        let mut layer = Layer::new(name, Crs::WGS84, CharacterEncoding::Utf8);
        layer.features.push(Feature::new(
            1,
            Geometry::Polygon(Polygon::new(
                LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)]),
                vec![],
            )),
        ));
        shpfile::serialize(&layer, OutputFormat::Shapefile).unwrap()
    }

    #[test]
    fn test_layer_stem() {
        assert_eq!(layer_stem("zouit.tar.bz2"), "zouit");
        assert_eq!(layer_stem("МКД.shp"), "МКД");
        assert_eq!(layer_stem("base.geojson"), "base");
    }

    #[test]
    fn test_resolve_registry_key() {
        let config = Config::from_preset("moscow").unwrap();
        let spec = LayerSpec::resolve(&config, "ydc_roads").unwrap();
        assert_eq!(spec.name, "ydc_roads");
        assert_eq!(spec.encoding, CharacterEncoding::Windows1251);
        assert!(spec.fallback_crs.is_some());
        assert!(matches!(spec.source, LayerSource::Path(ref p) if p.ends_with("УДС_дороги.shp")));
    }

    #[test]
    fn test_resolve_plain_path() {
        let config = Config::default();
        let spec = LayerSpec::resolve(&config, "/data/zouit.tar").unwrap();
        assert_eq!(spec.name, "zouit");
        assert_eq!(spec.encoding, CharacterEncoding::Windows1251);
        assert!(spec.fallback_crs.is_none());
    }

    #[test]
    fn test_read_from_bytes_uses_spec_name() {
        let spec = LayerSpec::from_bytes("krt", square_tar("whatever"), CharacterEncoding::Utf8);
        let layer = spec.read().unwrap();
        assert_eq!(layer.name, "krt");
        assert_eq!(layer.len(), 1);
    }

    #[test]
    fn test_read_from_disk_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = ShapefileBundle::from_archive(&square_tar("parcels")).unwrap();
        std::fs::write(dir.path().join("parcels.shp"), &bundle.shp).unwrap();
        std::fs::write(dir.path().join("parcels.shx"), bundle.shx.as_ref().unwrap()).unwrap();
        std::fs::write(dir.path().join("parcels.dbf"), bundle.dbf.as_ref().unwrap()).unwrap();
        std::fs::write(dir.path().join("parcels.prj"), bundle.prj.as_ref().unwrap()).unwrap();

        let layer = LayerSpec::from_path(dir.path().join("parcels.shp"), CharacterEncoding::Utf8)
            .read()
            .unwrap();
        assert_eq!(layer.name, "parcels");
        assert_eq!(layer.crs, Crs::WGS84);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = LayerSpec::from_path("/nonexistent/zouit.tar", CharacterEncoding::Utf8)
            .read()
            .unwrap_err();
        assert_eq!(err.kind(), "io");
    }

    #[test]
    fn test_registry_assembles_siblings() {
        let bundle = ShapefileBundle::from_archive(&square_tar("zouit")).unwrap();
        let mut uploads = UploadRegistry::new();
        uploads.insert("zouit.shp", bundle.shp.clone());
        uploads.insert("zouit.dbf", bundle.dbf.clone().unwrap());
        uploads.insert("zouit.prj", bundle.prj.clone().unwrap().into_bytes());

        let spec = uploads.layer("zouit", CharacterEncoding::Utf8).unwrap().unwrap();
        let layer = spec.read().unwrap();
        assert_eq!(layer.name, "zouit");
        assert_eq!(layer.crs, Crs::WGS84);
        assert!(uploads.layer("krt", CharacterEncoding::Utf8).unwrap().is_none());
    }

    #[test]
    fn test_solution_sources_order_and_missing() {
        let layout = SolutionConfig::default();
        let mut uploads = UploadRegistry::new();
        uploads.insert("base_layer.tar", square_tar("base_layer"));
        uploads.insert("mkd.tar", square_tar("mkd"));
        uploads.insert("zouit.tar", square_tar("zouit"));

        let sources = uploads
            .solution_sources(&layout, CharacterEncoding::Windows1251, None)
            .unwrap();
        assert_eq!(sources.base.name, "base_layer");
        let names: Vec<_> = sources.exclusions.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["zouit", "mkd"]);
        assert_eq!(sources.warnings.len(), 5);
        assert!(sources.warnings.iter().all(|w| w.kind == "missing"));
    }

    #[test]
    fn test_solution_sources_requires_base() {
        let mut uploads = UploadRegistry::new();
        uploads.insert("zouit.tar", square_tar("zouit"));
        let err = uploads
            .solution_sources(&SolutionConfig::default(), CharacterEncoding::Utf8, None)
            .unwrap_err();
        assert!(matches!(err, FreeplotError::Pipeline { ref layer, .. } if layer == "base_layer"));
    }

    #[test]
    fn test_bundle_digest_tracks_sidecars() {
        let bundle = ShapefileBundle::from_archive(&square_tar("a")).unwrap();
        let mut without_prj = bundle.clone();
        without_prj.prj = None;
        assert_ne!(
            Payload::Bundle(bundle).digest(),
            Payload::Bundle(without_prj).digest()
        );
    }

    #[test]
    fn test_bundle_digest_separates_members() {
        let shifted = |shp: &[u8], shx: &[u8]| {
            Payload::Bundle(ShapefileBundle {
                name: "a".into(),
                shp: shp.to_vec(),
                shx: Some(shx.to_vec()),
                ..Default::default()
            })
            .digest()
        };
        assert_ne!(shifted(b"abcd", b"ef"), shifted(b"abc", b"def"));
        assert_eq!(shifted(b"abcd", b"ef"), shifted(b"abcd", b"ef"));
    }
}
