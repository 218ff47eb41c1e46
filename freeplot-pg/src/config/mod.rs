//! Configuration du pipeline

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use shpfile::{CharacterEncoding, Crs};
use tracing::debug;

use crate::error::FreeplotError;
use crate::transform::OffsetCorrection;
use crate::versioning::LineageMode;

/// Configuration principale
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// CRS commun de toutes les couches après reprojection
    #[serde(default = "default_target_crs")]
    pub target_crs: String,

    /// Correction de décalage appliquée après reprojection
    #[serde(default)]
    pub correction: OffsetCorrection,

    /// Borne de durée de l'overlay
    #[serde(default = "default_timeout")]
    pub overlay_timeout_secs: u64,

    /// Racine des couches de référence
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Répertoire des artefacts produits
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Nombre de couches parsées gardées en cache
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    #[serde(default)]
    pub lineage: LineageMode,

    /// Écrire aussi le reste au format shapefile
    #[serde(default)]
    pub export_native: bool,

    /// Encodage des attributs du shapefile exporté
    #[serde(default = "default_native_encoding")]
    pub native_encoding: String,

    /// CRS de repli pour les couches sans .prj (jamais implicite)
    #[serde(default)]
    pub default_crs: Option<String>,

    /// Couches du calcul de surfaces libres
    #[serde(default)]
    pub solution: SolutionConfig,

    /// Registre des couches de référence
    #[serde(default)]
    pub layers: BTreeMap<String, LayerEntry>,
}

/// Base et exclusions du calcul, dans l'ordre d'application
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SolutionConfig {
    pub base: String,
    pub exclusions: Vec<String>,
    #[serde(default = "default_native_encoding")]
    pub encoding: String,
}

impl Default for SolutionConfig {
    fn default() -> Self {
        Self {
            base: "base_layer".into(),
            exclusions: [
                "zpo_valid",
                "zouit",
                "spritzones",
                "oozt",
                "renovation_sites",
                "krt",
                "mkd",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            encoding: default_native_encoding(),
        }
    }
}

/// Entrée du registre : dossier + fichier sous `data_dir`
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LayerEntry {
    pub folder: String,
    pub file: String,
    #[serde(default = "default_layer_encoding")]
    pub encoding: String,
    /// Colonne de coloration par défaut de l'aperçu
    #[serde(default)]
    pub column: Option<String>,
}

fn default_target_crs() -> String {
    "EPSG:4326".to_string()
}

fn default_timeout() -> u64 {
    120
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("shapefiles")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("processed_data")
}

fn default_cache_capacity() -> usize {
    32
}

fn default_native_encoding() -> String {
    "cp1251".to_string()
}

fn default_layer_encoding() -> String {
    "UTF-8".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target_crs: default_target_crs(),
            correction: OffsetCorrection::default(),
            overlay_timeout_secs: default_timeout(),
            data_dir: default_data_dir(),
            output_dir: default_output_dir(),
            cache_capacity: default_cache_capacity(),
            lineage: LineageMode::default(),
            export_native: false,
            native_encoding: default_native_encoding(),
            default_crs: None,
            solution: SolutionConfig::default(),
            layers: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Charge une configuration depuis un fichier
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        serde_json::from_str(&content).context("Failed to parse config JSON")
    }

    /// Charge une configuration depuis un preset embarqué
    pub fn from_preset(preset: &str) -> Result<Self> {
        match preset {
            "moscow" => Self::load_embedded(include_str!("presets/moscow.json")),
            "default" => Ok(Self::default()),
            _ => anyhow::bail!("Unknown preset: {}. Use: moscow, default", preset),
        }
    }

    /// Preset embarqué ou chemin vers un JSON
    pub fn resolve(spec: &str) -> Result<Self> {
        let path = Path::new(spec);
        if path.extension().map_or(false, |ext| ext == "json") || path.exists() {
            Self::load(path)
        } else {
            Self::from_preset(spec)
        }
    }

    fn load_embedded(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse embedded config")
    }

    /// Applique `FREEPLOT_DATA_DIR`, `FREEPLOT_OUTPUT_DIR` et `FREEPLOT_OVERLAY_TIMEOUT`
    pub fn with_env_overrides(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("FREEPLOT_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = std::env::var("FREEPLOT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(dir);
        }
        if let Ok(secs) = std::env::var("FREEPLOT_OVERLAY_TIMEOUT") {
            self.overlay_timeout_secs = secs
                .parse()
                .context(format!("Invalid FREEPLOT_OVERLAY_TIMEOUT: {}", secs))?;
        }
        debug!(
            data_dir = %self.data_dir.display(),
            output_dir = %self.output_dir.display(),
            timeout_secs = self.overlay_timeout_secs,
            "Configuration loaded"
        );
        Ok(self)
    }

    pub fn target_crs(&self) -> Result<Crs, FreeplotError> {
        parse_crs(&self.target_crs)
    }

    pub fn default_crs(&self) -> Result<Option<Crs>, FreeplotError> {
        self.default_crs.as_deref().map(parse_crs).transpose()
    }

    pub fn native_encoding(&self) -> Result<CharacterEncoding, FreeplotError> {
        parse_encoding(&self.native_encoding)
    }

    pub fn solution_encoding(&self) -> Result<CharacterEncoding, FreeplotError> {
        parse_encoding(&self.solution.encoding)
    }

    pub fn overlay_timeout(&self) -> Duration {
        Duration::from_secs(self.overlay_timeout_secs)
    }

    /// Récupère une entrée du registre
    pub fn layer(&self, key: &str) -> Option<&LayerEntry> {
        self.layers.get(key)
    }

    /// Chemin complet d'une couche de référence
    pub fn layer_path(&self, entry: &LayerEntry) -> PathBuf {
        self.data_dir.join(&entry.folder).join(&entry.file)
    }
}

impl LayerEntry {
    pub fn encoding(&self) -> Result<CharacterEncoding, FreeplotError> {
        parse_encoding(&self.encoding)
    }

    /// Nom de la couche (nom du fichier sans extension)
    pub fn name(&self) -> &str {
        self.file.strip_suffix(".shp").unwrap_or(&self.file)
    }
}

fn parse_crs(text: &str) -> Result<Crs, FreeplotError> {
    text.parse::<Crs>()
        .map_err(|e| FreeplotError::Config(format!("invalid CRS {}: {}", text, e)))
}

fn parse_encoding(label: &str) -> Result<CharacterEncoding, FreeplotError> {
    CharacterEncoding::from_label(label).map_err(FreeplotError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moscow_preset() {
        let config = Config::from_preset("moscow").unwrap();
        assert_eq!(config.target_crs().unwrap(), Crs::Epsg(4326));
        assert_eq!(config.solution.base, "base_layer");
        assert_eq!(config.solution.exclusions.len(), 7);
        assert_eq!(config.solution.exclusions[0], "zpo_valid");
        assert_eq!(config.solution.exclusions[6], "mkd");
        assert!((config.correction.lat_offset - 0.00016).abs() < 1e-12);
        assert!((config.correction.lon_offset + 0.001476).abs() < 1e-12);

        let mkd = config.layer("mkd").unwrap();
        assert_eq!(mkd.encoding().unwrap(), CharacterEncoding::Utf8);
        assert_eq!(mkd.name(), "МКД");
        assert!(config
            .layer_path(mkd)
            .ends_with(Path::new("_15_МКД").join("МКД.shp")));

        let roads = config.layer("ydc_roads").unwrap();
        assert_eq!(roads.encoding().unwrap(), CharacterEncoding::Windows1251);

        assert!(matches!(config.default_crs().unwrap(), Some(Crs::Proj4(_))));
    }

    #[test]
    fn test_defaults_have_no_fallback_crs() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert!(config.default_crs().unwrap().is_none());
        assert_eq!(config.overlay_timeout(), Duration::from_secs(120));
        assert_eq!(config.lineage, LineageMode::Fresh);
        assert_eq!(config.solution.exclusions.len(), 7);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(Config::from_preset("paris").is_err());
    }

    #[test]
    fn test_invalid_values_surface_as_config_errors() {
        let config = Config {
            target_crs: "not a crs".into(),
            native_encoding: "koi8-r".into(),
            ..Config::default()
        };
        assert!(matches!(config.target_crs(), Err(FreeplotError::Config(_))));
        assert!(matches!(
            config.native_encoding(),
            Err(FreeplotError::Config(_))
        ));
    }
}
