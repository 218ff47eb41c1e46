//! Artefacts de run dans le répertoire de sortie

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use geo::Geometry;
use serde::Serialize;
use shpfile::{AttributeValue, CharacterEncoding, Crs, Feature, Layer, OutputFormat};
use tracing::info;

use crate::error::{FreeplotError, Result};
use crate::versioning::Shape;

/// Fichier présent dans le répertoire de sortie
#[derive(Debug, Clone, Serialize)]
pub struct ArtifactInfo {
    pub name: String,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

/// `remainder_v0007_1718000000.geojson`
pub fn geojson_name(version: i32, at: SystemTime) -> String {
    let seconds = at.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0);
    format!("remainder_v{:04}_{}.geojson", version, seconds)
}

/// `remainder_v0007.tar`
pub fn native_name(version: i32) -> String {
    format!("remainder_v{:04}.tar", version)
}

/// Écrit un artefact, en créant le répertoire au besoin
pub fn write_artifact(dir: &Path, name: &str, content: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, content)?;
    info!(path = %path.display(), bytes = content.len(), "Artifact written");
    Ok(path)
}

/// Bundle shapefile des shapes (attributs shape_id et version)
pub fn shapes_to_native(
    shapes: &[Shape],
    geometries: &[Geometry],
    crs: &Crs,
    encoding: CharacterEncoding,
    version: i32,
) -> Result<Vec<u8>> {
    let mut layer = Layer::new(format!("remainder_v{:04}", version), crs.clone(), encoding);
    for (i, (shape, geometry)) in shapes.iter().zip(geometries).enumerate() {
        let mut feature = Feature::new(i as u64 + 1, geometry.clone());
        feature.attributes = BTreeMap::from([
            ("shape_id".to_string(), AttributeValue::Number(shape.shape_id as f64)),
            ("version".to_string(), AttributeValue::Number(f64::from(shape.version))),
        ]);
        layer.features.push(feature);
    }
    Ok(shpfile::serialize(&layer, OutputFormat::Shapefile)?)
}

/// Artefacts du répertoire, triés par nom ; répertoire absent = liste vide
pub fn list_artifacts(dir: &Path) -> Result<Vec<ArtifactInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut artifacts = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        artifacts.push(ArtifactInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            size: metadata.len(),
            modified: metadata.modified().ok(),
        });
    }
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(artifacts)
}

/// Contenu d'un artefact ; un nom qui sort du répertoire est inconnu
pub fn read_artifact(dir: &Path, name: &str) -> Result<Vec<u8>> {
    if name.is_empty() || name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(FreeplotError::NotFound(format!("artifact {}", name)));
    }
    let path = dir.join(name);
    if !path.is_file() {
        return Err(FreeplotError::NotFound(format!("artifact {}", name)));
    }
    Ok(std::fs::read(path)?)
}
