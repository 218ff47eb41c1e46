//! Sorties d'un run : GeoJSON, artefacts, transaction PostGIS

pub mod artifact;
pub mod geojson;
pub mod pool;
#[cfg(feature = "reproject")]
pub mod reproject;
pub mod transaction;

pub use artifact::{list_artifacts, read_artifact, write_artifact, ArtifactInfo};
pub use geojson::shapes_to_geojson;
