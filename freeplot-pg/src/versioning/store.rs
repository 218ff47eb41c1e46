//! Modèle persistant des shapes et trait de stockage

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use geo::{Geometry, Polygon};
use serde::{Deserialize, Serialize};

use super::diff::{polygon_hash, GeometryHash};
use crate::error::Result;

/// Attribution des shape_id lors d'un commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineageMode {
    /// Chaque polygone reçoit un nouvel identifiant
    #[default]
    Fresh,
    /// Un polygone identique (hash normalisé) à un polygone de la version
    /// précédente hérite de son shape_id
    GeometryHash,
}

/// Un polygone du reste à une version donnée
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shape {
    pub shape_id: i64,
    pub version: i32,
    /// Polygone en WKT
    pub geometry: String,
    pub comment: String,
    pub added_to_favorites: bool,
    pub ai_gen_comment: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
}

impl Shape {
    /// Secondes depuis l'epoch de la dernière modification
    pub fn updated_unix(&self) -> u64 {
        self.updated_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Filtre de listing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShapeFilter {
    pub favorites_only: bool,
    pub version: Option<i32>,
}

impl ShapeFilter {
    pub fn favorites() -> Self {
        Self {
            favorites_only: true,
            version: None,
        }
    }

    pub fn version(version: i32) -> Self {
        Self {
            favorites_only: false,
            version: Some(version),
        }
    }

    pub fn matches(&self, shape: &Shape) -> bool {
        (!self.favorites_only || shape.added_to_favorites)
            && self.version.map_or(true, |v| shape.version == v)
    }
}

/// Version commitée
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionInfo {
    pub version: i32,
    pub shape_count: i64,
    pub created_at: SystemTime,
}

/// Résultat d'un commit de version
#[derive(Debug, Clone)]
pub struct CommittedVersion {
    pub version: i32,
    pub shapes: Vec<Shape>,
}

/// Polygone prêt à être inséré : WKT et hash calculés une fois
#[derive(Debug, Clone)]
pub struct PendingShape {
    pub polygon: Polygon,
    pub wkt: String,
    pub hash: GeometryHash,
}

impl PendingShape {
    pub fn new(polygon: Polygon) -> Result<Self> {
        let wkt = shpfile::to_wkt(&Geometry::Polygon(polygon.clone()))?;
        let hash = polygon_hash(&polygon);
        Ok(Self { polygon, wkt, hash })
    }

    pub fn batch(polygons: &[Polygon]) -> Result<Vec<Self>> {
        polygons.iter().cloned().map(Self::new).collect()
    }
}

/// Stockage versionné des shapes.
///
/// Les versions sont attribuées sous exclusion mutuelle : deux commits
/// concurrents ne reçoivent jamais le même numéro et un lot est visible
/// en entier ou pas du tout.
#[async_trait]
pub trait ShapeStore: Send + Sync {
    /// Alloue `max(version) + 1` et insère le lot
    async fn commit_next_version(&self, polygons: &[Polygon]) -> Result<CommittedVersion>;

    /// Insère le lot à une version choisie, strictement supérieure à la dernière
    async fn persist_version(&self, polygons: &[Polygon], version: i32) -> Result<Vec<Shape>>;

    /// Dernière version de la lignée
    async fn get(&self, shape_id: i64) -> Result<Shape>;

    async fn get_at(&self, shape_id: i64, version: i32) -> Result<Shape>;

    /// Shapes dans l'ordre de création
    async fn list(&self, filter: ShapeFilter, offset: i64, limit: i64) -> Result<Vec<Shape>>;

    async fn list_favorites(&self, offset: i64, limit: i64) -> Result<Vec<Shape>> {
        self.list(ShapeFilter::favorites(), offset, limit).await
    }

    /// Toutes les shapes d'une version ; NotFound si la version n'existe pas
    async fn get_version(&self, version: i32) -> Result<Vec<Shape>>;

    async fn latest_version(&self) -> Result<Option<i32>>;

    async fn list_versions(&self) -> Result<Vec<VersionInfo>>;

    async fn update_comment(&self, shape_id: i64, comment: &str) -> Result<Shape>;

    async fn set_favorite(&self, shape_id: i64, favorite: bool) -> Result<Shape>;

    async fn update_ai_comment(&self, shape_id: i64, text: &str) -> Result<Shape>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;

    fn shape(version: i32, favorite: bool) -> Shape {
        Shape {
            shape_id: 1,
            version,
            geometry: "POLYGON((0 0,1 0,1 1,0 0))".into(),
            comment: String::new(),
            added_to_favorites: favorite,
            ai_gen_comment: String::new(),
            created_at: UNIX_EPOCH,
            updated_at: UNIX_EPOCH,
        }
    }

    #[test]
    fn test_filter_matches() {
        assert!(ShapeFilter::default().matches(&shape(1, false)));
        assert!(!ShapeFilter::favorites().matches(&shape(1, false)));
        assert!(ShapeFilter::favorites().matches(&shape(1, true)));
        assert!(ShapeFilter::version(2).matches(&shape(2, false)));
        assert!(!ShapeFilter::version(2).matches(&shape(1, false)));
    }

    #[test]
    fn test_lineage_mode_serde() {
        let mode: LineageMode = serde_json::from_str("\"geometry_hash\"").unwrap();
        assert_eq!(mode, LineageMode::GeometryHash);
        assert_eq!(serde_json::to_string(&LineageMode::Fresh).unwrap(), "\"fresh\"");
    }

    #[test]
    fn test_pending_shape_wkt() {
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (2.0, 0.0), (2.0, 2.0), (0.0, 0.0)]),
            vec![],
        );
        let pending = PendingShape::new(polygon).unwrap();
        assert!(pending.wkt.starts_with("POLYGON"));
    }
}
