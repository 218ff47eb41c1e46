//! Stockage en mémoire, pour les tests et les runs sans base

use std::time::SystemTime;

use async_trait::async_trait;
use geo::Polygon;
use tokio::sync::RwLock;
use tracing::info;

use super::diff::{GeometryHash, LineageIndex};
use super::store::{
    CommittedVersion, LineageMode, PendingShape, Shape, ShapeFilter, ShapeStore, VersionInfo,
};
use crate::error::{FreeplotError, Result};

#[derive(Debug)]
struct Row {
    shape: Shape,
    hash: GeometryHash,
}

#[derive(Debug, Default)]
struct State {
    rows: Vec<Row>,
    versions: Vec<VersionInfo>,
    next_shape_id: i64,
}

impl State {
    fn latest_version(&self) -> Option<i32> {
        self.versions.last().map(|v| v.version)
    }

    /// Ligne de la dernière version de la lignée
    fn latest_row_mut(&mut self, shape_id: i64) -> Result<&mut Row> {
        self.rows
            .iter_mut()
            .filter(|r| r.shape.shape_id == shape_id)
            .max_by_key(|r| r.shape.version)
            .ok_or_else(|| FreeplotError::NotFound(format!("shape {}", shape_id)))
    }

    fn lineage_index(&self, mode: LineageMode) -> LineageIndex {
        match (mode, self.latest_version()) {
            (LineageMode::GeometryHash, Some(previous)) => LineageIndex::new(
                self.rows
                    .iter()
                    .filter(|r| r.shape.version == previous)
                    .map(|r| (r.hash, r.shape.shape_id)),
            ),
            _ => LineageIndex::default(),
        }
    }

    fn insert_batch(&mut self, pending: Vec<PendingShape>, version: i32, mode: LineageMode) -> Vec<Shape> {
        let mut lineage = self.lineage_index(mode);
        let now = SystemTime::now();
        let mut shapes = Vec::with_capacity(pending.len());

        for p in pending {
            let shape_id = match lineage.claim(&p.hash) {
                Some(id) => id,
                None => {
                    self.next_shape_id += 1;
                    self.next_shape_id
                }
            };
            let shape = Shape {
                shape_id,
                version,
                geometry: p.wkt,
                comment: String::new(),
                added_to_favorites: false,
                ai_gen_comment: String::new(),
                created_at: now,
                updated_at: now,
            };
            shapes.push(shape.clone());
            self.rows.push(Row {
                shape,
                hash: p.hash,
            });
        }

        self.versions.push(VersionInfo {
            version,
            shape_count: shapes.len() as i64,
            created_at: now,
        });
        shapes
    }
}

/// Stockage en mémoire ; le verrou en écriture sérialise les commits
#[derive(Debug, Default)]
pub struct MemoryShapeStore {
    lineage: LineageMode,
    state: RwLock<State>,
}

impl MemoryShapeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lineage(lineage: LineageMode) -> Self {
        Self {
            lineage,
            state: RwLock::default(),
        }
    }

    async fn annotate<F>(&self, shape_id: i64, apply: F) -> Result<Shape>
    where
        F: FnOnce(&mut Shape) + Send,
    {
        let mut state = self.state.write().await;
        let row = state.latest_row_mut(shape_id)?;
        apply(&mut row.shape);
        row.shape.updated_at = SystemTime::now();
        Ok(row.shape.clone())
    }
}

#[async_trait]
impl ShapeStore for MemoryShapeStore {
    async fn commit_next_version(&self, polygons: &[Polygon]) -> Result<CommittedVersion> {
        let pending = PendingShape::batch(polygons)?;
        let mut state = self.state.write().await;
        let version = state.latest_version().unwrap_or(0) + 1;
        let shapes = state.insert_batch(pending, version, self.lineage);

        info!(version, shapes = shapes.len(), "Version committed (memory)");
        Ok(CommittedVersion { version, shapes })
    }

    async fn persist_version(&self, polygons: &[Polygon], version: i32) -> Result<Vec<Shape>> {
        let pending = PendingShape::batch(polygons)?;
        let mut state = self.state.write().await;
        let latest = state.latest_version().unwrap_or(0);
        if version <= latest {
            return Err(FreeplotError::Persistence(format!(
                "version {} is not greater than the latest committed version {}",
                version, latest
            )));
        }
        Ok(state.insert_batch(pending, version, self.lineage))
    }

    async fn get(&self, shape_id: i64) -> Result<Shape> {
        let state = self.state.read().await;
        state
            .rows
            .iter()
            .filter(|r| r.shape.shape_id == shape_id)
            .max_by_key(|r| r.shape.version)
            .map(|r| r.shape.clone())
            .ok_or_else(|| FreeplotError::NotFound(format!("shape {}", shape_id)))
    }

    async fn get_at(&self, shape_id: i64, version: i32) -> Result<Shape> {
        let state = self.state.read().await;
        state
            .rows
            .iter()
            .find(|r| r.shape.shape_id == shape_id && r.shape.version == version)
            .map(|r| r.shape.clone())
            .ok_or_else(|| {
                FreeplotError::NotFound(format!("shape {} at version {}", shape_id, version))
            })
    }

    async fn list(&self, filter: ShapeFilter, offset: i64, limit: i64) -> Result<Vec<Shape>> {
        let state = self.state.read().await;
        Ok(state
            .rows
            .iter()
            .filter(|r| filter.matches(&r.shape))
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|r| r.shape.clone())
            .collect())
    }

    async fn get_version(&self, version: i32) -> Result<Vec<Shape>> {
        let state = self.state.read().await;
        if !state.versions.iter().any(|v| v.version == version) {
            return Err(FreeplotError::NotFound(format!("version {}", version)));
        }
        Ok(state
            .rows
            .iter()
            .filter(|r| r.shape.version == version)
            .map(|r| r.shape.clone())
            .collect())
    }

    async fn latest_version(&self) -> Result<Option<i32>> {
        Ok(self.state.read().await.latest_version())
    }

    async fn list_versions(&self) -> Result<Vec<VersionInfo>> {
        Ok(self.state.read().await.versions.clone())
    }

    async fn update_comment(&self, shape_id: i64, comment: &str) -> Result<Shape> {
        let comment = comment.to_string();
        self.annotate(shape_id, move |s| s.comment = comment).await
    }

    async fn set_favorite(&self, shape_id: i64, favorite: bool) -> Result<Shape> {
        self.annotate(shape_id, move |s| s.added_to_favorites = favorite)
            .await
    }

    async fn update_ai_comment(&self, shape_id: i64, text: &str) -> Result<Shape> {
        let text = text.to_string();
        self.annotate(shape_id, move |s| s.ai_gen_comment = text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::LineString;

    fn square(x0: f64, size: f64) -> Polygon {
        Polygon::new(
            LineString::from(vec![
                (x0, 0.0),
                (x0 + size, 0.0),
                (x0 + size, size),
                (x0, size),
                (x0, 0.0),
            ]),
            vec![],
        )
    }

    #[tokio::test]
    async fn test_versions_start_at_one() {
        let store = MemoryShapeStore::new();
        assert_eq!(store.latest_version().await.unwrap(), None);

        let first = store.commit_next_version(&[square(0.0, 1.0)]).await.unwrap();
        let second = store.commit_next_version(&[square(0.0, 1.0)]).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.latest_version().await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_empty_batch_consumes_version() {
        let store = MemoryShapeStore::new();
        let committed = store.commit_next_version(&[]).await.unwrap();
        assert_eq!(committed.version, 1);
        assert!(store.get_version(1).await.unwrap().is_empty());
        assert_eq!(store.commit_next_version(&[]).await.unwrap().version, 2);
    }

    #[tokio::test]
    async fn test_fresh_ids_each_run() {
        let store = MemoryShapeStore::new();
        let a = store.commit_next_version(&[square(0.0, 1.0)]).await.unwrap();
        let b = store.commit_next_version(&[square(0.0, 1.0)]).await.unwrap();
        assert_ne!(a.shapes[0].shape_id, b.shapes[0].shape_id);
    }

    #[tokio::test]
    async fn test_geometry_hash_lineage() {
        let store = MemoryShapeStore::with_lineage(LineageMode::GeometryHash);
        let a = store
            .commit_next_version(&[square(0.0, 1.0), square(5.0, 1.0)])
            .await
            .unwrap();
        let b = store
            .commit_next_version(&[square(5.0, 1.0), square(9.0, 1.0)])
            .await
            .unwrap();

        assert_eq!(b.shapes[0].shape_id, a.shapes[1].shape_id);
        assert_ne!(b.shapes[1].shape_id, a.shapes[0].shape_id);

        // get() renvoie la dernière version de la lignée
        let latest = store.get(a.shapes[1].shape_id).await.unwrap();
        assert_eq!(latest.version, 2);
        let old = store.get_at(a.shapes[1].shape_id, 1).await.unwrap();
        assert_eq!(old.version, 1);
    }

    #[tokio::test]
    async fn test_persist_version_must_increase() {
        let store = MemoryShapeStore::new();
        store.persist_version(&[square(0.0, 1.0)], 5).await.unwrap();
        let err = store.persist_version(&[square(0.0, 1.0)], 5).await.unwrap_err();
        assert!(matches!(err, FreeplotError::Persistence(_)));
        assert_eq!(store.commit_next_version(&[]).await.unwrap().version, 6);
    }

    #[tokio::test]
    async fn test_annotations_are_independent() {
        let store = MemoryShapeStore::new();
        let committed = store
            .commit_next_version(&[square(0.0, 1.0), square(5.0, 1.0)])
            .await
            .unwrap();
        let x = committed.shapes[0].shape_id;
        let y = committed.shapes[1].shape_id;

        store.set_favorite(x, true).await.unwrap();
        store.update_ai_comment(x, "review").await.unwrap();
        let updated = store.update_comment(x, "à vérifier").await.unwrap();

        assert_eq!(updated.comment, "à vérifier");
        assert!(updated.added_to_favorites);
        assert_eq!(updated.ai_gen_comment, "review");
        assert!(updated.updated_at >= updated.created_at);

        let other = store.get(y).await.unwrap();
        assert_eq!(other, committed.shapes[1]);
    }

    #[tokio::test]
    async fn test_annotation_is_idempotent() {
        let store = MemoryShapeStore::new();
        let id = store.commit_next_version(&[square(0.0, 1.0)]).await.unwrap().shapes[0].shape_id;

        let once = store.set_favorite(id, true).await.unwrap();
        let twice = store.set_favorite(id, true).await.unwrap();
        assert_eq!(once.added_to_favorites, twice.added_to_favorites);
        assert_eq!(once.comment, twice.comment);
    }

    #[tokio::test]
    async fn test_list_and_favorites() {
        let store = MemoryShapeStore::new();
        let committed = store
            .commit_next_version(&[square(0.0, 1.0), square(2.0, 1.0), square(4.0, 1.0)])
            .await
            .unwrap();
        store.set_favorite(committed.shapes[1].shape_id, true).await.unwrap();

        let all = store.list(ShapeFilter::default(), 0, 10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].shape_id, committed.shapes[0].shape_id);

        let page = store.list(ShapeFilter::default(), 1, 1).await.unwrap();
        assert_eq!(page[0].shape_id, committed.shapes[1].shape_id);

        let favorites = store.list_favorites(0, 10).await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].shape_id, committed.shapes[1].shape_id);
    }

    #[tokio::test]
    async fn test_not_found() {
        let store = MemoryShapeStore::new();
        assert!(matches!(store.get(7).await, Err(FreeplotError::NotFound(_))));
        assert!(matches!(
            store.update_comment(7, "x").await,
            Err(FreeplotError::NotFound(_))
        ));
        assert!(matches!(store.get_version(1).await, Err(FreeplotError::NotFound(_))));
    }
}
