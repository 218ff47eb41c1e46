//! Génération du commentaire IA d'une shape
//!
//! Le générateur est un collaborateur externe opaque : il reçoit la shape
//! et renvoie un texte, stocké tel quel dans `ai_gen_comment`.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::store::{Shape, ShapeStore};
use crate::error::{FreeplotError, Result};

/// Producteur de texte à partir d'une shape
#[async_trait]
pub trait CommentGenerator: Send + Sync {
    async fn generate(&self, shape: &Shape) -> anyhow::Result<String>;
}

/// Régénère et stocke le commentaire IA de la dernière version de la lignée
pub async fn refresh_ai_comment(
    store: &dyn ShapeStore,
    generator: &dyn CommentGenerator,
    shape_id: i64,
) -> Result<Shape> {
    let shape = store.get(shape_id).await?;

    let text = generator.generate(&shape).await.map_err(|e| {
        warn!(shape_id, error = %e, "Comment generation failed");
        FreeplotError::Generator(e.to_string())
    })?;

    debug!(shape_id, chars = text.chars().count(), "AI comment generated");
    store.update_ai_comment(shape_id, &text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::versioning::MemoryShapeStore;
    use geo::{LineString, Polygon};

    struct Echo;

    #[async_trait]
    impl CommentGenerator for Echo {
        async fn generate(&self, shape: &Shape) -> anyhow::Result<String> {
            Ok(format!("shape {} v{}", shape.shape_id, shape.version))
        }
    }

    struct Failing;

    #[async_trait]
    impl CommentGenerator for Failing {
        async fn generate(&self, _shape: &Shape) -> anyhow::Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    async fn store_with_one_shape() -> (MemoryShapeStore, i64) {
        let store = MemoryShapeStore::new();
        let polygon = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let committed = store.commit_next_version(&[polygon]).await.unwrap();
        let id = committed.shapes[0].shape_id;
        (store, id)
    }

    #[tokio::test]
    async fn test_refresh_stores_generated_text() {
        let (store, id) = store_with_one_shape().await;
        store.update_comment(id, "manual").await.unwrap();

        let shape = refresh_ai_comment(&store, &Echo, id).await.unwrap();
        assert_eq!(shape.ai_gen_comment, format!("shape {} v1", id));
        assert_eq!(shape.comment, "manual");
    }

    #[tokio::test]
    async fn test_generator_failure_keeps_previous_text() {
        let (store, id) = store_with_one_shape().await;
        store.update_ai_comment(id, "previous").await.unwrap();

        let err = refresh_ai_comment(&store, &Failing, id).await.unwrap_err();
        assert!(matches!(err, FreeplotError::Generator(ref m) if m.contains("quota")));
        assert_eq!(store.get(id).await.unwrap().ai_gen_comment, "previous");
    }

    #[tokio::test]
    async fn test_unknown_shape() {
        let store = MemoryShapeStore::new();
        let err = refresh_ai_comment(&store, &Echo, 99).await.unwrap_err();
        assert!(matches!(err, FreeplotError::NotFound(_)));
    }
}
