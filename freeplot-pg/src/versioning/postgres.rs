//! Stockage PostgreSQL/PostGIS des shapes

use async_trait::async_trait;
use deadpool_postgres::Pool;
use geo::{Geometry, Polygon};
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;
use tracing::{debug, info, warn};
use wkb::geom_to_wkb;

use super::diff::{GeometryHash, LineageIndex};
use super::store::{
    CommittedVersion, LineageMode, PendingShape, Shape, ShapeFilter, ShapeStore, VersionInfo,
};
use crate::error::{FreeplotError, Result};
use crate::export::transaction::VersionCommit;

/// Schéma par défaut
pub const DEFAULT_SCHEMA: &str = "freeplot";

/// Colonnes d'une shape, géométrie en WKT
const SHAPE_COLUMNS: &str = "shape_id, version, ST_AsText(geometry) AS geometry, comment, \
     added_to_favorites, ai_gen_comment, created_at, updated_at";

/// Stockage des shapes dans PostGIS
pub struct PgShapeStore {
    pool: Pool,
    schema: String,
    srid: u32,
    lineage: LineageMode,
}

impl PgShapeStore {
    pub fn new(pool: Pool, schema: impl Into<String>, srid: u32) -> Self {
        Self {
            pool,
            schema: schema.into(),
            srid,
            lineage: LineageMode::Fresh,
        }
    }

    pub fn with_lineage(mut self, lineage: LineageMode) -> Self {
        self.lineage = lineage;
        self
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    /// Crée l'extension, le schéma, la séquence, les tables et les index
    pub async fn init_schema(&self, drop_existing: bool) -> Result<()> {
        let client = self.pool.get().await?;
        let s = &self.schema;

        if drop_existing {
            client
                .execute(&format!("DROP SCHEMA IF EXISTS {} CASCADE", s), &[])
                .await?;
        }

        // L'extension peut exiger des droits superuser
        if let Err(e) = client
            .execute("CREATE EXTENSION IF NOT EXISTS postgis", &[])
            .await
        {
            warn!("CREATE EXTENSION postgis failed (will check if already installed): {e}");
            let exists = client
                .query_opt("SELECT 1 FROM pg_extension WHERE extname = 'postgis'", &[])
                .await?
                .is_some();
            if !exists {
                return Err(FreeplotError::Persistence(format!(
                    "PostGIS extension is not installed and could not be created: {e}"
                )));
            }
        }

        let ddl = format!(
            r#"
            CREATE SCHEMA IF NOT EXISTS {s};
            CREATE SEQUENCE IF NOT EXISTS {s}.shape_id_seq;
            CREATE TABLE IF NOT EXISTS {s}.shape_versions (
                version INTEGER PRIMARY KEY CHECK (version > 0),
                shape_count INTEGER NOT NULL DEFAULT 0,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            );
            CREATE TABLE IF NOT EXISTS {s}.shapes (
                row_id BIGSERIAL PRIMARY KEY,
                shape_id BIGINT NOT NULL,
                version INTEGER NOT NULL REFERENCES {s}.shape_versions (version),
                geometry geometry(Polygon, {srid}) NOT NULL,
                geometry_hash BYTEA NOT NULL,
                comment TEXT NOT NULL DEFAULT '',
                added_to_favorites BOOLEAN NOT NULL DEFAULT false,
                ai_gen_comment TEXT NOT NULL DEFAULT '',
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (shape_id, version)
            );
            CREATE INDEX IF NOT EXISTS idx_shapes_version ON {s}.shapes (version);
            CREATE INDEX IF NOT EXISTS idx_shapes_favorites ON {s}.shapes (row_id)
                WHERE added_to_favorites;
            CREATE INDEX IF NOT EXISTS idx_shapes_geom ON {s}.shapes USING GIST (geometry);
            "#,
            s = s,
            srid = self.srid
        );
        client.batch_execute(&ddl).await?;

        info!(schema = %s, srid = self.srid, "Schema ready");
        Ok(())
    }

    /// Index de lignée sur la dernière version commitée
    async fn lineage_index(&self, commit: &VersionCommit<'_>) -> Result<LineageIndex> {
        if self.lineage != LineageMode::GeometryHash {
            return Ok(LineageIndex::default());
        }
        let previous = commit.latest_version().await?;
        let rows = commit
            .transaction()
            .query(
                &format!(
                    "SELECT geometry_hash, shape_id FROM {}.shapes WHERE version = $1",
                    self.schema
                ),
                &[&previous],
            )
            .await?;

        let entries = rows.iter().filter_map(|row| {
            let hash: Vec<u8> = row.get(0);
            let hash: GeometryHash = hash.try_into().ok()?;
            Some((hash, row.get::<_, i64>(1)))
        });
        Ok(LineageIndex::new(entries))
    }

    async fn insert_batch(
        &self,
        commit: &mut VersionCommit<'_>,
        pending: &[PendingShape],
        mut lineage: LineageIndex,
    ) -> Result<Vec<Shape>> {
        let version = commit.version().ok_or_else(|| {
            FreeplotError::Persistence("insert without a reserved version".into())
        })?;
        let sql = format!(
            "INSERT INTO {s}.shapes (shape_id, version, geometry, geometry_hash)
             VALUES (COALESCE($1, nextval('{s}.shape_id_seq')), $2, ST_GeomFromEWKB($3), $4)
             RETURNING {cols}",
            s = self.schema,
            cols = SHAPE_COLUMNS
        );
        let stmt = commit.transaction().prepare(&sql).await?;

        let mut shapes = Vec::with_capacity(pending.len());
        for p in pending {
            let inherited: Option<i64> = lineage.claim(&p.hash);
            let ewkb = geometry_to_ewkb(&Geometry::Polygon(p.polygon.clone()), self.srid)?;
            let row = commit
                .transaction()
                .query_one(&stmt, &[&inherited, &version, &ewkb, &p.hash.as_slice()])
                .await?;
            shapes.push(shape_from_row(&row));
        }
        commit.record_insert(shapes.len());

        debug!(version, shapes = shapes.len(), "Shapes inserted");
        Ok(shapes)
    }

    /// Met à jour un champ d'annotation de la dernière version de la lignée
    async fn annotate(
        &self,
        shape_id: i64,
        assignment: &str,
        value: &(dyn ToSql + Sync),
    ) -> Result<Shape> {
        let client = self.pool.get().await?;
        let sql = format!(
            "UPDATE {s}.shapes SET {assignment}, updated_at = now()
             WHERE row_id = (
                 SELECT row_id FROM {s}.shapes WHERE shape_id = $1
                 ORDER BY version DESC LIMIT 1
             )
             RETURNING {cols}",
            s = self.schema,
            assignment = assignment,
            cols = SHAPE_COLUMNS
        );
        client
            .query_opt(&sql, &[&shape_id, value])
            .await?
            .map(|row| shape_from_row(&row))
            .ok_or_else(|| FreeplotError::NotFound(format!("shape {}", shape_id)))
    }
}

#[async_trait]
impl ShapeStore for PgShapeStore {
    async fn commit_next_version(&self, polygons: &[Polygon]) -> Result<CommittedVersion> {
        let pending = PendingShape::batch(polygons)?;
        let mut client = self.pool.get().await?;
        let mut commit = VersionCommit::begin(&mut client, &self.schema).await?;

        let lineage = self.lineage_index(&commit).await?;
        let version = commit.allocate_next().await?;
        match self.insert_batch(&mut commit, &pending, lineage).await {
            Ok(shapes) => {
                commit.commit().await?;
                Ok(CommittedVersion { version, shapes })
            }
            Err(e) => {
                commit.rollback(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn persist_version(&self, polygons: &[Polygon], version: i32) -> Result<Vec<Shape>> {
        let pending = PendingShape::batch(polygons)?;
        let mut client = self.pool.get().await?;
        let mut commit = VersionCommit::begin(&mut client, &self.schema).await?;

        let lineage = self.lineage_index(&commit).await?;
        commit.claim(version).await?;
        match self.insert_batch(&mut commit, &pending, lineage).await {
            Ok(shapes) => {
                commit.commit().await?;
                Ok(shapes)
            }
            Err(e) => {
                commit.rollback(&e.to_string()).await;
                Err(e)
            }
        }
    }

    async fn get(&self, shape_id: i64) -> Result<Shape> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM {}.shapes WHERE shape_id = $1 ORDER BY version DESC LIMIT 1",
            SHAPE_COLUMNS, self.schema
        );
        client
            .query_opt(&sql, &[&shape_id])
            .await?
            .map(|row| shape_from_row(&row))
            .ok_or_else(|| FreeplotError::NotFound(format!("shape {}", shape_id)))
    }

    async fn get_at(&self, shape_id: i64, version: i32) -> Result<Shape> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM {}.shapes WHERE shape_id = $1 AND version = $2",
            SHAPE_COLUMNS, self.schema
        );
        client
            .query_opt(&sql, &[&shape_id, &version])
            .await?
            .map(|row| shape_from_row(&row))
            .ok_or_else(|| {
                FreeplotError::NotFound(format!("shape {} at version {}", shape_id, version))
            })
    }

    async fn list(&self, filter: ShapeFilter, offset: i64, limit: i64) -> Result<Vec<Shape>> {
        let client = self.pool.get().await?;
        let sql = format!(
            "SELECT {} FROM {}.shapes
             WHERE ($1::boolean = false OR added_to_favorites)
               AND ($2::integer IS NULL OR version = $2)
             ORDER BY row_id
             OFFSET $3 LIMIT $4",
            SHAPE_COLUMNS, self.schema
        );
        let rows = client
            .query(
                &sql,
                &[&filter.favorites_only, &filter.version, &offset.max(0), &limit.max(0)],
            )
            .await?;
        Ok(rows.iter().map(shape_from_row).collect())
    }

    async fn get_version(&self, version: i32) -> Result<Vec<Shape>> {
        let client = self.pool.get().await?;
        let exists = client
            .query_opt(
                &format!("SELECT 1 FROM {}.shape_versions WHERE version = $1", self.schema),
                &[&version],
            )
            .await?
            .is_some();
        if !exists {
            return Err(FreeplotError::NotFound(format!("version {}", version)));
        }

        let sql = format!(
            "SELECT {} FROM {}.shapes WHERE version = $1 ORDER BY row_id",
            SHAPE_COLUMNS, self.schema
        );
        let rows = client.query(&sql, &[&version]).await?;
        Ok(rows.iter().map(shape_from_row).collect())
    }

    async fn latest_version(&self) -> Result<Option<i32>> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!("SELECT MAX(version) FROM {}.shape_versions", self.schema),
                &[],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn list_versions(&self) -> Result<Vec<VersionInfo>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                &format!(
                    "SELECT version, shape_count, created_at FROM {}.shape_versions ORDER BY version",
                    self.schema
                ),
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| VersionInfo {
                version: row.get(0),
                shape_count: i64::from(row.get::<_, i32>(1)),
                created_at: row.get(2),
            })
            .collect())
    }

    async fn update_comment(&self, shape_id: i64, comment: &str) -> Result<Shape> {
        self.annotate(shape_id, "comment = $2", &comment).await
    }

    async fn set_favorite(&self, shape_id: i64, favorite: bool) -> Result<Shape> {
        self.annotate(shape_id, "added_to_favorites = $2", &favorite)
            .await
    }

    async fn update_ai_comment(&self, shape_id: i64, text: &str) -> Result<Shape> {
        self.annotate(shape_id, "ai_gen_comment = $2", &text).await
    }
}

fn shape_from_row(row: &Row) -> Shape {
    Shape {
        shape_id: row.get("shape_id"),
        version: row.get("version"),
        geometry: row.get("geometry"),
        comment: row.get("comment"),
        added_to_favorites: row.get("added_to_favorites"),
        ai_gen_comment: row.get("ai_gen_comment"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Convertit une géométrie geo en EWKB PostGIS (WKB + flag et valeur SRID)
pub fn geometry_to_ewkb(geom: &Geometry, srid: u32) -> Result<Vec<u8>> {
    let wkb = geom_to_wkb(geom).map_err(|e| FreeplotError::Format {
        file: "wkb".into(),
        reason: format!("{:?}", e),
    })?;
    if wkb.len() < 5 {
        return Err(FreeplotError::Format {
            file: "wkb".into(),
            reason: "truncated geometry".into(),
        });
    }

    let little_endian = wkb[0] == 1;
    let type_bytes = [wkb[1], wkb[2], wkb[3], wkb[4]];

    let mut ewkb = Vec::with_capacity(wkb.len() + 4);
    ewkb.push(wkb[0]);
    if little_endian {
        let geom_type = u32::from_le_bytes(type_bytes) | 0x2000_0000;
        ewkb.extend_from_slice(&geom_type.to_le_bytes());
        ewkb.extend_from_slice(&srid.to_le_bytes());
    } else {
        let geom_type = u32::from_be_bytes(type_bytes) | 0x2000_0000;
        ewkb.extend_from_slice(&geom_type.to_be_bytes());
        ewkb.extend_from_slice(&srid.to_be_bytes());
    }
    ewkb.extend_from_slice(&wkb[5..]);
    Ok(ewkb)
}
