//! Versioning des shapes : modèle, stockages et annotations

pub mod annotate;
pub mod diff;
pub mod memory;
pub mod postgres;
pub mod store;

pub use annotate::{refresh_ai_comment, CommentGenerator};
pub use diff::{polygon_hash, GeometryHash, LineageIndex};
pub use memory::MemoryShapeStore;
pub use postgres::{geometry_to_ewkb, PgShapeStore, DEFAULT_SCHEMA};
pub use store::{
    CommittedVersion, LineageMode, PendingShape, Shape, ShapeFilter, ShapeStore, VersionInfo,
};
