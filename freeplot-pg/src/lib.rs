//! # freeplot-pg
//!
//! Calcul des surfaces libres : une couche de base moins une série de couches
//! d'exclusion, découpée en polygones simples versionnés dans PostGIS.
//!
//! ## Features
//!
//! - Reprojection pure Rust (WGS 84, Web Mercator, UTM, Gauss-Krüger, grille locale de Moscou)
//! - Correction de décalage systématique après reprojection
//! - Soustraction multi-couches avec dégradation gracieuse (couche invalide = warning)
//! - Versions append-only avec annotations mutables (commentaire, favori, avis IA)
//! - Artefacts GeoJSON et shapefile par version
//!
//! ## Usage CLI
//!
//! ```bash
//! # Run avec les couches du preset (base_layer moins zpo_valid ... mkd)
//! freeplot-pg run
//!
//! # Run explicite, sans base de données
//! freeplot-pg run --base ./base_layer.tar --exclude zouit --exclude ./krt.shp --memory
//!
//! # Annotations
//! freeplot-pg shapes favorite 7 true
//! freeplot-pg shapes comment 7 "accès par le sud"
//! ```

pub mod config;
pub mod error;
pub mod export;
pub mod overlay;
pub mod pipeline;
pub mod preview;
pub mod report;
pub mod reproject_lite;
pub mod transform;
pub mod versioning;

pub use config::Config;
pub use error::{FreeplotError, Result};
pub use export::pool::{create_pool, DatabaseConfig};
pub use overlay::OverlayEngine;
pub use pipeline::{LayerSpec, Orchestrator, UploadRegistry};
pub use report::{LayerWarning, RunResult, RunStatus};
pub use transform::OffsetCorrection;
pub use versioning::{MemoryShapeStore, PgShapeStore, Shape, ShapeStore};
