//! Pipeline : lecture -> reprojection/correction -> soustraction -> découpage -> version
//!
//! Les étapes CPU (décodage, reprojection, overlay) tournent sur le pool
//! bloquant de tokio ; seule la persistance est asynchrone. Une couche
//! d'exclusion en échec devient un warning, la couche de base fait échouer le run.

pub mod cache;
pub mod source;

pub use cache::{CacheKey, LayerCache};
pub use source::{LayerSource, LayerSpec, SolutionSources, UploadRegistry};

use std::sync::Arc;
use std::time::{Instant, SystemTime};

use futures::future::join_all;
use geo::{Geometry, Polygon};
use shpfile::{Crs, Layer};
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{FreeplotError, Result};
use crate::export::artifact;
use crate::export::geojson::shapes_to_geojson;
use crate::overlay::{base_polygons, ExclusionLayer, OverlayEngine};
use crate::report::{FiltersUsed, LayerWarning, RunResult};
use crate::transform::{prepare_layer, prepare_layers};
use crate::versioning::ShapeStore;

/// Orchestrateur d'un run ; partageable entre requêtes concurrentes
pub struct Orchestrator {
    config: Config,
    target: Crs,
    store: Arc<dyn ShapeStore>,
    cache: Arc<LayerCache>,
}

impl Orchestrator {
    pub fn new(config: Config, store: Arc<dyn ShapeStore>) -> Result<Self> {
        let target = config.target_crs()?;
        // Valide les encodages dès la construction
        config.native_encoding()?;
        config.solution_encoding()?;
        let cache = Arc::new(LayerCache::new(config.cache_capacity));
        Ok(Self {
            config,
            target,
            store,
            cache,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ShapeStore> {
        &self.store
    }

    pub fn cache(&self) -> &LayerCache {
        &self.cache
    }

    /// Clé du registre ou chemin
    pub fn resolve(&self, key_or_path: &str) -> Result<LayerSpec> {
        LayerSpec::resolve(&self.config, key_or_path)
    }

    /// Run depuis des fichiers uploadés (base + exclusions de la configuration)
    pub async fn run_uploads(&self, uploads: &UploadRegistry) -> Result<RunResult> {
        let sources = uploads.solution_sources(
            &self.config.solution,
            self.config.solution_encoding()?,
            self.config.default_crs()?.as_ref(),
        )?;
        let mut result = self.run(sources.base, sources.exclusions).await?;
        let mut warnings = sources.warnings;
        warnings.append(&mut result.warnings);
        result.warnings = warnings;
        Ok(result)
    }

    /// Exécute un run complet et commite la version suivante
    pub async fn run(&self, base: LayerSpec, exclusions: Vec<LayerSpec>) -> Result<RunResult> {
        let start = Instant::now();
        let correction = self.config.correction;
        let base_name = base.name.clone();

        info!(
            base = %base_name,
            exclusions = exclusions.len(),
            target = %self.target,
            "Starting run"
        );

        // 1. Couche de base : toute erreur fait échouer le run
        let base_geometry = {
            let cache = Arc::clone(&self.cache);
            let target = self.target.clone();
            let spec = base.clone();
            tokio::task::spawn_blocking(move || {
                let layer = cache.get_or_load(&spec)?;
                let prepared = prepare_layer(&layer, &target, correction)?;
                base_polygons(&prepared)
            })
            .await
            .map_err(join_error)
            .and_then(|r| r)
            .map_err(|e| FreeplotError::pipeline(base_name.clone(), e))?
        };

        // 2. Exclusions : décodage concurrent, puis reprojection parallèle
        let mut warnings = Vec::new();
        let decoded = join_all(exclusions.into_iter().map(|spec| {
            let cache = Arc::clone(&self.cache);
            async move {
                let name = spec.name.clone();
                let loaded = tokio::task::spawn_blocking(move || cache.get_or_load(&spec))
                    .await
                    .map_err(join_error)
                    .and_then(|r| r);
                (name, loaded)
            }
        }))
        .await;

        let mut parsed: Vec<Layer> = Vec::with_capacity(decoded.len());
        for (name, loaded) in decoded {
            match loaded {
                Ok(layer) => parsed.push((*layer).clone()),
                Err(e) => {
                    warn!(layer = %name, error = %e, "Exclusion layer unreadable, skipped");
                    warnings.push(LayerWarning::from_error(name, &e));
                }
            }
        }

        let prepared = {
            let target = self.target.clone();
            tokio::task::spawn_blocking(move || {
                let results = prepare_layers(&parsed, &target, correction);
                parsed
                    .iter()
                    .map(|l| l.name.clone())
                    .zip(results)
                    .collect::<Vec<_>>()
            })
            .await
            .map_err(join_error)?
        };

        let mut layers = Vec::with_capacity(prepared.len());
        for (name, result) in prepared {
            match result {
                Ok(layer) => layers.push(ExclusionLayer::from_layer(&layer)),
                Err(e) => {
                    warn!(layer = %name, error = %e, "Exclusion layer not reprojectable, skipped");
                    warnings.push(LayerWarning::from_error(name, &e));
                }
            }
        }

        // 3. Overlay borné dans le temps
        let timeout = self.config.overlay_timeout();
        let engine = OverlayEngine::with_timeout(timeout);
        let overlay = tokio::task::spawn_blocking(move || {
            let outcome = engine.subtract(base_geometry, &layers)?;
            let pieces = engine.merge_and_split(outcome.remainder)?;
            Ok::<_, FreeplotError>((pieces, outcome.applied, outcome.warnings))
        });
        let (pieces, applied, overlay_warnings): (Vec<Polygon>, Vec<String>, Vec<LayerWarning>) =
            match tokio::time::timeout(timeout, overlay).await {
                Ok(joined) => joined.map_err(join_error)??,
                Err(_) => {
                    warn!(timeout_secs = timeout.as_secs(), "Overlay timed out");
                    return Err(FreeplotError::Timeout(timeout));
                }
            };
        warnings.extend(overlay_warnings);

        // 4. Version suivante
        let committed = self.store.commit_next_version(&pieces).await?;
        let version = committed.version;

        // 5. Artefacts
        let geojson = shapes_to_geojson(&committed.shapes, &self.target)?;
        let geojson_path = self.write_artifact(
            &artifact::geojson_name(version, SystemTime::now()),
            geojson.as_bytes(),
            &mut warnings,
        );

        let native_artifact = if self.config.export_native {
            let geometries: Vec<Geometry> = pieces.into_iter().map(Geometry::Polygon).collect();
            match artifact::shapes_to_native(
                &committed.shapes,
                &geometries,
                &self.target,
                self.config.native_encoding()?,
                version,
            ) {
                Ok(bytes) => {
                    self.write_artifact(&artifact::native_name(version), &bytes, &mut warnings)
                }
                Err(e) => {
                    warn!(version, error = %e, "Native export failed");
                    warnings.push(LayerWarning::from_error("artifact", &e));
                    None
                }
            }
        } else {
            None
        };

        let mut result = RunResult {
            version,
            shape_count: committed.shapes.len(),
            warnings,
            artifact: geojson_path,
            native_artifact,
            geojson,
            filters_used: FiltersUsed {
                base: base.name,
                exclusions: applied,
                target_crs: self.target.to_string(),
                correction,
            },
            duration_secs: 0.0,
        };
        result.set_duration(start.elapsed());

        info!(
            version,
            shapes = result.shape_count,
            warnings = result.warnings.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Run committed"
        );

        Ok(result)
    }

    /// Un artefact non écrit n'annule pas la version déjà commitée
    fn write_artifact(
        &self,
        name: &str,
        content: &[u8],
        warnings: &mut Vec<LayerWarning>,
    ) -> Option<std::path::PathBuf> {
        match artifact::write_artifact(&self.config.output_dir, name, content) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(artifact = name, error = %e, "Artifact not written");
                warnings.push(LayerWarning::from_error("artifact", &e));
                None
            }
        }
    }
}

fn join_error(e: JoinError) -> FreeplotError {
    FreeplotError::Io(std::io::Error::other(e.to_string()))
}
