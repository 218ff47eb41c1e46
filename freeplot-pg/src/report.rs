//! Rapport de run avec graceful degradation
//!
//! Une couche d'exclusion illisible ou dégénérée ne fait pas échouer le run :
//! elle est sautée et consignée ici sous forme de warning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use serde::Serialize;

use crate::error::FreeplotError;
use crate::transform::OffsetCorrection;

/// Statut global du run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Toutes les couches d'exclusion appliquées
    Success,
    /// Run commité mais au moins une couche sautée
    PartialSuccess,
}

/// Couche sautée pendant un run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerWarning {
    /// Nom de la couche d'exclusion
    pub layer: String,
    /// Catégorie d'erreur (`format`, `topology`, `missing`...)
    pub kind: String,
    pub message: String,
}

impl LayerWarning {
    pub fn new(layer: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Warning construit depuis l'erreur qui a fait sauter la couche
    pub fn from_error(layer: impl Into<String>, error: &FreeplotError) -> Self {
        Self::new(layer, error.kind(), error.to_string())
    }

    /// Source absente (upload manquant)
    pub fn missing(layer: impl Into<String>) -> Self {
        Self::new(layer, "missing", "layer not provided, skipped")
    }
}

/// Filtres effectivement appliqués lors du run
#[derive(Debug, Clone, Serialize)]
pub struct FiltersUsed {
    pub base: String,
    /// Couches d'exclusion appliquées, dans l'ordre
    pub exclusions: Vec<String>,
    pub target_crs: String,
    pub correction: OffsetCorrection,
}

/// Résultat d'un run du pipeline
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub version: i32,
    pub shape_count: usize,
    pub warnings: Vec<LayerWarning>,
    /// Fichier GeoJSON écrit dans le répertoire de sortie
    pub artifact: Option<PathBuf>,
    /// Bundle shapefile, si l'export natif est activé
    pub native_artifact: Option<PathBuf>,
    /// Contenu GeoJSON renvoyé aux appelants
    #[serde(skip)]
    pub geojson: String,
    pub filters_used: FiltersUsed,
    pub duration_secs: f64,
}

impl RunResult {
    pub fn status(&self) -> RunStatus {
        if self.warnings.is_empty() {
            RunStatus::Success
        } else {
            RunStatus::PartialSuccess
        }
    }

    pub fn set_duration(&mut self, duration: Duration) {
        self.duration_secs = duration.as_secs_f64();
    }

    /// Affiche le rapport sur la console
    pub fn display(&self) {
        println!("\n{}", "=".repeat(60));
        println!("RUN REPORT - Version {}", self.version);
        println!("{}", "=".repeat(60));

        println!("\nStatus: {:?}", self.status());
        println!("Duration: {:.2}s", self.duration_secs);

        println!("\n--- SUMMARY ---");
        println!("Shapes: {}", self.shape_count);
        println!("Base: {}", self.filters_used.base);
        println!(
            "Exclusions applied: {}",
            if self.filters_used.exclusions.is_empty() {
                "-".to_string()
            } else {
                self.filters_used.exclusions.join(", ")
            }
        );
        println!(
            "Correction: lat {:+.6}, lon {:+.6} ({})",
            self.filters_used.correction.lat_offset,
            self.filters_used.correction.lon_offset,
            self.filters_used.target_crs
        );
        if let Some(path) = &self.artifact {
            println!("GeoJSON: {}", path.display());
        }
        if let Some(path) = &self.native_artifact {
            println!("Shapefile: {}", path.display());
        }

        if !self.warnings.is_empty() {
            println!("\n--- WARNINGS ({}) ---", self.warnings.len());
            for w in self.warnings.iter().take(10) {
                println!("  [{}] {}: {}", w.layer, w.kind, w.message);
            }
            if self.warnings.len() > 10 {
                println!("  ... and {} more", self.warnings.len() - 10);
            }
        }

        println!("\n{}", "=".repeat(60));
    }

    /// Sauvegarde le rapport en JSON
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Affichage compact
    pub fn summary(&self) -> String {
        format!(
            "v{}: {} shapes, {} exclusions applied, {} warnings",
            self.version,
            self.shape_count,
            self.filters_used.exclusions.len(),
            self.warnings.len()
        )
    }
}
