//! Overlay : soustraction des couches d'exclusion et découpage du reste
//!
//! Le reste est calculé par différence planaire (balayage de `geo::BooleanOps`)
//! en IEEE double, sans accrochage à une grille : aucune tolérance n'est
//! appliquée hormis l'élimination des composantes d'aire nulle.

pub mod validate;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::{Duration, Instant};

use geo::{Area, BooleanOps, BoundingRect, CoordsIter, Geometry, Intersects, MultiPolygon, Polygon, Rect};
use rayon::prelude::*;
use shpfile::Layer;
use tracing::{debug, info, warn};

use crate::error::{FreeplotError, Result};
use crate::report::LayerWarning;

/// Nom utilisé pour les erreurs de l'étape de fusion
const REMAINDER: &str = "remainder";

/// Échéance coopérative, vérifiée entre les étapes de l'overlay
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Option<Instant>,
    budget: Duration,
}

impl Deadline {
    /// Pas de limite
    pub fn none() -> Self {
        Self {
            at: None,
            budget: Duration::ZERO,
        }
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            at: Some(Instant::now() + budget),
            budget,
        }
    }

    pub fn check(&self) -> Result<()> {
        match self.at {
            Some(at) if Instant::now() >= at => Err(FreeplotError::Timeout(self.budget)),
            _ => Ok(()),
        }
    }
}

/// Couche d'exclusion prête pour la soustraction
#[derive(Debug, Clone)]
pub struct ExclusionLayer {
    pub name: String,
    pub polygons: Vec<Polygon>,
}

impl ExclusionLayer {
    pub fn new(name: impl Into<String>, polygons: Vec<Polygon>) -> Self {
        Self {
            name: name.into(),
            polygons,
        }
    }

    pub fn from_layer(layer: &Layer) -> Self {
        Self::new(layer.name.clone(), areal_polygons(layer))
    }
}

/// Résultat de la soustraction
#[derive(Debug, Clone, Default)]
pub struct OverlayOutcome {
    /// Morceaux du reste, non fusionnés
    pub remainder: Vec<Polygon>,
    /// Couches effectivement soustraites, dans l'ordre
    pub applied: Vec<String>,
    /// Couches sautées
    pub warnings: Vec<LayerWarning>,
}

/// Polygones d'une couche ; les features non surfaciques sont ignorées
pub fn areal_polygons(layer: &Layer) -> Vec<Polygon> {
    let mut polygons = Vec::with_capacity(layer.len());
    let mut ignored = 0usize;

    for feature in &layer.features {
        match &feature.geometry {
            Geometry::Polygon(p) => polygons.push(p.clone()),
            Geometry::MultiPolygon(mp) => polygons.extend(mp.0.iter().cloned()),
            _ => ignored += 1,
        }
    }

    if ignored > 0 {
        debug!(layer = %layer.name, ignored, "Non-areal features ignored");
    }
    polygons
}

/// Polygones de la couche de base, refusés au premier polygone invalide
///
/// Un polygone dégénéré de la base ferait échouer chaque différence et serait
/// imputé aux couches d'exclusion.
pub fn base_polygons(layer: &Layer) -> Result<Vec<Polygon>> {
    let polygons = areal_polygons(layer);
    for (i, polygon) in polygons.iter().enumerate() {
        validate::check_polygon(polygon).map_err(|reason| {
            FreeplotError::topology(&layer.name, format!("polygon {}: {}", i, reason))
        })?;
    }
    Ok(polygons)
}

/// Moteur d'overlay
#[derive(Debug, Clone, Copy)]
pub struct OverlayEngine {
    deadline: Deadline,
}

impl Default for OverlayEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl OverlayEngine {
    pub fn new() -> Self {
        Self {
            deadline: Deadline::none(),
        }
    }

    /// Moteur dont l'échéance démarre maintenant
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Deadline::after(timeout),
        }
    }

    pub fn deadline(&self) -> Deadline {
        self.deadline
    }

    /// Soustrait les couches d'exclusion, dans l'ordre, du reste courant.
    ///
    /// Une couche dont un polygone est invalide ou dont la différence échoue
    /// est abandonnée : le reste revient à son état d'avant la couche et un
    /// warning est consigné. Seule l'échéance interrompt le calcul.
    pub fn subtract(&self, base: Vec<Polygon>, exclusions: &[ExclusionLayer]) -> Result<OverlayOutcome> {
        let mut outcome = OverlayOutcome {
            remainder: base,
            ..Default::default()
        };

        for layer in exclusions {
            self.deadline.check()?;
            let start = Instant::now();

            match self.apply_layer(&outcome.remainder, layer) {
                Ok(pieces) => {
                    debug!(
                        layer = %layer.name,
                        polygons = layer.polygons.len(),
                        pieces = pieces.len(),
                        elapsed_ms = start.elapsed().as_millis() as u64,
                        "Exclusion layer subtracted"
                    );
                    outcome.remainder = pieces;
                    outcome.applied.push(layer.name.clone());
                }
                Err(e @ FreeplotError::Timeout(_)) => return Err(e),
                Err(e) => {
                    warn!(layer = %layer.name, error = %e, "Exclusion layer skipped");
                    outcome.warnings.push(LayerWarning::from_error(&layer.name, &e));
                }
            }
        }

        info!(
            applied = outcome.applied.len(),
            skipped = outcome.warnings.len(),
            pieces = outcome.remainder.len(),
            "Subtraction finished"
        );
        Ok(outcome)
    }

    fn apply_layer(&self, remainder: &[Polygon], layer: &ExclusionLayer) -> Result<Vec<Polygon>> {
        for (i, polygon) in layer.polygons.iter().enumerate() {
            validate::check_polygon(polygon).map_err(|reason| {
                FreeplotError::topology(&layer.name, format!("polygon {}: {}", i, reason))
            })?;
        }

        let exclusions: Vec<(Rect, MultiPolygon)> = layer
            .polygons
            .iter()
            .filter_map(|p| Some((p.bounding_rect()?, MultiPolygon::new(vec![p.clone()]))))
            .collect();

        let pieces = panic::catch_unwind(AssertUnwindSafe(|| {
            remainder
                .par_iter()
                .map(|piece| self.subtract_piece(piece, &exclusions))
                .collect::<Result<Vec<Vec<Polygon>>>>()
        }))
        .map_err(|payload| {
            FreeplotError::topology(
                &layer.name,
                format!("boolean operation failed: {}", panic_message(payload.as_ref())),
            )
        })??;

        let pieces: Vec<Polygon> = pieces.into_iter().flatten().collect();
        if pieces.iter().any(|p| !is_finite(p)) {
            return Err(FreeplotError::topology(
                &layer.name,
                "difference produced non-finite coordinates",
            ));
        }
        Ok(pieces)
    }

    /// Différence d'un morceau avec les exclusions dont l'emprise le touche
    fn subtract_piece(&self, piece: &Polygon, exclusions: &[(Rect, MultiPolygon)]) -> Result<Vec<Polygon>> {
        let Some(bbox) = piece.bounding_rect() else {
            return Ok(Vec::new());
        };

        let mut current = MultiPolygon::new(vec![piece.clone()]);
        for (rect, exclusion) in exclusions {
            if !bbox.intersects(rect) {
                continue;
            }
            self.deadline.check()?;
            current = current.difference(exclusion);
            if current.0.is_empty() {
                break;
            }
        }

        Ok(current
            .0
            .into_iter()
            .filter(|p| p.unsigned_area() > 0.0)
            .collect())
    }

    /// Fusionne les morceaux en une région puis la découpe en polygones
    /// simples connexes (trous conservés), triés par coin inférieur gauche
    /// de leur emprise.
    pub fn merge_and_split(&self, polygons: Vec<Polygon>) -> Result<Vec<Polygon>> {
        if polygons.is_empty() {
            return Ok(Vec::new());
        }
        self.deadline.check()?;
        let start = Instant::now();
        let count = polygons.len();

        let merged = panic::catch_unwind(AssertUnwindSafe(|| {
            polygons
                .into_par_iter()
                .map(|p| Ok::<_, FreeplotError>(MultiPolygon::new(vec![p])))
                .try_reduce_with(|a, b| {
                    self.deadline.check()?;
                    Ok(a.union(&b))
                })
        }))
        .map_err(|payload| {
            FreeplotError::topology(
                REMAINDER,
                format!("union failed: {}", panic_message(payload.as_ref())),
            )
        })?
        .transpose()?
        .unwrap_or_else(|| MultiPolygon::new(Vec::new()));

        let mut components: Vec<(Rect, Polygon)> = merged
            .0
            .into_iter()
            .filter(|p| p.unsigned_area() > 0.0)
            .filter_map(|p| Some((p.bounding_rect()?, p)))
            .collect();

        components.sort_by(|(a, _), (b, _)| {
            a.min()
                .x
                .total_cmp(&b.min().x)
                .then_with(|| a.min().y.total_cmp(&b.min().y))
        });

        debug!(
            pieces = count,
            components = components.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Remainder merged and split"
        );
        Ok(components.into_iter().map(|(_, p)| p).collect())
    }
}

fn is_finite(polygon: &Polygon) -> bool {
    polygon
        .coords_iter()
        .all(|c| c.x.is_finite() && c.y.is_finite())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
