//! Reprojection des couches et correction de décalage
//!
//! La correction compense le décalage constant introduit par la grille
//! locale d'origine des données ; elle s'applique après reprojection.

use std::time::Instant;

use geo::{Coord, Geometry, MapCoords};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use shpfile::{geometry_type_name, Crs, Feature, Layer};
use tracing::debug;

use crate::error::{FreeplotError, Result};
use crate::reproject_lite::SmartReprojector;

/// Décalage en degrés ajouté à chaque coordonnée
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffsetCorrection {
    pub lat_offset: f64,
    pub lon_offset: f64,
}

impl OffsetCorrection {
    pub const NONE: OffsetCorrection = OffsetCorrection {
        lat_offset: 0.0,
        lon_offset: 0.0,
    };

    pub fn is_zero(&self) -> bool {
        self.lat_offset == 0.0 && self.lon_offset == 0.0
    }

    /// Correction opposée
    pub fn inverse(&self) -> Self {
        Self {
            lat_offset: -self.lat_offset,
            lon_offset: -self.lon_offset,
        }
    }
}

impl Default for OffsetCorrection {
    /// Calibration des jeux de données de Moscou
    fn default() -> Self {
        Self {
            lat_offset: 0.000405 - 0.000245,
            lon_offset: -0.001721 + 0.000245,
        }
    }
}

/// Types de géométrie traités par la transformation et l'overlay
fn check_supported(layer: &str, geometry: &Geometry) -> Result<()> {
    match geometry {
        Geometry::Point(_)
        | Geometry::LineString(_)
        | Geometry::Polygon(_)
        | Geometry::MultiPoint(_)
        | Geometry::MultiLineString(_)
        | Geometry::MultiPolygon(_) => Ok(()),
        other => Err(FreeplotError::UnsupportedGeometry {
            layer: layer.to_string(),
            geometry_type: geometry_type_name(other).to_string(),
        }),
    }
}

/// Reprojette une couche vers `target`. Sans effet si la couche y est déjà.
pub fn reproject(layer: &Layer, target: &Crs) -> Result<Layer> {
    let start = Instant::now();
    let reprojector =
        SmartReprojector::new(&layer.crs, target).map_err(|e| FreeplotError::Reprojection {
            from: layer.crs.to_string(),
            to: target.to_string(),
            reason: e.to_string(),
        })?;

    let features = layer
        .features
        .iter()
        .map(|feature| {
            check_supported(&layer.name, &feature.geometry)?;
            let geometry = reprojector
                .transform_geometry(&feature.geometry)
                .map_err(|e| FreeplotError::Reprojection {
                    from: layer.crs.to_string(),
                    to: target.to_string(),
                    reason: format!("feature {}: {}", feature.id, e),
                })?;
            Ok(Feature {
                id: feature.id,
                geometry,
                attributes: feature.attributes.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    debug!(
        layer = %layer.name,
        from = %layer.crs,
        to = %target,
        reprojector = reprojector.description(),
        features = features.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Layer reprojected"
    );

    let mut out = layer.with_features(features);
    out.crs = target.clone();
    Ok(out)
}

/// Ajoute `lon_offset` à chaque x et `lat_offset` à chaque y, trous compris
pub fn apply_offset_correction(layer: &Layer, correction: OffsetCorrection) -> Result<Layer> {
    let features = layer
        .features
        .iter()
        .map(|feature| {
            check_supported(&layer.name, &feature.geometry)?;
            Ok(Feature {
                id: feature.id,
                geometry: feature.geometry.map_coords(|c: Coord| Coord {
                    x: c.x + correction.lon_offset,
                    y: c.y + correction.lat_offset,
                }),
                attributes: feature.attributes.clone(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(layer.with_features(features))
}

/// Reprojection puis correction
pub fn prepare_layer(layer: &Layer, target: &Crs, correction: OffsetCorrection) -> Result<Layer> {
    let reprojected = reproject(layer, target)?;
    if correction.is_zero() {
        return Ok(reprojected);
    }
    apply_offset_correction(&reprojected, correction)
}

/// Prépare plusieurs couches en parallèle ; chaque couche garde son propre résultat
pub fn prepare_layers(
    layers: &[Layer],
    target: &Crs,
    correction: OffsetCorrection,
) -> Vec<Result<Layer>> {
    layers
        .par_iter()
        .map(|layer| prepare_layer(layer, target, correction))
        .collect()
}
