//! Reprojection intelligente : reproject_lite en priorité, fallback sur proj
//!
//! Utilise automatiquement la meilleure option disponible.

use super::ReprojectorLite;
use anyhow::{bail, Result};
use geo::Geometry;
use shpfile::Crs;

/// Reprojection intelligente
///
/// Essaie d'abord reproject_lite (pure Rust), puis fallback sur proj si disponible.
pub enum SmartReprojector {
    /// Reprojection légère (pure Rust)
    Lite(ReprojectorLite),
    /// Reprojection via PROJ (si feature activée)
    #[cfg(feature = "reproject")]
    Proj(crate::export::reproject::Reprojector),
    /// Pas de reprojection (source == cible)
    Identity,
}

impl SmartReprojector {
    /// Crée un nouveau reprojector
    pub fn new(source: &Crs, target: &Crs) -> Result<Self> {
        if source == target {
            return Ok(Self::Identity);
        }

        let lite_error = match ReprojectorLite::new(source, target) {
            Ok(lite) => return Ok(Self::Lite(lite)),
            Err(e) => e,
        };

        #[cfg(feature = "reproject")]
        {
            tracing::debug!(error = %lite_error, "reproject_lite indisponible, fallback sur PROJ");
            let proj = crate::export::reproject::Reprojector::new(source, target)?;
            return Ok(Self::Proj(proj));
        }

        #[cfg(not(feature = "reproject"))]
        bail!(
            "{}. Pour d'autres projections, compilez avec: cargo build --features reproject",
            lite_error
        );
    }

    /// Transforme une géométrie
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry> {
        match self {
            Self::Identity => Ok(geom.clone()),
            Self::Lite(lite) => lite.transform_geometry(geom),
            #[cfg(feature = "reproject")]
            Self::Proj(proj) => proj.transform_geometry(geom),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Self::Identity)
    }

    /// Retourne une description du reprojector utilisé
    pub fn description(&self) -> &'static str {
        match self {
            Self::Identity => "identity (pas de reprojection)",
            Self::Lite(_) => "reproject_lite (pure Rust)",
            #[cfg(feature = "reproject")]
            Self::Proj(_) => "proj (PROJ library)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity() {
        let r = SmartReprojector::new(&Crs::Epsg(4326), &Crs::Epsg(4326)).unwrap();
        assert!(r.is_identity());
    }

    #[test]
    fn test_lite() {
        let r = SmartReprojector::new(&Crs::Epsg(28407), &Crs::Epsg(4326)).unwrap();
        assert!(matches!(r, SmartReprojector::Lite(_)));
    }

    #[test]
    fn test_utm_to_3857() {
        let r = SmartReprojector::new(&Crs::Epsg(32637), &Crs::Epsg(3857)).unwrap();
        assert!(matches!(r, SmartReprojector::Lite(_)));
        assert_eq!(r.description(), "reproject_lite (pure Rust)");
    }

    #[cfg(not(feature = "reproject"))]
    #[test]
    fn test_unsupported_without_proj() {
        let err = SmartReprojector::new(&Crs::Epsg(2154), &Crs::Epsg(4326))
            .err()
            .unwrap();
        assert!(err.to_string().contains("2154"));
    }
}
