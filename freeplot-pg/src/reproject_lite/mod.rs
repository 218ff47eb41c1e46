//! Reprojection légère en Rust pur (sans dépendances externes)
//!
//! Toute projection passe par le géographique WGS84 :
//! - WGS84 géographique (EPSG:4326), Pulkovo 1942 géographique (EPSG:4284)
//! - Web Mercator (EPSG:3857)
//! - UTM WGS84 (EPSG:326xx / 327xx)
//! - Gauss-Krüger Pulkovo 1942 (EPSG:28402 à 28432)
//! - Transverse Mercator quelconque décrite en PROJ.4 ou en WKT,
//!   avec changement de datum `TOWGS84` (grille locale de Moscou)

mod crs;
mod ellipsoid;
mod helmert;
mod mercator;
mod smart;
mod tmerc;

pub use ellipsoid::Ellipsoid;
pub use helmert::Helmert;
pub use smart::SmartReprojector;
pub use tmerc::TransverseMercator;

use anyhow::{bail, Result};
use geo::{Coord, Geometry, MapCoords};
use shpfile::Crs;

/// Point en coordonnées géographiques (radians)
#[derive(Debug, Clone, Copy)]
pub struct Geographic {
    /// Longitude en radians
    pub lon: f64,
    /// Latitude en radians
    pub lat: f64,
}

impl Geographic {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Convertit en degrés
    pub fn to_degrees(self) -> (f64, f64) {
        (self.lon.to_degrees(), self.lat.to_degrees())
    }

    /// Crée depuis des degrés
    pub fn from_degrees(lon_deg: f64, lat_deg: f64) -> Self {
        Self {
            lon: lon_deg.to_radians(),
            lat: lat_deg.to_radians(),
        }
    }
}

/// Datum géodésique : ellipsoïde + passage vers WGS84
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Datum {
    pub ellipsoid: Ellipsoid,
    /// `None` : le datum est WGS84 (ou considéré comme tel)
    pub to_wgs84: Option<Helmert>,
}

impl Datum {
    pub const WGS84: Datum = Datum {
        ellipsoid: Ellipsoid::WGS84,
        to_wgs84: None,
    };

    pub const PULKOVO_1942: Datum = Datum {
        ellipsoid: Ellipsoid::KRASSOVSKY,
        to_wgs84: Some(Helmert::PULKOVO_1942),
    };

    fn needs_shift(&self) -> bool {
        self.ellipsoid != Ellipsoid::WGS84
            || self.to_wgs84.map_or(false, |h| !h.is_identity())
    }

    /// Géographique sur ce datum -> géographique WGS84
    pub fn to_wgs84(&self, geo: Geographic) -> Geographic {
        if !self.needs_shift() {
            return geo;
        }
        let mut xyz = helmert::geodetic_to_ecef(geo, &self.ellipsoid);
        if let Some(h) = self.to_wgs84 {
            xyz = h.apply(xyz);
        }
        helmert::ecef_to_geodetic(xyz, &Ellipsoid::WGS84)
    }

    /// Géographique WGS84 -> géographique sur ce datum
    pub fn from_wgs84(&self, geo: Geographic) -> Geographic {
        if !self.needs_shift() {
            return geo;
        }
        let mut xyz = helmert::geodetic_to_ecef(geo, &Ellipsoid::WGS84);
        if let Some(h) = self.to_wgs84 {
            xyz = h.apply_inverse(xyz);
        }
        helmert::ecef_to_geodetic(xyz, &self.ellipsoid)
    }
}

/// Projection résolue depuis un [`Crs`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Longitude / latitude en degrés sur un datum
    Geographic(Datum),
    /// Web Mercator sphérique
    WebMercator,
    TransverseMercator(TransverseMercator),
}

impl Projection {
    /// Résout un CRS ; échoue si aucune projection pure Rust ne le couvre
    pub fn from_crs(crs: &Crs) -> Result<Self> {
        crs::resolve(crs)
    }

    /// Coordonnées de la projection -> géographique WGS84
    pub fn to_wgs84(&self, x: f64, y: f64) -> Geographic {
        match self {
            Self::Geographic(datum) => datum.to_wgs84(Geographic::from_degrees(x, y)),
            Self::WebMercator => mercator::inverse(x, y),
            Self::TransverseMercator(tm) => tm.datum.to_wgs84(tm.inverse(x, y)),
        }
    }

    /// Géographique WGS84 -> coordonnées de la projection
    pub fn from_wgs84(&self, geo: Geographic) -> (f64, f64) {
        match self {
            Self::Geographic(datum) => datum.from_wgs84(geo).to_degrees(),
            Self::WebMercator => mercator::forward(geo),
            Self::TransverseMercator(tm) => tm.forward(tm.datum.from_wgs84(geo)),
        }
    }
}

/// Reprojection légère entre deux projections résolues
#[derive(Debug, Clone)]
pub struct ReprojectorLite {
    source: Projection,
    target: Projection,
}

impl ReprojectorLite {
    /// Crée un nouveau reprojector
    pub fn new(source: &Crs, target: &Crs) -> Result<Self> {
        Ok(Self {
            source: Projection::from_crs(source)?,
            target: Projection::from_crs(target)?,
        })
    }

    /// Vérifie si le CRS est couvert par reproject_lite
    pub fn is_supported(crs: &Crs) -> bool {
        Projection::from_crs(crs).is_ok()
    }

    /// Transforme un point (x, y) de la source vers la cible
    pub fn transform_point(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if !x.is_finite() || !y.is_finite() {
            bail!("Coordonnée non finie: ({}, {})", x, y);
        }
        let geo = self.source.to_wgs84(x, y);
        let (tx, ty) = self.target.from_wgs84(geo);
        if !tx.is_finite() || !ty.is_finite() {
            bail!("Point ({}, {}) hors du domaine de la projection cible", x, y);
        }
        Ok((tx, ty))
    }

    /// Transforme une géométrie (anneaux et nombre de points conservés)
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry> {
        geom.try_map_coords(|c: Coord| {
            let (x, y) = self.transform_point(c.x, c.y)?;
            Ok(Coord { x, y })
        })
    }
}
