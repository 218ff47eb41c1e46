//! Projection Web Mercator (EPSG:3857)
//!
//! Modèle sphérique sur le rayon équatorial WGS84.

use super::ellipsoid::Ellipsoid;
use super::Geographic;

/// Latitude maximale représentable
const MAX_LAT_DEG: f64 = 85.06;

/// Géographique WGS84 -> Web Mercator
pub fn forward(geo: Geographic) -> (f64, f64) {
    let r = Ellipsoid::WGS84.a;
    let lat = geo
        .lat
        .clamp(-MAX_LAT_DEG.to_radians(), MAX_LAT_DEG.to_radians());

    let x = r * geo.lon;
    let y = r * (std::f64::consts::FRAC_PI_4 + lat / 2.0).tan().ln();
    (x, y)
}

/// Web Mercator -> géographique WGS84
pub fn inverse(x: f64, y: f64) -> Geographic {
    let r = Ellipsoid::WGS84.a;
    let lon = x / r;
    let lat = 2.0 * (y / r).exp().atan() - std::f64::consts::FRAC_PI_2;
    Geographic::new(lon, lat)
}
