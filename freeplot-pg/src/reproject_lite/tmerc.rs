//! Projection Transverse Mercator (UTM, Gauss-Krüger, grilles locales)
//!
//! Séries de Snyder ; la latitude du pied est résolue par Newton
//! pour que l'aller-retour reste sous 1e-9° près du méridien central.

use super::{Datum, Ellipsoid, Geographic};

/// Paramètres d'une Transverse Mercator
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransverseMercator {
    /// Latitude d'origine en degrés
    pub lat0: f64,
    /// Méridien central en degrés
    pub lon0: f64,
    /// Facteur d'échelle sur le méridien central
    pub k0: f64,
    /// Faux est (m)
    pub x0: f64,
    /// Faux nord (m)
    pub y0: f64,
    pub datum: Datum,
}

impl TransverseMercator {
    /// Zone UTM sur WGS84 (EPSG:326xx / 327xx)
    pub fn utm(zone: u32, south: bool) -> Self {
        Self {
            lat0: 0.0,
            lon0: zone as f64 * 6.0 - 183.0,
            k0: 0.9996,
            x0: 500_000.0,
            y0: if south { 10_000_000.0 } else { 0.0 },
            datum: Datum::WGS84,
        }
    }

    /// Zone Gauss-Krüger Pulkovo 1942 (EPSG:28402 à 28432), numéro de zone en tête du faux est
    pub fn gauss_kruger(zone: u32) -> Self {
        Self {
            lat0: 0.0,
            lon0: zone as f64 * 6.0 - 3.0,
            k0: 1.0,
            x0: zone as f64 * 1_000_000.0 + 500_000.0,
            y0: 0.0,
            datum: Datum::PULKOVO_1942,
        }
    }

    /// Géographique (sur le datum de la projection) -> projeté
    pub fn forward(&self, geo: Geographic) -> (f64, f64) {
        let ell = self.datum.ellipsoid;
        let a = ell.a;
        let e2 = ell.e2();
        let ep2 = ell.ep2();

        let phi = geo.lat;
        let (sin_phi, cos_phi) = phi.sin_cos();
        let tan_phi = phi.tan();

        let n = a / (1.0 - e2 * sin_phi.powi(2)).sqrt();
        let t = tan_phi.powi(2);
        let c = ep2 * cos_phi.powi(2);
        let aa = (geo.lon - self.lon0.to_radians()) * cos_phi;

        let m = meridian_arc(&ell, phi);
        let m0 = meridian_arc(&ell, self.lat0.to_radians());

        let x = self.x0
            + self.k0
                * n
                * (aa
                    + (1.0 - t + c) * aa.powi(3) / 6.0
                    + (5.0 - 18.0 * t + t.powi(2) + 72.0 * c - 58.0 * ep2) * aa.powi(5) / 120.0);

        let y = self.y0
            + self.k0
                * (m - m0
                    + n * tan_phi
                        * (aa.powi(2) / 2.0
                            + (5.0 - t + 9.0 * c + 4.0 * c.powi(2)) * aa.powi(4) / 24.0
                            + (61.0 - 58.0 * t + t.powi(2) + 600.0 * c - 330.0 * ep2)
                                * aa.powi(6)
                                / 720.0));

        (x, y)
    }

    /// Projeté -> géographique (sur le datum de la projection)
    pub fn inverse(&self, x: f64, y: f64) -> Geographic {
        let ell = self.datum.ellipsoid;
        let a = ell.a;
        let e2 = ell.e2();
        let ep2 = ell.ep2();

        let m = meridian_arc(&ell, self.lat0.to_radians()) + (y - self.y0) / self.k0;
        let phi1 = footpoint_latitude(&ell, m);

        let (sin_phi1, cos_phi1) = phi1.sin_cos();
        let tan_phi1 = phi1.tan();

        let n1 = a / (1.0 - e2 * sin_phi1.powi(2)).sqrt();
        let t1 = tan_phi1.powi(2);
        let c1 = ep2 * cos_phi1.powi(2);
        let r1 = a * (1.0 - e2) / (1.0 - e2 * sin_phi1.powi(2)).powf(1.5);
        let d = (x - self.x0) / (n1 * self.k0);

        let lat = phi1
            - (n1 * tan_phi1 / r1)
                * (d.powi(2) / 2.0
                    - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1.powi(2) - 9.0 * ep2) * d.powi(4)
                        / 24.0
                    + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1.powi(2)
                        - 252.0 * ep2
                        - 3.0 * c1.powi(2))
                        * d.powi(6)
                        / 720.0);

        let lon = self.lon0.to_radians()
            + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
                + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1.powi(2) + 8.0 * ep2 + 24.0 * t1.powi(2))
                    * d.powi(5)
                    / 120.0)
                / cos_phi1;

        Geographic::new(lon, lat)
    }
}

/// Longueur de l'arc de méridien depuis l'équateur
fn meridian_arc(ell: &Ellipsoid, phi: f64) -> f64 {
    let e2 = ell.e2();
    let e4 = e2 * e2;
    let e6 = e4 * e2;

    ell.a
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

/// Latitude dont l'arc de méridien vaut `m`
fn footpoint_latitude(ell: &Ellipsoid, m: f64) -> f64 {
    let e2 = ell.e2();
    let mut phi = m / ell.a;
    for _ in 0..10 {
        let sin_phi = phi.sin();
        // Rayon de courbure méridien
        let rho = ell.a * (1.0 - e2) / (1.0 - e2 * sin_phi.powi(2)).powf(1.5);
        let delta = (m - meridian_arc(ell, phi)) / rho;
        phi += delta;
        if delta.abs() < 1e-14 {
            break;
        }
    }
    phi
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utm_37n_moscow() {
        let tm = TransverseMercator::utm(37, false);
        let (x, y) = tm.forward(Geographic::from_degrees(37.6176, 55.7520));
        assert!((x - 413_234.53).abs() < 0.5, "x={}", x);
        assert!((y - 6_179_343.71).abs() < 0.5, "y={}", y);
    }

    #[test]
    fn test_central_meridian_origin() {
        let tm = TransverseMercator::utm(31, false);
        let (x, y) = tm.forward(Geographic::from_degrees(3.0, 0.0));
        assert!((x - 500_000.0).abs() < 1e-6);
        assert!(y.abs() < 1e-6);
    }

    #[test]
    fn test_gauss_kruger_zone_prefix() {
        let tm = TransverseMercator::gauss_kruger(7);
        let (x, y) = tm.forward(Geographic::from_degrees(37.6176, 55.7520));
        assert!((x - 7_413_198.37).abs() < 0.5, "x={}", x);
        assert!((y - 6_181_924.75).abs() < 0.5, "y={}", y);
    }

    #[test]
    fn test_roundtrip_near_central_meridian() {
        let tm = TransverseMercator {
            lat0: 55.667,
            lon0: 37.4998,
            k0: 1.0,
            x0: -19.1,
            y0: 4.9,
            datum: Datum::PULKOVO_1942,
        };
        for (lon, lat) in [(37.6176, 55.7520), (37.3, 55.5), (37.9, 55.95)] {
            let (x, y) = tm.forward(Geographic::from_degrees(lon, lat));
            let (lon2, lat2) = tm.inverse(x, y).to_degrees();
            assert!((lon2 - lon).abs() < 1e-9, "lon={} vs {}", lon2, lon);
            assert!((lat2 - lat).abs() < 1e-9, "lat={} vs {}", lat2, lat);
        }
    }
}
