//! Changement de datum à 7 paramètres (convention « position vector », `+towgs84`)

use super::{Ellipsoid, Geographic};

const ARCSEC: f64 = std::f64::consts::PI / (180.0 * 3600.0);

/// Paramètres TOWGS84 : translations (m), rotations (secondes d'arc), échelle (ppm)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Helmert {
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    pub rx: f64,
    pub ry: f64,
    pub rz: f64,
    pub ds: f64,
}

impl Helmert {
    /// Pulkovo 1942 -> WGS84 (GOST 51794-2001)
    pub const PULKOVO_1942: Helmert = Helmert {
        tx: 23.92,
        ty: -141.27,
        tz: -80.9,
        rx: 0.0,
        ry: 0.35,
        rz: 0.82,
        ds: -0.12,
    };

    /// Accepte 3 (translations seules) ou 7 valeurs
    pub fn from_towgs84(values: &[f64]) -> Option<Self> {
        match *values {
            [tx, ty, tz] => Some(Self {
                tx,
                ty,
                tz,
                rx: 0.0,
                ry: 0.0,
                rz: 0.0,
                ds: 0.0,
            }),
            [tx, ty, tz, rx, ry, rz, ds] => Some(Self {
                tx,
                ty,
                tz,
                rx,
                ry,
                rz,
                ds,
            }),
            _ => None,
        }
    }

    pub fn is_identity(&self) -> bool {
        [self.tx, self.ty, self.tz, self.rx, self.ry, self.rz, self.ds]
            .iter()
            .all(|v| *v == 0.0)
    }

    /// Applique la transformation à des coordonnées géocentriques
    pub fn apply(&self, xyz: [f64; 3]) -> [f64; 3] {
        self.transform(xyz, 1.0)
    }

    /// Transformation réciproque (paramètres opposés, exacte au premier ordre)
    pub fn apply_inverse(&self, xyz: [f64; 3]) -> [f64; 3] {
        self.transform(xyz, -1.0)
    }

    fn transform(&self, [x, y, z]: [f64; 3], sign: f64) -> [f64; 3] {
        let rx = sign * self.rx * ARCSEC;
        let ry = sign * self.ry * ARCSEC;
        let rz = sign * self.rz * ARCSEC;
        let m = 1.0 + sign * self.ds * 1e-6;

        [
            sign * self.tx + m * (x - rz * y + ry * z),
            sign * self.ty + m * (rz * x + y - rx * z),
            sign * self.tz + m * (-ry * x + rx * y + z),
        ]
    }
}

/// Géographique (hauteur nulle) -> géocentrique
pub fn geodetic_to_ecef(geo: Geographic, ell: &Ellipsoid) -> [f64; 3] {
    let e2 = ell.e2();
    let (sin_lat, cos_lat) = geo.lat.sin_cos();
    let (sin_lon, cos_lon) = geo.lon.sin_cos();
    let n = ell.a / (1.0 - e2 * sin_lat.powi(2)).sqrt();

    [
        n * cos_lat * cos_lon,
        n * cos_lat * sin_lon,
        n * (1.0 - e2) * sin_lat,
    ]
}

/// Géocentrique -> géographique ; la hauteur ellipsoïdale est abandonnée
pub fn ecef_to_geodetic([x, y, z]: [f64; 3], ell: &Ellipsoid) -> Geographic {
    let e2 = ell.e2();
    let lon = y.atan2(x);
    let p = x.hypot(y);

    let mut lat = z.atan2(p * (1.0 - e2));
    for _ in 0..10 {
        let sin_lat = lat.sin();
        let n = ell.a / (1.0 - e2 * sin_lat.powi(2)).sqrt();
        let h = p / lat.cos() - n;
        let next = z.atan2(p * (1.0 - e2 * n / (n + h)));
        let converged = (next - lat).abs() < 1e-15;
        lat = next;
        if converged {
            break;
        }
    }

    Geographic::new(lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pulkovo_shift_in_moscow() {
        let sk42 = Geographic::from_degrees(37.6176, 55.7520);
        let xyz = geodetic_to_ecef(sk42, &Ellipsoid::KRASSOVSKY);
        let wgs = ecef_to_geodetic(Helmert::PULKOVO_1942.apply(xyz), &Ellipsoid::WGS84);
        let (lon, lat) = wgs.to_degrees();

        // ~120 m vers l'ouest
        assert!((lon - 37.6176 + 0.0018734).abs() < 1e-6, "lon={}", lon);
        assert!((lat - 55.7520 - 0.0000364).abs() < 1e-6, "lat={}", lat);
    }

    #[test]
    fn test_inverse_roundtrip() {
        let sk42 = Geographic::from_degrees(37.6176, 55.7520);
        let h = Helmert::PULKOVO_1942;
        let wgs = ecef_to_geodetic(
            h.apply(geodetic_to_ecef(sk42, &Ellipsoid::KRASSOVSKY)),
            &Ellipsoid::WGS84,
        );
        let back = ecef_to_geodetic(
            h.apply_inverse(geodetic_to_ecef(wgs, &Ellipsoid::WGS84)),
            &Ellipsoid::KRASSOVSKY,
        );
        let (lon, lat) = back.to_degrees();
        assert!((lon - 37.6176).abs() < 1e-7);
        assert!((lat - 55.7520).abs() < 1e-7);
    }

    #[test]
    fn test_ecef_roundtrip_same_ellipsoid() {
        let geo = Geographic::from_degrees(-61.07, 14.6);
        let back = ecef_to_geodetic(geodetic_to_ecef(geo, &Ellipsoid::WGS84), &Ellipsoid::WGS84);
        let (lon, lat) = back.to_degrees();
        assert!((lon + 61.07).abs() < 1e-12);
        assert!((lat - 14.6).abs() < 1e-12);
    }

    #[test]
    fn test_from_towgs84_arity() {
        assert!(Helmert::from_towgs84(&[1.0, 2.0, 3.0]).is_some());
        assert_eq!(
            Helmert::from_towgs84(&[23.92, -141.27, -80.9, 0.0, 0.35, 0.82, -0.12]),
            Some(Helmert::PULKOVO_1942)
        );
        assert!(Helmert::from_towgs84(&[1.0, 2.0]).is_none());
    }
}
