//! Définitions des ellipsoïdes

/// Ellipsoïde de référence (demi-grand axe + aplatissement)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ellipsoid {
    /// Demi-grand axe (rayon équatorial) en mètres
    pub a: f64,
    /// Aplatissement
    pub f: f64,
}

impl Ellipsoid {
    pub const WGS84: Ellipsoid = Ellipsoid {
        a: 6378137.0,
        f: 1.0 / 298.257223563,
    };

    /// Quasi identique à WGS84, différence < 0.1mm
    pub const GRS80: Ellipsoid = Ellipsoid {
        a: 6378137.0,
        f: 1.0 / 298.257222101,
    };

    /// Krassovsky 1940 (Pulkovo 1942, grilles locales de Moscou)
    pub const KRASSOVSKY: Ellipsoid = Ellipsoid {
        a: 6378245.0,
        f: 1.0 / 298.3,
    };

    /// International 1924 (Hayford)
    pub const INTERNATIONAL: Ellipsoid = Ellipsoid {
        a: 6378388.0,
        f: 1.0 / 297.0,
    };

    /// Construit depuis le demi-grand axe et l'inverse de l'aplatissement
    pub fn from_inverse_flattening(a: f64, rf: f64) -> Self {
        let f = if rf == 0.0 { 0.0 } else { 1.0 / rf };
        Self { a, f }
    }

    /// Résout un nom PROJ (`+ellps=`) ou ESRI/OGC (`SPHEROID["..."]`)
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "wgs84" | "wgs1984" => Some(Self::WGS84),
            "grs80" | "grs1980" => Some(Self::GRS80),
            "krass" | "krassowsky1940" | "krassovsky1940" | "krasovsky1940" => {
                Some(Self::KRASSOVSKY)
            }
            "intl" | "international1924" | "hayford" => Some(Self::INTERNATIONAL),
            _ => None,
        }
    }

    /// Demi-petit axe (rayon polaire) en mètres
    pub fn b(&self) -> f64 {
        self.a * (1.0 - self.f)
    }

    /// Première excentricité au carré
    pub fn e2(&self) -> f64 {
        2.0 * self.f - self.f * self.f
    }

    /// Deuxième excentricité au carré
    pub fn ep2(&self) -> f64 {
        let e2 = self.e2();
        e2 / (1.0 - e2)
    }
}
