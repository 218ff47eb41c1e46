//! Hash de polygone pour le suivi de lignée entre versions
//!
//! Le hash est normalisé : indépendant du sommet de départ des anneaux,
//! de leur sens de parcours et de l'ordre des trous.

use std::collections::HashMap;

use blake3::Hasher;
use geo::{Coord, LineString, Polygon};

pub type GeometryHash = [u8; 32];

/// Hash stable d'un polygone, coordonnées arrondies à 1e-6
pub fn polygon_hash(polygon: &Polygon) -> GeometryHash {
    let mut hasher = Hasher::new();
    hasher.update(b"POLYGON");
    hasher.update(&ring_digest(polygon.exterior()));

    let mut holes: Vec<GeometryHash> = polygon.interiors().iter().map(ring_digest).collect();
    holes.sort_unstable();
    for hole in &holes {
        hasher.update(b"INT");
        hasher.update(hole);
    }

    *hasher.finalize().as_bytes()
}

/// Digest d'un anneau parcouru dans le sens anti-horaire depuis son plus petit sommet
fn ring_digest(ring: &LineString) -> GeometryHash {
    let mut hasher = Hasher::new();

    // Le dernier point répète le premier sur un anneau fermé
    let len = if ring.0.len() > 1 && ring.0.first() == ring.0.last() {
        ring.0.len() - 1
    } else {
        ring.0.len()
    };
    if len == 0 {
        return *hasher.finalize().as_bytes();
    }

    let points: Vec<(i64, i64)> = ring.0[..len].iter().map(|c| rounded(*c)).collect();
    let start = (0..len).min_by_key(|&i| points[i]).unwrap_or(0);

    let signed_area: f64 = ring.lines().map(|l| l.determinant()).sum();
    let clockwise = signed_area < 0.0;

    for step in 0..len {
        let idx = if clockwise {
            (start + len - step) % len
        } else {
            (start + step) % len
        };
        let (x, y) = points[idx];
        hasher.update(&x.to_le_bytes());
        hasher.update(&y.to_le_bytes());
    }

    *hasher.finalize().as_bytes()
}

/// Arrondi à 6 décimales (~10 cm en degrés)
fn rounded(coord: Coord) -> (i64, i64) {
    (
        (coord.x * 1_000_000.0).round() as i64,
        (coord.y * 1_000_000.0).round() as i64,
    )
}

/// Index hash -> shape_id des polygones de la version précédente.
///
/// Un shape_id n'est hérité qu'une fois par version.
#[derive(Debug, Default)]
pub struct LineageIndex {
    by_hash: HashMap<GeometryHash, i64>,
}

impl LineageIndex {
    pub fn new(entries: impl IntoIterator<Item = (GeometryHash, i64)>) -> Self {
        Self {
            by_hash: entries.into_iter().collect(),
        }
    }

    /// shape_id hérité pour ce hash, retiré de l'index
    pub fn claim(&mut self, hash: &GeometryHash) -> Option<i64> {
        self.by_hash.remove(hash)
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }
}
