//! Validation des polygones d'exclusion avant les opérations booléennes

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{Coord, Line, LineString, Polygon};

/// Vérifie qu'un polygone est utilisable par le balayage booléen.
///
/// Retourne la raison du rejet : anneau ouvert, moins de 4 positions,
/// coordonnée non finie, extérieur d'aire nulle ou anneau auto-intersecté.
pub fn check_polygon(polygon: &Polygon) -> Result<(), String> {
    check_ring(polygon.exterior(), "exterior")?;
    if ring_area(polygon.exterior()) == 0.0 {
        return Err("exterior ring has zero area".into());
    }
    check_simple(polygon.exterior(), "exterior")?;

    for (i, hole) in polygon.interiors().iter().enumerate() {
        let label = format!("interior ring {}", i);
        check_ring(hole, &label)?;
        check_simple(hole, &label)?;
    }
    Ok(())
}

fn check_ring(ring: &LineString, label: &str) -> Result<(), String> {
    let coords = &ring.0;
    if coords.len() < 4 {
        return Err(format!("{} has {} positions, at least 4 required", label, coords.len()));
    }
    if let Some(c) = coords.iter().find(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(format!("{} has a non-finite coordinate ({}, {})", label, c.x, c.y));
    }
    if coords.first() != coords.last() {
        return Err(format!("{} is not closed", label));
    }
    Ok(())
}

fn check_simple(ring: &LineString, label: &str) -> Result<(), String> {
    match first_self_intersection(ring) {
        Some(at) => Err(format!("{} self-intersects at ({}, {})", label, at.x, at.y)),
        None => Ok(()),
    }
}

/// Aire signée (shoelace)
fn ring_area(ring: &LineString) -> f64 {
    ring.lines()
        .map(|l| l.start.x * l.end.y - l.end.x * l.start.y)
        .sum::<f64>()
        / 2.0
}

fn min_x(line: &Line) -> f64 {
    line.start.x.min(line.end.x)
}

/// Premier croisement entre deux segments de l'anneau.
///
/// Balayage selon x : les segments sont triés par x minimal et chacun n'est
/// comparé qu'aux suivants dont l'intervalle en x chevauche le sien.
/// Deux segments consécutifs partagent un sommet ; seul un recouvrement
/// colinéaire (aller-retour) est alors une intersection.
fn first_self_intersection(ring: &LineString) -> Option<Coord> {
    let segments: Vec<Line> = ring.lines().filter(|l| l.start != l.end).collect();
    let n = segments.len();
    if n < 3 {
        return segments.first().map(|l| l.start);
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| min_x(&segments[a]).total_cmp(&min_x(&segments[b])));

    let adjacent = |i: usize, j: usize| {
        let (lo, hi) = if i < j { (i, j) } else { (j, i) };
        hi - lo == 1 || (lo == 0 && hi == n - 1)
    };

    for (k, &i) in order.iter().enumerate() {
        let a = segments[i];
        let max_x = a.start.x.max(a.end.x);
        for &j in &order[k + 1..] {
            let b = segments[j];
            if min_x(&b) > max_x {
                break;
            }
            match line_intersection(a, b) {
                None => {}
                Some(LineIntersection::Collinear { intersection })
                    if intersection.start != intersection.end =>
                {
                    return Some(intersection.start);
                }
                Some(LineIntersection::SinglePoint { intersection, .. })
                | Some(LineIntersection::Collinear {
                    intersection: Line {
                        start: intersection,
                        ..
                    },
                }) => {
                    if !adjacent(i, j) {
                        return Some(intersection);
                    }
                }
            }
        }
    }
    None
}
