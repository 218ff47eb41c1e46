//! Assemblage des anneaux en polygones (extérieurs / trous)

use geo::{Area, Contains, LineString, Polygon, Winding};
use tracing::debug;

/// Organise les anneaux d'un enregistrement Polygon en polygones avec trous.
///
/// Convention ESRI : anneaux extérieurs dans le sens horaire, trous dans le sens
/// anti-horaire. Un trou est rattaché au plus petit extérieur qui le contient ; un trou
/// orphelin devient un extérieur. Si aucun anneau n'est horaire (orientation non
/// respectée par le producteur), l'imbrication seule décide.
pub fn organize_rings(rings: Vec<LineString>) -> Vec<Polygon> {
    if rings.is_empty() {
        return Vec::new();
    }

    let (mut outers, mut holes): (Vec<LineString>, Vec<LineString>) =
        rings.into_iter().partition(|ring| !ring.is_ccw());

    if outers.is_empty() {
        return organize_by_nesting(holes);
    }

    let shells: Vec<Polygon> = outers
        .iter()
        .map(|ring| Polygon::new(ring.clone(), vec![]))
        .collect();
    let areas: Vec<f64> = shells.iter().map(|p| p.unsigned_area()).collect();

    let mut assigned: Vec<Vec<LineString>> = vec![Vec::new(); outers.len()];
    let mut orphans = Vec::new();

    for hole in holes.drain(..) {
        let owner = shells
            .iter()
            .enumerate()
            .filter(|(_, shell)| shell.contains(&hole))
            .min_by(|(a, _), (b, _)| areas[*a].total_cmp(&areas[*b]))
            .map(|(i, _)| i);

        match owner {
            Some(i) => assigned[i].push(hole),
            None => orphans.push(hole),
        }
    }

    if !orphans.is_empty() {
        debug!(count = orphans.len(), "Orphan holes promoted to exteriors");
    }

    let mut polygons: Vec<Polygon> = outers
        .drain(..)
        .zip(assigned)
        .map(|(outer, interiors)| Polygon::new(outer, interiors))
        .collect();
    polygons.extend(orphans.into_iter().map(|ring| Polygon::new(ring, vec![])));
    polygons
}

/// Répartition par imbrication : un anneau contenu dans un autre est un trou
fn organize_by_nesting(rings: Vec<LineString>) -> Vec<Polygon> {
    let shells: Vec<Polygon> = rings
        .iter()
        .map(|ring| Polygon::new(ring.clone(), vec![]))
        .collect();

    let mut parent: Vec<Option<usize>> = vec![None; rings.len()];
    for (i, ring) in rings.iter().enumerate() {
        parent[i] = shells
            .iter()
            .enumerate()
            .filter(|(j, shell)| *j != i && shell.contains(ring))
            .min_by(|(a, _), (b, _)| {
                shells[*a]
                    .unsigned_area()
                    .total_cmp(&shells[*b].unsigned_area())
            })
            .map(|(j, _)| j);
    }

    let mut interiors: Vec<Vec<LineString>> = vec![Vec::new(); rings.len()];
    for (i, p) in parent.iter().enumerate() {
        if let Some(owner) = p {
            if parent[*owner].is_none() {
                interiors[*owner].push(rings[i].clone());
            }
        }
    }

    rings
        .into_iter()
        .zip(interiors)
        .zip(parent)
        .filter(|(_, p)| p.is_none())
        .map(|((ring, holes), _)| Polygon::new(ring, holes))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Coord;

    fn ring(points: &[(f64, f64)]) -> LineString {
        LineString::new(points.iter().map(|&(x, y)| Coord { x, y }).collect())
    }

    fn cw_square(x0: f64, y0: f64, size: f64) -> LineString {
        ring(&[
            (x0, y0),
            (x0, y0 + size),
            (x0 + size, y0 + size),
            (x0 + size, y0),
            (x0, y0),
        ])
    }

    fn ccw_square(x0: f64, y0: f64, size: f64) -> LineString {
        let mut r = cw_square(x0, y0, size);
        r.0.reverse();
        r
    }

    #[test]
    fn test_organize_single_ring() {
        let polygons = organize_rings(vec![cw_square(0.0, 0.0, 1.0)]);
        assert_eq!(polygons.len(), 1);
        assert!(polygons[0].interiors().is_empty());
    }

    #[test]
    fn test_hole_assigned_to_smallest_container() {
        let polygons = organize_rings(vec![
            cw_square(0.0, 0.0, 100.0),
            ccw_square(10.0, 10.0, 5.0),
            cw_square(200.0, 0.0, 10.0),
            ccw_square(202.0, 2.0, 2.0),
        ]);
        assert_eq!(polygons.len(), 2);
        assert_eq!(polygons[0].interiors().len(), 1);
        assert_eq!(polygons[1].interiors().len(), 1);
    }

    #[test]
    fn test_orphan_hole_promoted() {
        let polygons = organize_rings(vec![cw_square(0.0, 0.0, 1.0), ccw_square(5.0, 5.0, 1.0)]);
        assert_eq!(polygons.len(), 2);
        assert!(polygons.iter().all(|p| p.interiors().is_empty()));
    }

    #[test]
    fn test_misoriented_rings_fall_back_to_nesting() {
        let polygons =
            organize_rings(vec![ccw_square(0.0, 0.0, 10.0), ccw_square(2.0, 2.0, 2.0)]);
        assert_eq!(polygons.len(), 1);
        assert_eq!(polygons[0].interiors().len(), 1);
    }
}
