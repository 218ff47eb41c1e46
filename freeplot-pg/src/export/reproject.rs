//! Reprojection de géométries avec PROJ
//!
//! Ce module est disponible uniquement avec le feature `reproject`.

use anyhow::{Context, Result};
use geo::{Coord, Geometry, LineString, MapCoords, Polygon};
use proj::Proj;
use shpfile::Crs;

/// Reprojection de géométries entre deux systèmes de coordonnées
pub struct Reprojector {
    proj: Proj,
    source: Crs,
    target: Crs,
}

impl Reprojector {
    /// Crée un reprojector ; PROJ accepte `EPSG:n`, les chaînes PROJ.4 et le WKT
    pub fn new(source: &Crs, target: &Crs) -> Result<Self> {
        let from = source.to_string();
        let to = target.to_string();

        let proj = Proj::new_known_crs(&from, &to, None).context(format!(
            "Failed to create projection from {} to {}",
            source, target
        ))?;

        Ok(Self {
            proj,
            source: source.clone(),
            target: target.clone(),
        })
    }

    pub fn source(&self) -> &Crs {
        &self.source
    }

    pub fn target(&self) -> &Crs {
        &self.target
    }

    /// Transforme une géométrie
    pub fn transform_geometry(&self, geom: &Geometry) -> Result<Geometry> {
        match geom {
            Geometry::LineString(ls) => Ok(Geometry::LineString(self.transform_linestring(ls)?)),
            Geometry::Polygon(p) => Ok(Geometry::Polygon(self.transform_polygon(p)?)),
            Geometry::MultiPolygon(mp) => {
                let polys: Result<Vec<Polygon>> =
                    mp.0.iter().map(|p| self.transform_polygon(p)).collect();
                Ok(Geometry::MultiPolygon(polys?.into()))
            }
            // Le reste point par point
            other => other.try_map_coords(|c: Coord| {
                let (x, y) = self
                    .proj
                    .convert((c.x, c.y))
                    .context("Coordinate transformation failed")?;
                Ok(Coord { x, y })
            }),
        }
    }

    /// Transforme une LineString (conversion batch)
    fn transform_linestring(&self, ls: &LineString) -> Result<LineString> {
        let mut coords: Vec<(f64, f64)> = ls.0.iter().map(|c| (c.x, c.y)).collect();

        self.proj
            .convert_array(&mut coords)
            .context("Batch coordinate transformation failed")?;

        Ok(coords.into_iter().map(|(x, y)| Coord { x, y }).collect())
    }

    fn transform_polygon(&self, p: &Polygon) -> Result<Polygon> {
        let exterior = self.transform_linestring(p.exterior())?;
        let interiors: Result<Vec<LineString>> = p
            .interiors()
            .iter()
            .map(|ls| self.transform_linestring(ls))
            .collect();
        Ok(Polygon::new(exterior, interiors?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    #[test]
    fn test_utm_to_wgs84() {
        let reprojector = Reprojector::new(&Crs::Epsg(32637), &Crs::Epsg(4326)).unwrap();
        let kremlin = Geometry::Point(Point::new(413_234.53, 6_179_343.71));

        match reprojector.transform_geometry(&kremlin).unwrap() {
            Geometry::Point(p) => {
                assert!((p.x() - 37.6176).abs() < 1e-6, "lon={}", p.x());
                assert!((p.y() - 55.7520).abs() < 1e-6, "lat={}", p.y());
            }
            other => panic!("Expected Point geometry, got {:?}", other),
        }
    }

    #[test]
    fn test_polygon_transform() {
        let reprojector = Reprojector::new(&Crs::Epsg(3857), &Crs::Epsg(4326)).unwrap();
        let poly = Geometry::Polygon(Polygon::new(
            LineString::from(vec![
                (4_187_572.0, 7_509_203.0),
                (4_187_672.0, 7_509_203.0),
                (4_187_672.0, 7_509_303.0),
                (4_187_572.0, 7_509_203.0),
            ]),
            vec![],
        ));

        match reprojector.transform_geometry(&poly).unwrap() {
            Geometry::Polygon(p) => {
                assert_eq!(p.exterior().0.len(), 4);
                let first = &p.exterior().0[0];
                assert!((first.x - 37.6176).abs() < 1e-5);
                assert!((first.y - 55.7520).abs() < 1e-5);
            }
            other => panic!("Expected Polygon geometry, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_epsg() {
        assert!(Reprojector::new(&Crs::Epsg(99999), &Crs::Epsg(4326)).is_err());
    }
}
