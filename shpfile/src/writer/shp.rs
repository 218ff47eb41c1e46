//! Écriture des fichiers .shp et .shx

use geo::orient::{Direction, Orient};
use geo::{BoundingRect, Coord, Geometry, LineString, Polygon, Rect};

use crate::archive::SHP_FILE_CODE;
use crate::parser::shp::ShapeType;
use crate::types::geometry_type_name;
use crate::ShpError;

/// Fichiers .shp et .shx produits
#[derive(Debug, Clone)]
pub struct ShpOutput {
    pub shape_type: ShapeType,
    pub shp: Vec<u8>,
    pub shx: Vec<u8>,
}

/// Famille de forme ESRI d'une géométrie
fn family(geometry: &Geometry) -> Result<ShapeType, ShpError> {
    match geometry {
        Geometry::Point(_) => Ok(ShapeType::Point),
        Geometry::MultiPoint(_) => Ok(ShapeType::MultiPoint),
        Geometry::LineString(_) | Geometry::MultiLineString(_) => Ok(ShapeType::PolyLine),
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) => Ok(ShapeType::Polygon),
        other => Err(ShpError::UnsupportedGeometry(
            geometry_type_name(other).to_string(),
        )),
    }
}

/// Sérialise les géométries d'une couche (une forme par feature)
pub fn write<'a, I>(geometries: I) -> Result<ShpOutput, ShpError>
where
    I: IntoIterator<Item = &'a Geometry>,
{
    let mut shape_type = ShapeType::Null;
    let mut records: Vec<Vec<u8>> = Vec::new();
    let mut extent: Option<Rect> = None;

    for geometry in geometries {
        let current = family(geometry)?;
        if shape_type == ShapeType::Null {
            shape_type = current;
        } else if shape_type != current {
            return Err(ShpError::format(
                ".shp",
                format!(
                    "mixed geometry families in one layer: {:?} and {:?}",
                    shape_type, current
                ),
            ));
        }

        if let Some(bbox) = geometry.bounding_rect() {
            extent = Some(match extent {
                Some(e) => merge_rect(e, bbox),
                None => bbox,
            });
        }
        records.push(encode_record(geometry)?);
    }

    let shp_len: usize = 100 + records.iter().map(|r| 8 + r.len()).sum::<usize>();
    let shx_len: usize = 100 + 8 * records.len();

    let mut shp = header(shape_type, shp_len, extent)?;
    let mut shx = header(shape_type, shx_len, extent)?;

    let mut offset = 100usize;
    for (i, content) in records.iter().enumerate() {
        let number = i32::try_from(i + 1)
            .map_err(|_| ShpError::format(".shp", "too many records"))?;
        let words = to_words(content.len())?;

        shp.extend_from_slice(&number.to_be_bytes());
        shp.extend_from_slice(&words.to_be_bytes());
        shp.extend_from_slice(content);

        shx.extend_from_slice(&to_words(offset)?.to_be_bytes());
        shx.extend_from_slice(&words.to_be_bytes());
        offset += 8 + content.len();
    }

    Ok(ShpOutput {
        shape_type,
        shp,
        shx,
    })
}

fn to_words(bytes: usize) -> Result<i32, ShpError> {
    i32::try_from(bytes / 2).map_err(|_| ShpError::format(".shp", "file exceeds 4 GiB limit"))
}

fn merge_rect(a: Rect, b: Rect) -> Rect {
    Rect::new(
        Coord {
            x: a.min().x.min(b.min().x),
            y: a.min().y.min(b.min().y),
        },
        Coord {
            x: a.max().x.max(b.max().x),
            y: a.max().y.max(b.max().y),
        },
    )
}

fn header(shape_type: ShapeType, len: usize, extent: Option<Rect>) -> Result<Vec<u8>, ShpError> {
    let mut h = Vec::with_capacity(100);
    h.extend_from_slice(&SHP_FILE_CODE.to_be_bytes());
    h.extend_from_slice(&[0u8; 20]);
    h.extend_from_slice(&to_words(len)?.to_be_bytes());
    h.extend_from_slice(&1000i32.to_le_bytes());
    h.extend_from_slice(&shape_type.code().to_le_bytes());
    push_bbox(&mut h, extent);
    // Z et M non gérés
    h.extend_from_slice(&[0u8; 32]);
    Ok(h)
}

fn push_bbox(buf: &mut Vec<u8>, bbox: Option<Rect>) {
    let (min, max) = bbox
        .map(|r| (r.min(), r.max()))
        .unwrap_or((Coord { x: 0.0, y: 0.0 }, Coord { x: 0.0, y: 0.0 }));
    for v in [min.x, min.y, max.x, max.y] {
        buf.extend_from_slice(&v.to_le_bytes());
    }
}

fn push_coord(buf: &mut Vec<u8>, c: &Coord) {
    buf.extend_from_slice(&c.x.to_le_bytes());
    buf.extend_from_slice(&c.y.to_le_bytes());
}

fn encode_record(geometry: &Geometry) -> Result<Vec<u8>, ShpError> {
    let mut buf = Vec::new();
    match geometry {
        Geometry::Point(p) => {
            buf.extend_from_slice(&ShapeType::Point.code().to_le_bytes());
            push_coord(&mut buf, &p.0);
        }
        Geometry::MultiPoint(mp) => {
            buf.extend_from_slice(&ShapeType::MultiPoint.code().to_le_bytes());
            push_bbox(&mut buf, mp.bounding_rect());
            buf.extend_from_slice(&count(mp.0.len())?.to_le_bytes());
            for p in &mp.0 {
                push_coord(&mut buf, &p.0);
            }
        }
        Geometry::LineString(ls) => {
            encode_parts(&mut buf, ShapeType::PolyLine, geometry, &[ls])?;
        }
        Geometry::MultiLineString(mls) => {
            let parts: Vec<&LineString> = mls.0.iter().collect();
            encode_parts(&mut buf, ShapeType::PolyLine, geometry, &parts)?;
        }
        Geometry::Polygon(p) => {
            let oriented = p.orient(Direction::Reversed);
            let parts = polygon_rings(&oriented);
            encode_parts(&mut buf, ShapeType::Polygon, geometry, &parts)?;
        }
        Geometry::MultiPolygon(mp) => {
            // Convention ESRI : extérieurs horaires, trous anti-horaires
            let oriented = mp.orient(Direction::Reversed);
            let parts: Vec<&LineString> = oriented.0.iter().flat_map(polygon_rings).collect();
            encode_parts(&mut buf, ShapeType::Polygon, geometry, &parts)?;
        }
        other => {
            return Err(ShpError::UnsupportedGeometry(
                geometry_type_name(other).to_string(),
            ))
        }
    }
    Ok(buf)
}

fn polygon_rings(polygon: &Polygon) -> Vec<&LineString> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors().iter())
        .collect()
}

fn count(n: usize) -> Result<i32, ShpError> {
    i32::try_from(n).map_err(|_| ShpError::format(".shp", "too many points"))
}

fn encode_parts(
    buf: &mut Vec<u8>,
    shape_type: ShapeType,
    geometry: &Geometry,
    parts: &[&LineString],
) -> Result<(), ShpError> {
    buf.extend_from_slice(&shape_type.code().to_le_bytes());
    push_bbox(buf, geometry.bounding_rect());

    let num_points: usize = parts.iter().map(|p| p.0.len()).sum();
    buf.extend_from_slice(&count(parts.len())?.to_le_bytes());
    buf.extend_from_slice(&count(num_points)?.to_le_bytes());

    let mut start = 0usize;
    for part in parts {
        buf.extend_from_slice(&count(start)?.to_le_bytes());
        start += part.0.len();
    }
    for part in parts {
        for c in &part.0 {
            push_coord(buf, c);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::shp;
    use geo::{polygon, Point, Winding};

    #[test]
    fn test_polygon_written_clockwise() {
        // Extérieur anti-horaire en entrée
        let poly: Polygon = polygon![
            exterior: [(x: 0.0, y: 0.0), (x: 10.0, y: 0.0), (x: 10.0, y: 10.0), (x: 0.0, y: 10.0)],
            interiors: [[(x: 2.0, y: 2.0), (x: 2.0, y: 4.0), (x: 4.0, y: 4.0), (x: 4.0, y: 2.0)]],
        ];
        let geometry = Geometry::Polygon(poly);
        let out = write([&geometry]).unwrap();
        assert_eq!(out.shape_type, ShapeType::Polygon);
        assert_eq!(out.shx.len(), 108);

        let (_, records) = shp::parse(&out.shp).unwrap();
        match &records[0].geometry {
            Some(Geometry::Polygon(p)) => {
                assert!(p.exterior().is_cw());
                assert_eq!(p.interiors().len(), 1);
                assert!(p.interiors()[0].is_ccw());
            }
            other => panic!("Expected polygon, got {:?}", other),
        }
    }

    #[test]
    fn test_mixed_families_rejected() {
        let a = Geometry::Point(Point::new(0.0, 0.0));
        let b = Geometry::LineString(LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]));
        assert!(matches!(write([&a, &b]), Err(ShpError::Format { .. })));
    }

    #[test]
    fn test_empty_layer_is_null_type() {
        let out = write(std::iter::empty()).unwrap();
        assert_eq!(out.shape_type, ShapeType::Null);
        assert_eq!(out.shp.len(), 100);
        let (shape_type, records) = shp::parse(&out.shp).unwrap();
        assert_eq!(shape_type, ShapeType::Null);
        assert!(records.is_empty());
    }
}
