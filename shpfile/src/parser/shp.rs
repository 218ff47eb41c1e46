//! Parser pour les fichiers .shp (géométries)

use geo::{Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point};
use tracing::debug;

use crate::archive::SHP_FILE_CODE;
use crate::topology::organize_rings;
use crate::ShpError;

const FILE: &str = ".shp";
const HEADER_LEN: usize = 100;

/// Types de formes du format ESRI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
    MultiPatch,
}

impl ShapeType {
    pub fn from_code(code: i32) -> Result<Self, ShpError> {
        Ok(match code {
            0 => Self::Null,
            1 => Self::Point,
            3 => Self::PolyLine,
            5 => Self::Polygon,
            8 => Self::MultiPoint,
            11 => Self::PointZ,
            13 => Self::PolyLineZ,
            15 => Self::PolygonZ,
            18 => Self::MultiPointZ,
            21 => Self::PointM,
            23 => Self::PolyLineM,
            25 => Self::PolygonM,
            28 => Self::MultiPointM,
            31 => Self::MultiPatch,
            other => {
                return Err(ShpError::format(
                    FILE,
                    format!("unknown shape type {}", other),
                ))
            }
        })
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Null => 0,
            Self::Point => 1,
            Self::PolyLine => 3,
            Self::Polygon => 5,
            Self::MultiPoint => 8,
            Self::PointZ => 11,
            Self::PolyLineZ => 13,
            Self::PolygonZ => 15,
            Self::MultiPointZ => 18,
            Self::PointM => 21,
            Self::PolyLineM => 23,
            Self::PolygonM => 25,
            Self::MultiPointM => 28,
            Self::MultiPatch => 31,
        }
    }
}

/// Enregistrement décodé : numéro + géométrie (None pour une forme Null)
#[derive(Debug, Clone)]
pub struct ShapeRecord {
    pub number: u64,
    pub geometry: Option<Geometry>,
}

/// Lecteur borné sur un buffer
struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ShpError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                ShpError::format(
                    FILE,
                    format!("unexpected end of data at offset {}", self.pos),
                )
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn skip(&mut self, len: usize) -> Result<(), ShpError> {
        self.take(len).map(|_| ())
    }

    fn i32_be(&mut self) -> Result<i32, ShpError> {
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn i32_le(&mut self) -> Result<i32, ShpError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f64_le(&mut self) -> Result<f64, ShpError> {
        let b = self.take(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(f64::from_le_bytes(buf))
    }

    fn count(&mut self, what: &str) -> Result<usize, ShpError> {
        let n = self.i32_le()?;
        usize::try_from(n)
            .map_err(|_| ShpError::format(FILE, format!("negative {} count: {}", what, n)))
    }

    fn coord(&mut self) -> Result<Coord, ShpError> {
        let x = self.f64_le()?;
        let y = self.f64_le()?;
        Ok(Coord { x, y })
    }
}

/// Parse le contenu d'un .shp
pub fn parse(data: &[u8]) -> Result<(ShapeType, Vec<ShapeRecord>), ShpError> {
    if data.len() < HEADER_LEN {
        return Err(ShpError::format(FILE, "file shorter than 100-byte header"));
    }

    let mut header = ByteReader::new(&data[..HEADER_LEN]);
    let code = header.i32_be()?;
    if code != SHP_FILE_CODE {
        return Err(ShpError::format(FILE, format!("bad file code {}", code)));
    }
    header.skip(20)?;
    let declared_len = header.i32_be()?.max(0) as usize * 2;
    let _version = header.i32_le()?;
    let shape_type = ShapeType::from_code(header.i32_le()?)?;

    // Le fichier peut être tronqué ou plus long que déclaré : on borne au plus petit
    let end = if declared_len >= HEADER_LEN {
        declared_len.min(data.len())
    } else {
        data.len()
    };

    let mut reader = ByteReader::new(&data[..end]);
    reader.skip(HEADER_LEN)?;

    let mut records = Vec::new();
    while reader.pos < end {
        if end - reader.pos < 8 {
            return Err(ShpError::format(
                FILE,
                format!("trailing {} bytes after last record", end - reader.pos),
            ));
        }
        let number = reader.i32_be()?;
        let content_len = reader.i32_be()?;
        let content_len = usize::try_from(content_len)
            .map_err(|_| ShpError::format(FILE, format!("record {} has negative length", number)))?
            * 2;
        let content = reader.take(content_len)?;

        let geometry = parse_record(content).map_err(|e| match e {
            ShpError::Format { reason, .. } => {
                ShpError::format(FILE, format!("record {}: {}", number, reason))
            }
            other => other,
        })?;
        records.push(ShapeRecord {
            number: number.max(0) as u64,
            geometry,
        });
    }

    debug!(
        shape_type = ?shape_type,
        records = records.len(),
        "Parsed shp records"
    );

    Ok((shape_type, records))
}

fn parse_record(content: &[u8]) -> Result<Option<Geometry>, ShpError> {
    let mut r = ByteReader::new(content);
    let shape_type = ShapeType::from_code(r.i32_le()?)?;

    // Les valeurs Z et M sont ignorées : elles suivent les coordonnées XY
    let geometry = match shape_type {
        ShapeType::Null => None,
        ShapeType::Point | ShapeType::PointZ | ShapeType::PointM => {
            Some(Geometry::Point(Point::from(r.coord()?)))
        }
        ShapeType::MultiPoint | ShapeType::MultiPointZ | ShapeType::MultiPointM => {
            r.skip(32)?;
            let n = r.count("point")?;
            let points = (0..n)
                .map(|_| r.coord().map(Point::from))
                .collect::<Result<Vec<_>, _>>()?;
            Some(Geometry::MultiPoint(MultiPoint::new(points)))
        }
        ShapeType::PolyLine | ShapeType::PolyLineZ | ShapeType::PolyLineM => {
            let parts = read_parts(&mut r)?;
            let mut lines: Vec<LineString> = parts.into_iter().map(LineString::new).collect();
            if lines.len() == 1 {
                lines.pop().map(Geometry::LineString)
            } else {
                Some(Geometry::MultiLineString(MultiLineString::new(lines)))
            }
        }
        ShapeType::Polygon | ShapeType::PolygonZ | ShapeType::PolygonM => {
            let parts = read_parts(&mut r)?;
            let rings: Vec<LineString> = parts.into_iter().map(LineString::new).collect();
            let mut polygons = organize_rings(rings);
            match polygons.len() {
                0 => None,
                1 => polygons.pop().map(Geometry::Polygon),
                _ => Some(Geometry::MultiPolygon(MultiPolygon::new(polygons))),
            }
        }
        ShapeType::MultiPatch => {
            return Err(ShpError::UnsupportedGeometry("MultiPatch".into()));
        }
    };

    Ok(geometry)
}

/// Lit bbox + parties + points d'une PolyLine / d'un Polygon
fn read_parts(r: &mut ByteReader<'_>) -> Result<Vec<Vec<Coord>>, ShpError> {
    r.skip(32)?;
    let num_parts = r.count("part")?;
    let num_points = r.count("point")?;

    let mut starts = Vec::with_capacity(num_parts.min(4096));
    for _ in 0..num_parts {
        let start = r.count("part index")?;
        if start >= num_points || starts.last().map_or(false, |&prev| start < prev) {
            return Err(ShpError::format(
                FILE,
                format!("invalid part index {} for {} points", start, num_points),
            ));
        }
        starts.push(start);
    }

    let mut points = Vec::with_capacity(num_points.min(1 << 20));
    for _ in 0..num_points {
        points.push(r.coord()?);
    }

    let mut parts = Vec::with_capacity(starts.len());
    for (i, &start) in starts.iter().enumerate() {
        let stop = starts.get(i + 1).copied().unwrap_or(num_points);
        parts.push(points[start..stop].to_vec());
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(shape_type: i32, file_len_bytes: usize) -> Vec<u8> {
        let mut h = vec![0u8; HEADER_LEN];
        h[0..4].copy_from_slice(&SHP_FILE_CODE.to_be_bytes());
        h[24..28].copy_from_slice(&((file_len_bytes / 2) as i32).to_be_bytes());
        h[28..32].copy_from_slice(&1000i32.to_le_bytes());
        h[32..36].copy_from_slice(&shape_type.to_le_bytes());
        h
    }

    fn point_file(x: f64, y: f64, shape_type: i32, extra: usize) -> Vec<u8> {
        let content_len = 4 + 16 + extra;
        let mut data = header(shape_type, HEADER_LEN + 8 + content_len);
        data.extend_from_slice(&1i32.to_be_bytes());
        data.extend_from_slice(&((content_len / 2) as i32).to_be_bytes());
        data.extend_from_slice(&shape_type.to_le_bytes());
        data.extend_from_slice(&x.to_le_bytes());
        data.extend_from_slice(&y.to_le_bytes());
        data.extend(std::iter::repeat(0u8).take(extra));
        data
    }

    #[test]
    fn test_parse_point() {
        let (shape_type, records) = parse(&point_file(37.6, 55.7, 1, 0)).unwrap();
        assert_eq!(shape_type, ShapeType::Point);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].number, 1);
        match &records[0].geometry {
            Some(Geometry::Point(p)) => {
                assert_eq!(p.x(), 37.6);
                assert_eq!(p.y(), 55.7);
            }
            other => panic!("Expected point, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_point_z_skips_z_and_m() {
        let (shape_type, records) = parse(&point_file(1.0, 2.0, 11, 16)).unwrap();
        assert_eq!(shape_type, ShapeType::PointZ);
        assert!(matches!(records[0].geometry, Some(Geometry::Point(_))));
    }

    #[test]
    fn test_bad_file_code() {
        let mut data = point_file(0.0, 0.0, 1, 0);
        data[3] = 0;
        assert!(matches!(parse(&data), Err(ShpError::Format { .. })));
    }

    #[test]
    fn test_truncated_record() {
        let mut data = point_file(0.0, 0.0, 1, 0);
        data.truncate(data.len() - 4);
        // Longueur déclarée > taille réelle : la lecture doit échouer proprement
        assert!(matches!(parse(&data), Err(ShpError::Format { .. })));
    }

    #[test]
    fn test_multipatch_unsupported() {
        let mut data = header(31, HEADER_LEN + 12);
        data.extend_from_slice(&1i32.to_be_bytes());
        data.extend_from_slice(&2i32.to_be_bytes());
        data.extend_from_slice(&31i32.to_le_bytes());
        assert!(matches!(
            parse(&data),
            Err(ShpError::UnsupportedGeometry(t)) if t == "MultiPatch"
        ));
    }

    #[test]
    fn test_shape_type_codes() {
        for code in [0, 1, 3, 5, 8, 11, 13, 15, 18, 21, 23, 25, 28, 31] {
            assert_eq!(ShapeType::from_code(code).unwrap().code(), code);
        }
        assert!(ShapeType::from_code(2).is_err());
    }
}
