//! Tests d'intégration : aller-retour des couches à travers les formats

use std::io::Write;

use geo::{
    coord, Coord, CoordsIter, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon,
    Point, Polygon,
};
use shpfile::{
    parse, parse_with_fallback, read_layer, serialize, AttributeValue, CharacterEncoding, Crs,
    Feature, Layer, OutputFormat, ShapefileBundle, ShpError,
};

fn square(x0: f64, y0: f64, size: f64) -> LineString {
    LineString::new(vec![
        coord! { x: x0, y: y0 },
        coord! { x: x0 + size, y: y0 },
        coord! { x: x0 + size, y: y0 + size },
        coord! { x: x0, y: y0 + size },
        coord! { x: x0, y: y0 },
    ])
}

fn sample_geometries() -> Vec<Geometry> {
    vec![
        Geometry::Point(Point::new(37.617_635_123_456, 55.755_814_987_654)),
        Geometry::MultiPoint(MultiPoint::new(vec![
            Point::new(37.1, 55.1),
            Point::new(37.2, 55.2),
        ])),
        Geometry::LineString(LineString::from(vec![(37.0, 55.0), (37.5, 55.5), (38.0, 55.25)])),
        Geometry::MultiLineString(MultiLineString::new(vec![
            LineString::from(vec![(0.0, 0.0), (1.0, 1.0)]),
            LineString::from(vec![(2.0, 2.0), (3.0, 3.0), (4.0, 2.0)]),
        ])),
        Geometry::Polygon(Polygon::new(
            square(37.0, 55.0, 0.01),
            vec![square(37.002, 55.002, 0.001)],
        )),
        Geometry::MultiPolygon(MultiPolygon::new(vec![
            Polygon::new(square(0.0, 0.0, 10.0), vec![square(2.0, 2.0, 2.0)]),
            Polygon::new(square(20.0, 0.0, 5.0), vec![]),
        ])),
    ]
}

fn layer_of(geometry: Geometry, encoding: CharacterEncoding) -> Layer {
    let mut layer = Layer::new("sample", Crs::Epsg(4326), encoding);
    let mut feature = Feature::new(1, geometry);
    feature
        .attributes
        .insert("name".into(), AttributeValue::Text("Участок №1".into()));
    feature
        .attributes
        .insert("area".into(), AttributeValue::Number(42.5));
    layer.features.push(feature);
    layer
}

fn ring_counts(geometry: &Geometry) -> Vec<usize> {
    match geometry {
        Geometry::Polygon(p) => std::iter::once(p.exterior())
            .chain(p.interiors())
            .map(|r| r.0.len())
            .collect(),
        Geometry::MultiPolygon(mp) => mp
            .0
            .iter()
            .flat_map(|p| ring_counts(&Geometry::Polygon(p.clone())))
            .collect(),
        Geometry::MultiLineString(mls) => mls.0.iter().map(|l| l.0.len()).collect(),
        other => vec![other.coords_count()],
    }
}

fn assert_same_geometry(a: &Geometry, b: &Geometry) {
    assert_eq!(
        shpfile::geometry_type_name(a),
        shpfile::geometry_type_name(b)
    );
    assert_eq!(ring_counts(a), ring_counts(b));

    // Les anneaux peuvent être réorientés : on compare les ensembles de sommets
    let mut ca: Vec<Coord> = a.coords_iter().collect();
    let mut cb: Vec<Coord> = b.coords_iter().collect();
    let key = |c: &Coord| (c.x.to_bits(), c.y.to_bits());
    ca.sort_by_key(key);
    cb.sort_by_key(key);
    for (p, q) in ca.iter().zip(&cb) {
        assert!((p.x - q.x).abs() < 1e-9 && (p.y - q.y).abs() < 1e-9);
    }
}

#[test]
fn test_shapefile_round_trip_all_types() {
    for geometry in sample_geometries() {
        for encoding in [CharacterEncoding::Utf8, CharacterEncoding::Windows1251] {
            let layer = layer_of(geometry.clone(), encoding);
            let bytes = serialize(&layer, OutputFormat::Shapefile).unwrap();
            let back = parse(&bytes, encoding).unwrap();

            assert_eq!(back.crs, Crs::Epsg(4326));
            assert_eq!(back.features.len(), 1);
            assert_same_geometry(&geometry, &back.features[0].geometry);
            assert_eq!(
                back.features[0].attributes["name"],
                AttributeValue::Text("Участок №1".into())
            );
            assert_eq!(
                back.features[0].attributes["area"],
                AttributeValue::Number(42.5)
            );
        }
    }
}

#[test]
fn test_geojson_round_trip_all_types() {
    for geometry in sample_geometries() {
        let layer = layer_of(geometry.clone(), CharacterEncoding::Utf8);
        let bytes = serialize(&layer, OutputFormat::GeoJson).unwrap();
        let back = parse(&bytes, CharacterEncoding::Utf8).unwrap();

        assert_eq!(back.crs, Crs::Epsg(4326));
        assert_eq!(back.features.len(), 1);
        assert_eq!(back.features[0].id, 1);
        assert_same_geometry(&geometry, &back.features[0].geometry);
    }
}

#[test]
fn test_bzip2_archive() {
    let layer = layer_of(sample_geometries().remove(4), CharacterEncoding::Windows1251);
    let tar = serialize(&layer, OutputFormat::Shapefile).unwrap();

    let mut encoder = bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::default());
    encoder.write_all(&tar).unwrap();
    let compressed = encoder.finish().unwrap();

    let back = parse(&compressed, CharacterEncoding::Windows1251).unwrap();
    assert_eq!(back.name, "sample");
    assert_eq!(back.features.len(), 1);
}

#[test]
fn test_wrong_encoding_is_reported() {
    let layer = layer_of(sample_geometries().remove(0), CharacterEncoding::Windows1251);
    let bytes = serialize(&layer, OutputFormat::Shapefile).unwrap();

    // Octets cp1251 lus comme UTF-8
    let err = parse(&bytes, CharacterEncoding::Utf8).unwrap_err();
    assert!(matches!(err, ShpError::Encoding { ref field, .. } if field == "name"));
}

#[test]
fn test_corrupt_source() {
    let err = parse(b"definitely not a shapefile", CharacterEncoding::Utf8).unwrap_err();
    assert!(matches!(err, ShpError::Format { .. }));

    let layer = layer_of(sample_geometries().remove(4), CharacterEncoding::Utf8);
    let bundle = shpfile::writer::to_bundle(&layer).unwrap();
    let truncated = bundle.shp[..bundle.shp.len() - 10].to_vec();
    let err = parse(&truncated, CharacterEncoding::Utf8).unwrap_err();
    assert!(matches!(err, ShpError::Format { .. }));
}

#[test]
fn test_missing_prj_fails_fast() {
    let layer = layer_of(sample_geometries().remove(0), CharacterEncoding::Utf8);
    let mut bundle = shpfile::writer::to_bundle(&layer).unwrap();
    bundle.prj = None;
    let tar = bundle.to_tar().unwrap();

    let err = parse(&tar, CharacterEncoding::Utf8).unwrap_err();
    assert!(matches!(err, ShpError::MissingCrs(ref name) if name == "sample"));

    let fallback = Crs::Epsg(28407);
    let back = parse_with_fallback(&tar, CharacterEncoding::Utf8, &fallback).unwrap();
    assert_eq!(back.crs, fallback);

    // Un .shp seul n'a jamais de CRS
    let err = parse(&bundle.shp, CharacterEncoding::Utf8).unwrap_err();
    assert!(matches!(err, ShpError::MissingCrs(_)));
}

#[test]
fn test_read_layer_with_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let layer = layer_of(sample_geometries().remove(5), CharacterEncoding::Windows1251);
    let bundle = shpfile::writer::to_bundle(&layer).unwrap();

    std::fs::write(dir.path().join("МКД.shp"), &bundle.shp).unwrap();
    std::fs::write(dir.path().join("МКД.shx"), bundle.shx.as_ref().unwrap()).unwrap();
    std::fs::write(dir.path().join("МКД.dbf"), bundle.dbf.as_ref().unwrap()).unwrap();
    std::fs::write(dir.path().join("МКД.prj"), bundle.prj.as_ref().unwrap()).unwrap();

    let back = read_layer(
        &dir.path().join("МКД.shp"),
        CharacterEncoding::Windows1251,
        None,
    )
    .unwrap();
    assert_eq!(back.name, "МКД");
    assert_eq!(back.features.len(), 1);
    assert!(matches!(back.features[0].geometry, Geometry::MultiPolygon(_)));
}

#[test]
fn test_bundle_from_separate_uploads() {
    let layer = layer_of(sample_geometries().remove(2), CharacterEncoding::Utf8);
    let full = shpfile::writer::to_bundle(&layer).unwrap();

    let mut bundle = ShapefileBundle::from_shp("roads", full.shp.clone());
    bundle.insert_sidecar("DBF", full.dbf.clone().unwrap());
    bundle.insert_sidecar("prj", full.prj.clone().unwrap().into_bytes());

    let back = shpfile::parser::parse_bundle(&bundle, CharacterEncoding::Utf8, None).unwrap();
    assert_eq!(back.name, "roads");
    assert_eq!(
        back.features[0].attributes["area"].as_f64().unwrap(),
        42.5
    );
}

#[test]
fn test_wkt_output() {
    let wkt = shpfile::to_wkt(&Geometry::Polygon(Polygon::new(square(0.0, 0.0, 1.0), vec![])))
        .unwrap();
    assert!(wkt.starts_with("POLYGON"));
    assert!(wkt.contains("1 1"));
}
