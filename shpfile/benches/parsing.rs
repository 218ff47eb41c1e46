//! Benchmarks pour le parsing shapefile

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use geo::{Coord, Geometry, LineString, Polygon};
use shpfile::{AttributeValue, CharacterEncoding, Crs, Feature, Layer, OutputFormat};

/// Couche synthétique : une grille de polygones à 64 sommets
fn synthetic_layer(count: usize, encoding: CharacterEncoding) -> Layer {
    let mut layer = Layer::new("bench", Crs::Epsg(4326), encoding);
    for i in 0..count {
        let cx = (i % 100) as f64 * 0.01 + 37.0;
        let cy = (i / 100) as f64 * 0.01 + 55.0;
        let ring: Vec<Coord> = (0..=64)
            .map(|k| {
                let a = std::f64::consts::TAU * (k % 64) as f64 / 64.0;
                Coord {
                    x: cx + 0.004 * a.cos(),
                    y: cy + 0.004 * a.sin(),
                }
            })
            .collect();
        let mut feature = Feature::new(
            i as u64 + 1,
            Geometry::Polygon(Polygon::new(LineString::new(ring), vec![])),
        );
        feature.attributes.insert(
            "name".into(),
            AttributeValue::Text(format!("Участок {}", i)),
        );
        feature
            .attributes
            .insert("area".into(), AttributeValue::Number(i as f64 * 1.5));
        layer.features.push(feature);
    }
    layer
}

fn bench_parse_shapefile(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_shapefile");

    for encoding in [CharacterEncoding::Utf8, CharacterEncoding::Windows1251] {
        let layer = synthetic_layer(2_000, encoding);
        let bytes = shpfile::serialize(&layer, OutputFormat::Shapefile).unwrap();

        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(encoding.label()),
            &bytes,
            |b, data| {
                b.iter(|| {
                    let layer = shpfile::parse(black_box(data), encoding).unwrap();
                    black_box(layer)
                })
            },
        );
    }

    group.finish();
}

fn bench_parse_geojson(c: &mut Criterion) {
    let layer = synthetic_layer(2_000, CharacterEncoding::Utf8);
    let bytes = shpfile::serialize(&layer, OutputFormat::GeoJson).unwrap();

    let mut group = c.benchmark_group("parse_geojson");
    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.sample_size(20);
    group.bench_function("2000_polygons", |b| {
        b.iter(|| {
            let layer = shpfile::parse(black_box(&bytes), CharacterEncoding::Utf8).unwrap();
            black_box(layer)
        })
    });
    group.finish();
}

fn bench_serialize(c: &mut Criterion) {
    let layer = synthetic_layer(2_000, CharacterEncoding::Windows1251);

    let mut group = c.benchmark_group("serialize");
    group.bench_function("shapefile", |b| {
        b.iter(|| black_box(shpfile::serialize(&layer, OutputFormat::Shapefile).unwrap()))
    });
    group.bench_function("geojson", |b| {
        b.iter(|| black_box(shpfile::serialize(&layer, OutputFormat::GeoJson).unwrap()))
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_parse_shapefile,
    bench_parse_geojson,
    bench_serialize
);
criterion_main!(benches);
