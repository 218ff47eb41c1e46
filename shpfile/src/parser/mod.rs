//! Parsers des fichiers composant un bundle shapefile

pub mod dbf;
pub mod geojson;
pub mod prj;
pub mod shp;

use tracing::{debug, warn};

use crate::archive::ShapefileBundle;
use crate::types::{CharacterEncoding, Crs, Feature, Layer};
use crate::ShpError;

/// Décode un bundle en couche.
///
/// Sans .prj, `fallback_crs` est utilisé s'il est fourni ; sinon `MissingCrs`.
pub fn parse_bundle(
    bundle: &ShapefileBundle,
    encoding: CharacterEncoding,
    fallback_crs: Option<&Crs>,
) -> Result<Layer, ShpError> {
    let crs = bundle
        .prj
        .as_deref()
        .and_then(prj::parse)
        .or_else(|| fallback_crs.cloned())
        .ok_or_else(|| ShpError::MissingCrs(bundle.name.clone()))?;

    if let Some(declared) = bundle.cpg.as_deref() {
        match CharacterEncoding::from_label(declared) {
            Ok(cpg) if cpg != encoding => warn!(
                layer = %bundle.name,
                declared = %cpg,
                requested = %encoding,
                "Encoding declared in .cpg differs from requested encoding"
            ),
            Ok(_) => {}
            Err(_) => debug!(layer = %bundle.name, cpg = declared, "Unrecognized .cpg label"),
        }
    }

    let (_, records) = shp::parse(&bundle.shp)?;
    let mut table = match &bundle.dbf {
        Some(data) => dbf::parse(data, encoding)?.records,
        None => Vec::new(),
    };
    if !table.is_empty() && table.len() != records.len() {
        warn!(
            layer = %bundle.name,
            shapes = records.len(),
            rows = table.len(),
            "Shape and attribute record counts differ"
        );
    }
    table.resize_with(records.len(), Default::default);

    let mut layer = Layer::new(bundle.name.clone(), crs, encoding);
    for (record, attributes) in records.into_iter().zip(table) {
        // Les formes Null ne portent pas de géométrie exploitable
        let Some(geometry) = record.geometry else {
            continue;
        };
        let mut feature = Feature::new(record.number, geometry);
        feature.attributes = attributes;
        layer.features.push(feature);
    }

    debug!(
        layer = %layer.name,
        crs = %layer.crs,
        features = layer.features.len(),
        "Parsed shapefile layer"
    );

    Ok(layer)
}
