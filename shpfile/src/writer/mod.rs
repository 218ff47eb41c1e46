//! Sérialisation des couches (GeoJSON, bundle shapefile, WKT)

pub mod dbf;
pub mod geojson;
pub mod shp;

use geozero::wkt::WktWriter;
use geozero::GeozeroGeometry;
use tracing::debug;

use crate::archive::ShapefileBundle;
use crate::parser::prj;
use crate::types::Layer;
use crate::ShpError;

/// Construit le bundle shapefile d'une couche (attributs dans l'encodage de la couche)
pub fn to_bundle(layer: &Layer) -> Result<ShapefileBundle, ShpError> {
    let prj = prj::to_wkt(&layer.crs).ok_or_else(|| {
        ShpError::format(
            ".prj",
            format!("cannot express {} as a .prj definition", layer.crs),
        )
    })?;

    let shp_out = shp::write(layer.features.iter().map(|f| &f.geometry))?;
    let rows: Vec<_> = layer.features.iter().map(|f| &f.attributes).collect();
    let dbf = dbf::write(&rows, layer.encoding)?;

    debug!(
        layer = %layer.name,
        shape_type = ?shp_out.shape_type,
        features = layer.features.len(),
        "Built shapefile bundle"
    );

    Ok(ShapefileBundle {
        name: layer.name.clone(),
        shp: shp_out.shp,
        shx: Some(shp_out.shx),
        dbf: Some(dbf),
        prj: Some(prj),
        cpg: Some(layer.encoding.cpg().to_string()),
    })
}

/// Texte WKT d'une géométrie
pub fn to_wkt(geometry: &geo::Geometry) -> Result<String, ShpError> {
    let mut buf = Vec::new();
    {
        let mut writer = WktWriter::new(&mut buf);
        geometry
            .process_geom(&mut writer)
            .map_err(|e| ShpError::format("WKT", e.to_string()))?;
    }
    String::from_utf8(buf).map_err(|e| ShpError::format("WKT", e.to_string()))
}
