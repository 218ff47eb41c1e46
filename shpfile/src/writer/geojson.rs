//! Écriture GeoJSON avec geozero (streaming)

use std::io::Write;

use geozero::geojson::GeoJsonWriter;
use geozero::GeozeroGeometry;

use crate::types::{Feature, Layer};
use crate::ShpError;

/// Écrit une couche en FeatureCollection GeoJSON
pub fn write_layer<W: Write>(writer: &mut W, layer: &Layer) -> Result<(), ShpError> {
    write!(
        writer,
        r#"{{"type":"FeatureCollection","name":{},"crs":{{"type":"name","properties":{{"name":{}}}}},"features":["#,
        json_string(&layer.name),
        json_string(&layer.crs.urn())
    )?;

    for (i, feature) in layer.features.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_feature(writer, feature)?;
    }

    write!(writer, "]}}")?;
    Ok(())
}

/// Écrit une feature GeoJSON
pub fn write_feature<W: Write>(writer: &mut W, feature: &Feature) -> Result<(), ShpError> {
    write!(writer, r#"{{"type":"Feature","id":{},"geometry":"#, feature.id)?;

    let mut geom_buf = Vec::new();
    let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
    feature
        .geometry
        .process_geom(&mut geom_writer)
        .map_err(|e| ShpError::format("GeoJSON", e.to_string()))?;
    writer.write_all(&geom_buf)?;

    let properties: serde_json::Map<String, serde_json::Value> = feature
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect();
    write!(writer, r#","properties":"#)?;
    serde_json::to_writer(&mut *writer, &properties)
        .map_err(|e| ShpError::format("GeoJSON", e.to_string()))?;
    write!(writer, "}}")?;

    Ok(())
}

fn json_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeValue, CharacterEncoding, Crs};
    use geo::{Geometry, Point};

    #[test]
    fn test_write_feature() {
        let mut feature = Feature::new(12, Geometry::Point(Point::new(1.0, 2.0)));
        feature
            .attributes
            .insert("name".into(), AttributeValue::Text("a \"quoted\" name".into()));

        let mut buffer = Vec::new();
        write_feature(&mut buffer, &feature).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(json["id"], 12);
        assert_eq!(json["geometry"]["type"], "Point");
        assert_eq!(json["properties"]["name"], "a \"quoted\" name");
    }

    #[test]
    fn test_write_layer_with_crs() {
        let mut layer = Layer::new("ЗУ", Crs::Epsg(4326), CharacterEncoding::Utf8);
        layer
            .features
            .push(Feature::new(1, Geometry::Point(Point::new(37.6, 55.7))));

        let mut buffer = Vec::new();
        write_layer(&mut buffer, &layer).unwrap();

        let json: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
        assert_eq!(json["type"], "FeatureCollection");
        assert_eq!(json["name"], "ЗУ");
        assert_eq!(
            json["crs"]["properties"]["name"],
            "urn:ogc:def:crs:EPSG::4326"
        );
        assert_eq!(json["features"].as_array().unwrap().len(), 1);
    }
}
