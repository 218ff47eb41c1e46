//! Lecture des FeatureCollection GeoJSON

use std::str::FromStr;

use geo::Geometry;
use geojson::{feature::Id, GeoJson};

use crate::types::{AttributeValue, CharacterEncoding, Crs, Feature, Layer};
use crate::ShpError;

const FILE: &str = "GeoJSON";

/// Parse un document GeoJSON en couche.
///
/// Le CRS vient du membre `crs` s'il existe, sinon WGS 84 (RFC 7946).
pub fn parse(
    name: &str,
    data: &[u8],
    encoding: CharacterEncoding,
) -> Result<Layer, ShpError> {
    let text = encoding.decode(data, "<document>")?;
    let document = GeoJson::from_str(&text).map_err(|e| ShpError::format(FILE, e.to_string()))?;

    let collection = match document {
        GeoJson::FeatureCollection(fc) => fc,
        GeoJson::Feature(f) => geojson::FeatureCollection {
            bbox: None,
            features: vec![f],
            foreign_members: None,
        },
        GeoJson::Geometry(g) => geojson::FeatureCollection {
            bbox: None,
            features: vec![geojson::Feature {
                bbox: None,
                geometry: Some(g),
                id: None,
                properties: None,
                foreign_members: None,
            }],
            foreign_members: None,
        },
    };

    let crs = collection
        .foreign_members
        .as_ref()
        .and_then(|members| members.get("crs"))
        .and_then(|crs| crs.pointer("/properties/name"))
        .and_then(|name| name.as_str())
        .map(Crs::from_str)
        .transpose()?
        .unwrap_or(Crs::WGS84);

    let mut layer = Layer::new(name, crs, encoding);
    for (index, feature) in collection.features.into_iter().enumerate() {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geometry = Geometry::<f64>::try_from(geometry.value)
            .map_err(|e| ShpError::format(FILE, format!("feature {}: {}", index, e)))?;

        let id = match &feature.id {
            Some(Id::Number(n)) => n.as_u64(),
            Some(Id::String(s)) => s.parse::<u64>().ok(),
            None => None,
        }
        .unwrap_or(index as u64 + 1);

        let mut out = Feature::new(id, geometry);
        if let Some(properties) = feature.properties {
            for (key, value) in properties {
                out.attributes.insert(key, AttributeValue::from_json(&value));
            }
        }
        layer.features.push(out);
    }

    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_crs_member() {
        let doc = br#"{"type":"FeatureCollection","crs":{"type":"name","properties":{"name":"urn:ogc:def:crs:EPSG::3857"}},"features":[{"type":"Feature","id":3,"geometry":{"type":"Point","coordinates":[1.5,2.5]},"properties":{"name":"a","n":2,"ok":true,"x":null}}]}"#;
        let layer = parse("pts", doc, CharacterEncoding::Utf8).unwrap();
        assert_eq!(layer.crs, Crs::Epsg(3857));
        assert_eq!(layer.features.len(), 1);
        let f = &layer.features[0];
        assert_eq!(f.id, 3);
        assert_eq!(f.attributes["name"], AttributeValue::Text("a".into()));
        assert_eq!(f.attributes["n"], AttributeValue::Number(2.0));
        assert_eq!(f.attributes["ok"], AttributeValue::Bool(true));
        assert!(f.attributes["x"].is_null());
    }

    #[test]
    fn test_default_crs_is_wgs84() {
        let doc = br#"{"type":"FeatureCollection","features":[]}"#;
        let layer = parse("empty", doc, CharacterEncoding::Utf8).unwrap();
        assert_eq!(layer.crs, Crs::WGS84);
        assert!(layer.is_empty());
    }

    #[test]
    fn test_invalid_json() {
        let err = parse("bad", b"{\"type\": ", CharacterEncoding::Utf8).unwrap_err();
        assert!(matches!(err, ShpError::Format { .. }));
    }
}
