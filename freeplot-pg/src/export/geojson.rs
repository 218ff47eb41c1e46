//! Export des shapes en GeoJSON avec geozero (streaming, WKT -> GeoJSON)

use std::io::Write;

use geozero::geojson::GeoJsonWriter;
use geozero::wkt::WktStr;
use geozero::GeozeroGeometry;
use shpfile::Crs;

use crate::error::{FreeplotError, Result};
use crate::versioning::Shape;

/// Écrit une FeatureCollection des shapes, géométries dans `crs`
pub fn write_shapes<W: Write>(writer: &mut W, shapes: &[Shape], crs: &Crs) -> Result<()> {
    // Header FeatureCollection avec CRS
    write!(
        writer,
        r#"{{"type":"FeatureCollection","crs":{{"type":"name","properties":{{"name":"{}"}}}},"features":["#,
        escape_json(&crs.urn())
    )?;

    for (i, shape) in shapes.iter().enumerate() {
        if i > 0 {
            write!(writer, ",")?;
        }
        write_shape(writer, shape)?;
    }

    write!(writer, "]}}")?;
    writer.flush()?;
    Ok(())
}

/// GeoJSON en mémoire, renvoyé tel quel aux appelants
pub fn shapes_to_geojson(shapes: &[Shape], crs: &Crs) -> Result<String> {
    let mut buf = Vec::new();
    write_shapes(&mut buf, shapes, crs)?;
    String::from_utf8(buf).map_err(|e| FreeplotError::Format {
        file: "geojson".into(),
        reason: e.to_string(),
    })
}

fn write_shape<W: Write>(writer: &mut W, shape: &Shape) -> Result<()> {
    write!(writer, r#"{{"type":"Feature","id":{},"#, shape.shape_id)?;

    write!(writer, r#""geometry":"#)?;
    let mut geom_buf = Vec::new();
    let mut geom_writer = GeoJsonWriter::new(&mut geom_buf);
    WktStr(&shape.geometry)
        .process_geom(&mut geom_writer)
        .map_err(|e| FreeplotError::Format {
            file: format!("shape {}", shape.shape_id),
            reason: e.to_string(),
        })?;
    writer.write_all(&geom_buf)?;

    write!(
        writer,
        r#","properties":{{"shape_id":{},"version":{},"comment":"{}","added_to_favorites":{},"ai_gen_comment":"{}"}}}}"#,
        shape.shape_id,
        shape.version,
        escape_json(&shape.comment),
        shape.added_to_favorites,
        escape_json(&shape.ai_gen_comment)
    )?;

    Ok(())
}

/// Échappe une chaîne pour JSON
fn escape_json(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => result.push_str("\\\""),
            '\\' => result.push_str("\\\\"),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            c if c.is_control() => {
                result.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => result.push(c),
        }
    }
    result
}
