//! Écriture des fichiers .dbf (dBASE III)

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::{AttributeValue, CharacterEncoding};
use crate::ShpError;

const FILE: &str = ".dbf";
const NUMBER_WIDTH: u8 = 24;
const NUMBER_DECIMALS: u8 = 10;
const MAX_TEXT_WIDTH: usize = 254;

#[derive(Debug)]
struct Column {
    key: String,
    name: Vec<u8>,
    field_type: u8,
    width: usize,
}

/// Sérialise une table d'attributs. Le schéma est déduit des valeurs :
/// nombres -> N, booléens -> L, le reste -> C.
pub fn write(
    rows: &[&BTreeMap<String, AttributeValue>],
    encoding: CharacterEncoding,
) -> Result<Vec<u8>, ShpError> {
    let columns = infer_columns(rows, encoding)?;

    let header_len = 32 + 32 * columns.len() + 1;
    let record_len = 1 + columns.iter().map(|c| c.width).sum::<usize>();
    let num_records = u32::try_from(rows.len())
        .map_err(|_| ShpError::format(FILE, "too many records"))?;
    let header_len_u16 =
        u16::try_from(header_len).map_err(|_| ShpError::format(FILE, "too many fields"))?;
    let record_len_u16 =
        u16::try_from(record_len).map_err(|_| ShpError::format(FILE, "record too wide"))?;

    let mut out = Vec::with_capacity(header_len + record_len * rows.len() + 1);
    let (year, month, day) = today();
    out.push(0x03);
    out.extend_from_slice(&[(year - 1900) as u8, month, day]);
    out.extend_from_slice(&num_records.to_le_bytes());
    out.extend_from_slice(&header_len_u16.to_le_bytes());
    out.extend_from_slice(&record_len_u16.to_le_bytes());
    out.extend_from_slice(&[0u8; 20]);

    for column in &columns {
        let mut desc = [0u8; 32];
        desc[..column.name.len()].copy_from_slice(&column.name);
        desc[11] = column.field_type;
        desc[16] = column.width as u8;
        desc[17] = if column.field_type == b'N' {
            NUMBER_DECIMALS
        } else {
            0
        };
        out.extend_from_slice(&desc);
    }
    out.push(0x0D);

    for row in rows {
        out.push(b' ');
        for column in &columns {
            let cell = encode_cell(row.get(&column.key), column, encoding)?;
            out.extend_from_slice(&cell);
        }
    }
    out.push(0x1A);

    Ok(out)
}

fn infer_columns(
    rows: &[&BTreeMap<String, AttributeValue>],
    encoding: CharacterEncoding,
) -> Result<Vec<Column>, ShpError> {
    let mut kinds: BTreeMap<&str, (Option<u8>, usize)> = BTreeMap::new();

    for row in rows {
        for (key, value) in row.iter() {
            let entry = kinds.entry(key.as_str()).or_insert((None, 1));
            let kind = match value {
                AttributeValue::Null => continue,
                AttributeValue::Number(_) => b'N',
                AttributeValue::Bool(_) => b'L',
                AttributeValue::Text(_) => b'C',
            };
            entry.0 = match entry.0 {
                None => Some(kind),
                Some(existing) if existing == kind => Some(existing),
                // Types mélangés : repli en texte
                Some(_) => Some(b'C'),
            };
            let len = match value {
                AttributeValue::Text(s) => encoding.encode(s, key)?.len(),
                other => other.to_string().len(),
            };
            entry.1 = entry.1.max(len);
        }
    }

    let mut columns: Vec<Column> = Vec::with_capacity(kinds.len());
    for (key, (kind, max_len)) in kinds {
        let field_type = kind.unwrap_or(b'C');
        let width = match field_type {
            b'N' => NUMBER_WIDTH as usize,
            b'L' => 1,
            _ => max_len,
        };
        if width > MAX_TEXT_WIDTH {
            return Err(ShpError::format(
                FILE,
                format!("field {} exceeds {} bytes", key, MAX_TEXT_WIDTH),
            ));
        }

        let name = truncate_name(encoding.encode(key, key)?, encoding);
        if columns.iter().any(|c| c.name == name) {
            return Err(ShpError::format(
                FILE,
                format!("field name {} collides after truncation to 10 bytes", key),
            ));
        }
        columns.push(Column {
            key: key.to_string(),
            name,
            field_type,
            width,
        });
    }
    Ok(columns)
}

/// Tronque à 10 octets sans couper un caractère UTF-8
fn truncate_name(mut name: Vec<u8>, encoding: CharacterEncoding) -> Vec<u8> {
    if name.len() <= 10 {
        return name;
    }
    let mut cut = 10;
    if encoding == CharacterEncoding::Utf8 {
        while cut > 0 && (name[cut] & 0xC0) == 0x80 {
            cut -= 1;
        }
    }
    name.truncate(cut);
    name
}

fn encode_cell(
    value: Option<&AttributeValue>,
    column: &Column,
    encoding: CharacterEncoding,
) -> Result<Vec<u8>, ShpError> {
    let mut cell = match (value, column.field_type) {
        (None | Some(AttributeValue::Null), b'L') => vec![b'?'],
        (None | Some(AttributeValue::Null), _) => Vec::new(),
        (Some(AttributeValue::Bool(b)), b'L') => vec![if *b { b'T' } else { b'F' }],
        (Some(AttributeValue::Number(n)), b'N') => {
            let text = format_number(*n);
            if text.len() > column.width {
                return Err(ShpError::format(
                    FILE,
                    format!("number {} too wide for field {}", n, column.key),
                ));
            }
            // Nombres alignés à droite
            let mut padded = vec![b' '; column.width - text.len()];
            padded.extend_from_slice(text.as_bytes());
            padded
        }
        (Some(AttributeValue::Text(s)), _) => encoding.encode(s, &column.key)?,
        (Some(other), _) => encoding.encode(&other.to_string(), &column.key)?,
    };
    cell.resize(column.width, b' ');
    Ok(cell)
}

fn format_number(n: f64) -> String {
    let plain = n.to_string();
    if plain.len() <= NUMBER_WIDTH as usize {
        plain
    } else {
        format!("{:e}", n)
    }
}

/// Date courante (UTC) pour l'en-tête
fn today() -> (i64, u8, u8) {
    let days = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() / 86_400)
        .unwrap_or(0) as i64;

    // Conversion jours -> date civile (calendrier grégorien proleptique)
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u8;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::dbf;

    #[test]
    fn test_round_trip_typed_columns() {
        let mut a = BTreeMap::new();
        a.insert("name".to_string(), AttributeValue::Text("Зеленоград".into()));
        a.insert("area".to_string(), AttributeValue::Number(1234.5678));
        a.insert("valid".to_string(), AttributeValue::Bool(true));
        let mut b = BTreeMap::new();
        b.insert("name".to_string(), AttributeValue::Null);
        b.insert("area".to_string(), AttributeValue::Number(-0.000001));

        for encoding in [CharacterEncoding::Utf8, CharacterEncoding::Windows1251] {
            let bytes = write(&[&a, &b], encoding).unwrap();
            let table = dbf::parse(&bytes, encoding).unwrap();
            assert_eq!(table.records.len(), 2);
            assert_eq!(table.records[0]["name"], a["name"]);
            assert_eq!(table.records[0]["area"], a["area"]);
            assert_eq!(table.records[0]["valid"], AttributeValue::Bool(true));
            assert_eq!(table.records[1]["area"], b["area"]);
            assert!(table.records[1]["valid"].is_null());
        }
    }

    #[test]
    fn test_long_names_truncated() {
        let mut row = BTreeMap::new();
        row.insert(
            "very_long_field_name".to_string(),
            AttributeValue::Number(1.0),
        );
        let bytes = write(&[&row], CharacterEncoding::Utf8).unwrap();
        let table = dbf::parse(&bytes, CharacterEncoding::Utf8).unwrap();
        assert_eq!(table.fields[0].name, "very_long_");
    }

    #[test]
    fn test_unmappable_text_in_cp1251() {
        let mut row = BTreeMap::new();
        row.insert("name".to_string(), AttributeValue::Text("東京".into()));
        assert!(matches!(
            write(&[&row], CharacterEncoding::Windows1251),
            Err(ShpError::Encoding { .. })
        ));
    }

    #[test]
    fn test_today_is_plausible() {
        let (year, month, day) = today();
        assert!(year >= 2024);
        assert!((1..=12).contains(&month));
        assert!((1..=31).contains(&day));
    }
}
