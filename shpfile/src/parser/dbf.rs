//! Parser pour les fichiers .dbf (attributs dBASE III)

use std::collections::BTreeMap;

use memchr::memchr;
use tracing::debug;

use crate::types::{AttributeValue, CharacterEncoding};
use crate::ShpError;

const FILE: &str = ".dbf";
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;

/// Descripteur d'un champ
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub name: String,
    pub field_type: u8,
    pub length: usize,
    pub decimals: u8,
}

/// Table décodée : schéma + lignes
#[derive(Debug, Clone, Default)]
pub struct DbfTable {
    pub fields: Vec<FieldDescriptor>,
    pub records: Vec<BTreeMap<String, AttributeValue>>,
}

/// Parse le contenu d'un .dbf
pub fn parse(data: &[u8], encoding: CharacterEncoding) -> Result<DbfTable, ShpError> {
    if data.len() < DESCRIPTOR_LEN + 1 {
        return Err(ShpError::format(FILE, "file shorter than header"));
    }

    let num_records = u32::from_le_bytes([data[4], data[5], data[6], data[7]]) as usize;
    let header_len = u16::from_le_bytes([data[8], data[9]]) as usize;
    let record_len = u16::from_le_bytes([data[10], data[11]]) as usize;

    // Descripteurs de 32 octets jusqu'au terminateur 0x0D
    let mut fields = Vec::new();
    let mut pos = DESCRIPTOR_LEN;
    loop {
        match data.get(pos) {
            Some(&HEADER_TERMINATOR) => break,
            Some(_) => {
                let raw = data
                    .get(pos..pos + DESCRIPTOR_LEN)
                    .ok_or_else(|| ShpError::format(FILE, "truncated field descriptor"))?;
                fields.push(parse_descriptor(raw, encoding)?);
                pos += DESCRIPTOR_LEN;
            }
            None => {
                return Err(ShpError::format(
                    FILE,
                    "missing field descriptor terminator",
                ))
            }
        }
    }

    let expected_len = 1 + fields.iter().map(|f| f.length).sum::<usize>();
    if record_len != expected_len {
        return Err(ShpError::format(
            FILE,
            format!(
                "record length {} does not match field widths {}",
                record_len, expected_len
            ),
        ));
    }

    let mut records = Vec::with_capacity(num_records.min(1 << 20));
    for i in 0..num_records {
        let start = header_len + i * record_len;
        let Some(raw) = data.get(start..start + record_len) else {
            return Err(ShpError::format(
                FILE,
                format!("record {} runs past end of file", i + 1),
            ));
        };
        records.push(parse_record(raw, &fields, encoding)?);
    }

    debug!(
        fields = fields.len(),
        records = records.len(),
        encoding = %encoding,
        "Parsed dbf table"
    );

    Ok(DbfTable { fields, records })
}

fn parse_descriptor(raw: &[u8], encoding: CharacterEncoding) -> Result<FieldDescriptor, ShpError> {
    let name_bytes = &raw[..11];
    let name_len = memchr(0, name_bytes).unwrap_or(11);
    let name = encoding.decode(&name_bytes[..name_len], "<field name>")?;
    let name = name.trim().to_string();
    if name.is_empty() {
        return Err(ShpError::format(FILE, "empty field name"));
    }

    Ok(FieldDescriptor {
        name,
        field_type: raw[11].to_ascii_uppercase(),
        length: raw[16] as usize,
        decimals: raw[17],
    })
}

fn parse_record(
    raw: &[u8],
    fields: &[FieldDescriptor],
    encoding: CharacterEncoding,
) -> Result<BTreeMap<String, AttributeValue>, ShpError> {
    let mut values = BTreeMap::new();
    // Le premier octet est le drapeau de suppression
    let mut offset = 1;
    for field in fields {
        let bytes = &raw[offset..offset + field.length];
        offset += field.length;
        values.insert(field.name.clone(), parse_value(bytes, field, encoding)?);
    }
    Ok(values)
}

fn parse_value(
    bytes: &[u8],
    field: &FieldDescriptor,
    encoding: CharacterEncoding,
) -> Result<AttributeValue, ShpError> {
    let trimmed = trim_ascii(bytes);

    match field.field_type {
        b'N' | b'F' => {
            if trimmed.is_empty() || trimmed.iter().all(|&b| b == b'*') {
                return Ok(AttributeValue::Null);
            }
            fast_float::parse::<f64, _>(trimmed)
                .map(AttributeValue::Number)
                .map_err(|_| {
                    ShpError::format(
                        FILE,
                        format!(
                            "invalid number {:?} in field {}",
                            String::from_utf8_lossy(trimmed),
                            field.name
                        ),
                    )
                })
        }
        b'L' => Ok(match trimmed.first() {
            Some(b'T' | b't' | b'Y' | b'y') => AttributeValue::Bool(true),
            Some(b'F' | b'f' | b'N' | b'n') => AttributeValue::Bool(false),
            _ => AttributeValue::Null,
        }),
        b'D' => {
            if trimmed.is_empty() || trimmed.iter().all(|&b| b == b'0') {
                Ok(AttributeValue::Null)
            } else {
                Ok(AttributeValue::Text(
                    encoding.decode(trimmed, &field.name)?,
                ))
            }
        }
        _ => {
            // C et types texte assimilés (M, ...) : espaces de fin non significatifs
            let end = bytes
                .iter()
                .rposition(|&b| b != b' ' && b != 0)
                .map_or(0, |p| p + 1);
            Ok(AttributeValue::Text(encoding.decode(&bytes[..end], &field.name)?))
        }
    }
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|&b| b != b' ' && b != 0)
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|&b| b != b' ' && b != 0)
        .map_or(start, |p| p + 1);
    &bytes[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Construit un dbf minimal à la main
    fn build(fields: &[(&str, u8, u8)], rows: &[Vec<Vec<u8>>]) -> Vec<u8> {
        let header_len = 32 + 32 * fields.len() + 1;
        let record_len = 1 + fields.iter().map(|f| f.2 as usize).sum::<usize>();
        let mut data = vec![0u8; 32];
        data[0] = 0x03;
        data[4..8].copy_from_slice(&(rows.len() as u32).to_le_bytes());
        data[8..10].copy_from_slice(&(header_len as u16).to_le_bytes());
        data[10..12].copy_from_slice(&(record_len as u16).to_le_bytes());
        for (name, field_type, length) in fields {
            let mut desc = vec![0u8; 32];
            desc[..name.len()].copy_from_slice(name.as_bytes());
            desc[11] = *field_type;
            desc[16] = *length;
            data.extend(desc);
        }
        data.push(HEADER_TERMINATOR);
        for row in rows {
            data.push(b' ');
            for (value, field) in row.iter().zip(fields) {
                let mut cell = vec![b' '; field.2 as usize];
                cell[..value.len()].copy_from_slice(value);
                data.extend(cell);
            }
        }
        data.push(0x1A);
        data
    }

    fn row(values: &[&str]) -> Vec<Vec<u8>> {
        values.iter().map(|v| v.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_parse_typed_values() {
        let data = build(
            &[("NAME", b'C', 10), ("AREA", b'N', 8), ("OK", b'L', 1)],
            &[
                row(&["parcel", "  12.5", "T"]),
                row(&["", "", "?"]),
                row(&["x", "********", "n"]),
            ],
        );
        let table = parse(&data, CharacterEncoding::Utf8).unwrap();
        assert_eq!(table.fields.len(), 3);
        assert_eq!(table.records.len(), 3);

        let first = &table.records[0];
        assert_eq!(first["NAME"], AttributeValue::Text("parcel".into()));
        assert_eq!(first["AREA"], AttributeValue::Number(12.5));
        assert_eq!(first["OK"], AttributeValue::Bool(true));

        let second = &table.records[1];
        assert_eq!(second["NAME"], AttributeValue::Text(String::new()));
        assert!(second["AREA"].is_null());
        assert!(second["OK"].is_null());

        assert!(table.records[2]["AREA"].is_null());
        assert_eq!(table.records[2]["OK"], AttributeValue::Bool(false));
    }

    #[test]
    fn test_parse_cp1251_text() {
        // "Москва" en cp1251
        let moscow = vec![0xCC, 0xEE, 0xF1, 0xEA, 0xE2, 0xE0];
        let data = build(&[("CITY", b'C', 12)], &[vec![moscow]]);

        let table = parse(&data, CharacterEncoding::Windows1251).unwrap();
        assert_eq!(
            table.records[0]["CITY"],
            AttributeValue::Text("Москва".into())
        );

        // Les mêmes octets ne sont pas de l'UTF-8 valide
        let err = parse(&data, CharacterEncoding::Utf8).unwrap_err();
        assert!(matches!(err, ShpError::Encoding { ref field, .. } if field == "CITY"));
    }

    #[test]
    fn test_invalid_number() {
        let data = build(&[("AREA", b'N', 6)], &[row(&["abc"])]);
        assert!(matches!(
            parse(&data, CharacterEncoding::Utf8),
            Err(ShpError::Format { .. })
        ));
    }

    #[test]
    fn test_truncated_records() {
        let mut data = build(&[("NAME", b'C', 10)], &[row(&["a"]), row(&["b"])]);
        data.truncate(data.len() - 8);
        assert!(matches!(
            parse(&data, CharacterEncoding::Utf8),
            Err(ShpError::Format { .. })
        ));
    }
}
