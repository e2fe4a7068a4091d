//! Record codec: rows to bytes and back against a declared schema.
//!
//! Layout: NULL bitmap (ceil(n/8) bytes, bit i set means column i is NULL),
//! then n u16 offsets into the record (0 for NULL columns), then the data
//! region. INT is 4 bytes little-endian; VARCHAR is a u16 length followed
//! by UTF-8 bytes. Encoding order is the schema's declared column order.

use crate::error::{DbError, Result};
use crate::storage::types::{row_get, DataType, Row, TableSchema, Value};

pub fn encode_row(row: &Row, schema: &TableSchema) -> Result<Vec<u8>> {
    let n = schema.columns.len();
    let bitmap_size = n.div_ceil(8);
    let header_size = bitmap_size + 2 * n;

    let mut bitmap = vec![0u8; bitmap_size];
    let mut offsets = Vec::with_capacity(n);
    let mut data = Vec::new();

    for (i, col) in schema.columns.iter().enumerate() {
        let value = row_get(row, &col.name).unwrap_or(&Value::Null);
        if value.is_null() {
            bitmap[i / 8] |= 1 << (i % 8);
            offsets.push(0u16);
            continue;
        }
        let encoded = encode_value(col.data_type, &col.name, value)?;
        offsets.push((header_size + data.len()) as u16);
        data.extend_from_slice(&encoded);
    }

    let mut out = Vec::with_capacity(header_size + data.len());
    out.extend_from_slice(&bitmap);
    for offset in offsets {
        out.extend_from_slice(&offset.to_le_bytes());
    }
    out.extend_from_slice(&data);
    Ok(out)
}

fn encode_value(data_type: DataType, column: &str, value: &Value) -> Result<Vec<u8>> {
    match (data_type, value) {
        (DataType::Int, Value::Int(i)) => Ok(i.to_le_bytes().to_vec()),
        (DataType::Varchar(max_len), Value::Str(s)) => {
            let bytes = s.as_bytes();
            if bytes.len() > max_len as usize {
                return Err(DbError::InvalidInput(format!(
                    "value too long for column '{column}': {} > {max_len}",
                    bytes.len()
                )));
            }
            let mut out = Vec::with_capacity(2 + bytes.len());
            out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(bytes);
            Ok(out)
        }
        (expected, got) => Err(DbError::InvalidInput(format!(
            "column '{column}' expects {}, got {got}",
            expected.type_name()
        ))),
    }
}

/// Decode trusts its input: the bytes are assumed to come from `encode_row`
/// under a compatible schema. Malformed input still fails cleanly.
pub fn decode_row(bytes: &[u8], schema: &TableSchema) -> Result<Row> {
    let n = schema.columns.len();
    let bitmap_size = n.div_ceil(8);
    let header_size = bitmap_size + 2 * n;
    if bytes.len() < header_size {
        return Err(DbError::Corruption("record bytes too short".into()));
    }

    let mut row = Row::with_capacity(n);
    for (i, col) in schema.columns.iter().enumerate() {
        let is_null = bytes[i / 8] & (1 << (i % 8)) != 0;
        if is_null {
            row.insert(col.name.clone(), Value::Null);
            continue;
        }
        let off_pos = bitmap_size + i * 2;
        let offset = u16::from_le_bytes([bytes[off_pos], bytes[off_pos + 1]]) as usize;
        if offset == 0 {
            return Err(DbError::Corruption(format!(
                "column '{}' has zero offset but is not NULL",
                col.name
            )));
        }
        row.insert(col.name.clone(), decode_value(col.data_type, bytes, offset)?);
    }
    Ok(row)
}

fn decode_value(data_type: DataType, bytes: &[u8], offset: usize) -> Result<Value> {
    match data_type {
        DataType::Int => {
            let end = offset + 4;
            if end > bytes.len() {
                return Err(DbError::Corruption("INT value out of record bounds".into()));
            }
            let mut raw = [0u8; 4];
            raw.copy_from_slice(&bytes[offset..end]);
            Ok(Value::Int(i32::from_le_bytes(raw)))
        }
        DataType::Varchar(_) => {
            if offset + 2 > bytes.len() {
                return Err(DbError::Corruption(
                    "VARCHAR length out of record bounds".into(),
                ));
            }
            let len = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
            let start = offset + 2;
            let end = start + len;
            if end > bytes.len() {
                return Err(DbError::Corruption(
                    "VARCHAR data out of record bounds".into(),
                ));
            }
            let s = std::str::from_utf8(&bytes[start..end])
                .map_err(|_| DbError::Corruption("VARCHAR bytes are not valid UTF-8".into()))?;
            Ok(Value::Str(s.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::ColumnDef;

    fn sample_schema() -> TableSchema {
        TableSchema::new(
            "students",
            vec![
                ColumnDef::new("id", DataType::Int),
                ColumnDef::new("name", DataType::Varchar(30)),
                ColumnDef::new("age", DataType::Int),
            ],
        )
    }

    fn row(values: Vec<(&str, Value)>) -> Row {
        values
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    #[test]
    fn test_round_trip() {
        let schema = sample_schema();
        let original = row(vec![
            ("id", Value::Int(1)),
            ("name", Value::Str("Alice".into())),
            ("age", Value::Int(20)),
        ]);
        let bytes = encode_row(&original, &schema).unwrap();
        let decoded = decode_row(&bytes, &schema).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_null_bitmap() {
        let schema = sample_schema();
        let original = row(vec![
            ("id", Value::Int(2)),
            ("name", Value::Null),
            ("age", Value::Null),
        ]);
        let bytes = encode_row(&original, &schema).unwrap();
        // bit 1 and bit 2 of the bitmap set
        assert_eq!(bytes[0], 0b0000_0110);
        let decoded = decode_row(&bytes, &schema).unwrap();
        assert!(decoded["name"].is_null());
        assert!(decoded["age"].is_null());
        assert_eq!(decoded["id"], Value::Int(2));
    }

    #[test]
    fn test_negative_int_little_endian() {
        let schema = TableSchema::new("t", vec![ColumnDef::new("x", DataType::Int)]);
        let bytes = encode_row(&row(vec![("x", Value::Int(-7))]), &schema).unwrap();
        // bitmap(1) + offset(2), then -7 LE
        assert_eq!(&bytes[3..7], &(-7i32).to_le_bytes());
    }

    #[test]
    fn test_varchar_overflow_is_error() {
        let schema = TableSchema::new("t", vec![ColumnDef::new("s", DataType::Varchar(3))]);
        let err = encode_row(&row(vec![("s", Value::Str("toolong".into()))]), &schema);
        assert!(err.is_err());
    }

    #[test]
    fn test_wrong_kind_is_error() {
        let schema = TableSchema::new("t", vec![ColumnDef::new("x", DataType::Int)]);
        assert!(encode_row(&row(vec![("x", Value::Str("5".into()))]), &schema).is_err());
    }

    #[test]
    fn test_missing_column_encodes_as_null() {
        let schema = sample_schema();
        let bytes = encode_row(&row(vec![("id", Value::Int(9))]), &schema).unwrap();
        let decoded = decode_row(&bytes, &schema).unwrap();
        assert!(decoded["name"].is_null());
    }

    #[test]
    fn test_utf8_payload() {
        let schema = TableSchema::new("t", vec![ColumnDef::new("s", DataType::Varchar(30))]);
        let original = row(vec![("s", Value::Str("héllo wörld".into()))]);
        let bytes = encode_row(&original, &schema).unwrap();
        assert_eq!(decode_row(&bytes, &schema).unwrap(), original);
    }
}
