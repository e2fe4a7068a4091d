//! Duplicate elimination with first-occurrence-wins semantics. Rows are
//! keyed by a canonical normalized encoding: key/value pairs sorted by
//! column name, NULL distinct from every non-NULL value, and numerically
//! equal integers and floats mapping to the same key.

use crate::storage::types::{Row, Value};

fn normalize_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(i) => format!("n:{}", *i as f64),
        Value::Float(f) => format!("n:{f}"),
        Value::Str(s) => format!("s:'{s}'"),
    }
}

/// Canonical key of a row, optionally restricted to the named columns.
pub fn row_key(row: &Row, columns: Option<&[String]>) -> String {
    let mut pairs: Vec<(String, String)> = match columns {
        Some(columns) => columns
            .iter()
            .map(|c| {
                (
                    c.to_ascii_lowercase(),
                    normalize_value(row.get(c).unwrap_or(&Value::Null)),
                )
            })
            .collect(),
        None => row
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), normalize_value(v)))
            .collect(),
    };
    pairs.sort();
    let encoded: Vec<String> = pairs
        .into_iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect();
    format!("{{{}}}", encoded.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn row(pairs: Vec<(&str, Value)>) -> Row {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    #[test]
    fn test_key_ignores_column_order() {
        let a = row(vec![("x", Value::Int(1)), ("y", Value::Int(2))]);
        let b = row(vec![("y", Value::Int(2)), ("x", Value::Int(1))]);
        assert_eq!(row_key(&a, None), row_key(&b, None));
    }

    #[test]
    fn test_int_and_equal_float_collapse() {
        let a = row(vec![("x", Value::Int(1))]);
        let b = row(vec![("x", Value::Float(1.0))]);
        assert_eq!(row_key(&a, None), row_key(&b, None));
        let c = row(vec![("x", Value::Float(1.5))]);
        assert_ne!(row_key(&a, None), row_key(&c, None));
    }

    #[test]
    fn test_null_is_distinct_from_values() {
        let a = row(vec![("x", Value::Null)]);
        let b = row(vec![("x", Value::Str("NULL".into()))]);
        let c = row(vec![("x", Value::Int(0))]);
        let keys: HashSet<String> = [&a, &b, &c].iter().map(|r| row_key(r, None)).collect();
        assert_eq!(keys.len(), 3);
        // NULL equals NULL for dedup purposes
        assert_eq!(row_key(&a, None), row_key(&a.clone(), None));
    }

    #[test]
    fn test_restricted_columns() {
        let a = row(vec![("x", Value::Int(1)), ("y", Value::Int(9))]);
        let b = row(vec![("x", Value::Int(1)), ("y", Value::Int(8))]);
        let columns = vec!["x".to_string()];
        assert_eq!(row_key(&a, Some(&columns)), row_key(&b, Some(&columns)));
        assert_ne!(row_key(&a, None), row_key(&b, None));
    }
}
