//! Stable multi-key sort. NULL orders before any non-NULL value; within
//! non-NULL values numbers compare numerically, strings by UTF-8 code
//! units, and mixed kinds fall back to a fixed priority
//! (number < string < other).

use std::cmp::Ordering;

use crate::execution::planner::{SortKeySpec, SortOrder};
use crate::storage::types::{row_get_qualified, Row, Value};

/// Total order over values for sorting purposes.
pub fn sort_cmp(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }

    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a, b) {
            (Value::Str(x), Value::Str(y)) => x.as_bytes().cmp(y.as_bytes()),
            _ => kind_priority(a).cmp(&kind_priority(b)),
        },
    }
}

fn kind_priority(v: &Value) -> u8 {
    match v {
        Value::Int(_) | Value::Float(_) => 1,
        Value::Str(_) => 2,
        Value::Null => 3,
    }
}

fn compare_rows(a: &Row, b: &Row, keys: &[SortKeySpec]) -> Ordering {
    for key in keys {
        let left = row_get_qualified(a, &key.column).unwrap_or(&Value::Null);
        let right = row_get_qualified(b, &key.column).unwrap_or(&Value::Null);
        let ordering = match key.order {
            SortOrder::Asc => sort_cmp(left, right),
            SortOrder::Desc => sort_cmp(left, right).reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Materialized stable sort; ties keep their input order.
pub fn sort_rows(mut rows: Vec<Row>, keys: &[SortKeySpec]) -> Vec<Row> {
    rows.sort_by(|a, b| compare_rows(a, b, keys));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(column: &str, order: SortOrder) -> SortKeySpec {
        SortKeySpec {
            column: column.to_string(),
            order,
        }
    }

    fn row(id: i32, name: Option<&str>, score: Option<i32>) -> Row {
        let mut r = Row::new();
        r.insert("id".into(), Value::Int(id));
        r.insert(
            "name".into(),
            name.map(|s| Value::Str(s.into())).unwrap_or(Value::Null),
        );
        r.insert(
            "score".into(),
            score.map(Value::Int).unwrap_or(Value::Null),
        );
        r
    }

    fn ids(rows: &[Row]) -> Vec<i32> {
        rows.iter()
            .map(|r| match r["id"] {
                Value::Int(i) => i,
                _ => panic!(),
            })
            .collect()
    }

    #[test]
    fn test_desc_sort() {
        let rows = vec![row(1, None, Some(10)), row(2, None, Some(30)), row(3, None, Some(20))];
        let sorted = sort_rows(rows, &[key("score", SortOrder::Desc)]);
        assert_eq!(ids(&sorted), vec![2, 3, 1]);
    }

    #[test]
    fn test_nulls_sort_first() {
        let rows = vec![row(1, None, Some(5)), row(2, None, None), row(3, None, Some(1))];
        let sorted = sort_rows(rows, &[key("score", SortOrder::Asc)]);
        assert_eq!(ids(&sorted), vec![2, 3, 1]);
        // DESC inverts, so NULL comes last
        let rows = vec![row(1, None, Some(5)), row(2, None, None)];
        let sorted = sort_rows(rows, &[key("score", SortOrder::Desc)]);
        assert_eq!(ids(&sorted), vec![1, 2]);
    }

    #[test]
    fn test_multi_key_and_stability() {
        let rows = vec![
            row(1, Some("b"), Some(1)),
            row(2, Some("a"), Some(1)),
            row(3, Some("a"), Some(1)),
        ];
        let sorted = sort_rows(
            rows,
            &[key("score", SortOrder::Asc), key("name", SortOrder::Asc)],
        );
        // equal (score, name) keeps input order: 2 before 3
        assert_eq!(ids(&sorted), vec![2, 3, 1]);
    }

    #[test]
    fn test_mixed_kind_priority() {
        assert_eq!(
            sort_cmp(&Value::Int(99), &Value::Str("1".into())),
            Ordering::Less
        );
        assert_eq!(
            sort_cmp(&Value::Float(2.5), &Value::Int(2)),
            Ordering::Greater
        );
    }
}
