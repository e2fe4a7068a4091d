//! Nested-loop join. The right side materializes in memory on first use;
//! output preserves the outer relation's order and qualifies every column
//! with its originating table's alias or name.

use crate::error::Result;
use crate::parser::ast::JoinType;
use crate::storage::types::{row_get, row_get_qualified, Row, Value};

pub struct JoinSpec<'a> {
    pub join_type: JoinType,
    /// Key into the (possibly already merged) left row; may be qualified.
    pub left_on: &'a str,
    /// Bare column name in the right scan rows.
    pub right_on: &'a str,
    /// Set when the left leg is a plain scan whose keys still need
    /// qualification; merged join legs arrive pre-qualified.
    pub left_prefix: Option<&'a str>,
    pub right_prefix: &'a str,
    /// Qualified output columns of each side, used for NULL fill.
    pub left_columns: &'a [String],
    pub right_columns: &'a [String],
}

fn qualify(row: &Row, prefix: &str) -> Row {
    row.iter()
        .map(|(k, v)| (format!("{prefix}.{k}"), v.clone()))
        .collect()
}

fn null_row(columns: &[String]) -> Row {
    columns
        .iter()
        .map(|c| (c.clone(), Value::Null))
        .collect()
}

fn merge(left: &Row, right: &Row) -> Row {
    let mut out = left.clone();
    for (k, v) in right {
        out.insert(k.clone(), v.clone());
    }
    out
}

/// NULL never matches in an equality join.
fn keys_match(left: &Row, right: &Row, spec: &JoinSpec) -> bool {
    let Some(lv) = row_get_qualified(left, spec.left_on) else {
        return false;
    };
    let Some(rv) = row_get(right, spec.right_on) else {
        return false;
    };
    if lv.is_null() || rv.is_null() {
        return false;
    }
    lv.sql_eq(rv)
}

pub fn nested_loop_join(
    left_rows: impl IntoIterator<Item = Result<Row>>,
    right_rows: Vec<Row>,
    spec: &JoinSpec,
) -> Result<Vec<Row>> {
    let mut out = Vec::new();
    let mut matched_right = vec![false; right_rows.len()];

    for left in left_rows {
        let left = left?;
        let left = match spec.left_prefix {
            Some(prefix) => qualify(&left, prefix),
            None => left,
        };
        let mut matched = false;
        for (i, right) in right_rows.iter().enumerate() {
            if keys_match(&left, right, spec) {
                out.push(merge(&left, &qualify(right, spec.right_prefix)));
                matched = true;
                matched_right[i] = true;
            }
        }

        if !matched && spec.join_type == JoinType::Left {
            out.push(merge(&left, &null_row(spec.right_columns)));
        }
    }

    if spec.join_type == JoinType::Right {
        for (i, right) in right_rows.iter().enumerate() {
            if !matched_right[i] {
                out.push(merge(
                    &null_row(spec.left_columns),
                    &qualify(right, spec.right_prefix),
                ));
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a_row(id: i32) -> Result<Row> {
        let mut r = Row::new();
        r.insert("id".into(), Value::Int(id));
        Ok(r)
    }

    fn b_row(aid: i32, tag: &str) -> Row {
        let mut r = Row::new();
        r.insert("aid".into(), Value::Int(aid));
        r.insert("tag".into(), Value::Str(tag.into()));
        r
    }

    fn spec(join_type: JoinType) -> JoinSpec<'static> {
        JoinSpec {
            join_type,
            left_on: "a.id",
            right_on: "aid",
            left_prefix: Some("a"),
            right_prefix: "b",
            left_columns: Box::leak(Box::new(["a.id".to_string()])),
            right_columns: Box::leak(Box::new(["b.aid".to_string(), "b.tag".to_string()])),
        }
    }

    #[test]
    fn test_inner_join() {
        let left = vec![a_row(1), a_row(2), a_row(3)];
        let right = vec![b_row(1, "x"), b_row(3, "y")];
        let out = nested_loop_join(left, right, &spec(JoinType::Inner)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["a.id"], Value::Int(1));
        assert_eq!(out[0]["b.tag"], Value::Str("x".into()));
        assert_eq!(out[1]["a.id"], Value::Int(3));
    }

    #[test]
    fn test_left_join_null_fill() {
        let left = vec![a_row(1), a_row(2), a_row(3)];
        let right = vec![b_row(1, "x"), b_row(3, "y")];
        let out = nested_loop_join(left, right, &spec(JoinType::Left)).unwrap();
        assert_eq!(out.len(), 3);
        // unmatched left row carries NULL right columns, left order kept
        assert_eq!(out[1]["a.id"], Value::Int(2));
        assert_eq!(out[1]["b.tag"], Value::Null);
        assert_eq!(out[1]["b.aid"], Value::Null);
    }

    #[test]
    fn test_right_join_emits_unmatched_right() {
        let left = vec![a_row(1)];
        let right = vec![b_row(1, "x"), b_row(9, "z")];
        let out = nested_loop_join(left, right, &spec(JoinType::Right)).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["a.id"], Value::Null);
        assert_eq!(out[1]["b.tag"], Value::Str("z".into()));
    }

    #[test]
    fn test_null_keys_never_match() {
        let mut null_left = Row::new();
        null_left.insert("id".into(), Value::Null);
        let left = vec![Ok(null_left)];
        let right = vec![b_row(1, "x")];
        let out = nested_loop_join(left, right, &spec(JoinType::Inner)).unwrap();
        assert!(out.is_empty());
    }
}
