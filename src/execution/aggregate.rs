//! Hash-partitioned GROUP BY with running aggregate state.
//!
//! COUNT(*) counts every row including all-NULL ones; COUNT(col) counts
//! non-NULL values; SUM/AVG/MIN/MAX skip NULL and return NULL over an
//! empty non-NULL set. Non-numeric SUM/AVG is an error.

use indexmap::IndexMap;

use crate::error::{DbError, Result};
use crate::execution::distinct;
use crate::execution::planner::AggregateSpec;
use crate::execution::sort::sort_cmp;
use crate::parser::ast::AggFunc;
use crate::storage::types::{row_get_qualified, Row, Value};

/// Running state of one aggregate over one group.
#[derive(Debug)]
struct AggregateState {
    func: AggFunc,
    column: String,
    alias: String,
    count: u64,
    sum: f64,
    all_int: bool,
    min: Option<Value>,
    max: Option<Value>,
}

impl AggregateState {
    fn new(spec: &AggregateSpec) -> Self {
        Self {
            func: spec.func,
            column: spec.column.clone(),
            alias: spec.alias.clone(),
            count: 0,
            sum: 0.0,
            all_int: true,
            min: None,
            max: None,
        }
    }

    fn accumulate(&mut self, row: &Row) -> Result<()> {
        if self.func == AggFunc::Count && self.column == "*" {
            self.count += 1;
            return Ok(());
        }

        let value = row_get_qualified(row, &self.column).unwrap_or(&Value::Null);
        if value.is_null() {
            return Ok(());
        }
        self.count += 1;

        match self.func {
            AggFunc::Count => {}
            AggFunc::Sum | AggFunc::Avg => match value {
                Value::Int(i) => self.sum += *i as f64,
                Value::Float(f) => {
                    self.sum += *f;
                    self.all_int = false;
                }
                other => {
                    return Err(DbError::execution(
                        "GroupAggregate",
                        format!(
                            "cannot apply {} to non-numeric value {other}",
                            self.func.name()
                        ),
                    ))
                }
            },
            AggFunc::Min | AggFunc::Max => {
                let replace_min = self
                    .min
                    .as_ref()
                    .map_or(true, |m| sort_cmp(value, m).is_lt());
                if replace_min {
                    self.min = Some(value.clone());
                }
                let replace_max = self
                    .max
                    .as_ref()
                    .map_or(true, |m| sort_cmp(value, m).is_gt());
                if replace_max {
                    self.max = Some(value.clone());
                }
            }
        }
        Ok(())
    }

    fn result(&self) -> Value {
        match self.func {
            AggFunc::Count => Value::Int(self.count as i32),
            AggFunc::Sum => {
                if self.count == 0 {
                    Value::Null
                } else if self.all_int {
                    Value::Int(self.sum as i32)
                } else {
                    Value::Float(self.sum)
                }
            }
            AggFunc::Avg => {
                if self.count == 0 {
                    Value::Null
                } else {
                    Value::Float(self.sum / self.count as f64)
                }
            }
            AggFunc::Min => self.min.clone().unwrap_or(Value::Null),
            AggFunc::Max => self.max.clone().unwrap_or(Value::Null),
        }
    }
}

struct Group {
    key_values: Vec<Value>,
    states: Vec<AggregateState>,
}

/// Consume the child rows, partition by the grouping keys (an empty key
/// list forms one global group) and emit one output row per group with
/// the keys first, then one column per aggregate under its alias.
/// Group order is first-encounter order, stable within a run.
pub fn group_aggregate(
    rows: impl IntoIterator<Item = Result<Row>>,
    group_keys: &[String],
    aggregates: &[AggregateSpec],
) -> Result<Vec<Row>> {
    let mut groups: IndexMap<String, Group> = IndexMap::new();

    for row in rows {
        let row = row?;
        let key_values: Vec<Value> = group_keys
            .iter()
            .map(|k| row_get_qualified(&row, k).cloned().unwrap_or(Value::Null))
            .collect();
        let key_row: Row = group_keys
            .iter()
            .cloned()
            .zip(key_values.iter().cloned())
            .collect();
        let group_key = distinct::row_key(&key_row, None);

        let group = groups.entry(group_key).or_insert_with(|| Group {
            key_values,
            states: aggregates.iter().map(AggregateState::new).collect(),
        });
        for state in &mut group.states {
            state.accumulate(&row)?;
        }
    }

    // a global aggregate over zero rows still emits its single group
    if groups.is_empty() && group_keys.is_empty() {
        groups.insert(
            String::new(),
            Group {
                key_values: Vec::new(),
                states: aggregates.iter().map(AggregateState::new).collect(),
            },
        );
    }

    let mut out = Vec::with_capacity(groups.len());
    for group in groups.into_values() {
        let mut row = Row::new();
        for (key, value) in group_keys.iter().zip(group.key_values) {
            row.insert(key.clone(), value);
        }
        for state in &group.states {
            row.insert(state.alias.clone(), state.result());
        }
        out.push(row);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(func: AggFunc, column: &str, alias: &str) -> AggregateSpec {
        AggregateSpec {
            func,
            column: column.to_string(),
            alias: alias.to_string(),
        }
    }

    fn employee(dept: &str, salary: Option<i32>) -> Result<Row> {
        let mut row = Row::new();
        row.insert("dept".into(), Value::Str(dept.into()));
        row.insert(
            "salary".into(),
            salary.map(Value::Int).unwrap_or(Value::Null),
        );
        Ok(row)
    }

    #[test]
    fn test_group_count_and_avg() {
        let rows = vec![
            employee("Eng", Some(75000)),
            employee("Sales", Some(65000)),
            employee("Eng", Some(85000)),
        ];
        let out = group_aggregate(
            rows,
            &["dept".to_string()],
            &[
                spec(AggFunc::Count, "*", "cnt"),
                spec(AggFunc::Avg, "salary", "avg_sal"),
            ],
        )
        .unwrap();

        assert_eq!(out.len(), 2);
        // first-encounter group order
        assert_eq!(out[0]["dept"], Value::Str("Eng".into()));
        assert_eq!(out[0]["cnt"], Value::Int(2));
        assert_eq!(out[0]["avg_sal"], Value::Float(80000.0));
        assert_eq!(out[1]["dept"], Value::Str("Sales".into()));
        assert_eq!(out[1]["cnt"], Value::Int(1));
    }

    #[test]
    fn test_count_star_includes_nulls() {
        let rows = vec![employee("Eng", None), employee("Eng", Some(10))];
        let out = group_aggregate(
            rows,
            &[],
            &[
                spec(AggFunc::Count, "*", "all"),
                spec(AggFunc::Count, "salary", "non_null"),
            ],
        )
        .unwrap();
        assert_eq!(out[0]["all"], Value::Int(2));
        assert_eq!(out[0]["non_null"], Value::Int(1));
    }

    #[test]
    fn test_null_skipping_and_empty_set() {
        let rows = vec![employee("Eng", None)];
        let out = group_aggregate(
            rows,
            &[],
            &[
                spec(AggFunc::Sum, "salary", "total"),
                spec(AggFunc::Avg, "salary", "avg"),
                spec(AggFunc::Min, "salary", "lo"),
                spec(AggFunc::Max, "salary", "hi"),
                spec(AggFunc::Count, "salary", "n"),
            ],
        )
        .unwrap();
        assert_eq!(out[0]["total"], Value::Null);
        assert_eq!(out[0]["avg"], Value::Null);
        assert_eq!(out[0]["lo"], Value::Null);
        assert_eq!(out[0]["hi"], Value::Null);
        // empty COUNT is 0, not NULL
        assert_eq!(out[0]["n"], Value::Int(0));
    }

    #[test]
    fn test_global_aggregate_over_empty_input() {
        let out = group_aggregate(
            Vec::<Result<Row>>::new(),
            &[],
            &[spec(AggFunc::Count, "*", "cnt")],
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["cnt"], Value::Int(0));
    }

    #[test]
    fn test_min_max_strings() {
        let rows = vec![
            employee("b", Some(1)),
            employee("a", Some(2)),
            employee("c", Some(3)),
        ];
        let out = group_aggregate(
            rows,
            &[],
            &[
                spec(AggFunc::Min, "dept", "first"),
                spec(AggFunc::Max, "dept", "last"),
            ],
        )
        .unwrap();
        assert_eq!(out[0]["first"], Value::Str("a".into()));
        assert_eq!(out[0]["last"], Value::Str("c".into()));
    }

    #[test]
    fn test_non_numeric_sum_is_error() {
        let rows = vec![employee("Eng", Some(1))];
        let err = group_aggregate(rows, &[], &[spec(AggFunc::Sum, "dept", "s")]);
        assert!(err.is_err());
    }

    #[test]
    fn test_sum_of_ints_stays_integral() {
        let rows = vec![employee("Eng", Some(2)), employee("Eng", Some(3))];
        let out = group_aggregate(rows, &[], &[spec(AggFunc::Sum, "salary", "s")]).unwrap();
        assert_eq!(out[0]["s"], Value::Int(5));
    }
}
