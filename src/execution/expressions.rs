//! Expression evaluator with SQL three-valued logic. Used by Filter, the
//! HAVING filter after aggregation, and the Update/Delete predicates.
//!
//! NULL propagates through comparisons and logical connectives
//! (`AND(false, NULL) = false`, `OR(true, NULL) = true`); only the Filter
//! boundary collapses NULL to false.

use regex::Regex;
use serde::Serialize;

use crate::error::{DbError, Result};
use crate::execution::planner::PlanNode;
use crate::parser::ast::CompareOp;
use crate::storage::types::{row_get_qualified, Row, Value};

/// A comparison operand: a column reference or a literal.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum Operand {
    Column(String),
    Literal(Value),
}

/// Plan-level predicate tree, serializable with a `type` tag.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expr {
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    And {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Or {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Not {
        condition: Box<Expr>,
    },
    Like {
        left: Operand,
        pattern: Operand,
        negated: bool,
    },
    In {
        left: Operand,
        #[serde(skip_serializing_if = "Option::is_none")]
        values: Option<Vec<Value>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        subquery: Option<Box<PlanNode>>,
        negated: bool,
    },
    Between {
        left: Operand,
        min: Operand,
        max: Operand,
        negated: bool,
    },
    IsNull {
        left: Operand,
        negated: bool,
    },
}

/// Callback executing an `IN (SELECT ...)` subplan to a single column of
/// values. Injected by the executor so this module stays independent of it.
pub type SubqueryExec<'a> = dyn Fn(&PlanNode) -> Result<Vec<Value>> + 'a;

pub struct ExpressionEvaluator<'a> {
    subquery_exec: Option<&'a SubqueryExec<'a>>,
}

impl<'a> ExpressionEvaluator<'a> {
    pub fn new() -> Self {
        Self {
            subquery_exec: None,
        }
    }

    pub fn with_subquery(subquery_exec: &'a SubqueryExec<'a>) -> Self {
        Self {
            subquery_exec: Some(subquery_exec),
        }
    }

    /// Three-valued predicate evaluation: `None` is SQL NULL.
    pub fn eval_predicate(&self, expr: &Expr, row: &Row) -> Result<Option<bool>> {
        match expr {
            Expr::Compare { left, op, right } => {
                let left = self.operand(left, row);
                let right = self.operand(right, row);
                Ok(compare_values(&left, &right, *op))
            }
            Expr::And { left, right } => {
                let a = self.eval_predicate(left, row)?;
                // short circuit: false wins regardless of the right side
                if a == Some(false) {
                    return Ok(Some(false));
                }
                let b = self.eval_predicate(right, row)?;
                Ok(tv_and(a, b))
            }
            Expr::Or { left, right } => {
                let a = self.eval_predicate(left, row)?;
                if a == Some(true) {
                    return Ok(Some(true));
                }
                let b = self.eval_predicate(right, row)?;
                Ok(tv_or(a, b))
            }
            Expr::Not { condition } => Ok(self.eval_predicate(condition, row)?.map(|b| !b)),
            Expr::Like {
                left,
                pattern,
                negated,
            } => {
                let text = self.operand(left, row);
                let pattern = self.operand(pattern, row);
                if text.is_null() || pattern.is_null() {
                    return Ok(None);
                }
                let matched = like_match(&text.to_string(), &pattern.to_string())?;
                Ok(Some(matched != *negated))
            }
            Expr::In {
                left,
                values,
                subquery,
                negated,
            } => {
                let needle = self.operand(left, row);
                if needle.is_null() {
                    return Ok(None);
                }
                let candidates: Vec<Value> = match (values, subquery) {
                    (Some(values), _) => values.clone(),
                    (None, Some(plan)) => {
                        let exec = self.subquery_exec.ok_or_else(|| {
                            DbError::execution("Filter", "IN subquery requires an executor hook")
                        })?;
                        exec(plan)?
                    }
                    (None, None) => Vec::new(),
                };
                let found = candidates.iter().any(|c| needle.sql_eq(c));
                Ok(Some(found != *negated))
            }
            Expr::Between {
                left,
                min,
                max,
                negated,
            } => {
                let value = self.operand(left, row);
                let low = self.operand(min, row);
                let high = self.operand(max, row);
                let ge = compare_values(&value, &low, CompareOp::GtEq);
                let le = compare_values(&value, &high, CompareOp::LtEq);
                Ok(tv_not_if(tv_and(ge, le), *negated))
            }
            Expr::IsNull { left, negated } => {
                let value = self.operand(left, row);
                Ok(Some(value.is_null() != *negated))
            }
        }
    }

    /// Filter-boundary evaluation: NULL collapses to false.
    pub fn matches(&self, expr: &Expr, row: &Row) -> Result<bool> {
        Ok(self.eval_predicate(expr, row)? == Some(true))
    }

    fn operand(&self, operand: &Operand, row: &Row) -> Value {
        match operand {
            Operand::Column(name) => row_get_qualified(row, name).cloned().unwrap_or(Value::Null),
            Operand::Literal(value) => value.clone(),
        }
    }
}

impl Default for ExpressionEvaluator<'_> {
    fn default() -> Self {
        Self::new()
    }
}

fn tv_and(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(false), _) | (_, Some(false)) => Some(false),
        (Some(true), Some(true)) => Some(true),
        _ => None,
    }
}

fn tv_or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    match (a, b) {
        (Some(true), _) | (_, Some(true)) => Some(true),
        (Some(false), Some(false)) => Some(false),
        _ => None,
    }
}

fn tv_not_if(v: Option<bool>, negate: bool) -> Option<bool> {
    if negate {
        v.map(|b| !b)
    } else {
        v
    }
}

/// Normalized comparison. Numbers compare numerically across INT/FLOAT;
/// strings lexicographically by code units; a string against a number
/// coerces when it parses, otherwise the comparison is false. Equality of
/// two NULLs holds; any other NULL operand yields NULL.
pub fn compare_values(left: &Value, right: &Value, op: CompareOp) -> Option<bool> {
    match (left.is_null(), right.is_null()) {
        (true, true) => {
            return match op {
                CompareOp::Eq => Some(true),
                CompareOp::NotEq => Some(false),
                _ => None,
            }
        }
        (true, false) | (false, true) => return None,
        (false, false) => {}
    }

    let ordering = match (left, right) {
        (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
        (a, b) => {
            let (x, y) = match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => (x, y),
                _ => {
                    let coerced = match (a, b) {
                        (Value::Str(s), n) => s.parse::<f64>().ok().zip(n.as_f64()),
                        (n, Value::Str(s)) => n.as_f64().zip(s.parse::<f64>().ok()),
                        _ => None,
                    };
                    match coerced {
                        Some(pair) => pair,
                        None => return Some(false),
                    }
                }
            };
            x.partial_cmp(&y)?
        }
    };

    Some(match op {
        CompareOp::Eq => ordering.is_eq(),
        CompareOp::NotEq => !ordering.is_eq(),
        CompareOp::Lt => ordering.is_lt(),
        CompareOp::LtEq => ordering.is_le(),
        CompareOp::Gt => ordering.is_gt(),
        CompareOp::GtEq => ordering.is_ge(),
    })
}

/// SQL LIKE: `%` matches any run, `_` a single character; matching is
/// case-insensitive and all regex metacharacters are escaped.
pub fn like_match(text: &str, pattern: &str) -> Result<bool> {
    let mut regex_pattern = String::with_capacity(pattern.len() + 8);
    regex_pattern.push_str("(?i)^");
    for c in pattern.chars() {
        match c {
            '%' => regex_pattern.push_str(".*"),
            '_' => regex_pattern.push('.'),
            c => regex_pattern.push_str(&regex::escape(&c.to_string())),
        }
    }
    regex_pattern.push('$');
    let re = Regex::new(&regex_pattern)
        .map_err(|e| DbError::execution("Filter", format!("bad LIKE pattern: {e}")))?;
    Ok(re.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: Vec<(&str, Value)>) -> Row {
        pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
    }

    fn col(name: &str) -> Operand {
        Operand::Column(name.to_string())
    }

    fn lit(value: Value) -> Operand {
        Operand::Literal(value)
    }

    fn compare(left: Operand, op: CompareOp, right: Operand) -> Expr {
        Expr::Compare { left, op, right }
    }

    #[test]
    fn test_compare_numeric_and_string() {
        let ev = ExpressionEvaluator::new();
        let r = row(vec![("age", Value::Int(25)), ("name", Value::Str("Bob".into()))]);

        let gt = compare(col("age"), CompareOp::Gt, lit(Value::Int(18)));
        assert_eq!(ev.eval_predicate(&gt, &r).unwrap(), Some(true));

        let eq = compare(col("name"), CompareOp::Eq, lit(Value::Str("Bob".into())));
        assert_eq!(ev.eval_predicate(&eq, &r).unwrap(), Some(true));

        // string coerces against a number when it parses
        let coerce = compare(lit(Value::Str("25".into())), CompareOp::Eq, col("age"));
        assert_eq!(ev.eval_predicate(&coerce, &r).unwrap(), Some(true));

        // and is simply false when it does not
        let nope = compare(lit(Value::Str("abc".into())), CompareOp::Lt, col("age"));
        assert_eq!(ev.eval_predicate(&nope, &r).unwrap(), Some(false));
    }

    #[test]
    fn test_three_valued_logic() {
        let ev = ExpressionEvaluator::new();
        let r = row(vec![("a", Value::Null), ("b", Value::Int(1))]);

        let null_cmp = compare(col("a"), CompareOp::Gt, lit(Value::Int(0)));
        assert_eq!(ev.eval_predicate(&null_cmp, &r).unwrap(), None);

        let true_cmp = compare(col("b"), CompareOp::Eq, lit(Value::Int(1)));
        let false_cmp = compare(col("b"), CompareOp::Eq, lit(Value::Int(2)));

        // AND(false, NULL) = false
        let and = Expr::And {
            left: Box::new(false_cmp.clone()),
            right: Box::new(null_cmp.clone()),
        };
        assert_eq!(ev.eval_predicate(&and, &r).unwrap(), Some(false));

        // OR(true, NULL) = true
        let or = Expr::Or {
            left: Box::new(true_cmp.clone()),
            right: Box::new(null_cmp.clone()),
        };
        assert_eq!(ev.eval_predicate(&or, &r).unwrap(), Some(true));

        // otherwise NULL propagates, including through NOT
        let and_null = Expr::And {
            left: Box::new(true_cmp),
            right: Box::new(null_cmp.clone()),
        };
        assert_eq!(ev.eval_predicate(&and_null, &r).unwrap(), None);
        let not_null = Expr::Not {
            condition: Box::new(null_cmp),
        };
        assert_eq!(ev.eval_predicate(&not_null, &r).unwrap(), None);

        // the Filter boundary collapses NULL to false
        let gt = compare(col("a"), CompareOp::Gt, lit(Value::Int(0)));
        assert!(!ev.matches(&gt, &r).unwrap());
    }

    #[test]
    fn test_like() {
        assert!(like_match("Alice", "A%").unwrap());
        assert!(like_match("alice", "A%").unwrap());
        assert!(like_match("Bob", "B_b").unwrap());
        assert!(!like_match("Bob", "B_").unwrap());
        // metacharacters are literal
        assert!(like_match("a.c", "a.c").unwrap() && !like_match("abc", "a.c").unwrap());
        assert!(like_match("a[1]", "a[1]").unwrap());
    }

    #[test]
    fn test_in_list() {
        let ev = ExpressionEvaluator::new();
        let r = row(vec![("age", Value::Int(19))]);
        let expr = Expr::In {
            left: col("age"),
            values: Some(vec![Value::Int(18), Value::Int(19), Value::Int(20)]),
            subquery: None,
            negated: false,
        };
        assert_eq!(ev.eval_predicate(&expr, &r).unwrap(), Some(true));

        let negated = Expr::In {
            left: col("age"),
            values: Some(vec![Value::Int(1)]),
            subquery: None,
            negated: true,
        };
        assert_eq!(ev.eval_predicate(&negated, &r).unwrap(), Some(true));
    }

    #[test]
    fn test_between() {
        let ev = ExpressionEvaluator::new();
        let r = row(vec![("age", Value::Int(30))]);
        let expr = Expr::Between {
            left: col("age"),
            min: lit(Value::Int(18)),
            max: lit(Value::Int(65)),
            negated: false,
        };
        assert_eq!(ev.eval_predicate(&expr, &r).unwrap(), Some(true));

        let out = Expr::Between {
            left: col("age"),
            min: lit(Value::Int(40)),
            max: lit(Value::Int(65)),
            negated: false,
        };
        assert_eq!(ev.eval_predicate(&out, &r).unwrap(), Some(false));
    }

    #[test]
    fn test_is_null() {
        let ev = ExpressionEvaluator::new();
        let r = row(vec![("email", Value::Null), ("id", Value::Int(1))]);
        let is_null = Expr::IsNull {
            left: col("email"),
            negated: false,
        };
        assert_eq!(ev.eval_predicate(&is_null, &r).unwrap(), Some(true));
        let is_not_null = Expr::IsNull {
            left: col("id"),
            negated: true,
        };
        assert_eq!(ev.eval_predicate(&is_not_null, &r).unwrap(), Some(true));
    }

    #[test]
    fn test_null_equality_rules() {
        assert_eq!(
            compare_values(&Value::Null, &Value::Null, CompareOp::Eq),
            Some(true)
        );
        assert_eq!(
            compare_values(&Value::Null, &Value::Null, CompareOp::NotEq),
            Some(false)
        );
        assert_eq!(
            compare_values(&Value::Null, &Value::Int(1), CompareOp::Eq),
            None
        );
        assert_eq!(
            compare_values(&Value::Null, &Value::Int(1), CompareOp::Lt),
            None
        );
    }
}
