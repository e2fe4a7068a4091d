use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{DbError, Result};

/// A single cell value. INT and VARCHAR are the only storable kinds;
/// floats appear transiently in expressions and aggregate outputs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i32),
    Float(f64),
    Str(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// SQL equality: numbers compare numerically across INT/FLOAT, strings
    /// that parse as numbers coerce when compared against a number, and
    /// NULL equals nothing (callers handle NULL before calling this).
    pub fn sql_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => {
                    let coerced = match (a, b) {
                        (Value::Str(s), n) => s.parse::<f64>().ok().zip(n.as_f64()),
                        (n, Value::Str(s)) => n.as_f64().zip(s.parse::<f64>().ok()),
                        _ => None,
                    };
                    match coerced {
                        Some((x, y)) => x == y,
                        None => false,
                    }
                }
            },
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s}"),
        }
    }
}

/// A row crossing component boundaries: column name -> value, in output
/// column order.
pub type Row = IndexMap<String, Value>;

/// Case-insensitive row lookup. Rows carry declared-case keys; SQL
/// identifiers compare case-insensitively.
pub fn row_get<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    if let Some(v) = row.get(name) {
        return Some(v);
    }
    row.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Lookup that also resolves qualified names against merged join rows:
/// `id` matches a key `a.id`, and `a.id` falls back to a bare `id` key.
pub fn row_get_qualified<'a>(row: &'a Row, name: &str) -> Option<&'a Value> {
    if let Some(v) = row_get(row, name) {
        return Some(v);
    }
    match name.split_once('.') {
        Some((_, bare)) => row_get(row, bare),
        None => {
            let suffix = format!(".{}", name.to_ascii_lowercase());
            row.iter()
                .find(|(k, _)| k.to_ascii_lowercase().ends_with(&suffix))
                .map(|(_, v)| v)
        }
    }
}

/// Storable column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Varchar(u16),
}

impl DataType {
    pub fn parse(name: &str, max_length: Option<u16>) -> Result<DataType> {
        match name.to_ascii_uppercase().as_str() {
            "INT" => Ok(DataType::Int),
            "VARCHAR" => {
                let len = max_length.ok_or_else(|| {
                    DbError::InvalidInput("VARCHAR requires a max length".into())
                })?;
                if len == 0 {
                    return Err(DbError::InvalidInput(
                        "VARCHAR length must be positive".into(),
                    ));
                }
                Ok(DataType::Varchar(len))
            }
            other => Err(DbError::InvalidInput(format!("unknown data type: {other}"))),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            DataType::Int => "INT",
            DataType::Varchar(_) => "VARCHAR",
        }
    }

    pub fn max_length(&self) -> Option<u16> {
        match self {
            DataType::Int => None,
            DataType::Varchar(n) => Some(*n),
        }
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DataType::Int => write!(f, "INT"),
            DataType::Varchar(n) => write!(f, "VARCHAR({n})"),
        }
    }
}

/// Column-level constraint set. PRIMARY KEY implies NOT NULL.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnConstraints {
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

/// Column definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    #[serde(default)]
    pub constraints: ColumnConstraints,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: ColumnConstraints::default(),
        }
    }
}

/// Table schema: an ordered sequence of column definitions. Declaration
/// order determines positional binding and the record encoding order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
