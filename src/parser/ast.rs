//! Abstract syntax tree. Strictly tree-shaped; every node carries the
//! source position of its first consumed token.

use crate::error::Pos;
use crate::storage::types::{ColumnConstraints, DataType, Value};

#[derive(Debug, Clone)]
pub enum Statement {
    CreateTable(CreateTableStmt),
    DropTable { table: String, pos: Pos },
    Insert(InsertStmt),
    Select(SelectStmt),
    Delete(DeleteStmt),
    Update(UpdateStmt),
    ShowTables { pos: Pos },
    DescTable { table: String, pos: Pos },
    AlterTable(AlterTableStmt),
}

#[derive(Debug, Clone)]
pub struct CreateTableStmt {
    pub table: String,
    pub columns: Vec<ColumnDefNode>,
    pub foreign_keys: Vec<ForeignKeyClause>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct ColumnDefNode {
    pub name: String,
    pub data_type: DataType,
    pub constraints: ColumnConstraints,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct ForeignKeyClause {
    pub constraint_name: Option<String>,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct InsertStmt {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub values: Vec<ValueNode>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct ValueNode {
    pub value: Value,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct SelectStmt {
    pub distinct: bool,
    pub items: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<JoinClause>,
    pub where_clause: Option<ExprNode>,
    pub group_by: Vec<String>,
    pub having: Option<ExprNode>,
    pub order_by: Vec<SortKeyNode>,
    pub limit: Option<LimitClause>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum SelectItem {
    Wildcard,
    Column {
        name: String,
        alias: Option<String>,
        pos: Pos,
    },
    Aggregate {
        call: AggregateCall,
        alias: Option<String>,
        pos: Pos,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateCall {
    pub func: AggFunc,
    /// `*` (COUNT only) or a possibly-qualified column.
    pub column: String,
}

impl AggregateCall {
    /// Default output alias, e.g. `count_star`, `avg_salary`.
    pub fn default_alias(&self) -> String {
        let col = if self.column == "*" {
            "star"
        } else {
            &self.column
        };
        format!("{}_{}", self.func.name().to_ascii_lowercase(), col)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "COUNT",
            AggFunc::Sum => "SUM",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }

    pub fn parse(name: &str) -> Option<AggFunc> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(AggFunc::Count),
            "SUM" => Some(AggFunc::Sum),
            "AVG" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableRef {
    pub table: String,
    pub alias: Option<String>,
    pub pos: Pos,
}

impl TableRef {
    pub fn label(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: TableRef,
    pub on: ExprNode,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct SortKeyNode {
    pub target: SortTarget,
    pub descending: bool,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum SortTarget {
    Column(String),
    /// 1-based select-list position, as in `ORDER BY 2`.
    Position(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct LimitClause {
    pub offset: u64,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct DeleteStmt {
    pub table: String,
    pub where_clause: Option<ExprNode>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct UpdateStmt {
    pub table: String,
    pub assignments: Vec<(String, ValueNode)>,
    pub where_clause: Option<ExprNode>,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub struct AlterTableStmt {
    pub table: String,
    pub action: AlterAction,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum AlterAction {
    Rename { new_name: String },
    AddColumn { column: ColumnDefNode },
    DropColumn { name: String },
    ModifyColumn { name: String, data_type: DataType },
    ChangeColumn {
        old_name: String,
        new_name: String,
        data_type: DataType,
    },
}

/// Expression node with its source position.
#[derive(Debug, Clone)]
pub struct ExprNode {
    pub kind: ExprKind,
    pub pos: Pos,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Compare {
        left: Box<ExprNode>,
        op: CompareOp,
        right: Box<ExprNode>,
    },
    And {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Or {
        left: Box<ExprNode>,
        right: Box<ExprNode>,
    },
    Not {
        expr: Box<ExprNode>,
    },
    Like {
        expr: Box<ExprNode>,
        pattern: Box<ExprNode>,
        negated: bool,
    },
    InList {
        expr: Box<ExprNode>,
        values: Vec<ValueNode>,
        negated: bool,
    },
    InSubquery {
        expr: Box<ExprNode>,
        subquery: Box<SelectStmt>,
        negated: bool,
    },
    Between {
        expr: Box<ExprNode>,
        low: Box<ExprNode>,
        high: Box<ExprNode>,
        negated: bool,
    },
    IsNull {
        expr: Box<ExprNode>,
        negated: bool,
    },
    Column(String),
    Literal(Value),
    Aggregate(AggregateCall),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum CompareOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    NotEq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    LtEq,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    GtEq,
}

impl CompareOp {
    pub fn parse(op: &str) -> Option<CompareOp> {
        match op {
            "=" | "==" => Some(CompareOp::Eq),
            "!=" | "<>" => Some(CompareOp::NotEq),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::LtEq),
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::GtEq),
            _ => None,
        }
    }
}
