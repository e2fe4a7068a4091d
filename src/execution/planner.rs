//! Physical plan generation: AST to a layered operator tree. Every node
//! serializes to a JSON object with a string `op` tag; cost and row fields
//! are rough display heuristics and do not affect correctness.

use indexmap::IndexMap;
use serde::Serialize;

use crate::catalog::CatalogManager;
use crate::error::{DbError, Pos, Result};
use crate::execution::expressions::{Expr, Operand};
use crate::parser::ast::*;
use crate::storage::types::{ColumnDef, DataType, TableSchema, Value};

#[derive(Debug, Clone, Serialize)]
pub struct Estimates {
    pub estimated_cost: f64,
    pub estimated_rows: f64,
    pub description: String,
}

impl Estimates {
    fn new(cost: f64, rows: f64, description: impl Into<String>) -> Self {
        Self {
            estimated_cost: cost,
            estimated_rows: rows,
            description: description.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProjectColumn {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateSpec {
    pub func: AggFunc,
    pub column: String,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Serialize)]
pub struct SortKeySpec {
    pub column: String,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeySpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_name: Option<String>,
    pub column: String,
    pub ref_table: String,
    pub ref_column: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlterPlanAction {
    Rename {
        new_name: String,
    },
    AddColumn {
        column: ColumnDef,
    },
    DropColumn {
        name: String,
    },
    ModifyColumn {
        name: String,
        data_type: DataType,
    },
    ChangeColumn {
        old_name: String,
        new_name: String,
        data_type: DataType,
    },
}

/// Immutable physical operator tree.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "op")]
pub enum PlanNode {
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        foreign_keys: Vec<ForeignKeySpec>,
        description: String,
    },
    DropTable {
        table: String,
        description: String,
    },
    Insert {
        table: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        columns: Option<Vec<String>>,
        values: Vec<Value>,
        #[serde(flatten)]
        est: Estimates,
    },
    SeqScan {
        table: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
        #[serde(flatten)]
        est: Estimates,
    },
    Filter {
        condition: Expr,
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    Project {
        columns: Vec<ProjectColumn>,
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    Distinct {
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    GroupAggregate {
        group_keys: Vec<String>,
        aggregates: Vec<AggregateSpec>,
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    Sort {
        keys: Vec<SortKeySpec>,
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    Limit {
        offset: u64,
        count: u64,
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    NestedLoopJoin {
        join_type: JoinType,
        left_on: String,
        right_on: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        left_prefix: Option<String>,
        right_prefix: String,
        left_columns: Vec<String>,
        right_columns: Vec<String>,
        #[serde(flatten)]
        est: Estimates,
        left: Box<PlanNode>,
        right: Box<PlanNode>,
    },
    Delete {
        table: String,
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    Update {
        table: String,
        set: IndexMap<String, Value>,
        #[serde(flatten)]
        est: Estimates,
        child: Box<PlanNode>,
    },
    AlterTable {
        table: String,
        #[serde(flatten)]
        action: AlterPlanAction,
        description: String,
    },
    ShowTables {
        description: String,
    },
    Desc {
        table: String,
        description: String,
    },
}

impl PlanNode {
    pub fn op_name(&self) -> &'static str {
        match self {
            PlanNode::CreateTable { .. } => "CreateTable",
            PlanNode::DropTable { .. } => "DropTable",
            PlanNode::Insert { .. } => "Insert",
            PlanNode::SeqScan { .. } => "SeqScan",
            PlanNode::Filter { .. } => "Filter",
            PlanNode::Project { .. } => "Project",
            PlanNode::Distinct { .. } => "Distinct",
            PlanNode::GroupAggregate { .. } => "GroupAggregate",
            PlanNode::Sort { .. } => "Sort",
            PlanNode::Limit { .. } => "Limit",
            PlanNode::NestedLoopJoin { .. } => "NestedLoopJoin",
            PlanNode::Delete { .. } => "Delete",
            PlanNode::Update { .. } => "Update",
            PlanNode::AlterTable { .. } => "AlterTable",
            PlanNode::ShowTables { .. } => "ShowTables",
            PlanNode::Desc { .. } => "Desc",
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    fn estimates(&self) -> (f64, f64) {
        match self {
            PlanNode::Insert { est, .. }
            | PlanNode::SeqScan { est, .. }
            | PlanNode::Filter { est, .. }
            | PlanNode::Project { est, .. }
            | PlanNode::Distinct { est, .. }
            | PlanNode::GroupAggregate { est, .. }
            | PlanNode::Sort { est, .. }
            | PlanNode::Limit { est, .. }
            | PlanNode::NestedLoopJoin { est, .. }
            | PlanNode::Delete { est, .. }
            | PlanNode::Update { est, .. } => (est.estimated_cost, est.estimated_rows),
            _ => (1.0, 0.0),
        }
    }
}

type AggKey = (AggFunc, String);

pub struct Planner<'a> {
    catalog: &'a CatalogManager,
}

impl<'a> Planner<'a> {
    pub fn new(catalog: &'a CatalogManager) -> Self {
        Self { catalog }
    }

    pub fn plan(&self, stmt: &Statement) -> Result<PlanNode> {
        match stmt {
            Statement::CreateTable(create) => Ok(self.plan_create(create)),
            Statement::DropTable { table, .. } => Ok(PlanNode::DropTable {
                table: table.clone(),
                description: format!("Drop table '{table}'"),
            }),
            Statement::Insert(insert) => Ok(self.plan_insert(insert)),
            Statement::Select(select) => self.plan_select(select),
            Statement::Delete(delete) => self.plan_delete(delete),
            Statement::Update(update) => self.plan_update(update),
            Statement::ShowTables { .. } => Ok(PlanNode::ShowTables {
                description: "List user tables".into(),
            }),
            Statement::DescTable { table, .. } => Ok(PlanNode::Desc {
                table: table.clone(),
                description: format!("Describe table '{table}'"),
            }),
            Statement::AlterTable(alter) => Ok(self.plan_alter(alter)),
        }
    }

    fn plan_create(&self, create: &CreateTableStmt) -> PlanNode {
        let columns: Vec<ColumnDef> = create
            .columns
            .iter()
            .map(|c| ColumnDef {
                name: c.name.clone(),
                data_type: c.data_type,
                constraints: c.constraints.clone(),
            })
            .collect();
        let foreign_keys = create
            .foreign_keys
            .iter()
            .map(|fk| ForeignKeySpec {
                constraint_name: fk.constraint_name.clone(),
                column: fk.column.clone(),
                ref_table: fk.ref_table.clone(),
                ref_column: fk.ref_column.clone(),
            })
            .collect();
        PlanNode::CreateTable {
            description: format!(
                "Create table '{}' with {} columns",
                create.table,
                columns.len()
            ),
            table: create.table.clone(),
            columns,
            foreign_keys,
        }
    }

    fn plan_insert(&self, insert: &InsertStmt) -> PlanNode {
        PlanNode::Insert {
            table: insert.table.clone(),
            columns: insert.columns.clone(),
            values: insert.values.iter().map(|v| v.value.clone()).collect(),
            est: Estimates::new(
                1.0,
                1.0,
                format!("Insert 1 row into table '{}'", insert.table),
            ),
        }
    }

    fn seq_scan(&self, table: &str, alias: Option<&str>) -> PlanNode {
        PlanNode::SeqScan {
            table: table.to_string(),
            alias: alias.map(str::to_string),
            est: Estimates::new(10.0, 100.0, format!("Sequential scan on table '{table}'")),
        }
    }

    fn filter_over(&self, condition: Expr, description: &str, child: PlanNode) -> PlanNode {
        let (cost, rows) = child.estimates();
        PlanNode::Filter {
            condition,
            est: Estimates::new(cost + 5.0, (rows / 2.0).max(1.0), description),
            child: Box::new(child),
        }
    }

    fn plan_select(&self, select: &SelectStmt) -> Result<PlanNode> {
        let mut node = self.plan_from(select)?;

        // WHERE runs before any grouping; aggregates are not allowed there
        if let Some(cond) = &select.where_clause {
            let condition = self.convert_expr(cond, None)?;
            node = self.filter_over(condition, "Filter rows before aggregation", node);
        }

        let agg_map = collect_aggregates(select);
        let has_group = !select.group_by.is_empty();
        let select_has_agg = select
            .items
            .iter()
            .any(|i| matches!(i, SelectItem::Aggregate { .. }));

        if select.having.is_some() && !has_group && !select_has_agg {
            return Err(DbError::Plan {
                pos: select.pos,
                msg: "HAVING without GROUP BY requires an aggregate in the select list".into(),
            });
        }

        let grouped = !agg_map.is_empty() || has_group;
        if grouped {
            self.validate_grouping(select)?;
            if agg_map.is_empty() {
                return Err(DbError::Plan {
                    pos: select.pos,
                    msg: "GROUP BY requires at least one aggregate in SELECT or HAVING".into(),
                });
            }

            let aggregates: Vec<AggregateSpec> = agg_map
                .iter()
                .map(|((func, _), (column, alias))| AggregateSpec {
                    func: *func,
                    column: column.clone(),
                    alias: alias.clone(),
                })
                .collect();
            let (cost, rows) = node.estimates();
            let group_width = select.group_by.len().max(1) as f64;
            node = PlanNode::GroupAggregate {
                est: Estimates::new(
                    cost + 8.0,
                    (rows / group_width).max(1.0),
                    if has_group {
                        format!(
                            "Group by {:?} with {} aggregates",
                            select.group_by,
                            aggregates.len()
                        )
                    } else {
                        "Global aggregation".into()
                    },
                ),
                group_keys: select.group_by.clone(),
                aggregates,
                child: Box::new(node),
            };

            // HAVING becomes an ordinary filter over the aggregate output,
            // with aggregate calls rewritten to their output aliases
            if let Some(having) = &select.having {
                self.validate_having(having, select, &agg_map)?;
                let condition = self.convert_expr(having, Some(&agg_map))?;
                node = self.filter_over(condition, "HAVING filter after aggregation", node);
            }
        }

        if needs_projection(select, &agg_map) {
            let columns = self.projection_columns(select, &agg_map);
            let (cost, rows) = node.estimates();
            node = PlanNode::Project {
                columns,
                est: Estimates::new(cost + 1.0, rows, "Project SELECT columns"),
                child: Box::new(node),
            };
        }

        if select.distinct {
            let (cost, rows) = node.estimates();
            node = PlanNode::Distinct {
                est: Estimates::new(cost + 3.0, (rows / 3.0).max(1.0), "Remove duplicate rows"),
                child: Box::new(node),
            };
        }

        if !select.order_by.is_empty() {
            let keys = self.sort_keys(select, &agg_map)?;
            let (cost, rows) = node.estimates();
            node = PlanNode::Sort {
                est: Estimates::new(
                    cost + rows * 0.1,
                    rows,
                    format!("Sort by {} keys", keys.len()),
                ),
                keys,
                child: Box::new(node),
            };
        }

        if let Some(limit) = &select.limit {
            let (cost, rows) = node.estimates();
            node = PlanNode::Limit {
                offset: limit.offset,
                count: limit.count,
                est: Estimates::new(
                    cost + 1.0,
                    (rows - limit.offset as f64).max(0.0).min(limit.count as f64),
                    format!("Limit {}, {}", limit.offset, limit.count),
                ),
                child: Box::new(node),
            };
        }

        Ok(node)
    }

    /// Scan leaves folded left-to-right into nested-loop joins.
    fn plan_from(&self, select: &SelectStmt) -> Result<PlanNode> {
        let from_label = select.from.label().to_string();
        let mut node = self.seq_scan(&select.from.table, select.from.alias.as_deref());
        if select.joins.is_empty() {
            return Ok(node);
        }

        let from_schema = self.schema_of(&select.from.table, select.from.pos)?;
        let mut left_legs: Vec<(String, TableSchema)> = vec![(from_label.clone(), from_schema)];
        let mut left_columns: Vec<String> = qualified_columns(&left_legs[0]);
        let mut left_is_scan = true;

        for join in &select.joins {
            let right_label = join.table.label().to_string();
            let right_schema = self.schema_of(&join.table.table, join.table.pos)?;
            let right_columns = qualified_columns(&(right_label.clone(), right_schema.clone()));

            let (left_on, right_on) =
                self.join_keys(&join.on, &left_legs, &right_label, &right_schema)?;

            let right = self.seq_scan(&join.table.table, join.table.alias.as_deref());
            let (lc, lr) = node.estimates();
            let (rc, rr) = right.estimates();
            node = PlanNode::NestedLoopJoin {
                join_type: join.join_type,
                left_on,
                right_on,
                left_prefix: left_is_scan.then(|| from_label.clone()),
                right_prefix: right_label.clone(),
                left_columns: left_columns.clone(),
                right_columns: right_columns.clone(),
                est: Estimates::new(
                    lc + rc + lr * rr * 0.01,
                    lr.max(rr),
                    format!("Nested loop {:?} join with '{}'", join.join_type, right_label),
                ),
                left: Box::new(node),
                right: Box::new(right),
            };

            left_columns.extend(right_columns);
            left_legs.push((right_label, right_schema));
            left_is_scan = false;
        }
        Ok(node)
    }

    fn schema_of(&self, table: &str, pos: Pos) -> Result<TableSchema> {
        self.catalog.get_schema(table).ok_or_else(|| DbError::Plan {
            pos,
            msg: format!("table '{table}' does not exist"),
        })
    }

    /// Extract the equality keys of an ON condition, resolving which side
    /// each column belongs to. Only `left.col = right.col` is supported.
    fn join_keys(
        &self,
        on: &ExprNode,
        left_legs: &[(String, TableSchema)],
        right_label: &str,
        right_schema: &TableSchema,
    ) -> Result<(String, String)> {
        let ExprKind::Compare { left, op, right } = &on.kind else {
            return Err(DbError::Plan {
                pos: on.pos,
                msg: "only equality ON conditions are supported".into(),
            });
        };
        let (ExprKind::Column(a), CompareOp::Eq, ExprKind::Column(b)) =
            (&left.kind, *op, &right.kind)
        else {
            return Err(DbError::Plan {
                pos: on.pos,
                msg: "ON condition must be an equality of two columns".into(),
            });
        };

        #[derive(PartialEq)]
        enum Side {
            Left,
            Right,
        }
        let side_of = |name: &str| -> Result<Side> {
            if let Some((qualifier, _)) = name.split_once('.') {
                if qualifier.eq_ignore_ascii_case(right_label) {
                    return Ok(Side::Right);
                }
                if left_legs
                    .iter()
                    .any(|(label, _)| label.eq_ignore_ascii_case(qualifier))
                {
                    return Ok(Side::Left);
                }
                return Err(DbError::Plan {
                    pos: on.pos,
                    msg: format!("unknown table or alias '{qualifier}' in ON condition"),
                });
            }
            if left_legs
                .iter()
                .any(|(_, schema)| schema.column(name).is_some())
            {
                return Ok(Side::Left);
            }
            if right_schema.column(name).is_some() {
                return Ok(Side::Right);
            }
            Err(DbError::Plan {
                pos: on.pos,
                msg: format!("column '{name}' not found in either join side"),
            })
        };

        let (left_col, right_col) = match (side_of(a)?, side_of(b)?) {
            (Side::Left, Side::Right) => (a.clone(), b.clone()),
            (Side::Right, Side::Left) => (b.clone(), a.clone()),
            _ => {
                return Err(DbError::Plan {
                    pos: on.pos,
                    msg: "ON condition must reference one column from each side".into(),
                })
            }
        };
        let right_bare = right_col
            .split_once('.')
            .map(|(_, col)| col.to_string())
            .unwrap_or(right_col);
        Ok((left_col, right_bare))
    }

    fn validate_grouping(&self, select: &SelectStmt) -> Result<()> {
        let has_group = !select.group_by.is_empty();
        for item in &select.items {
            match item {
                SelectItem::Wildcard => {
                    if has_group {
                        return Err(DbError::Plan {
                            pos: select.pos,
                            msg: "SELECT * cannot be combined with GROUP BY".into(),
                        });
                    }
                }
                SelectItem::Column { name, pos, .. } => {
                    if !select
                        .group_by
                        .iter()
                        .any(|key| key.eq_ignore_ascii_case(name))
                    {
                        return Err(DbError::Plan {
                            pos: *pos,
                            msg: format!(
                                "column '{name}' must appear in GROUP BY or be an aggregate"
                            ),
                        });
                    }
                }
                SelectItem::Aggregate { .. } => {}
            }
        }
        Ok(())
    }

    /// Bare columns in HAVING must be grouping keys or aggregate aliases.
    fn validate_having(
        &self,
        expr: &ExprNode,
        select: &SelectStmt,
        agg_map: &IndexMap<AggKey, (String, String)>,
    ) -> Result<()> {
        match &expr.kind {
            ExprKind::Column(name) => {
                let in_group = select
                    .group_by
                    .iter()
                    .any(|key| key.eq_ignore_ascii_case(name));
                let is_agg_alias = agg_map
                    .values()
                    .any(|(_, alias)| alias.eq_ignore_ascii_case(name));
                if in_group || is_agg_alias {
                    Ok(())
                } else {
                    Err(DbError::Plan {
                        pos: expr.pos,
                        msg: format!("column '{name}' must appear in GROUP BY"),
                    })
                }
            }
            ExprKind::Compare { left, right, .. } => {
                self.validate_having(left, select, agg_map)?;
                self.validate_having(right, select, agg_map)
            }
            ExprKind::And { left, right } | ExprKind::Or { left, right } => {
                self.validate_having(left, select, agg_map)?;
                self.validate_having(right, select, agg_map)
            }
            ExprKind::Not { expr } => self.validate_having(expr, select, agg_map),
            ExprKind::Like { expr, .. }
            | ExprKind::InList { expr, .. }
            | ExprKind::InSubquery { expr, .. }
            | ExprKind::Between { expr, .. }
            | ExprKind::IsNull { expr, .. } => self.validate_having(expr, select, agg_map),
            _ => Ok(()),
        }
    }

    fn projection_columns(
        &self,
        select: &SelectStmt,
        agg_map: &IndexMap<AggKey, (String, String)>,
    ) -> Vec<ProjectColumn> {
        select
            .items
            .iter()
            .map(|item| match item {
                SelectItem::Wildcard => ProjectColumn {
                    name: "*".into(),
                    alias: None,
                },
                SelectItem::Column { name, alias, .. } => ProjectColumn {
                    name: name.clone(),
                    alias: alias.clone(),
                },
                SelectItem::Aggregate { call, alias, .. } => {
                    let key = (call.func, call.column.to_ascii_lowercase());
                    let output = alias.clone().unwrap_or_else(|| {
                        agg_map
                            .get(&key)
                            .map(|(_, a)| a.clone())
                            .unwrap_or_else(|| call.default_alias())
                    });
                    ProjectColumn {
                        name: output,
                        alias: None,
                    }
                }
            })
            .collect()
    }

    fn sort_keys(
        &self,
        select: &SelectStmt,
        agg_map: &IndexMap<AggKey, (String, String)>,
    ) -> Result<Vec<SortKeySpec>> {
        let mut keys = Vec::with_capacity(select.order_by.len());
        for key in &select.order_by {
            let column = match &key.target {
                SortTarget::Position(n) => {
                    let Some(item) = select.items.get(n - 1) else {
                        return Err(DbError::Plan {
                            pos: key.pos,
                            msg: format!("ORDER BY position {n} is out of range"),
                        });
                    };
                    match item {
                        SelectItem::Wildcard => {
                            return Err(DbError::Plan {
                                pos: key.pos,
                                msg: "ORDER BY position cannot reference *".into(),
                            })
                        }
                        SelectItem::Column { name, alias, .. } => {
                            alias.clone().unwrap_or_else(|| name.clone())
                        }
                        SelectItem::Aggregate { call, alias, .. } => {
                            alias.clone().unwrap_or_else(|| {
                                let k = (call.func, call.column.to_ascii_lowercase());
                                agg_map
                                    .get(&k)
                                    .map(|(_, a)| a.clone())
                                    .unwrap_or_else(|| call.default_alias())
                            })
                        }
                    }
                }
                SortTarget::Column(name) => name.clone(),
            };
            keys.push(SortKeySpec {
                column,
                order: if key.descending {
                    SortOrder::Desc
                } else {
                    SortOrder::Asc
                },
            });
        }
        Ok(keys)
    }

    fn plan_delete(&self, delete: &DeleteStmt) -> Result<PlanNode> {
        let mut child = self.seq_scan(&delete.table, None);
        if let Some(cond) = &delete.where_clause {
            let condition = self.convert_expr(cond, None)?;
            child = self.filter_over(condition, "Filter rows to delete", child);
        }
        let (cost, rows) = child.estimates();
        Ok(PlanNode::Delete {
            table: delete.table.clone(),
            est: Estimates::new(
                cost + 2.0,
                rows,
                format!("Delete rows from table '{}'", delete.table),
            ),
            child: Box::new(child),
        })
    }

    fn plan_update(&self, update: &UpdateStmt) -> Result<PlanNode> {
        let mut child = self.seq_scan(&update.table, None);
        if let Some(cond) = &update.where_clause {
            let condition = self.convert_expr(cond, None)?;
            child = self.filter_over(condition, "Filter rows to update", child);
        }
        let set: IndexMap<String, Value> = update
            .assignments
            .iter()
            .map(|(column, value)| (column.clone(), value.value.clone()))
            .collect();
        let (cost, rows) = child.estimates();
        Ok(PlanNode::Update {
            table: update.table.clone(),
            set,
            est: Estimates::new(
                cost + 2.0,
                rows,
                format!("Update rows in table '{}'", update.table),
            ),
            child: Box::new(child),
        })
    }

    fn plan_alter(&self, alter: &AlterTableStmt) -> PlanNode {
        let action = match &alter.action {
            AlterAction::Rename { new_name } => AlterPlanAction::Rename {
                new_name: new_name.clone(),
            },
            AlterAction::AddColumn { column } => AlterPlanAction::AddColumn {
                column: ColumnDef {
                    name: column.name.clone(),
                    data_type: column.data_type,
                    constraints: column.constraints.clone(),
                },
            },
            AlterAction::DropColumn { name } => AlterPlanAction::DropColumn { name: name.clone() },
            AlterAction::ModifyColumn { name, data_type } => AlterPlanAction::ModifyColumn {
                name: name.clone(),
                data_type: *data_type,
            },
            AlterAction::ChangeColumn {
                old_name,
                new_name,
                data_type,
            } => AlterPlanAction::ChangeColumn {
                old_name: old_name.clone(),
                new_name: new_name.clone(),
                data_type: *data_type,
            },
        };
        PlanNode::AlterTable {
            description: format!("Alter table '{}'", alter.table),
            table: alter.table.clone(),
            action,
        }
    }

    /// AST predicate to plan predicate. With `agg_map` set (HAVING),
    /// aggregate calls rewrite to the alias GroupAggregate emits.
    fn convert_expr(
        &self,
        expr: &ExprNode,
        agg_map: Option<&IndexMap<AggKey, (String, String)>>,
    ) -> Result<Expr> {
        match &expr.kind {
            ExprKind::Compare { left, op, right } => Ok(Expr::Compare {
                left: self.operand(left, agg_map)?,
                op: *op,
                right: self.operand(right, agg_map)?,
            }),
            ExprKind::And { left, right } => Ok(Expr::And {
                left: Box::new(self.convert_expr(left, agg_map)?),
                right: Box::new(self.convert_expr(right, agg_map)?),
            }),
            ExprKind::Or { left, right } => Ok(Expr::Or {
                left: Box::new(self.convert_expr(left, agg_map)?),
                right: Box::new(self.convert_expr(right, agg_map)?),
            }),
            ExprKind::Not { expr } => Ok(Expr::Not {
                condition: Box::new(self.convert_expr(expr, agg_map)?),
            }),
            ExprKind::Like {
                expr: inner,
                pattern,
                negated,
            } => Ok(Expr::Like {
                left: self.operand(inner, agg_map)?,
                pattern: self.operand(pattern, agg_map)?,
                negated: *negated,
            }),
            ExprKind::InList {
                expr: inner,
                values,
                negated,
            } => Ok(Expr::In {
                left: self.operand(inner, agg_map)?,
                values: Some(values.iter().map(|v| v.value.clone()).collect()),
                subquery: None,
                negated: *negated,
            }),
            ExprKind::InSubquery {
                expr: inner,
                subquery,
                negated,
            } => Ok(Expr::In {
                left: self.operand(inner, agg_map)?,
                values: None,
                subquery: Some(Box::new(self.plan_select(subquery)?)),
                negated: *negated,
            }),
            ExprKind::Between {
                expr: inner,
                low,
                high,
                negated,
            } => Ok(Expr::Between {
                left: self.operand(inner, agg_map)?,
                min: self.operand(low, agg_map)?,
                max: self.operand(high, agg_map)?,
                negated: *negated,
            }),
            ExprKind::IsNull {
                expr: inner,
                negated,
            } => Ok(Expr::IsNull {
                left: self.operand(inner, agg_map)?,
                negated: *negated,
            }),
            _ => Err(DbError::Plan {
                pos: expr.pos,
                msg: "expected a predicate".into(),
            }),
        }
    }

    fn operand(
        &self,
        expr: &ExprNode,
        agg_map: Option<&IndexMap<AggKey, (String, String)>>,
    ) -> Result<Operand> {
        match &expr.kind {
            ExprKind::Column(name) => Ok(Operand::Column(name.clone())),
            ExprKind::Literal(value) => Ok(Operand::Literal(value.clone())),
            ExprKind::Aggregate(call) => match agg_map {
                Some(map) => {
                    let key = (call.func, call.column.to_ascii_lowercase());
                    let (_, alias) = map.get(&key).ok_or_else(|| DbError::Plan {
                        pos: expr.pos,
                        msg: format!("aggregate {}({}) was not collected", call.func.name(), call.column),
                    })?;
                    Ok(Operand::Column(alias.clone()))
                }
                None => Err(DbError::Plan {
                    pos: expr.pos,
                    msg: "aggregate calls are not allowed in this clause".into(),
                }),
            },
            _ => Err(DbError::Plan {
                pos: expr.pos,
                msg: "expected a column or value".into(),
            }),
        }
    }
}

/// Aggregates appearing in SELECT or HAVING, keyed by (func, lowercased
/// column), valued as (column as written, output alias). Select-list
/// aliases win over generated ones.
fn collect_aggregates(select: &SelectStmt) -> IndexMap<AggKey, (String, String)> {
    let mut map: IndexMap<AggKey, (String, String)> = IndexMap::new();

    for item in &select.items {
        if let SelectItem::Aggregate { call, alias, .. } = item {
            let key = (call.func, call.column.to_ascii_lowercase());
            let alias = alias.clone().unwrap_or_else(|| call.default_alias());
            map.entry(key).or_insert((call.column.clone(), alias));
        }
    }

    fn walk(expr: &ExprNode, map: &mut IndexMap<AggKey, (String, String)>) {
        match &expr.kind {
            ExprKind::Aggregate(call) => {
                let key = (call.func, call.column.to_ascii_lowercase());
                map.entry(key)
                    .or_insert((call.column.clone(), call.default_alias()));
            }
            ExprKind::Compare { left, right, .. } => {
                walk(left, map);
                walk(right, map);
            }
            ExprKind::And { left, right } | ExprKind::Or { left, right } => {
                walk(left, map);
                walk(right, map);
            }
            ExprKind::Not { expr } => walk(expr, map),
            ExprKind::Like { expr, pattern, .. } => {
                walk(expr, map);
                walk(pattern, map);
            }
            ExprKind::InList { expr, .. } | ExprKind::InSubquery { expr, .. } => walk(expr, map),
            ExprKind::Between {
                expr, low, high, ..
            } => {
                walk(expr, map);
                walk(low, map);
                walk(high, map);
            }
            ExprKind::IsNull { expr, .. } => walk(expr, map),
            ExprKind::Column(_) | ExprKind::Literal(_) => {}
        }
    }
    if let Some(having) = &select.having {
        walk(having, &mut map);
    }
    map
}

fn needs_projection(select: &SelectStmt, agg_map: &IndexMap<AggKey, (String, String)>) -> bool {
    let plain_star =
        select.items.len() == 1 && matches!(select.items[0], SelectItem::Wildcard);
    !(plain_star && agg_map.is_empty())
}

fn qualified_columns(leg: &(String, TableSchema)) -> Vec<String> {
    leg.1
        .columns
        .iter()
        .map(|c| format!("{}.{}", leg.0, c.name))
        .collect()
}
