//! Pull-based plan execution. The executor walks the plan once, wiring
//! each operator to its children's row streams, then drives the root.
//! DDL and DML operators yield a single status row.

use std::collections::HashSet;
use tracing::debug;

use crate::catalog::CatalogManager;
use crate::error::{DbError, Result};
use crate::execution::aggregate::group_aggregate;
use crate::execution::distinct;
use crate::execution::expressions::{Expr, ExpressionEvaluator};
use crate::execution::join::{nested_loop_join, JoinSpec};
use crate::execution::planner::{AlterPlanAction, PlanNode, ProjectColumn};
use crate::execution::sort::sort_rows;
use crate::storage::types::{
    row_get, row_get_qualified, ColumnDef, DataType, Row, TableSchema, Value,
};
use crate::storage::StorageEngine;

pub type RowStream<'p> = Box<dyn Iterator<Item = Result<Row>> + 'p>;

/// Borrows the engine and catalog for the duration of one plan execution.
#[derive(Clone, Copy)]
pub struct Executor<'a> {
    pub storage: &'a StorageEngine,
    pub catalog: &'a CatalogManager,
}

impl<'a> Executor<'a> {
    pub fn new(storage: &'a StorageEngine, catalog: &'a CatalogManager) -> Self {
        Self { storage, catalog }
    }

    /// Drive the plan to completion and collect its output rows.
    pub fn execute(&self, plan: &PlanNode) -> Result<Vec<Row>> {
        self.stream(plan)?.collect()
    }

    /// Single-column result of a subquery plan.
    fn execute_values(&self, plan: &PlanNode) -> Result<Vec<Value>> {
        Ok(self
            .execute(plan)?
            .into_iter()
            .map(|row| row.values().next().cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// Build the operator for one plan node, returning its output stream.
    pub fn stream<'p>(&self, plan: &'p PlanNode) -> Result<RowStream<'p>>
    where
        'a: 'p,
    {
        let exec: Executor<'p> = Executor {
            storage: self.storage,
            catalog: self.catalog,
        };
        match plan {
            PlanNode::SeqScan { table, .. } => Ok(Box::new(self.storage.seq_scan(table)?)),

            PlanNode::Filter {
                condition, child, ..
            } => Ok(Box::new(FilterIter {
                exec,
                condition,
                child: self.stream(child)?,
            })),

            PlanNode::Project {
                columns, child, ..
            } => {
                let child = self.stream(child)?;
                Ok(Box::new(child.map(move |row| {
                    row.map(|row| project_row(&row, columns))
                })))
            }

            PlanNode::Distinct { child, .. } => Ok(Box::new(DistinctIter {
                child: self.stream(child)?,
                seen: HashSet::new(),
            })),

            PlanNode::GroupAggregate {
                group_keys,
                aggregates,
                child,
                ..
            } => {
                let rows = group_aggregate(self.stream(child)?, group_keys, aggregates)?;
                Ok(Box::new(rows.into_iter().map(Ok)))
            }

            PlanNode::Sort { keys, child, .. } => {
                let rows: Vec<Row> = self.stream(child)?.collect::<Result<_>>()?;
                Ok(Box::new(sort_rows(rows, keys).into_iter().map(Ok)))
            }

            PlanNode::Limit {
                offset,
                count,
                child,
                ..
            } => Ok(Box::new(LimitIter {
                child: self.stream(child)?,
                to_skip: *offset,
                remaining: *count,
            })),

            PlanNode::NestedLoopJoin {
                join_type,
                left_on,
                right_on,
                left_prefix,
                right_prefix,
                left_columns,
                right_columns,
                left,
                right,
                ..
            } => {
                let right_rows = self.execute(right)?;
                let spec = JoinSpec {
                    join_type: *join_type,
                    left_on,
                    right_on,
                    left_prefix: left_prefix.as_deref(),
                    right_prefix,
                    left_columns,
                    right_columns,
                };
                let rows = nested_loop_join(self.stream(left)?, right_rows, &spec)?;
                Ok(Box::new(rows.into_iter().map(Ok)))
            }

            PlanNode::Insert {
                table,
                columns,
                values,
                ..
            } => self.eager(self.run_insert(table, columns.as_deref(), values)),

            PlanNode::Delete { table, child, .. } => self.eager(self.run_delete(table, child)),

            PlanNode::Update {
                table, set, child, ..
            } => self.eager(self.run_update(table, set, child)),

            PlanNode::CreateTable {
                table,
                columns,
                foreign_keys,
                ..
            } => self.eager(self.run_create(table, columns, foreign_keys)),

            PlanNode::DropTable { table, .. } => self.eager(self.run_drop(table)),

            PlanNode::AlterTable { table, action, .. } => {
                self.eager(self.run_alter(table, action))
            }

            PlanNode::ShowTables { .. } => {
                let rows: Vec<Row> = self
                    .catalog
                    .list_user_tables()
                    .into_iter()
                    .map(|name| {
                        let mut row = Row::new();
                        row.insert("table".into(), Value::Str(name));
                        row
                    })
                    .collect();
                Ok(Box::new(rows.into_iter().map(Ok)))
            }

            PlanNode::Desc { table, .. } => {
                let schema = self.schema_of("Desc", table)?;
                let rows: Vec<Row> = schema
                    .columns
                    .iter()
                    .enumerate()
                    .map(|(i, col)| {
                        let mut row = Row::new();
                        row.insert("Field".into(), Value::Str(col.name.clone()));
                        row.insert("Type".into(), Value::Str(col.data_type.to_string()));
                        row.insert("Position".into(), Value::Int(i as i32));
                        row
                    })
                    .collect();
                Ok(Box::new(rows.into_iter().map(Ok)))
            }
        }
    }

    fn eager<'p>(&self, rows: Result<Vec<Row>>) -> Result<RowStream<'p>> {
        Ok(Box::new(rows?.into_iter().map(Ok)))
    }

    /// Authoritative schema from the catalog, falling back to the storage
    /// sidecar for tables the catalog does not track (system tables).
    fn schema_of(&self, operator: &str, table: &str) -> Result<TableSchema> {
        self.catalog
            .get_schema(table)
            .or_else(|| self.storage.get_schema(table).ok())
            .ok_or_else(|| DbError::execution(operator, format!("table '{table}' not found")))
    }

    fn eval_condition(&self, condition: Option<&Expr>, row: &Row) -> Result<bool> {
        let Some(condition) = condition else {
            return Ok(true);
        };
        let exec = *self;
        let sub = move |plan: &PlanNode| exec.execute_values(plan);
        ExpressionEvaluator::with_subquery(&sub).matches(condition, row)
    }

    // ---- DML ----

    fn run_insert(
        &self,
        table: &str,
        columns: Option<&[String]>,
        values: &[Value],
    ) -> Result<Vec<Row>> {
        let schema = self.schema_of("Insert", table)?;

        let row = match columns {
            Some(columns) => {
                if columns.len() != values.len() {
                    return Err(DbError::execution(
                        "Insert",
                        format!("{} columns but {} values", columns.len(), values.len()),
                    ));
                }
                let mut bound: Row = Row::new();
                for (name, value) in columns.iter().zip(values) {
                    let col = schema.column(name).ok_or_else(|| {
                        DbError::execution(
                            "Insert",
                            format!("column '{name}' does not exist in '{table}'"),
                        )
                    })?;
                    bound.insert(col.name.clone(), value.clone());
                }
                // unspecified columns pick up their DEFAULT, or NULL
                let mut row = Row::new();
                for col in &schema.columns {
                    let value = bound
                        .get(&col.name)
                        .cloned()
                        .or_else(|| col.constraints.default.clone())
                        .unwrap_or(Value::Null);
                    row.insert(col.name.clone(), value);
                }
                row
            }
            None => {
                if values.len() != schema.columns.len() {
                    return Err(DbError::execution(
                        "Insert",
                        format!(
                            "table '{table}' has {} columns but {} values were supplied",
                            schema.columns.len(),
                            values.len()
                        ),
                    ));
                }
                schema
                    .columns
                    .iter()
                    .zip(values)
                    .map(|(col, value)| (col.name.clone(), value.clone()))
                    .collect()
            }
        };

        self.check_column_constraints(table, &schema, &row)?;
        self.catalog.validate_insert_foreign_keys(table, &row)?;

        self.storage.insert_row(table, &row)?;
        self.catalog.update_row_count(table, 1)?;
        debug!(table, "inserted 1 row");
        Ok(vec![status_row("1 row inserted", 1)])
    }

    /// NOT NULL, UNIQUE and PRIMARY KEY checks ahead of the page write.
    fn check_column_constraints(
        &self,
        table: &str,
        schema: &TableSchema,
        row: &Row,
    ) -> Result<()> {
        for col in &schema.columns {
            let value = row_get(row, &col.name).unwrap_or(&Value::Null);
            if col.constraints.not_null && value.is_null() {
                return Err(DbError::ConstraintViolation(format!(
                    "column '{}' does not allow NULL",
                    col.name
                )));
            }
            if (col.constraints.unique || col.constraints.primary_key) && !value.is_null() {
                for existing in self.storage.seq_scan(table)? {
                    let existing = existing?;
                    if row_get(&existing, &col.name)
                        .map(|v| v.sql_eq(value))
                        .unwrap_or(false)
                    {
                        let kind = if col.constraints.primary_key {
                            "primary key"
                        } else {
                            "unique"
                        };
                        return Err(DbError::ConstraintViolation(format!(
                            "{kind} conflict: value '{value}' already exists in column '{}'",
                            col.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    fn run_delete(&self, table: &str, child: &PlanNode) -> Result<Vec<Row>> {
        let condition = filter_condition(child);
        if !self.storage.table_exists(table) {
            return Err(DbError::execution(
                "Delete",
                format!("table '{table}' not found"),
            ));
        }

        // RESTRICT validation happens before any tombstone is written
        if !self.catalog.foreign_keys_referencing(table).is_empty() {
            for row in self.storage.seq_scan(table)? {
                let row = row?;
                if self.eval_condition(condition, &row)? {
                    self.catalog.validate_delete_foreign_keys(table, &row)?;
                }
            }
        }

        let deleted = self
            .storage
            .delete_where(table, |row| self.eval_condition(condition, row))?;
        self.catalog.update_row_count(table, -(deleted as i64))?;
        debug!(table, deleted, "delete finished");
        Ok(vec![status_row(
            &format!("{deleted} row(s) deleted"),
            deleted,
        )])
    }

    fn run_update(
        &self,
        table: &str,
        set: &indexmap::IndexMap<String, Value>,
        child: &PlanNode,
    ) -> Result<Vec<Row>> {
        let condition = filter_condition(child);
        let schema = self.schema_of("Update", table)?;

        // resolve assignment keys to their declared casing once
        let assignments: Vec<(String, Value)> = set
            .iter()
            .map(|(name, value)| {
                let declared = schema
                    .column(name)
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| name.clone());
                (declared, value.clone())
            })
            .collect();
        let apply = |row: &Row| -> Row {
            let mut updated = row.clone();
            for (name, value) in &assignments {
                updated.insert(name.clone(), value.clone());
            }
            updated
        };

        // validate foreign keys on the new values before mutating pages
        let has_fks = !self.catalog.foreign_keys_of(table).is_empty()
            || !self.catalog.foreign_keys_referencing(table).is_empty();
        if has_fks {
            for row in self.storage.seq_scan(table)? {
                let row = row?;
                if self.eval_condition(condition, &row)? {
                    self.catalog
                        .validate_update_foreign_keys(table, &row, &apply(&row))?;
                }
            }
        }

        let updated = self.storage.update_where(
            table,
            |row| self.eval_condition(condition, row),
            |row| Ok(apply(row)),
        )?;
        debug!(table, updated, "update finished");
        Ok(vec![status_row(
            &format!("{updated} row(s) updated"),
            updated,
        )])
    }

    // ---- DDL ----

    fn run_create(
        &self,
        table: &str,
        columns: &[ColumnDef],
        foreign_keys: &[crate::execution::planner::ForeignKeySpec],
    ) -> Result<Vec<Row>> {
        self.storage
            .create_table(TableSchema::new(table, columns.to_vec()))?;
        self.catalog.register_table(table, columns)?;
        for fk in foreign_keys {
            self.catalog.add_foreign_key(
                table,
                &fk.column,
                &fk.ref_table,
                &fk.ref_column,
                fk.constraint_name.as_deref(),
            )?;
        }
        Ok(vec![status_row(&format!("table '{table}' created"), 0)])
    }

    fn run_drop(&self, table: &str) -> Result<Vec<Row>> {
        if self.catalog.table_exists(table) {
            self.catalog.unregister_table(table)?;
        }
        self.storage.drop_table(table)?;
        Ok(vec![status_row(&format!("table '{table}' dropped"), 0)])
    }

    /// ALTER by rewrite: copy through a hidden temporary table under the
    /// new schema, substitute tables, and re-register in the catalog.
    fn run_alter(&self, table: &str, action: &AlterPlanAction) -> Result<Vec<Row>> {
        let schema = self.schema_of("AlterTable", table)?;
        let columns = schema.columns.clone();

        let (new_columns, dest, message): (Vec<ColumnDef>, String, String) = match action {
            AlterPlanAction::Rename { new_name } => (
                columns.clone(),
                new_name.clone(),
                format!("table renamed to '{new_name}'"),
            ),
            AlterPlanAction::AddColumn { column } => {
                let mut new_columns = columns.clone();
                new_columns.push(column.clone());
                (
                    new_columns,
                    table.to_string(),
                    format!("column '{}' added", column.name),
                )
            }
            AlterPlanAction::DropColumn { name } => {
                let new_columns: Vec<ColumnDef> = columns
                    .iter()
                    .filter(|c| !c.name.eq_ignore_ascii_case(name))
                    .cloned()
                    .collect();
                if new_columns.len() == columns.len() {
                    return Err(DbError::execution(
                        "AlterTable",
                        format!("column '{name}' does not exist"),
                    ));
                }
                (
                    new_columns,
                    table.to_string(),
                    format!("column '{name}' dropped"),
                )
            }
            AlterPlanAction::ModifyColumn { name, data_type } => {
                let mut found = false;
                let new_columns: Vec<ColumnDef> = columns
                    .iter()
                    .map(|c| {
                        if c.name.eq_ignore_ascii_case(name) {
                            found = true;
                            ColumnDef {
                                name: c.name.clone(),
                                data_type: *data_type,
                                constraints: c.constraints.clone(),
                            }
                        } else {
                            c.clone()
                        }
                    })
                    .collect();
                if !found {
                    return Err(DbError::execution(
                        "AlterTable",
                        format!("column '{name}' does not exist"),
                    ));
                }
                (
                    new_columns,
                    table.to_string(),
                    format!("column '{name}' modified to {data_type}"),
                )
            }
            AlterPlanAction::ChangeColumn {
                old_name,
                new_name,
                data_type,
            } => {
                let mut found = false;
                let new_columns: Vec<ColumnDef> = columns
                    .iter()
                    .map(|c| {
                        if c.name.eq_ignore_ascii_case(old_name) {
                            found = true;
                            ColumnDef {
                                name: new_name.clone(),
                                data_type: *data_type,
                                constraints: c.constraints.clone(),
                            }
                        } else {
                            c.clone()
                        }
                    })
                    .collect();
                if !found {
                    return Err(DbError::execution(
                        "AlterTable",
                        format!("column '{old_name}' does not exist"),
                    ));
                }
                (
                    new_columns,
                    table.to_string(),
                    format!("column '{old_name}' changed to '{new_name}' {data_type}"),
                )
            }
        };

        let mapper = row_mapper(action, &new_columns);
        self.rewrite_table(table, &new_columns, &dest, mapper)?;

        self.catalog.unregister_table(table)?;
        self.catalog.register_table(&dest, &new_columns)?;
        let mut count = 0i64;
        for row in self.storage.seq_scan(&dest)? {
            row?;
            count += 1;
        }
        self.catalog.update_row_count(&dest, count)?;

        Ok(vec![status_row(&message, 0)])
    }

    fn rewrite_table(
        &self,
        src: &str,
        target_columns: &[ColumnDef],
        dest: &str,
        mapper: impl Fn(&Row) -> Result<Row>,
    ) -> Result<()> {
        let tmp = format!("__alter_tmp_{src}");
        self.storage
            .create_table(TableSchema::new(&tmp, target_columns.to_vec()))?;
        for row in self.storage.seq_scan(src)? {
            self.storage.insert_row(&tmp, &mapper(&row?)?)?;
        }

        self.storage.drop_table(src)?;
        self.storage
            .create_table(TableSchema::new(dest, target_columns.to_vec()))?;
        for row in self.storage.seq_scan(&tmp)? {
            self.storage.insert_row(dest, &row?)?;
        }
        self.storage.drop_table(&tmp)?;
        Ok(())
    }
}

fn filter_condition(child: &PlanNode) -> Option<&Expr> {
    match child {
        PlanNode::Filter { condition, .. } => Some(condition),
        _ => None,
    }
}

fn status_row(message: &str, affected: u64) -> Row {
    let mut row = Row::new();
    row.insert("status".into(), Value::Str("success".into()));
    row.insert("message".into(), Value::Str(message.to_string()));
    row.insert("affected_rows".into(), Value::Int(affected as i32));
    row
}

/// Project one row: aliases rename the output key, `*` expands to all
/// input keys, and an unknown input key projects to NULL.
fn project_row(row: &Row, columns: &[ProjectColumn]) -> Row {
    let mut out = Row::new();
    for col in columns {
        if col.name == "*" {
            for (k, v) in row {
                out.insert(k.clone(), v.clone());
            }
        } else {
            let key = col.alias.clone().unwrap_or_else(|| col.name.clone());
            let value = row_get_qualified(row, &col.name)
                .cloned()
                .unwrap_or(Value::Null);
            out.insert(key, value);
        }
    }
    out
}

/// Value migration for ALTER rewrites: renames move the cell, type changes
/// convert it, added columns fill with NULL.
fn row_mapper<'m>(
    action: &'m AlterPlanAction,
    new_columns: &'m [ColumnDef],
) -> impl Fn(&Row) -> Result<Row> + 'm {
    move |row: &Row| {
        let mut out = Row::new();
        for col in new_columns {
            let source_name = match action {
                AlterPlanAction::ChangeColumn {
                    old_name, new_name, ..
                } if col.name.eq_ignore_ascii_case(new_name) => old_name.clone(),
                _ => col.name.clone(),
            };
            let value = row_get(row, &source_name).cloned().unwrap_or(Value::Null);
            out.insert(col.name.clone(), convert_value(value, col.data_type)?);
        }
        Ok(out)
    }
}

fn convert_value(value: Value, target: DataType) -> Result<Value> {
    match (target, value) {
        (_, Value::Null) => Ok(Value::Null),
        (DataType::Int, Value::Int(i)) => Ok(Value::Int(i)),
        (DataType::Int, Value::Str(s)) => s.trim().parse::<i32>().map(Value::Int).map_err(|_| {
            DbError::execution("AlterTable", format!("cannot convert '{s}' to INT"))
        }),
        (DataType::Int, Value::Float(f)) => Ok(Value::Int(f as i32)),
        (DataType::Varchar(_), Value::Str(s)) => Ok(Value::Str(s)),
        (DataType::Varchar(_), other) => Ok(Value::Str(other.to_string())),
    }
}

struct FilterIter<'p> {
    exec: Executor<'p>,
    condition: &'p Expr,
    child: RowStream<'p>,
}

impl Iterator for FilterIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.child.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let exec = self.exec;
            let sub = move |plan: &PlanNode| exec.execute_values(plan);
            let evaluator = ExpressionEvaluator::with_subquery(&sub);
            match evaluator.matches(self.condition, &row) {
                Ok(true) => return Some(Ok(row)),
                Ok(false) => continue,
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

struct DistinctIter<'p> {
    child: RowStream<'p>,
    seen: HashSet<String>,
}

impl Iterator for DistinctIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.child.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let key = distinct::row_key(&row, None);
            if self.seen.insert(key) {
                return Some(Ok(row));
            }
        }
    }
}

/// Skips `to_skip` rows, yields at most `remaining`, then stops without
/// draining the child.
struct LimitIter<'p> {
    child: RowStream<'p>,
    to_skip: u64,
    remaining: u64,
}

impl Iterator for LimitIter<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        loop {
            let row = match self.child.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            if self.to_skip > 0 {
                self.to_skip -= 1;
                continue;
            }
            self.remaining -= 1;
            return Some(Ok(row));
        }
    }
}
