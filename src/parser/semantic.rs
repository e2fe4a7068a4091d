//! Semantic analysis: name, type and arity checks against the catalog.
//! Every rejection carries the offending node's source position.

use crate::catalog::CatalogManager;
use crate::error::{DbError, Pos, Result};
use crate::parser::ast::*;
use crate::storage::types::{DataType, Value};

/// What the analyzer learned about a statement, for display purposes.
#[derive(Debug, Clone)]
pub struct SemanticInfo {
    pub statement: &'static str,
    pub tables: Vec<String>,
}

pub struct SemanticAnalyzer<'a> {
    catalog: &'a CatalogManager,
}

impl<'a> SemanticAnalyzer<'a> {
    pub fn new(catalog: &'a CatalogManager) -> Self {
        Self { catalog }
    }

    pub fn analyze(&self, stmt: &Statement) -> Result<SemanticInfo> {
        match stmt {
            Statement::CreateTable(create) => self.analyze_create(create),
            Statement::DropTable { table, pos } => {
                self.require_table(table, *pos)?;
                Ok(SemanticInfo {
                    statement: "DROP TABLE",
                    tables: vec![table.clone()],
                })
            }
            Statement::Insert(insert) => self.analyze_insert(insert),
            Statement::Select(select) => {
                self.analyze_select(select)?;
                Ok(SemanticInfo {
                    statement: "SELECT",
                    tables: select_tables(select),
                })
            }
            Statement::Delete(delete) => self.analyze_delete(delete),
            Statement::Update(update) => self.analyze_update(update),
            Statement::ShowTables { .. } => Ok(SemanticInfo {
                statement: "SHOW TABLES",
                tables: Vec::new(),
            }),
            Statement::DescTable { table, pos } => {
                self.require_table(table, *pos)?;
                Ok(SemanticInfo {
                    statement: "DESC",
                    tables: vec![table.clone()],
                })
            }
            Statement::AlterTable(alter) => self.analyze_alter(alter),
        }
    }

    fn require_table(&self, table: &str, pos: Pos) -> Result<()> {
        if self.catalog.table_exists(table) {
            Ok(())
        } else {
            Err(DbError::Semantic {
                pos,
                msg: format!("table '{table}' does not exist"),
            })
        }
    }

    fn analyze_create(&self, create: &CreateTableStmt) -> Result<SemanticInfo> {
        if self.catalog.table_exists(&create.table) {
            return Err(DbError::Semantic {
                pos: create.pos,
                msg: format!("table '{}' already exists", create.table),
            });
        }
        for (i, col) in create.columns.iter().enumerate() {
            if create.columns[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(DbError::Semantic {
                    pos: col.pos,
                    msg: format!("duplicate column name '{}'", col.name),
                });
            }
            if let Some(default) = &col.constraints.default {
                self.check_value_against(default, col.data_type, &col.name, col.pos)?;
            }
        }
        for fk in &create.foreign_keys {
            if !create
                .columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&fk.column))
            {
                return Err(DbError::Semantic {
                    pos: fk.pos,
                    msg: format!("foreign key column '{}' is not defined", fk.column),
                });
            }
            // self-referential keys resolve against the table being created
            if !fk.ref_table.eq_ignore_ascii_case(&create.table) {
                self.require_table(&fk.ref_table, fk.pos)?;
                if !self.catalog.column_exists(&fk.ref_table, &fk.ref_column) {
                    return Err(DbError::Semantic {
                        pos: fk.pos,
                        msg: format!(
                            "referenced column '{}.{}' does not exist",
                            fk.ref_table, fk.ref_column
                        ),
                    });
                }
            }
        }
        Ok(SemanticInfo {
            statement: "CREATE TABLE",
            tables: vec![create.table.clone()],
        })
    }

    fn analyze_insert(&self, insert: &InsertStmt) -> Result<SemanticInfo> {
        self.require_table(&insert.table, insert.pos)?;
        let schema = self
            .catalog
            .get_schema(&insert.table)
            .expect("existence checked above");

        let bound: Vec<(String, DataType, bool)> = match &insert.columns {
            Some(columns) => {
                let mut bound = Vec::with_capacity(columns.len());
                for (i, name) in columns.iter().enumerate() {
                    if columns[..i].iter().any(|c| c.eq_ignore_ascii_case(name)) {
                        return Err(DbError::Semantic {
                            pos: insert.pos,
                            msg: format!("column '{name}' listed twice"),
                        });
                    }
                    let Some(col) = schema.column(name) else {
                        return Err(DbError::Semantic {
                            pos: insert.pos,
                            msg: format!("column '{name}' does not exist in '{}'", insert.table),
                        });
                    };
                    bound.push((col.name.clone(), col.data_type, col.constraints.not_null));
                }
                bound
            }
            None => schema
                .columns
                .iter()
                .map(|c| (c.name.clone(), c.data_type, c.constraints.not_null))
                .collect(),
        };

        if insert.values.len() != bound.len() {
            return Err(DbError::Semantic {
                pos: insert.pos,
                msg: format!(
                    "expected {} values, got {}",
                    bound.len(),
                    insert.values.len()
                ),
            });
        }

        for (node, (name, data_type, not_null)) in insert.values.iter().zip(&bound) {
            if node.value.is_null() {
                if *not_null {
                    return Err(DbError::Semantic {
                        pos: node.pos,
                        msg: format!("column '{name}' does not allow NULL"),
                    });
                }
                continue;
            }
            self.check_value_against(&node.value, *data_type, name, node.pos)?;
        }

        Ok(SemanticInfo {
            statement: "INSERT",
            tables: vec![insert.table.clone()],
        })
    }

    fn check_value_against(
        &self,
        value: &Value,
        data_type: DataType,
        column: &str,
        pos: Pos,
    ) -> Result<()> {
        match (data_type, value) {
            (_, Value::Null) | (DataType::Int, Value::Int(_)) => Ok(()),
            (DataType::Int, Value::Float(_)) => Err(DbError::Semantic {
                pos,
                msg: format!("decimal literal is not valid for INT column '{column}'"),
            }),
            (DataType::Varchar(max_len), Value::Str(s)) => {
                if s.len() > max_len as usize {
                    Err(DbError::Semantic {
                        pos,
                        msg: format!(
                            "string of {} bytes exceeds VARCHAR({max_len}) column '{column}'",
                            s.len()
                        ),
                    })
                } else {
                    Ok(())
                }
            }
            (expected, got) => Err(DbError::Semantic {
                pos,
                msg: format!(
                    "value {got} is not compatible with {} column '{column}'",
                    expected.type_name()
                ),
            }),
        }
    }

    fn analyze_select(&self, select: &SelectStmt) -> Result<()> {
        let scope = self.resolve_scope(select)?;

        for item in &select.items {
            match item {
                SelectItem::Wildcard => {}
                SelectItem::Column { name, pos, .. } => {
                    self.require_column(&scope, name, *pos)?;
                }
                SelectItem::Aggregate { call, pos, .. } => {
                    if call.column != "*" {
                        self.require_column(&scope, &call.column, *pos)?;
                    }
                }
            }
        }

        for join in &select.joins {
            self.check_expr(&scope, &join.on)?;
        }
        if let Some(cond) = &select.where_clause {
            self.check_expr(&scope, cond)?;
        }
        for key in &select.group_by {
            self.require_column(&scope, key, select.pos)?;
        }
        if let Some(cond) = &select.having {
            self.check_having(&scope, select, cond)?;
        }
        for key in &select.order_by {
            if let SortTarget::Column(name) = &key.target {
                // ORDER BY may reference an output alias of the select list
                let is_alias = select.items.iter().any(|item| match item {
                    SelectItem::Column { alias, .. } | SelectItem::Aggregate { alias, .. } => {
                        alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
                    }
                    SelectItem::Wildcard => false,
                });
                if !is_alias {
                    self.require_column(&scope, name, key.pos)?;
                }
            }
        }
        Ok(())
    }

    /// FROM-clause bindings: (label, table_name).
    fn resolve_scope(&self, select: &SelectStmt) -> Result<Vec<(String, String)>> {
        let mut scope = Vec::new();
        self.require_table(&select.from.table, select.from.pos)?;
        scope.push((
            select.from.label().to_string(),
            select.from.table.clone(),
        ));
        for join in &select.joins {
            self.require_table(&join.table.table, join.table.pos)?;
            scope.push((join.table.label().to_string(), join.table.table.clone()));
        }
        Ok(scope)
    }

    fn require_column(&self, scope: &[(String, String)], name: &str, pos: Pos) -> Result<()> {
        match name.split_once('.') {
            Some((qualifier, column)) => {
                let Some((_, table)) = scope
                    .iter()
                    .find(|(label, _)| label.eq_ignore_ascii_case(qualifier))
                else {
                    return Err(DbError::Semantic {
                        pos,
                        msg: format!("unknown table or alias '{qualifier}'"),
                    });
                };
                if !self.catalog.column_exists(table, column) {
                    return Err(DbError::Semantic {
                        pos,
                        msg: format!("column '{column}' does not exist in '{table}'"),
                    });
                }
                Ok(())
            }
            None => {
                if scope
                    .iter()
                    .any(|(_, table)| self.catalog.column_exists(table, name))
                {
                    Ok(())
                } else {
                    Err(DbError::Semantic {
                        pos,
                        msg: format!("column '{name}' does not exist"),
                    })
                }
            }
        }
    }

    fn check_expr(&self, scope: &[(String, String)], expr: &ExprNode) -> Result<()> {
        match &expr.kind {
            ExprKind::Column(name) => self.require_column(scope, name, expr.pos),
            ExprKind::Literal(_) => Ok(()),
            ExprKind::Aggregate(call) => {
                if call.column != "*" {
                    self.require_column(scope, &call.column, expr.pos)?;
                }
                Ok(())
            }
            ExprKind::Compare { left, right, .. } => {
                self.check_expr(scope, left)?;
                self.check_expr(scope, right)
            }
            ExprKind::And { left, right } | ExprKind::Or { left, right } => {
                self.check_expr(scope, left)?;
                self.check_expr(scope, right)
            }
            ExprKind::Not { expr } => self.check_expr(scope, expr),
            ExprKind::Like { expr, pattern, .. } => {
                self.check_expr(scope, expr)?;
                self.check_expr(scope, pattern)
            }
            ExprKind::InList { expr, .. } => self.check_expr(scope, expr),
            ExprKind::InSubquery { expr, subquery, .. } => {
                self.check_expr(scope, expr)?;
                self.analyze_select(subquery)
            }
            ExprKind::Between {
                expr, low, high, ..
            } => {
                self.check_expr(scope, expr)?;
                self.check_expr(scope, low)?;
                self.check_expr(scope, high)
            }
            ExprKind::IsNull { expr, .. } => self.check_expr(scope, expr),
        }
    }

    /// HAVING may reference aggregates and the select list's aliases in
    /// addition to real columns.
    fn check_having(
        &self,
        scope: &[(String, String)],
        select: &SelectStmt,
        expr: &ExprNode,
    ) -> Result<()> {
        match &expr.kind {
            ExprKind::Column(name) => {
                let is_alias = select.items.iter().any(|item| match item {
                    SelectItem::Column { alias, .. } | SelectItem::Aggregate { alias, .. } => {
                        alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(name))
                    }
                    SelectItem::Wildcard => false,
                });
                if is_alias {
                    Ok(())
                } else {
                    self.require_column(scope, name, expr.pos)
                }
            }
            ExprKind::Compare { left, right, .. } => {
                self.check_having(scope, select, left)?;
                self.check_having(scope, select, right)
            }
            ExprKind::And { left, right } | ExprKind::Or { left, right } => {
                self.check_having(scope, select, left)?;
                self.check_having(scope, select, right)
            }
            ExprKind::Not { expr } => self.check_having(scope, select, expr),
            _ => self.check_expr(scope, expr),
        }
    }

    fn analyze_delete(&self, delete: &DeleteStmt) -> Result<SemanticInfo> {
        self.require_table(&delete.table, delete.pos)?;
        let scope = vec![(delete.table.clone(), delete.table.clone())];
        if let Some(cond) = &delete.where_clause {
            self.check_expr(&scope, cond)?;
        }
        Ok(SemanticInfo {
            statement: "DELETE",
            tables: vec![delete.table.clone()],
        })
    }

    fn analyze_update(&self, update: &UpdateStmt) -> Result<SemanticInfo> {
        self.require_table(&update.table, update.pos)?;
        let schema = self
            .catalog
            .get_schema(&update.table)
            .expect("existence checked above");

        for (column, node) in &update.assignments {
            let Some(col) = schema.column(column) else {
                return Err(DbError::Semantic {
                    pos: node.pos,
                    msg: format!("column '{column}' does not exist in '{}'", update.table),
                });
            };
            if node.value.is_null() {
                if col.constraints.not_null {
                    return Err(DbError::Semantic {
                        pos: node.pos,
                        msg: format!("column '{column}' does not allow NULL"),
                    });
                }
            } else {
                self.check_value_against(&node.value, col.data_type, column, node.pos)?;
            }
        }

        let scope = vec![(update.table.clone(), update.table.clone())];
        if let Some(cond) = &update.where_clause {
            self.check_expr(&scope, cond)?;
        }
        Ok(SemanticInfo {
            statement: "UPDATE",
            tables: vec![update.table.clone()],
        })
    }

    fn analyze_alter(&self, alter: &AlterTableStmt) -> Result<SemanticInfo> {
        self.require_table(&alter.table, alter.pos)?;
        match &alter.action {
            AlterAction::Rename { new_name } => {
                if self.catalog.table_exists(new_name) {
                    return Err(DbError::Semantic {
                        pos: alter.pos,
                        msg: format!("table '{new_name}' already exists"),
                    });
                }
            }
            AlterAction::AddColumn { column } => {
                if self.catalog.column_exists(&alter.table, &column.name) {
                    return Err(DbError::Semantic {
                        pos: column.pos,
                        msg: format!("column '{}' already exists", column.name),
                    });
                }
            }
            AlterAction::DropColumn { name } | AlterAction::ModifyColumn { name, .. } => {
                if !self.catalog.column_exists(&alter.table, name) {
                    return Err(DbError::Semantic {
                        pos: alter.pos,
                        msg: format!("column '{name}' does not exist in '{}'", alter.table),
                    });
                }
            }
            AlterAction::ChangeColumn {
                old_name, new_name, ..
            } => {
                if !self.catalog.column_exists(&alter.table, old_name) {
                    return Err(DbError::Semantic {
                        pos: alter.pos,
                        msg: format!("column '{old_name}' does not exist in '{}'", alter.table),
                    });
                }
                if !old_name.eq_ignore_ascii_case(new_name)
                    && self.catalog.column_exists(&alter.table, new_name)
                {
                    return Err(DbError::Semantic {
                        pos: alter.pos,
                        msg: format!("column '{new_name}' already exists"),
                    });
                }
            }
        }
        Ok(SemanticInfo {
            statement: "ALTER TABLE",
            tables: vec![alter.table.clone()],
        })
    }
}

fn select_tables(select: &SelectStmt) -> Vec<String> {
    let mut tables = vec![select.from.table.clone()];
    tables.extend(select.joins.iter().map(|j| j.table.table.clone()));
    tables
}
