//! Foreign-key registry and the RESTRICT validator used by the DML
//! operators. Constraints persist in `sys_foreign_keys`; violations are
//! raised before any page is mutated.

use tracing::debug;

use crate::catalog::{CatalogManager, SYS_FOREIGN_KEYS};
use crate::error::{DbError, Result};
use crate::storage::types::{row_get, Row, Value};

#[derive(Debug, Clone)]
pub struct ForeignKeyConstraint {
    pub fk_id: u32,
    /// Child table holding the referencing column.
    pub table_id: u32,
    pub column_name: String,
    /// Parent table holding the referenced column.
    pub ref_table_id: u32,
    pub ref_column_name: String,
    pub constraint_name: String,
}

impl CatalogManager {
    /// Record a foreign key from `table.column` to `ref_table.ref_column`.
    pub fn add_foreign_key(
        &self,
        table_name: &str,
        column_name: &str,
        ref_table_name: &str,
        ref_column_name: &str,
        constraint_name: Option<&str>,
    ) -> Result<u32> {
        let child = self
            .get_table_metadata(table_name)
            .ok_or_else(|| DbError::NotFound(format!("table: {table_name}")))?;
        let parent = self
            .get_table_metadata(ref_table_name)
            .ok_or_else(|| DbError::NotFound(format!("referenced table: {ref_table_name}")))?;
        if !self.column_exists(table_name, column_name) {
            return Err(DbError::NotFound(format!(
                "column: {table_name}.{column_name}"
            )));
        }
        if !self.column_exists(ref_table_name, ref_column_name) {
            return Err(DbError::NotFound(format!(
                "column: {ref_table_name}.{ref_column_name}"
            )));
        }

        let constraint_name = constraint_name.map(str::to_string).unwrap_or_else(|| {
            format!("fk_{table_name}_{column_name}_{ref_table_name}_{ref_column_name}")
        });

        let fk_id = {
            let mut cache = self.cache.write();
            let id = cache.next_fk_id;
            cache.next_fk_id += 1;
            id
        };

        let mut row = Row::new();
        row.insert("fk_id".into(), Value::Int(fk_id as i32));
        row.insert("table_id".into(), Value::Int(child.table_id as i32));
        row.insert("column_name".into(), Value::Str(column_name.to_string()));
        row.insert("ref_table_id".into(), Value::Int(parent.table_id as i32));
        row.insert(
            "ref_column_name".into(),
            Value::Str(ref_column_name.to_string()),
        );
        row.insert(
            "constraint_name".into(),
            Value::Str(constraint_name.clone()),
        );
        self.storage().insert_row(SYS_FOREIGN_KEYS, &row)?;

        self.cache
            .write()
            .foreign_keys
            .entry(child.table_id)
            .or_default()
            .push(ForeignKeyConstraint {
                fk_id,
                table_id: child.table_id,
                column_name: column_name.to_string(),
                ref_table_id: parent.table_id,
                ref_column_name: ref_column_name.to_string(),
                constraint_name: constraint_name.clone(),
            });
        debug!(constraint = %constraint_name, "added foreign key");
        Ok(fk_id)
    }

    /// Foreign keys declared on `table` (child side).
    pub fn foreign_keys_of(&self, table_name: &str) -> Vec<ForeignKeyConstraint> {
        let Some(meta) = self.get_table_metadata(table_name) else {
            return Vec::new();
        };
        self.cache
            .read()
            .foreign_keys
            .get(&meta.table_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Foreign keys in any table that reference `table` (parent side).
    pub fn foreign_keys_referencing(&self, table_name: &str) -> Vec<ForeignKeyConstraint> {
        let Some(meta) = self.get_table_metadata(table_name) else {
            return Vec::new();
        };
        self.cache
            .read()
            .foreign_keys
            .values()
            .flatten()
            .filter(|fk| fk.ref_table_id == meta.table_id)
            .cloned()
            .collect()
    }

    /// INSERT hook: every non-NULL FK value must exist in the parent.
    pub fn validate_insert_foreign_keys(&self, table_name: &str, row: &Row) -> Result<()> {
        for fk in self.foreign_keys_of(table_name) {
            let value = row_get(row, &fk.column_name).cloned().unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            if !self.parent_key_exists(&fk, &value)? {
                let parent = self
                    .table_name_by_id(fk.ref_table_id)
                    .unwrap_or_else(|| "?".into());
                return Err(DbError::ForeignKeyViolation(format!(
                    "no row in parent '{parent}.{}' has value '{value}' (constraint {})",
                    fk.ref_column_name, fk.constraint_name
                )));
            }
        }
        Ok(())
    }

    /// UPDATE hook: re-check changed FK columns on the child side, and
    /// reject changing a parent key some child still references.
    pub fn validate_update_foreign_keys(
        &self,
        table_name: &str,
        old_row: &Row,
        new_row: &Row,
    ) -> Result<()> {
        for fk in self.foreign_keys_of(table_name) {
            let old_value = row_get(old_row, &fk.column_name).cloned().unwrap_or(Value::Null);
            let new_value = row_get(new_row, &fk.column_name).cloned().unwrap_or(Value::Null);
            if old_value == new_value || new_value.is_null() {
                continue;
            }
            if !self.parent_key_exists(&fk, &new_value)? {
                let parent = self
                    .table_name_by_id(fk.ref_table_id)
                    .unwrap_or_else(|| "?".into());
                return Err(DbError::ForeignKeyViolation(format!(
                    "no row in parent '{parent}.{}' has value '{new_value}' (constraint {})",
                    fk.ref_column_name, fk.constraint_name
                )));
            }
        }

        for fk in self.foreign_keys_referencing(table_name) {
            let old_value = row_get(old_row, &fk.ref_column_name)
                .cloned()
                .unwrap_or(Value::Null);
            let new_value = row_get(new_row, &fk.ref_column_name)
                .cloned()
                .unwrap_or(Value::Null);
            if old_value == new_value || old_value.is_null() {
                continue;
            }
            if self.child_key_exists(&fk, &old_value)? {
                let child = self
                    .table_name_by_id(fk.table_id)
                    .unwrap_or_else(|| "?".into());
                return Err(DbError::ForeignKeyViolation(format!(
                    "cannot change referenced key: child '{child}.{}' still references '{old_value}' (constraint {})",
                    fk.column_name, fk.constraint_name
                )));
            }
        }
        Ok(())
    }

    /// DELETE hook, RESTRICT semantics: the row's referenced value must not
    /// be referenced by any child row.
    pub fn validate_delete_foreign_keys(&self, table_name: &str, row: &Row) -> Result<()> {
        for fk in self.foreign_keys_referencing(table_name) {
            let value = row_get(row, &fk.ref_column_name)
                .cloned()
                .unwrap_or(Value::Null);
            if value.is_null() {
                continue;
            }
            if self.child_key_exists(&fk, &value)? {
                let child = self
                    .table_name_by_id(fk.table_id)
                    .unwrap_or_else(|| "?".into());
                return Err(DbError::ForeignKeyViolation(format!(
                    "cannot delete: child '{child}.{}' references '{value}' (constraint {})",
                    fk.column_name, fk.constraint_name
                )));
            }
        }
        Ok(())
    }

    fn parent_key_exists(&self, fk: &ForeignKeyConstraint, value: &Value) -> Result<bool> {
        let Some(parent) = self.table_name_by_id(fk.ref_table_id) else {
            return Ok(false);
        };
        for row in self.storage().seq_scan(&parent)? {
            let row = row?;
            if let Some(candidate) = row_get(&row, &fk.ref_column_name) {
                if candidate.sql_eq(value) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn child_key_exists(&self, fk: &ForeignKeyConstraint, value: &Value) -> Result<bool> {
        let Some(child) = self.table_name_by_id(fk.table_id) else {
            return Ok(false);
        };
        for row in self.storage().seq_scan(&child)? {
            let row = row?;
            if let Some(candidate) = row_get(&row, &fk.column_name) {
                if candidate.sql_eq(value) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}
