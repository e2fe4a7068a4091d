//! Catalog manager: database metadata persisted in system tables held by
//! the same storage engine, fronted by in-memory caches that are rebuilt
//! with exactly one scan per system table at startup.

pub mod constraints;

pub use constraints::ForeignKeyConstraint;

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{DbError, Result};
use crate::storage::types::{ColumnConstraints, ColumnDef, DataType, Row, TableSchema, Value};
use crate::storage::StorageEngine;

pub const SYS_TABLES: &str = "sys_tables";
pub const SYS_COLUMNS: &str = "sys_columns";
pub const SYS_INDEXES: &str = "sys_indexes";
pub const SYS_FOREIGN_KEYS: &str = "sys_foreign_keys";

pub const SYSTEM_TABLES: [&str; 4] = [SYS_TABLES, SYS_COLUMNS, SYS_INDEXES, SYS_FOREIGN_KEYS];

pub fn is_system_table(name: &str) -> bool {
    SYSTEM_TABLES
        .iter()
        .any(|sys| sys.eq_ignore_ascii_case(name))
}

#[derive(Debug, Clone)]
pub struct TableMetadata {
    pub table_id: u32,
    pub table_name: String,
    pub created_time: i64,
    pub row_count: i64,
}

#[derive(Debug, Clone)]
pub struct ColumnMetadata {
    pub table_id: u32,
    pub column_name: String,
    pub data_type: DataType,
    pub ordinal_position: u32,
    pub constraints: ColumnConstraints,
}

#[derive(Debug, Clone)]
pub struct IndexMetadata {
    pub index_id: u32,
    pub table_id: u32,
    pub index_name: String,
    pub column_name: String,
    pub index_type: String,
}

pub(crate) struct CatalogCache {
    pub tables: HashMap<String, TableMetadata>,
    pub columns: HashMap<u32, Vec<ColumnMetadata>>,
    pub indexes: HashMap<u32, Vec<IndexMetadata>>,
    pub foreign_keys: HashMap<u32, Vec<ForeignKeyConstraint>>,
    pub next_table_id: u32,
    pub next_index_id: u32,
    pub next_fk_id: u32,
}

/// Process-wide catalog for one open data directory. Owned by the top-level
/// engine and passed by reference to the compiler and executor.
pub struct CatalogManager {
    storage: Arc<StorageEngine>,
    pub(crate) cache: RwLock<CatalogCache>,
}

impl CatalogManager {
    pub fn new(storage: Arc<StorageEngine>) -> Result<Self> {
        let catalog = Self {
            storage,
            cache: RwLock::new(CatalogCache {
                tables: HashMap::new(),
                columns: HashMap::new(),
                indexes: HashMap::new(),
                foreign_keys: HashMap::new(),
                next_table_id: 1,
                next_index_id: 1,
                next_fk_id: 1,
            }),
        };
        catalog.bootstrap_system_tables()?;
        catalog.load_cache()?;
        Ok(catalog)
    }

    pub(crate) fn storage(&self) -> &StorageEngine {
        &self.storage
    }

    fn bootstrap_system_tables(&self) -> Result<()> {
        let defs: [(&str, Vec<ColumnDef>); 4] = [
            (
                SYS_TABLES,
                vec![
                    ColumnDef::new("table_id", DataType::Int),
                    ColumnDef::new("table_name", DataType::Varchar(64)),
                    ColumnDef::new("created_time", DataType::Int),
                    ColumnDef::new("row_count", DataType::Int),
                ],
            ),
            (
                SYS_COLUMNS,
                vec![
                    ColumnDef::new("table_id", DataType::Int),
                    ColumnDef::new("column_name", DataType::Varchar(64)),
                    ColumnDef::new("column_type", DataType::Varchar(20)),
                    ColumnDef::new("max_length", DataType::Int),
                    ColumnDef::new("ordinal_position", DataType::Int),
                ],
            ),
            (
                SYS_INDEXES,
                vec![
                    ColumnDef::new("index_id", DataType::Int),
                    ColumnDef::new("table_id", DataType::Int),
                    ColumnDef::new("index_name", DataType::Varchar(64)),
                    ColumnDef::new("column_name", DataType::Varchar(64)),
                    ColumnDef::new("index_type", DataType::Varchar(20)),
                ],
            ),
            (
                SYS_FOREIGN_KEYS,
                vec![
                    ColumnDef::new("fk_id", DataType::Int),
                    ColumnDef::new("table_id", DataType::Int),
                    ColumnDef::new("column_name", DataType::Varchar(64)),
                    ColumnDef::new("ref_table_id", DataType::Int),
                    ColumnDef::new("ref_column_name", DataType::Varchar(64)),
                    ColumnDef::new("constraint_name", DataType::Varchar(128)),
                ],
            ),
        ];

        for (name, columns) in defs {
            if !self.storage.table_exists(name) {
                info!(table = name, "creating system table");
                self.storage.create_table(TableSchema::new(name, columns))?;
            }
        }
        Ok(())
    }

    fn load_cache(&self) -> Result<()> {
        let mut cache = self.cache.write();

        for row in self.storage.seq_scan(SYS_TABLES)? {
            let row = row?;
            let meta = TableMetadata {
                table_id: get_int(&row, "table_id")? as u32,
                table_name: get_str(&row, "table_name")?,
                created_time: get_int(&row, "created_time")? as i64,
                row_count: get_int(&row, "row_count")? as i64,
            };
            cache.next_table_id = cache.next_table_id.max(meta.table_id + 1);
            cache.tables.insert(meta.table_name.to_ascii_lowercase(), meta);
        }

        for row in self.storage.seq_scan(SYS_COLUMNS)? {
            let row = row?;
            let table_id = get_int(&row, "table_id")? as u32;
            let type_name = get_str(&row, "column_type")?;
            let max_length = match row.get("max_length") {
                Some(Value::Int(n)) => Some(*n as u16),
                _ => None,
            };
            let meta = ColumnMetadata {
                table_id,
                column_name: get_str(&row, "column_name")?,
                data_type: DataType::parse(&type_name, max_length)?,
                ordinal_position: get_int(&row, "ordinal_position")? as u32,
                constraints: ColumnConstraints::default(),
            };
            cache.columns.entry(table_id).or_default().push(meta);
        }
        for cols in cache.columns.values_mut() {
            cols.sort_by_key(|c| c.ordinal_position);
        }

        for row in self.storage.seq_scan(SYS_INDEXES)? {
            let row = row?;
            let meta = IndexMetadata {
                index_id: get_int(&row, "index_id")? as u32,
                table_id: get_int(&row, "table_id")? as u32,
                index_name: get_str(&row, "index_name")?,
                column_name: get_str(&row, "column_name")?,
                index_type: get_str(&row, "index_type")?,
            };
            cache.next_index_id = cache.next_index_id.max(meta.index_id + 1);
            cache.indexes.entry(meta.table_id).or_default().push(meta);
        }

        for row in self.storage.seq_scan(SYS_FOREIGN_KEYS)? {
            let row = row?;
            let fk = ForeignKeyConstraint {
                fk_id: get_int(&row, "fk_id")? as u32,
                table_id: get_int(&row, "table_id")? as u32,
                column_name: get_str(&row, "column_name")?,
                ref_table_id: get_int(&row, "ref_table_id")? as u32,
                ref_column_name: get_str(&row, "ref_column_name")?,
                constraint_name: get_str(&row, "constraint_name")?,
            };
            cache.next_fk_id = cache.next_fk_id.max(fk.fk_id + 1);
            cache.foreign_keys.entry(fk.table_id).or_default().push(fk);
        }

        // constraint flags live in the advisory sidecar, not sys_columns
        let table_names: Vec<(u32, String)> = cache
            .tables
            .values()
            .map(|m| (m.table_id, m.table_name.clone()))
            .collect();
        for (table_id, name) in table_names {
            if let Some(info) = self.storage.get_table_info(&name) {
                if let Some(cols) = cache.columns.get_mut(&table_id) {
                    for col in cols.iter_mut() {
                        if let Some(def) = info.schema.column(&col.column_name) {
                            col.constraints = def.constraints.clone();
                        }
                    }
                }
            }
        }

        debug!(
            tables = cache.tables.len(),
            columns = cache.columns.values().map(Vec::len).sum::<usize>(),
            "catalog cache loaded"
        );
        Ok(())
    }

    /// Register a table in the system catalog, returning its table id.
    pub fn register_table(&self, table_name: &str, columns: &[ColumnDef]) -> Result<u32> {
        if self.table_exists(table_name) {
            return Err(DbError::AlreadyExists(format!("table: {table_name}")));
        }

        let table_id = {
            let mut cache = self.cache.write();
            let id = cache.next_table_id;
            cache.next_table_id += 1;
            id
        };
        let created_time = Utc::now().timestamp() as i32;

        let mut table_row = Row::new();
        table_row.insert("table_id".into(), Value::Int(table_id as i32));
        table_row.insert("table_name".into(), Value::Str(table_name.to_string()));
        table_row.insert("created_time".into(), Value::Int(created_time));
        table_row.insert("row_count".into(), Value::Int(0));
        self.storage.insert_row(SYS_TABLES, &table_row)?;

        for (ordinal, col) in columns.iter().enumerate() {
            let mut col_row = Row::new();
            col_row.insert("table_id".into(), Value::Int(table_id as i32));
            col_row.insert("column_name".into(), Value::Str(col.name.clone()));
            col_row.insert(
                "column_type".into(),
                Value::Str(col.data_type.type_name().to_string()),
            );
            col_row.insert(
                "max_length".into(),
                col.data_type
                    .max_length()
                    .map(|n| Value::Int(n as i32))
                    .unwrap_or(Value::Null),
            );
            col_row.insert("ordinal_position".into(), Value::Int(ordinal as i32));
            self.storage.insert_row(SYS_COLUMNS, &col_row)?;
        }

        let mut cache = self.cache.write();
        cache.tables.insert(
            table_name.to_ascii_lowercase(),
            TableMetadata {
                table_id,
                table_name: table_name.to_string(),
                created_time: created_time as i64,
                row_count: 0,
            },
        );
        cache.columns.insert(
            table_id,
            columns
                .iter()
                .enumerate()
                .map(|(ordinal, col)| ColumnMetadata {
                    table_id,
                    column_name: col.name.clone(),
                    data_type: col.data_type,
                    ordinal_position: ordinal as u32,
                    constraints: col.constraints.clone(),
                })
                .collect(),
        );
        info!(table = table_name, table_id, "registered table in catalog");
        Ok(table_id)
    }

    /// Remove a table and its columns, indexes and foreign keys from the
    /// system catalog.
    pub fn unregister_table(&self, table_name: &str) -> Result<()> {
        let Some(meta) = self.get_table_metadata(table_name) else {
            return Err(DbError::NotFound(format!("table: {table_name}")));
        };
        let table_id = meta.table_id as i32;

        self.storage.delete_where(SYS_TABLES, |row| {
            Ok(row.get("table_id") == Some(&Value::Int(table_id)))
        })?;
        self.storage.delete_where(SYS_COLUMNS, |row| {
            Ok(row.get("table_id") == Some(&Value::Int(table_id)))
        })?;
        self.storage.delete_where(SYS_INDEXES, |row| {
            Ok(row.get("table_id") == Some(&Value::Int(table_id)))
        })?;
        self.storage.delete_where(SYS_FOREIGN_KEYS, |row| {
            Ok(row.get("table_id") == Some(&Value::Int(table_id))
                || row.get("ref_table_id") == Some(&Value::Int(table_id)))
        })?;

        let mut cache = self.cache.write();
        cache.tables.remove(&table_name.to_ascii_lowercase());
        cache.columns.remove(&meta.table_id);
        cache.indexes.remove(&meta.table_id);
        cache.foreign_keys.remove(&meta.table_id);
        for fks in cache.foreign_keys.values_mut() {
            fks.retain(|fk| fk.ref_table_id != meta.table_id);
        }
        info!(table = table_name, "unregistered table from catalog");
        Ok(())
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        self.cache
            .read()
            .tables
            .contains_key(&table_name.to_ascii_lowercase())
    }

    pub fn get_table_metadata(&self, table_name: &str) -> Option<TableMetadata> {
        self.cache
            .read()
            .tables
            .get(&table_name.to_ascii_lowercase())
            .cloned()
    }

    pub(crate) fn table_name_by_id(&self, table_id: u32) -> Option<String> {
        self.cache
            .read()
            .tables
            .values()
            .find(|m| m.table_id == table_id)
            .map(|m| m.table_name.clone())
    }

    pub fn get_columns(&self, table_name: &str) -> Vec<ColumnMetadata> {
        let Some(meta) = self.get_table_metadata(table_name) else {
            return Vec::new();
        };
        self.cache
            .read()
            .columns
            .get(&meta.table_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The declared schema, rebuilt from the column cache in ordinal order.
    pub fn get_schema(&self, table_name: &str) -> Option<TableSchema> {
        let meta = self.get_table_metadata(table_name)?;
        let columns = self
            .cache
            .read()
            .columns
            .get(&meta.table_id)?
            .iter()
            .map(|c| ColumnDef {
                name: c.column_name.clone(),
                data_type: c.data_type,
                constraints: c.constraints.clone(),
            })
            .collect();
        Some(TableSchema::new(meta.table_name, columns))
    }

    pub fn column_exists(&self, table_name: &str, column_name: &str) -> bool {
        self.get_columns(table_name)
            .iter()
            .any(|c| c.column_name.eq_ignore_ascii_case(column_name))
    }

    pub fn column_type(&self, table_name: &str, column_name: &str) -> Option<DataType> {
        self.get_columns(table_name)
            .iter()
            .find(|c| c.column_name.eq_ignore_ascii_case(column_name))
            .map(|c| c.data_type)
    }

    /// User tables only, in registration order.
    pub fn list_user_tables(&self) -> Vec<String> {
        let cache = self.cache.read();
        let mut tables: Vec<&TableMetadata> = cache
            .tables
            .values()
            .filter(|m| !is_system_table(&m.table_name))
            .collect();
        tables.sort_by_key(|m| m.table_id);
        tables.iter().map(|m| m.table_name.clone()).collect()
    }

    pub fn get_indexes(&self, table_name: &str) -> Vec<IndexMetadata> {
        let Some(meta) = self.get_table_metadata(table_name) else {
            return Vec::new();
        };
        self.cache
            .read()
            .indexes
            .get(&meta.table_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Registration stub: indexes are recorded in the catalog; no runtime
    /// access path exists.
    pub fn register_index(
        &self,
        table_name: &str,
        index_name: &str,
        column_name: &str,
        index_type: &str,
    ) -> Result<u32> {
        let meta = self
            .get_table_metadata(table_name)
            .ok_or_else(|| DbError::NotFound(format!("table: {table_name}")))?;
        if !self.column_exists(table_name, column_name) {
            return Err(DbError::NotFound(format!(
                "column: {table_name}.{column_name}"
            )));
        }

        let index_id = {
            let mut cache = self.cache.write();
            let id = cache.next_index_id;
            cache.next_index_id += 1;
            id
        };

        let mut row = Row::new();
        row.insert("index_id".into(), Value::Int(index_id as i32));
        row.insert("table_id".into(), Value::Int(meta.table_id as i32));
        row.insert("index_name".into(), Value::Str(index_name.to_string()));
        row.insert("column_name".into(), Value::Str(column_name.to_string()));
        row.insert("index_type".into(), Value::Str(index_type.to_string()));
        self.storage.insert_row(SYS_INDEXES, &row)?;

        self.cache
            .write()
            .indexes
            .entry(meta.table_id)
            .or_default()
            .push(IndexMetadata {
                index_id,
                table_id: meta.table_id,
                index_name: index_name.to_string(),
                column_name: column_name.to_string(),
                index_type: index_type.to_string(),
            });
        Ok(index_id)
    }

    /// Apply a delta to a table's cached and persisted row count.
    pub fn update_row_count(&self, table_name: &str, delta: i64) -> Result<()> {
        let Some(mut meta) = self.get_table_metadata(table_name) else {
            return Ok(());
        };
        meta.row_count += delta;

        let table_id = meta.table_id as i32;
        self.storage.delete_where(SYS_TABLES, |row| {
            Ok(row.get("table_id") == Some(&Value::Int(table_id)))
        })?;
        let mut row = Row::new();
        row.insert("table_id".into(), Value::Int(table_id));
        row.insert("table_name".into(), Value::Str(meta.table_name.clone()));
        row.insert("created_time".into(), Value::Int(meta.created_time as i32));
        row.insert("row_count".into(), Value::Int(meta.row_count as i32));
        self.storage.insert_row(SYS_TABLES, &row)?;

        self.cache
            .write()
            .tables
            .insert(meta.table_name.to_ascii_lowercase(), meta);
        Ok(())
    }
}

fn get_int(row: &Row, key: &str) -> Result<i32> {
    match row.get(key) {
        Some(Value::Int(i)) => Ok(*i),
        other => Err(DbError::Catalog(format!(
            "system table column '{key}' should be INT, got {other:?}"
        ))),
    }
}

fn get_str(row: &Row, key: &str) -> Result<String> {
    match row.get(key) {
        Some(Value::Str(s)) => Ok(s.clone()),
        other => Err(DbError::Catalog(format!(
            "system table column '{key}' should be VARCHAR, got {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EvictionPolicy;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Arc<StorageEngine>, CatalogManager) {
        let dir = tempdir().unwrap();
        let storage = Arc::new(
            StorageEngine::open_with(dir.path().to_path_buf(), 16, EvictionPolicy::Lru).unwrap(),
        );
        let catalog = CatalogManager::new(storage.clone()).unwrap();
        (dir, storage, catalog)
    }

    fn users_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", DataType::Int),
            ColumnDef::new("name", DataType::Varchar(50)),
        ]
    }

    #[test]
    fn test_bootstrap_creates_system_tables() {
        let (_dir, storage, _catalog) = setup();
        for name in SYSTEM_TABLES {
            assert!(storage.table_exists(name), "{name} missing");
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let (_dir, _storage, catalog) = setup();
        let id = catalog.register_table("users", &users_columns()).unwrap();
        assert!(id >= 1);
        assert!(catalog.table_exists("USERS"));
        assert!(catalog.column_exists("users", "NAME"));
        assert_eq!(
            catalog.column_type("users", "name"),
            Some(DataType::Varchar(50))
        );

        let schema = catalog.get_schema("users").unwrap();
        assert_eq!(schema.column_names(), vec!["id", "name"]);
        assert_eq!(catalog.list_user_tables(), vec!["users"]);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let (_dir, _storage, catalog) = setup();
        catalog.register_table("users", &users_columns()).unwrap();
        assert!(catalog.register_table("users", &users_columns()).is_err());
    }

    #[test]
    fn test_cache_rebuilds_from_system_tables() {
        let dir = tempdir().unwrap();
        {
            let storage = Arc::new(
                StorageEngine::open_with(dir.path().to_path_buf(), 16, EvictionPolicy::Lru)
                    .unwrap(),
            );
            let catalog = CatalogManager::new(storage.clone()).unwrap();
            catalog.register_table("users", &users_columns()).unwrap();
            catalog
                .register_index("users", "idx_users_id", "id", "ordered")
                .unwrap();
            storage.close().unwrap();
        }

        let storage = Arc::new(
            StorageEngine::open_with(dir.path().to_path_buf(), 16, EvictionPolicy::Lru).unwrap(),
        );
        let catalog = CatalogManager::new(storage).unwrap();
        assert!(catalog.table_exists("users"));
        let schema = catalog.get_schema("users").unwrap();
        assert_eq!(schema.columns.len(), 2);
        assert_eq!(catalog.get_indexes("users").len(), 1);
        // ids keep increasing after a restart
        let next = catalog.register_table("more", &users_columns()).unwrap();
        assert!(next > catalog.get_table_metadata("users").unwrap().table_id);
    }

    #[test]
    fn test_row_count_delta() {
        let (_dir, _storage, catalog) = setup();
        catalog.register_table("users", &users_columns()).unwrap();
        catalog.update_row_count("users", 3).unwrap();
        catalog.update_row_count("users", -1).unwrap();
        assert_eq!(catalog.get_table_metadata("users").unwrap().row_count, 2);
    }

    #[test]
    fn test_unregister_table() {
        let (_dir, storage, catalog) = setup();
        catalog.register_table("users", &users_columns()).unwrap();
        catalog.unregister_table("users").unwrap();
        assert!(!catalog.table_exists("users"));
        assert!(catalog.get_schema("users").is_none());

        // no dangling rows in the system tables
        assert!(storage.scan_all(SYS_TABLES).unwrap().is_empty());
        assert!(storage.scan_all(SYS_COLUMNS).unwrap().is_empty());
    }
}
