use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::buffer::{BufferPool, BufferStats};
use crate::error::{DbError, Result};
use crate::storage::disk::FileManager;
use crate::storage::page::{PageId, SlotId, PAGE_HEADER_SIZE, PAGE_SIZE, SLOT_SIZE};
use crate::storage::serdes::{decode_row, encode_row};
use crate::storage::types::{Row, TableSchema};
use crate::{Config, EvictionPolicy};

const METADATA_FILE: &str = "tables_metadata.json";

/// Per-table bookkeeping persisted in the advisory sidecar. The catalog is
/// authoritative for schemas; this exists for quick startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: TableSchema,
    pub total_rows: u64,
    pub total_pages: u32,
    pub created_time: i64,
    pub last_modified: i64,
}

#[derive(Debug, Clone)]
pub struct StorageStats {
    pub total_tables: usize,
    pub total_rows: u64,
    pub buffer: BufferStats,
}

/// Binds pages, files, the buffer pool and the record codec into table-level
/// operations. Owns its file manager and buffer pool exclusively.
pub struct StorageEngine {
    data_dir: PathBuf,
    file_manager: Arc<FileManager>,
    buffer_pool: BufferPool,
    tables: RwLock<HashMap<String, TableInfo>>,
    metadata_path: PathBuf,
}

impl StorageEngine {
    pub fn open(config: &Config) -> Result<Self> {
        Self::open_with(
            config.data_dir.clone(),
            config.buffer_capacity,
            config.buffer_policy,
        )
    }

    pub fn open_with(
        data_dir: PathBuf,
        buffer_capacity: usize,
        policy: EvictionPolicy,
    ) -> Result<Self> {
        let file_manager = Arc::new(FileManager::new(&data_dir)?);
        let buffer_pool = BufferPool::new(file_manager.clone(), buffer_capacity, policy);
        let metadata_path = data_dir.join(METADATA_FILE);

        let engine = Self {
            data_dir,
            file_manager,
            buffer_pool,
            tables: RwLock::new(HashMap::new()),
            metadata_path,
        };
        engine.load_metadata()?;
        info!(
            data_dir = %engine.data_dir.display(),
            capacity = buffer_capacity,
            ?policy,
            "storage engine opened"
        );
        Ok(engine)
    }

    fn load_metadata(&self) -> Result<()> {
        if !self.metadata_path.exists() {
            return Ok(());
        }
        let raw = std::fs::read_to_string(&self.metadata_path)?;
        let parsed: HashMap<String, TableInfo> = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "metadata sidecar unreadable, ignoring");
                return Ok(());
            }
        };
        let mut tables = self.tables.write();
        for (name, info) in parsed {
            if self.file_manager.table_exists(&info.schema.name) {
                tables.insert(name, info);
            } else {
                warn!(table = %name, "sidecar lists a table with no file, skipping");
            }
        }
        Ok(())
    }

    fn save_metadata(&self) -> Result<()> {
        let tables = self.tables.read();
        let json = serde_json::to_string_pretty(&*tables)?;
        std::fs::write(&self.metadata_path, json)?;
        Ok(())
    }

    fn key(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    /// Declared table name for a case-insensitive lookup.
    fn resolve_name(&self, table: &str) -> Result<String> {
        let tables = self.tables.read();
        tables
            .get(&Self::key(table))
            .map(|info| info.schema.name.clone())
            .ok_or_else(|| DbError::NotFound(format!("table: {table}")))
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.tables.read().contains_key(&Self::key(table))
    }

    pub fn get_table_info(&self, table: &str) -> Option<TableInfo> {
        self.tables.read().get(&Self::key(table)).cloned()
    }

    pub fn get_schema(&self, table: &str) -> Result<TableSchema> {
        self.tables
            .read()
            .get(&Self::key(table))
            .map(|info| info.schema.clone())
            .ok_or_else(|| DbError::NotFound(format!("table: {table}")))
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.tables
            .read()
            .values()
            .map(|info| info.schema.name.clone())
            .collect()
    }

    pub fn create_table(&self, schema: TableSchema) -> Result<()> {
        if self.table_exists(&schema.name) {
            return Err(DbError::AlreadyExists(format!("table: {}", schema.name)));
        }
        for (i, col) in schema.columns.iter().enumerate() {
            if schema.columns[..i]
                .iter()
                .any(|other| other.name.eq_ignore_ascii_case(&col.name))
            {
                return Err(DbError::InvalidInput(format!(
                    "duplicate column name: {}",
                    col.name
                )));
            }
        }

        self.file_manager.create_table_file(&schema.name)?;
        let now = Utc::now().timestamp();
        let name = schema.name.clone();
        self.tables.write().insert(
            Self::key(&name),
            TableInfo {
                schema,
                total_rows: 0,
                total_pages: 0,
                created_time: now,
                last_modified: now,
            },
        );
        self.save_metadata()?;
        info!(table = %name, "created table");
        Ok(())
    }

    pub fn drop_table(&self, table: &str) -> Result<()> {
        let name = self.resolve_name(table)?;
        self.buffer_pool.evict_table_pages(&name)?;
        self.file_manager.delete_table_file(&name)?;
        self.tables.write().remove(&Self::key(&name));
        self.save_metadata()?;
        info!(table = %name, "dropped table");
        Ok(())
    }

    /// Insert a row: first data page with room wins, otherwise a fresh page
    /// is allocated. The hosting page goes back through the buffer dirty.
    pub fn insert_row(&self, table: &str, row: &Row) -> Result<()> {
        let name = self.resolve_name(table)?;
        let schema = self.get_schema(&name)?;
        let record = encode_row(row, &schema)?;
        self.insert_record(&name, &record)?;

        let mut tables = self.tables.write();
        if let Some(info) = tables.get_mut(&Self::key(&name)) {
            info.total_rows += 1;
            info.last_modified = Utc::now().timestamp();
        }
        drop(tables);
        self.save_metadata()?;
        Ok(())
    }

    fn insert_record(&self, table: &str, record: &[u8]) -> Result<(PageId, SlotId)> {
        if record.len() + SLOT_SIZE > PAGE_SIZE - PAGE_HEADER_SIZE {
            return Err(DbError::Storage(format!(
                "record of {} bytes cannot fit in a page",
                record.len()
            )));
        }

        for page_id in self.file_manager.data_page_ids(table)? {
            let mut page = self.buffer_pool.get_page(table, page_id)?;
            if let Some(slot_id) = page.insert(record)? {
                self.buffer_pool.put_page(table, page, true)?;
                return Ok((page_id, slot_id));
            }
        }

        let page_id = self.file_manager.allocate_new_page(table)?;
        let mut page = self.buffer_pool.get_page(table, page_id)?;
        let slot_id = page
            .insert(record)?
            .expect("fresh page must accept a page-sized record");
        self.buffer_pool.put_page(table, page, true)?;

        if let Some(info) = self.tables.write().get_mut(&Self::key(table)) {
            info.total_pages += 1;
        }
        debug!(table, page_id, slot_id, "record placed on new page");
        Ok((page_id, slot_id))
    }

    /// Lazy full-table scan in ascending page, then ascending slot order.
    /// An empty table yields nothing without touching the buffer.
    pub fn seq_scan(&self, table: &str) -> Result<SeqScan<'_>> {
        let name = self.resolve_name(table)?;
        let schema = self.get_schema(&name)?;
        let page_ids = self.file_manager.data_page_ids(&name)?;
        Ok(SeqScan {
            engine: self,
            table: name,
            schema,
            page_ids: page_ids.into_iter(),
            current: VecDeque::new(),
            done: false,
        })
    }

    /// Materialized scan, for callers that need the whole table anyway.
    pub fn scan_all(&self, table: &str) -> Result<Vec<Row>> {
        self.seq_scan(table)?.collect()
    }

    /// Tombstone every live record matching the predicate. A page is marked
    /// dirty only when one of its slots changed.
    pub fn delete_where(
        &self,
        table: &str,
        mut predicate: impl FnMut(&Row) -> Result<bool>,
    ) -> Result<u64> {
        let name = self.resolve_name(table)?;
        let schema = self.get_schema(&name)?;
        let mut deleted = 0u64;

        for page_id in self.file_manager.data_page_ids(&name)? {
            let mut page = self.buffer_pool.get_page(&name, page_id)?;
            let mut page_modified = false;

            for slot_id in 0..page.slot_count() {
                if page.is_deleted(slot_id) {
                    continue;
                }
                let row = decode_row(page.read(slot_id)?, &schema)?;
                if predicate(&row)? {
                    page.delete(slot_id)?;
                    deleted += 1;
                    page_modified = true;
                }
            }
            if page_modified {
                self.buffer_pool.put_page(&name, page, true)?;
            }
        }

        if deleted > 0 {
            let mut tables = self.tables.write();
            if let Some(info) = tables.get_mut(&Self::key(&name)) {
                info.total_rows = info.total_rows.saturating_sub(deleted);
                info.last_modified = Utc::now().timestamp();
            }
            drop(tables);
            self.save_metadata()?;
        }
        Ok(deleted)
    }

    /// Rewrite every matching row: tombstone the old slot, re-insert the
    /// transformed record into the same page when it fits, otherwise any
    /// other page or a freshly allocated one. Each match counts once even
    /// when the row migrates.
    pub fn update_where(
        &self,
        table: &str,
        mut predicate: impl FnMut(&Row) -> Result<bool>,
        mut transform: impl FnMut(&Row) -> Result<Row>,
    ) -> Result<u64> {
        let name = self.resolve_name(table)?;
        let schema = self.get_schema(&name)?;
        let mut updated = 0u64;
        let mut overflow: Vec<Vec<u8>> = Vec::new();

        for page_id in self.file_manager.data_page_ids(&name)? {
            let mut page = self.buffer_pool.get_page(&name, page_id)?;
            let mut page_modified = false;
            // snapshot: migrated records appended below get fresh slot ids
            let slots_before = page.slot_count();

            for slot_id in 0..slots_before {
                if page.is_deleted(slot_id) {
                    continue;
                }
                let row = decode_row(page.read(slot_id)?, &schema)?;
                if !predicate(&row)? {
                    continue;
                }
                let new_row = transform(&row)?;
                let record = encode_row(&new_row, &schema)?;

                page.delete(slot_id)?;
                page_modified = true;
                if page.insert(&record)?.is_none() {
                    overflow.push(record);
                }
                updated += 1;
            }
            if page_modified {
                self.buffer_pool.put_page(&name, page, true)?;
            }
        }

        for record in overflow {
            self.insert_record(&name, &record)?;
        }

        if updated > 0 {
            let mut tables = self.tables.write();
            if let Some(info) = tables.get_mut(&Self::key(&name)) {
                info.last_modified = Utc::now().timestamp();
            }
            drop(tables);
            self.save_metadata()?;
        }
        Ok(updated)
    }

    pub fn buffer_stats(&self) -> BufferStats {
        self.buffer_pool.stats()
    }

    pub fn buffer_pool(&self) -> &BufferPool {
        &self.buffer_pool
    }

    pub fn stats(&self) -> StorageStats {
        let tables = self.tables.read();
        StorageStats {
            total_tables: tables.len(),
            total_rows: tables.values().map(|info| info.total_rows).sum(),
            buffer: self.buffer_pool.stats(),
        }
    }

    pub fn flush_all(&self) -> Result<()> {
        self.buffer_pool.flush_dirty(None)?;
        self.save_metadata()
    }

    pub fn close(&self) -> Result<()> {
        info!("closing storage engine");
        self.save_metadata()?;
        self.buffer_pool.close()?;
        self.file_manager.close_all();
        Ok(())
    }
}

/// Pull-model scan: pages are fetched through the buffer one at a time and
/// their live records drained in slot order.
pub struct SeqScan<'a> {
    engine: &'a StorageEngine,
    table: String,
    schema: TableSchema,
    page_ids: std::vec::IntoIter<PageId>,
    current: VecDeque<Row>,
    done: bool,
}

impl Iterator for SeqScan<'_> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            if let Some(row) = self.current.pop_front() {
                return Some(Ok(row));
            }
            let page_id = self.page_ids.next()?;
            let page = match self.engine.buffer_pool.get_page(&self.table, page_id) {
                Ok(page) => page,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            for (_, record) in page.live_records() {
                match decode_row(record, &self.schema) {
                    Ok(row) => self.current.push_back(row),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e));
                    }
                }
            }
        }
    }
}
