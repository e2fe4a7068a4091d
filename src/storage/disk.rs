use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{DbError, Result};
use crate::storage::page::{PageId, SlottedPage, PAGE_SIZE};

pub const FILE_MAGIC: &[u8; 4] = b"MTBL";
pub const FILE_VERSION: u32 = 1;
pub const TABLE_NAME_SIZE: usize = 64;
/// magic(4) + version(4) + name(64) + page_count(4) + next_page_id(4)
const HEADER_CORE_SIZE: usize = 80;

/// Header page 0 of a table file. Always written as a full 4 KiB page.
#[derive(Debug, Clone)]
pub struct FileHeader {
    pub table_name: String,
    /// Total pages including this header page.
    pub page_count: u32,
    /// Monotonically increasing; never reused.
    pub next_page_id: u32,
}

impl FileHeader {
    pub fn new(table_name: &str) -> Result<Self> {
        if table_name.len() > TABLE_NAME_SIZE - 1 {
            return Err(DbError::InvalidInput(format!(
                "table name exceeds {} bytes",
                TABLE_NAME_SIZE - 1
            )));
        }
        Ok(Self {
            table_name: table_name.to_string(),
            page_count: 1,
            next_page_id: 1,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_SIZE];
        buf[0..4].copy_from_slice(FILE_MAGIC);
        buf[4..8].copy_from_slice(&FILE_VERSION.to_le_bytes());
        let name = self.table_name.as_bytes();
        buf[8..8 + name.len()].copy_from_slice(name);
        buf[72..76].copy_from_slice(&self.page_count.to_le_bytes());
        buf[76..80].copy_from_slice(&self.next_page_id.to_le_bytes());
        buf
    }

    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() < HEADER_CORE_SIZE {
            return Err(DbError::Corruption("file header truncated".into()));
        }
        if &raw[0..4] != FILE_MAGIC {
            return Err(DbError::Corruption(format!(
                "invalid file magic: {:02X?}",
                &raw[0..4]
            )));
        }
        let name_bytes = &raw[8..8 + TABLE_NAME_SIZE];
        let end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(TABLE_NAME_SIZE);
        let table_name = String::from_utf8(name_bytes[..end].to_vec())
            .map_err(|_| DbError::Corruption("table name is not valid UTF-8".into()))?;
        let page_count = u32::from_le_bytes([raw[72], raw[73], raw[74], raw[75]]);
        let next_page_id = u32::from_le_bytes([raw[76], raw[77], raw[78], raw[79]]);
        Ok(Self {
            table_name,
            page_count,
            next_page_id,
        })
    }
}

/// Per-table paged files under a data directory, one `<table>.tbl` each.
/// Handles are opened lazily and kept for the manager's lifetime; all file
/// operations are serialized behind one lock.
pub struct FileManager {
    data_dir: PathBuf,
    handles: Mutex<HashMap<String, File>>,
}

impl FileManager {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;
        Ok(Self {
            data_dir,
            handles: Mutex::new(HashMap::new()),
        })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.data_dir.join(format!("{table}.tbl"))
    }

    pub fn table_exists(&self, table: &str) -> bool {
        self.table_path(table).exists()
    }

    pub fn create_table_file(&self, table: &str) -> Result<()> {
        let path = self.table_path(table);
        if path.exists() {
            return Err(DbError::AlreadyExists(format!("table file: {table}")));
        }
        let header = FileHeader::new(table)?;
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        file.write_all(&header.to_bytes())?;
        file.flush()?;
        self.handles.lock().insert(table.to_string(), file);
        debug!(table, path = %path.display(), "created table file");
        Ok(())
    }

    pub fn delete_table_file(&self, table: &str) -> Result<()> {
        let path = self.table_path(table);
        if !path.exists() {
            return Err(DbError::NotFound(format!("table file: {table}")));
        }
        self.handles.lock().remove(table);
        std::fs::remove_file(&path)?;
        debug!(table, "deleted table file");
        Ok(())
    }

    fn with_file<T>(&self, table: &str, f: impl FnOnce(&mut File) -> Result<T>) -> Result<T> {
        let mut handles = self.handles.lock();
        if !handles.contains_key(table) {
            let path = self.table_path(table);
            if !path.exists() {
                return Err(DbError::NotFound(format!("table file: {table}")));
            }
            let file = OpenOptions::new().read(true).write(true).open(&path)?;
            handles.insert(table.to_string(), file);
        }
        f(handles.get_mut(table).expect("handle just inserted"))
    }

    pub fn read_header(&self, table: &str) -> Result<FileHeader> {
        self.with_file(table, |file| {
            let mut buf = vec![0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            FileHeader::from_bytes(&buf)
        })
    }

    fn write_header(&self, table: &str, header: &FileHeader) -> Result<()> {
        self.with_file(table, |file| {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&header.to_bytes())?;
            file.flush()?;
            Ok(())
        })
    }

    /// Read a data page. Page 0 is the file header and is never exposed.
    pub fn read_page(&self, table: &str, page_id: PageId) -> Result<SlottedPage> {
        if page_id == 0 {
            return Err(DbError::Storage(
                "page 0 is the file header, not a data page".into(),
            ));
        }
        self.with_file(table, |file| {
            let mut buf = vec![0u8; PAGE_SIZE];
            file.seek(SeekFrom::Start(page_id as u64 * PAGE_SIZE as u64))?;
            file.read_exact(&mut buf).map_err(|e| {
                DbError::Storage(format!("short read of page {page_id} in {table}: {e}"))
            })?;
            SlottedPage::from_bytes(page_id, &buf)
        })
    }

    /// Write a data page at its positional offset and flush to OS buffers.
    pub fn write_page(&self, table: &str, page: &SlottedPage) -> Result<()> {
        if page.page_id == 0 {
            return Err(DbError::Storage(
                "page 0 is the file header, not a data page".into(),
            ));
        }
        self.with_file(table, |file| {
            file.seek(SeekFrom::Start(page.page_id as u64 * PAGE_SIZE as u64))?;
            file.write_all(page.to_bytes())?;
            file.flush()?;
            Ok(())
        })
    }

    /// Allocate a fresh data page: bump the header (one 4 KiB write) before
    /// the new id is handed out, then write the empty page.
    pub fn allocate_new_page(&self, table: &str) -> Result<PageId> {
        let mut header = self.read_header(table)?;
        let new_page_id = header.next_page_id;
        header.next_page_id += 1;
        header.page_count += 1;
        self.write_header(table, &header)?;

        let page = SlottedPage::new(new_page_id);
        self.write_page(table, &page)?;
        debug!(table, page_id = new_page_id, "allocated data page");
        Ok(new_page_id)
    }

    /// All data page ids, ascending. Page 0 is skipped.
    pub fn data_page_ids(&self, table: &str) -> Result<Vec<PageId>> {
        let header = self.read_header(table)?;
        Ok((1..header.page_count).collect())
    }

    pub fn close_table(&self, table: &str) {
        self.handles.lock().remove(table);
    }

    pub fn close_all(&self) {
        self.handles.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_header_round_trip() {
        let header = FileHeader::new("students").unwrap();
        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), PAGE_SIZE);
        let parsed = FileHeader::from_bytes(&bytes).unwrap();
        assert_eq!(parsed.table_name, "students");
        assert_eq!(parsed.page_count, 1);
        assert_eq!(parsed.next_page_id, 1);
    }

    #[test]
    fn test_create_and_allocate() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();

        fm.create_table_file("t").unwrap();
        assert!(fm.table_exists("t"));
        assert!(fm.create_table_file("t").is_err());
        assert!(fm.data_page_ids("t").unwrap().is_empty());

        let p1 = fm.allocate_new_page("t").unwrap();
        let p2 = fm.allocate_new_page("t").unwrap();
        assert_eq!((p1, p2), (1, 2));
        assert_eq!(fm.data_page_ids("t").unwrap(), vec![1, 2]);

        let header = fm.read_header("t").unwrap();
        assert_eq!(header.page_count, 3);
        assert_eq!(header.next_page_id, 3);
    }

    #[test]
    fn test_page_write_read() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        fm.create_table_file("t").unwrap();
        let pid = fm.allocate_new_page("t").unwrap();

        let mut page = fm.read_page("t", pid).unwrap();
        page.insert(b"payload").unwrap().unwrap();
        fm.write_page("t", &page).unwrap();

        let reread = fm.read_page("t", pid).unwrap();
        assert_eq!(reread.read(0).unwrap(), b"payload");
    }

    #[test]
    fn test_page_zero_is_protected() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        fm.create_table_file("t").unwrap();
        assert!(fm.read_page("t", 0).is_err());
        assert!(fm.write_page("t", &SlottedPage::new(0)).is_err());
    }

    #[test]
    fn test_delete_table_file() {
        let dir = tempdir().unwrap();
        let fm = FileManager::new(dir.path()).unwrap();
        fm.create_table_file("gone").unwrap();
        fm.delete_table_file("gone").unwrap();
        assert!(!fm.table_exists("gone"));
        assert!(fm.read_header("gone").is_err());
    }
}
