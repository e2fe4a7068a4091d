use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::storage::disk::FileManager;
use crate::storage::page::{PageId, SlottedPage};
use crate::EvictionPolicy;

/// Most recent eviction events kept in memory.
pub const EVENT_LOG_CAP: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    CapacityFull,
    ManualFlush,
    TableEviction,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct EvictionEvent {
    pub timestamp: DateTime<Utc>,
    pub table: String,
    pub page_id: PageId,
    pub reason: EvictionReason,
    pub was_dirty: bool,
}

#[derive(Debug, Clone)]
pub struct BufferStats {
    pub policy: EvictionPolicy,
    pub capacity: usize,
    pub cached_pages: usize,
    pub dirty_pages: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl BufferStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

type PageKey = (String, PageId);

struct PoolInner {
    /// Insertion-ordered: front is the LRU/FIFO victim.
    cache: IndexMap<PageKey, SlottedPage>,
    dirty: HashSet<PageKey>,
    hits: u64,
    misses: u64,
    evictions: u64,
    events: VecDeque<EvictionEvent>,
}

impl PoolInner {
    fn record_event(&mut self, key: &PageKey, reason: EvictionReason, was_dirty: bool) {
        if self.events.len() == EVENT_LOG_CAP {
            self.events.pop_front();
        }
        self.events.push_back(EvictionEvent {
            timestamp: Utc::now(),
            table: key.0.clone(),
            page_id: key.1,
            reason,
            was_dirty,
        });
    }
}

/// Bounded page cache. All operations are serialized by the pool's own
/// lock; a reader observes the most recent put for the same key.
pub struct BufferPool {
    file_manager: Arc<FileManager>,
    capacity: usize,
    policy: EvictionPolicy,
    inner: Mutex<PoolInner>,
}

impl BufferPool {
    pub fn new(file_manager: Arc<FileManager>, capacity: usize, policy: EvictionPolicy) -> Self {
        assert!(capacity > 0, "buffer capacity must be positive");
        Self {
            file_manager,
            capacity,
            policy,
            inner: Mutex::new(PoolInner {
                cache: IndexMap::with_capacity(capacity),
                dirty: HashSet::new(),
                hits: 0,
                misses: 0,
                evictions: 0,
                events: VecDeque::new(),
            }),
        }
    }

    /// Fetch a page, reading through the file manager on a miss. Hits
    /// refresh recency under LRU; FIFO ignores accesses.
    pub fn get_page(&self, table: &str, page_id: PageId) -> Result<SlottedPage> {
        let key = (table.to_string(), page_id);
        let mut inner = self.inner.lock();

        if inner.cache.contains_key(&key) {
            inner.hits += 1;
            if self.policy == EvictionPolicy::Lru {
                let page = inner.cache.shift_remove(&key).expect("hit key present");
                inner.cache.insert(key.clone(), page);
            }
            return Ok(inner.cache[&key].clone());
        }

        inner.misses += 1;
        let page = self.file_manager.read_page(table, page_id)?;
        self.admit(&mut inner, key, page.clone())?;
        Ok(page)
    }

    /// Put a page into the cache, optionally marking it dirty. The write
    /// reaches disk when the page is flushed or evicted.
    pub fn put_page(&self, table: &str, page: SlottedPage, mark_dirty: bool) -> Result<()> {
        let key = (table.to_string(), page.page_id);
        let mut inner = self.inner.lock();
        self.admit(&mut inner, key.clone(), page)?;
        if mark_dirty {
            inner.dirty.insert(key);
        }
        Ok(())
    }

    fn admit(&self, inner: &mut PoolInner, key: PageKey, page: SlottedPage) -> Result<()> {
        if inner.cache.len() >= self.capacity && !inner.cache.contains_key(&key) {
            self.evict_victim(inner)?;
        }
        match self.policy {
            EvictionPolicy::Lru => {
                // re-insert at the back: most recently used
                inner.cache.shift_remove(&key);
                inner.cache.insert(key, page);
            }
            EvictionPolicy::Fifo => {
                // arrival order only; an update keeps the original position
                if let Some(slot) = inner.cache.get_mut(&key) {
                    *slot = page;
                } else {
                    inner.cache.insert(key, page);
                }
            }
        }
        Ok(())
    }

    fn evict_victim(&self, inner: &mut PoolInner) -> Result<()> {
        let Some((key, page)) = inner.cache.shift_remove_index(0) else {
            return Ok(());
        };
        let was_dirty = inner.dirty.remove(&key);
        if was_dirty {
            self.file_manager.write_page(&key.0, &page)?;
        }
        inner.record_event(&key, EvictionReason::CapacityFull, was_dirty);
        inner.evictions += 1;
        debug!(table = %key.0, page_id = key.1, was_dirty, "evicted page");
        Ok(())
    }

    /// Write dirty pages back to disk. With `table` set, only that table's
    /// pages flush. Returns the number of pages written.
    pub fn flush_dirty(&self, table: Option<&str>) -> Result<usize> {
        let mut inner = self.inner.lock();
        let targets: Vec<PageKey> = inner
            .dirty
            .iter()
            .filter(|(t, _)| table.map_or(true, |name| t.as_str() == name))
            .cloned()
            .collect();

        let mut flushed = 0;
        for key in targets {
            if let Some(page) = inner.cache.get(&key) {
                self.file_manager.write_page(&key.0, page)?;
                inner.dirty.remove(&key);
                inner.record_event(&key, EvictionReason::ManualFlush, true);
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!(flushed, table = table.unwrap_or("*"), "flushed dirty pages");
        }
        Ok(flushed)
    }

    /// Drop every cached page of one table, writing dirty ones back first.
    pub fn evict_table_pages(&self, table: &str) -> Result<usize> {
        let mut inner = self.inner.lock();
        let targets: Vec<PageKey> = inner
            .cache
            .keys()
            .filter(|(t, _)| t == table)
            .cloned()
            .collect();

        for key in &targets {
            let page = inner.cache.shift_remove(key).expect("key just listed");
            let was_dirty = inner.dirty.remove(key);
            if was_dirty {
                self.file_manager.write_page(&key.0, &page)?;
            }
            inner.record_event(key, EvictionReason::TableEviction, was_dirty);
        }
        inner.evictions += targets.len() as u64;
        Ok(targets.len())
    }

    /// Flush everything and empty the cache.
    pub fn clear(&self) -> Result<()> {
        self.flush_dirty(None)?;
        let mut inner = self.inner.lock();
        inner.evictions += inner.cache.len() as u64;
        inner.cache.clear();
        inner.dirty.clear();
        Ok(())
    }

    /// Shutdown path: remaining dirty pages are written back and logged
    /// with the shutdown reason, then the cache empties.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        let targets: Vec<PageKey> = inner.dirty.iter().cloned().collect();
        for key in targets {
            if let Some(page) = inner.cache.get(&key) {
                self.file_manager.write_page(&key.0, page)?;
            }
            inner.dirty.remove(&key);
            inner.record_event(&key, EvictionReason::Shutdown, true);
        }
        inner.evictions += inner.cache.len() as u64;
        inner.cache.clear();
        Ok(())
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.inner.lock();
        BufferStats {
            policy: self.policy,
            capacity: self.capacity,
            cached_pages: inner.cache.len(),
            dirty_pages: inner.dirty.len(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        }
    }

    pub fn recent_events(&self, limit: usize) -> Vec<EvictionEvent> {
        let inner = self.inner.lock();
        let skip = inner.events.len().saturating_sub(limit);
        inner.events.iter().skip(skip).cloned().collect()
    }
}
