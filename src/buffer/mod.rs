//! Bounded page cache over the file manager.
//!
//! Keys are `(table, page_id)`. Replacement is LRU or FIFO, chosen at
//! construction; dirty pages are written back on eviction and every
//! eviction is recorded in a bounded event log for observability.

pub mod manager;

pub use manager::{BufferPool, BufferStats, EvictionEvent, EvictionReason, EVENT_LOG_CAP};
