//! Metadata catalog for logs and their chunks.
//!
//! The store keeps record data in chunk files and everything else here: the
//! logs themselves and, per log, the ordered list of [`ChunkInfo`]s. The
//! catalog is consumed through two traits so it can be backed by any
//! database; [`InMemoryCatalog`] implements both, and [`CachedCatalog`]
//! fronts any implementation with LRU caches.

mod cached;
mod memory;

use async_trait::async_trait;

pub use cached::CachedCatalog;
pub use memory::InMemoryCatalog;

use crate::error::Result;
use crate::model::{ChunkInfo, Log, LogUpdate};

/// Chunk metadata per log.
#[async_trait]
pub trait ChunkCatalog: Send + Sync {
    /// The chunk with the highest ID, or `None` for a log without chunks.
    async fn get_last_chunk(&self, log_id: &str) -> Result<Option<ChunkInfo>>;

    /// All chunks of the log, ordered by ID.
    async fn get_chunks(&self, log_id: &str) -> Result<Vec<ChunkInfo>>;

    /// Inserts or replaces (by chunk ID) the given descriptors.
    async fn upsert_chunk_infos(&self, log_id: &str, infos: &[ChunkInfo]) -> Result<()>;

    /// Removes every chunk descriptor of the log, returning what was removed.
    async fn delete_chunk_infos(&self, log_id: &str) -> Result<Vec<ChunkInfo>>;
}

/// Log definitions.
#[async_trait]
pub trait LogCatalog: Send + Sync {
    /// Stores a new log. Fails with `Invalid` if the ID is taken.
    async fn create_log(&self, log: Log) -> Result<Log>;

    /// Fails with `NotExist` for an unknown ID.
    async fn get_log(&self, log_id: &str) -> Result<Log>;

    async fn update_log(&self, log_id: &str, update: LogUpdate) -> Result<Log>;

    /// Logs matching `condition` (all logs when `None`), ordered by ID, at
    /// most `limit` of them when `limit` is non-zero.
    async fn query_logs(&self, condition: Option<&str>, limit: usize) -> Result<Vec<Log>>;

    /// Removes the logs matching `condition`, returning their IDs.
    async fn delete_logs(&self, condition: &str) -> Result<Vec<String>>;
}

/// A catalog serving both logs and chunks.
pub trait Catalog: LogCatalog + ChunkCatalog {}

impl<T: LogCatalog + ChunkCatalog> Catalog for T {}
