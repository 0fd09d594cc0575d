//! Bounded provider of open chunk handles.
//!
//! [`Provider::get_chunk`] first takes read or write access through the
//! [`ChunkAccessor`], then leases the open chunk from a bounded LRU cache.
//! The returned [`ChunkHandle`] gives both back when dropped. Only chunks
//! nobody holds can be evicted, so an active handle is never closed under
//! its user.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use common::{Cx, Lease, ReleasableCache};

use super::access::ChunkAccessor;
use super::chunk::{AppendOutcome, Chunk, ChunkReader};
use crate::config::ChunkConfig;
use crate::error::{Error, Result};
use crate::id::IdMinter;
use crate::model::Id;

/// How a chunk handle is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
}

/// Side channel notified after every successful chunk write, for example to
/// ship new data to a replica. It cannot fail the write.
pub trait ChunkListener: Send + Sync {
    fn on_append(&self, chunk_id: Id, outcome: &AppendOutcome);
}

pub struct Provider {
    dir: PathBuf,
    config: ChunkConfig,
    accessor: Arc<ChunkAccessor>,
    chunks: ReleasableCache<Id, Chunk>,
    listener: Option<Arc<dyn ChunkListener>>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("dir", &self.dir)
            .field("chunks", &self.chunks)
            .finish_non_exhaustive()
    }
}

impl Provider {
    pub fn new(dir: impl Into<PathBuf>, config: ChunkConfig, max_opened_chunks: usize) -> Self {
        Self {
            dir: dir.into(),
            config,
            accessor: Arc::new(ChunkAccessor::new()),
            chunks: ReleasableCache::new(max_opened_chunks),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ChunkListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn accessor(&self) -> &Arc<ChunkAccessor> {
        &self.accessor
    }

    /// Path of the file backing chunk `id`. Files are spread over
    /// subdirectories named after the last two characters of the ID.
    pub fn file_name_for(&self, id: Id) -> PathBuf {
        let name = id.to_string();
        let shard = &name[name.len() - 2..];
        self.dir.join(shard).join(format!("{name}.chunk"))
    }

    /// Acquires access to chunk `id` and returns a handle to it.
    ///
    /// With `create_if_new` an absent chunk file is created empty; otherwise
    /// an absent file is [`Error::NotExist`]. Blocks while the access mode
    /// conflicts with current holders or while the handle cache is full of
    /// held chunks.
    pub async fn get_chunk(
        &self,
        cx: &Cx,
        id: Id,
        mode: AccessMode,
        create_if_new: bool,
    ) -> Result<ChunkHandle> {
        match mode {
            AccessMode::Read => self.accessor.acquire_read(cx, id).await?,
            AccessMode::Write => self.accessor.acquire_write(cx, id).await?,
        }
        let guard = AccessGuard {
            accessor: self.accessor.clone(),
            id,
            mode,
        };

        let path = self.file_name_for(id);
        let config = &self.config;
        let lease = self
            .chunks
            .get_or_create(cx, &id, || Chunk::open(&path, id, config, create_if_new))
            .await?;

        Ok(ChunkHandle {
            lease,
            listener: self.listener.clone(),
            access: guard,
        })
    }

    /// Removes chunk `id` if it holds no records. Used to clean up a chunk
    /// created for an append that then wrote nothing. Returns whether a file
    /// was removed.
    pub fn delete_if_empty(&self, id: Id) -> Result<bool> {
        self.delete(id, true)
    }

    /// Removes chunk `id` from disk. Returns `false` without deleting when the
    /// chunk is in use.
    pub fn delete_chunk(&self, id: Id) -> Result<bool> {
        self.delete(id, false)
    }

    fn delete(&self, id: Id, only_if_empty: bool) -> Result<bool> {
        if !self.accessor.mark_deleting(id) {
            return Ok(false);
        }
        let result = self.delete_marked(id, only_if_empty);
        self.accessor.release_deleting(id);
        result
    }

    fn delete_marked(&self, id: Id, only_if_empty: bool) -> Result<bool> {
        if !self.chunks.remove(&id) {
            return Ok(false);
        }
        let path = self.file_name_for(id);
        if only_if_empty {
            match Chunk::open(&path, id, &self.config, false) {
                Ok(chunk) if chunk.is_empty() => {}
                Ok(_) => return Ok(false),
                Err(Error::NotExist(_)) => return Ok(false),
                Err(err) => return Err(err),
            }
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(chunk = %id, "deleted chunk file");
                Ok(true)
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Stops handing out chunks. Outstanding handles stay usable until
    /// dropped.
    pub fn close(&self) {
        self.accessor.shutdown();
        self.chunks.close();
    }

    #[cfg(test)]
    pub(crate) fn opened_chunks(&self) -> usize {
        self.chunks.len()
    }
}

struct AccessGuard {
    accessor: Arc<ChunkAccessor>,
    id: Id,
    mode: AccessMode,
}

impl Drop for AccessGuard {
    fn drop(&mut self) {
        match self.mode {
            AccessMode::Read => self.accessor.release_read(self.id),
            AccessMode::Write => self.accessor.release_write(self.id),
        }
    }
}

/// An open chunk with read or write access held on it.
pub struct ChunkHandle {
    // dropped before `access`, so the chunk is evictable once access ends
    lease: Lease<Id, Chunk>,
    listener: Option<Arc<dyn ChunkListener>>,
    access: AccessGuard,
}

impl ChunkHandle {
    pub fn id(&self) -> Id {
        self.lease.id()
    }

    pub fn mode(&self) -> AccessMode {
        self.access.mode
    }

    pub fn chunk(&self) -> &Chunk {
        &self.lease
    }

    /// Appends the longest prefix of `payloads` that fits. Requires write
    /// access.
    pub fn append(&self, payloads: &[Bytes], minter: &IdMinter) -> Result<AppendOutcome> {
        if self.mode() != AccessMode::Write {
            return Err(Error::Internal(format!(
                "chunk {} is not held for writing",
                self.id()
            )));
        }
        let outcome = self.lease.append(payloads, minter)?;
        if outcome.written > 0
            && let Some(listener) = &self.listener
        {
            listener.on_append(self.id(), &outcome);
        }
        Ok(outcome)
    }

    pub fn reader(&self, descending: bool) -> ChunkReader<'_> {
        self.lease.reader(descending)
    }
}
