//! LRU caching in front of a catalog.
//!
//! Logs and per-log chunk lists are cached on read and dropped on every
//! write that touches them. Reads racing with a write must not re-populate
//! the cache with the pre-write value, so each write bumps a generation
//! counter and a read only caches what it fetched if no write happened
//! meanwhile.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use lru::LruCache;

use super::{ChunkCatalog, LogCatalog};
use crate::error::Result;
use crate::model::{ChunkInfo, Log, LogUpdate};

const DEFAULT_CACHE_SIZE: usize = 1000;

struct Caches {
    generation: u64,
    logs: LruCache<String, Log>,
    chunks: LruCache<String, Arc<Vec<ChunkInfo>>>,
}

pub struct CachedCatalog<C> {
    inner: C,
    caches: Mutex<Caches>,
}

impl<C> std::fmt::Debug for CachedCatalog<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let caches = self.lock();
        f.debug_struct("CachedCatalog")
            .field("logs", &caches.logs.len())
            .field("chunks", &caches.chunks.len())
            .finish()
    }
}

impl<C> CachedCatalog<C> {
    pub fn new(inner: C) -> Self {
        Self::with_capacity(inner, DEFAULT_CACHE_SIZE)
    }

    pub fn with_capacity(inner: C, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            caches: Mutex::new(Caches {
                generation: 0,
                logs: LruCache::new(capacity),
                chunks: LruCache::new(capacity),
            }),
        }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn lock(&self) -> MutexGuard<'_, Caches> {
        self.caches.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn invalidate(&self, log_id: &str, logs: bool, chunks: bool) {
        let mut caches = self.lock();
        caches.generation += 1;
        if logs {
            caches.logs.pop(log_id);
        }
        if chunks {
            caches.chunks.pop(log_id);
        }
    }
}

impl<C: ChunkCatalog> CachedCatalog<C> {
    async fn chunks(&self, log_id: &str) -> Result<Arc<Vec<ChunkInfo>>> {
        let generation = {
            let mut caches = self.lock();
            if let Some(chunks) = caches.chunks.get(log_id) {
                return Ok(chunks.clone());
            }
            caches.generation
        };
        let mut fetched = self.inner.get_chunks(log_id).await?;
        fetched.sort_by_key(|c| c.id);
        let fetched = Arc::new(fetched);
        let mut caches = self.lock();
        if caches.generation == generation {
            caches.chunks.put(log_id.to_string(), fetched.clone());
        }
        Ok(fetched)
    }
}

#[async_trait]
impl<C: ChunkCatalog> ChunkCatalog for CachedCatalog<C> {
    async fn get_last_chunk(&self, log_id: &str) -> Result<Option<ChunkInfo>> {
        Ok(self.chunks(log_id).await?.last().copied())
    }

    async fn get_chunks(&self, log_id: &str) -> Result<Vec<ChunkInfo>> {
        Ok(self.chunks(log_id).await?.as_ref().clone())
    }

    async fn upsert_chunk_infos(&self, log_id: &str, infos: &[ChunkInfo]) -> Result<()> {
        let result = self.inner.upsert_chunk_infos(log_id, infos).await;
        self.invalidate(log_id, false, true);
        result
    }

    async fn delete_chunk_infos(&self, log_id: &str) -> Result<Vec<ChunkInfo>> {
        let result = self.inner.delete_chunk_infos(log_id).await;
        self.invalidate(log_id, false, true);
        result
    }
}

#[async_trait]
impl<C: LogCatalog> LogCatalog for CachedCatalog<C> {
    async fn create_log(&self, log: Log) -> Result<Log> {
        let id = log.id.clone();
        let result = self.inner.create_log(log).await;
        self.invalidate(&id, true, false);
        result
    }

    async fn get_log(&self, log_id: &str) -> Result<Log> {
        let generation = {
            let mut caches = self.lock();
            if let Some(log) = caches.logs.get(log_id) {
                return Ok(log.clone());
            }
            caches.generation
        };
        let log = self.inner.get_log(log_id).await?;
        let mut caches = self.lock();
        if caches.generation == generation {
            caches.logs.put(log_id.to_string(), log.clone());
        }
        Ok(log)
    }

    async fn update_log(&self, log_id: &str, update: LogUpdate) -> Result<Log> {
        let result = self.inner.update_log(log_id, update).await;
        self.invalidate(log_id, true, false);
        result
    }

    async fn query_logs(&self, condition: Option<&str>, limit: usize) -> Result<Vec<Log>> {
        self.inner.query_logs(condition, limit).await
    }

    async fn delete_logs(&self, condition: &str) -> Result<Vec<String>> {
        let deleted = self.inner.delete_logs(condition).await?;
        let mut caches = self.lock();
        caches.generation += 1;
        for id in &deleted {
            caches.logs.pop(id);
            caches.chunks.pop(id);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;
    use ulid::Ulid;

    use super::*;
    use crate::catalog::InMemoryCatalog;

    /// Counts chunk list reads reaching the wrapped catalog.
    #[derive(Default)]
    struct Counting {
        inner: InMemoryCatalog,
        chunk_reads: AtomicUsize,
    }

    #[async_trait]
    impl ChunkCatalog for Counting {
        async fn get_last_chunk(&self, log_id: &str) -> Result<Option<ChunkInfo>> {
            self.inner.get_last_chunk(log_id).await
        }

        async fn get_chunks(&self, log_id: &str) -> Result<Vec<ChunkInfo>> {
            self.chunk_reads.fetch_add(1, Ordering::SeqCst);
            self.inner.get_chunks(log_id).await
        }

        async fn upsert_chunk_infos(&self, log_id: &str, infos: &[ChunkInfo]) -> Result<()> {
            self.inner.upsert_chunk_infos(log_id, infos).await
        }

        async fn delete_chunk_infos(&self, log_id: &str) -> Result<Vec<ChunkInfo>> {
            self.inner.delete_chunk_infos(log_id).await
        }
    }

    fn info(id: u128) -> ChunkInfo {
        ChunkInfo {
            id: Ulid(id),
            min: Ulid(id),
            max: Ulid(id),
            records_count: 1,
        }
    }

    #[tokio::test]
    async fn should_serve_chunks_from_cache_until_upsert() {
        // given
        let catalog = CachedCatalog::new(Counting::default());
        catalog.upsert_chunk_infos("l", &[info(1)]).await.unwrap();

        // when
        catalog.get_chunks("l").await.unwrap();
        catalog.get_last_chunk("l").await.unwrap();
        let reads_before = catalog.inner().chunk_reads.load(Ordering::SeqCst);
        catalog.upsert_chunk_infos("l", &[info(2)]).await.unwrap();
        let last = catalog.get_last_chunk("l").await.unwrap();

        // then
        assert_eq!(reads_before, 1);
        assert_eq!(catalog.inner().chunk_reads.load(Ordering::SeqCst), 2);
        assert_eq!(last, Some(info(2)));
    }

    #[tokio::test]
    async fn should_drop_cached_log_on_update_and_delete() {
        // given
        let catalog = CachedCatalog::new(InMemoryCatalog::new());
        catalog
            .create_log(Log {
                id: "a".into(),
                tags: BTreeMap::new(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            })
            .await
            .unwrap();
        catalog.get_log("a").await.unwrap();

        // when
        let updated = catalog
            .update_log(
                "a",
                LogUpdate {
                    tags: BTreeMap::from([("k".to_string(), "v".to_string())]),
                },
            )
            .await
            .unwrap();
        let read = catalog.get_log("a").await.unwrap();
        catalog.delete_logs("logID = 'a'").await.unwrap();

        // then
        assert_eq!(read, updated);
        assert!(catalog.get_log("a").await.is_err());
    }
}
