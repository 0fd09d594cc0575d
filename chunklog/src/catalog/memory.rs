//! In-memory catalog, used by tests and single-process deployments.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use super::{ChunkCatalog, LogCatalog};
use crate::error::{Error, Result};
use crate::model::{ChunkInfo, Log, LogUpdate};
use crate::ql::{Dialect, Matcher, parse};

#[derive(Debug, Default)]
struct Tables {
    logs: BTreeMap<String, Log>,
    chunks: HashMap<String, Vec<ChunkInfo>>,
}

#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: Mutex<Tables>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn logs_matcher(condition: &str) -> Result<Matcher> {
    Matcher::compile(&parse(condition)?, &Dialect::logs())
}

#[async_trait]
impl ChunkCatalog for InMemoryCatalog {
    async fn get_last_chunk(&self, log_id: &str) -> Result<Option<ChunkInfo>> {
        Ok(self
            .lock()
            .chunks
            .get(log_id)
            .and_then(|c| c.last().copied()))
    }

    async fn get_chunks(&self, log_id: &str) -> Result<Vec<ChunkInfo>> {
        Ok(self.lock().chunks.get(log_id).cloned().unwrap_or_default())
    }

    async fn upsert_chunk_infos(&self, log_id: &str, infos: &[ChunkInfo]) -> Result<()> {
        let mut tables = self.lock();
        let chunks = tables.chunks.entry(log_id.to_string()).or_default();
        for info in infos {
            match chunks.binary_search_by_key(&info.id, |c| c.id) {
                Ok(pos) => chunks[pos] = *info,
                Err(pos) => chunks.insert(pos, *info),
            }
        }
        Ok(())
    }

    async fn delete_chunk_infos(&self, log_id: &str) -> Result<Vec<ChunkInfo>> {
        Ok(self.lock().chunks.remove(log_id).unwrap_or_default())
    }
}

#[async_trait]
impl LogCatalog for InMemoryCatalog {
    async fn create_log(&self, log: Log) -> Result<Log> {
        let mut tables = self.lock();
        if tables.logs.contains_key(&log.id) {
            return Err(Error::Invalid(format!("log {} already exists", log.id)));
        }
        tables.logs.insert(log.id.clone(), log.clone());
        Ok(log)
    }

    async fn get_log(&self, log_id: &str) -> Result<Log> {
        self.lock()
            .logs
            .get(log_id)
            .cloned()
            .ok_or_else(|| Error::NotExist(format!("log {log_id} not found")))
    }

    async fn update_log(&self, log_id: &str, update: LogUpdate) -> Result<Log> {
        let mut tables = self.lock();
        let log = tables
            .logs
            .get_mut(log_id)
            .ok_or_else(|| Error::NotExist(format!("log {log_id} not found")))?;
        log.tags = update.tags;
        log.updated_at = Utc::now();
        Ok(log.clone())
    }

    async fn query_logs(&self, condition: Option<&str>, limit: usize) -> Result<Vec<Log>> {
        let matcher = condition.map(logs_matcher).transpose()?;
        let tables = self.lock();
        let matching = tables
            .logs
            .values()
            .filter(|log| matcher.as_ref().is_none_or(|m| m.matches(*log)))
            .cloned();
        Ok(if limit == 0 {
            matching.collect()
        } else {
            matching.take(limit).collect()
        })
    }

    async fn delete_logs(&self, condition: &str) -> Result<Vec<String>> {
        let matcher = logs_matcher(condition)?;
        let mut tables = self.lock();
        let doomed: Vec<String> = tables
            .logs
            .values()
            .filter(|log| matcher.matches(*log))
            .map(|log| log.id.clone())
            .collect();
        for id in &doomed {
            tables.logs.remove(id);
        }
        Ok(doomed)
    }
}
