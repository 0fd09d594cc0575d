//! Log management and multi-log reads on top of [`LocalLog`].
//!
//! The [`Service`] is what the HTTP layer talks to. It owns the log
//! definitions in the catalog, checks that appends target existing logs and
//! merges reads over many logs into one stream ordered by record ID.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use common::Cx;
use futures::future::try_join_all;

use crate::catalog::{Catalog, ChunkCatalog, LogCatalog};
use crate::chunkfs::Provider;
use crate::config::{Config, ServiceConfig};
use crate::error::{Error, Result};
use crate::id::{IdMinter, next_id, prev_id};
use crate::logfs::LocalLog;
use crate::model::{
    AppendRequest, AppendResult, CountResult, DeleteLogsResult, Id, Log, LogId, LogUpdate,
    QueryRecordsRequest, QueryRecordsResult, QueryRequest, Record,
};

pub struct Service {
    config: ServiceConfig,
    logs: Arc<dyn LogCatalog>,
    log: LocalLog,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("config", &self.config)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl Service {
    /// Opens the store described by `config`, keeping chunk files under
    /// `config.data_dir` and metadata in `catalog`.
    pub fn open<C: Catalog + 'static>(config: &Config, catalog: Arc<C>) -> Result<Self> {
        let provider = Provider::new(
            &config.data_dir,
            config.chunk.clone(),
            config.max_opened_chunks,
        );
        Self::with_provider(config, catalog, provider)
    }

    /// Like [`open`](Self::open), with a preconfigured provider, for example
    /// one carrying a [`ChunkListener`](crate::ChunkListener).
    pub fn with_provider<C: Catalog + 'static>(
        config: &Config,
        catalog: Arc<C>,
        provider: Provider,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(provider.dir())?;
        let chunks: Arc<dyn ChunkCatalog> = catalog.clone();
        let log = LocalLog::new(
            config.log.clone(),
            Arc::new(provider),
            chunks,
            Arc::new(IdMinter::default()),
        );
        tracing::info!(data_dir = %config.data_dir.display(), "opened chunklog store");
        Ok(Self {
            config: config.service.clone(),
            logs: catalog,
            log,
        })
    }

    pub fn local_log(&self) -> &LocalLog {
        &self.log
    }

    pub async fn create_log(&self, id: &str, tags: BTreeMap<String, String>) -> Result<Log> {
        if id.trim().is_empty() {
            return Err(Error::Invalid("log id must not be empty".into()));
        }
        let now = Utc::now();
        let log = self
            .logs
            .create_log(Log {
                id: id.to_string(),
                tags,
                created_at: now,
                updated_at: now,
            })
            .await?;
        tracing::info!(log = id, "created log");
        Ok(log)
    }

    pub async fn get_log(&self, id: &str) -> Result<Log> {
        self.logs.get_log(id).await
    }

    pub async fn update_log(&self, id: &str, update: LogUpdate) -> Result<Log> {
        self.logs.update_log(id, update).await
    }

    pub async fn query_logs(&self, condition: Option<&str>, limit: usize) -> Result<Vec<Log>> {
        self.logs.query_logs(non_empty(condition), limit).await
    }

    /// Deletes the logs matching `condition` together with their records.
    pub async fn delete_logs(&self, cx: &Cx, condition: &str) -> Result<DeleteLogsResult> {
        if condition.trim().is_empty() {
            return Err(Error::Invalid("a condition is required to delete logs".into()));
        }
        let deleted = self.logs.delete_logs(condition).await?;
        for id in &deleted {
            if let Err(err) = self.log.purge(cx, id).await {
                tracing::warn!(log = %id, error = %err, "could not purge records of deleted log");
            }
        }
        tracing::info!(count = deleted.len(), "deleted logs");
        Ok(DeleteLogsResult { deleted })
    }

    pub async fn append_records(&self, cx: &Cx, request: &AppendRequest) -> Result<AppendResult> {
        self.logs.get_log(&request.log_id).await?;
        self.log.append_records(cx, request).await
    }

    /// Reads records from one or more logs as a single stream ordered by
    /// record ID. Records with equal IDs are ordered by log ID, descending
    /// queries reverse both.
    ///
    /// `next_page_id` is set when more records remain; passing it as
    /// `start_id` with otherwise the same request continues the stream.
    pub async fn query_records(
        &self,
        cx: &Cx,
        request: &QueryRecordsRequest,
    ) -> Result<QueryRecordsResult> {
        let log_ids = self.select_logs(request).await?;
        match log_ids.len() {
            0 => Ok(QueryRecordsResult::default()),
            1 => self.query_single(cx, request, &log_ids[0]).await,
            _ => self.query_merged(cx, request, log_ids).await,
        }
    }

    /// Sums [`CountResult`]s over the selected logs.
    pub async fn count_records(&self, cx: &Cx, request: &QueryRecordsRequest) -> Result<CountResult> {
        let log_ids = self.select_logs(request).await?;
        let counts = try_join_all(log_ids.iter().map(|log_id| {
            let query = per_log_query(request, log_id, 0);
            async move { self.log.count_records(cx, &query).await }
        }))
        .await?;
        Ok(counts.into_iter().fold(CountResult::default(), |mut acc, c| {
            acc += c;
            acc
        }))
    }

    /// Shuts the store down. Every later call fails with
    /// [`Error::Closed`].
    pub fn shutdown(&self) {
        self.log.shutdown();
    }

    pub fn is_closed(&self) -> bool {
        self.log.is_closed()
    }

    async fn select_logs(&self, request: &QueryRecordsRequest) -> Result<Vec<LogId>> {
        let max = self.config.max_logs_to_merge;
        let ids: Vec<LogId> = match non_empty(request.logs_condition.as_deref()) {
            Some(condition) => self
                .logs
                .query_logs(Some(condition), max + 1)
                .await?
                .into_iter()
                .map(|log| log.id)
                .collect(),
            None => {
                let mut ids = request.log_ids.clone();
                ids.sort();
                ids.dedup();
                if ids.len() <= max {
                    for id in &ids {
                        self.logs.get_log(id).await?;
                    }
                }
                ids
            }
        };
        if ids.len() > max {
            return Err(Error::Exhausted(format!(
                "the query selects more than {max} logs"
            )));
        }
        Ok(ids)
    }

    async fn query_single(
        &self,
        cx: &Cx,
        request: &QueryRecordsRequest,
        log_id: &str,
    ) -> Result<QueryRecordsResult> {
        let result = self
            .log
            .query_records(cx, &per_log_query(request, log_id, request.limit))
            .await?;
        let next_page_id = match (result.more, result.records.last()) {
            (true, Some(last)) => Some(step(last.id, request.descending)),
            _ => None,
        };
        Ok(QueryRecordsResult {
            records: result.records,
            next_page_id,
        })
    }

    async fn query_merged(
        &self,
        cx: &Cx,
        request: &QueryRecordsRequest,
        log_ids: Vec<LogId>,
    ) -> Result<QueryRecordsResult> {
        let config = self.log.config();
        let limit = self.log.effective_limit(request.limit);
        let descending = request.descending;

        let mut cursors = try_join_all(log_ids.into_iter().map(|log_id| {
            let query = per_log_query(request, &log_id, limit);
            async move {
                let page = self.log.query_records(cx, &query).await?;
                Ok::<_, Error>(Cursor {
                    query,
                    buf: page.records.into(),
                    more: page.more,
                })
            }
        }))
        .await?;

        let mut heap = BinaryHeap::with_capacity(cursors.len());
        for (idx, cursor) in cursors.iter().enumerate() {
            if let Some(head) = cursor.head(idx, descending) {
                heap.push(head);
            }
        }

        let mut records = Vec::new();
        let mut bytes = 0u64;
        let mut next_page_id = None;
        while let Some(head) = heap.pop() {
            let cursor = &mut cursors[head.cursor];
            let len = cursor.buf.front().map_or(0, |r| r.payload.len() as u64);
            if records.len() >= limit
                || (!records.is_empty() && bytes + len > config.max_bunch_size)
            {
                next_page_id = Some(head.id);
                break;
            }
            let Some(record) = cursor.buf.pop_front() else {
                continue;
            };
            bytes += len;
            if cursor.buf.is_empty() && cursor.more {
                cursor.refill(&self.log, cx, record.id, descending).await?;
            }
            records.push(record);
            if let Some(next) = cursor.head(head.cursor, descending) {
                heap.push(next);
            }
        }

        Ok(QueryRecordsResult {
            records,
            next_page_id,
        })
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.filter(|s| !s.trim().is_empty())
}

fn step(id: Id, descending: bool) -> Id {
    if descending { prev_id(id) } else { next_id(id) }
}

fn per_log_query(request: &QueryRecordsRequest, log_id: &str, limit: usize) -> QueryRequest {
    QueryRequest {
        log_id: log_id.to_string(),
        start_id: request.start_id.clone(),
        descending: request.descending,
        limit,
        condition: request.condition.clone(),
    }
}

/// Buffered page of one log taking part in a merge.
struct Cursor {
    query: QueryRequest,
    buf: VecDeque<Record>,
    more: bool,
}

impl Cursor {
    fn head(&self, cursor: usize, descending: bool) -> Option<Head> {
        self.buf.front().map(|r| Head {
            id: r.id,
            log_id: r.log_id.clone(),
            cursor,
            descending,
        })
    }

    async fn refill(&mut self, log: &LocalLog, cx: &Cx, last: Id, descending: bool) -> Result<()> {
        self.query.start_id = Some(step(last, descending).to_string());
        let page = log.query_records(cx, &self.query).await?;
        self.buf = page.records.into();
        self.more = page.more;
        Ok(())
    }
}

/// Next record of a cursor, ordered so that [`BinaryHeap::pop`] yields the
/// record that comes next in the merged stream.
#[derive(Debug, PartialEq, Eq)]
struct Head {
    id: Id,
    log_id: LogId,
    cursor: usize,
    descending: bool,
}

impl Ord for Head {
    fn cmp(&self, other: &Self) -> Ordering {
        let ord = (self.id, &self.log_id).cmp(&(other.id, &other.log_id));
        if self.descending { ord } else { ord.reverse() }
    }
}

impl PartialOrd for Head {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use tempfile::TempDir;
    use ulid::Ulid;

    use super::*;
    use crate::catalog::{CachedCatalog, InMemoryCatalog};

    struct Fixture {
        dir: TempDir,
        service: Service,
    }

    fn fixture(max_logs_to_merge: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config {
            data_dir: dir.path().join("chunks"),
            ..Config::default()
        };
        config.chunk.new_size = 4096;
        config.chunk.max_chunk_size = 8192;
        config.chunk.max_grow_increase_size = 4096;
        config.log.max_records_limit = 10;
        config.service.max_logs_to_merge = max_logs_to_merge;
        let catalog = Arc::new(CachedCatalog::new(InMemoryCatalog::new()));
        let service = Service::open(&config, catalog).unwrap();
        Fixture { dir, service }
    }

    fn tags(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    async fn append(service: &Service, log_id: &str, n: usize) -> Vec<Id> {
        service
            .append_records(
                &Cx::background(),
                &AppendRequest {
                    log_id: log_id.into(),
                    payloads: (0..n).map(|i| Bytes::from(format!("{log_id}-{i}"))).collect(),
                    expand_ids: true,
                },
            )
            .await
            .unwrap()
            .record_ids
    }

    fn across(log_ids: &[&str]) -> QueryRecordsRequest {
        QueryRecordsRequest {
            log_ids: log_ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn should_manage_log_definitions() {
        // given
        let f = fixture(10);
        f.service
            .create_log("orders", tags(&[("env", "prod")]))
            .await
            .unwrap();
        f.service.create_log("audit", tags(&[])).await.unwrap();

        // when
        let duplicate = f.service.create_log("orders", tags(&[])).await;
        let updated = f
            .service
            .update_log(
                "audit",
                LogUpdate {
                    tags: tags(&[("env", "prod")]),
                },
            )
            .await
            .unwrap();
        let prod = f
            .service
            .query_logs(Some("tag('env') = 'prod'"), 0)
            .await
            .unwrap();

        // then
        assert!(matches!(duplicate, Err(Error::Invalid(_))));
        assert_eq!(updated.tags, tags(&[("env", "prod")]));
        assert_eq!(
            prod.iter().map(|l| l.id.as_str()).collect::<Vec<_>>(),
            vec!["audit", "orders"]
        );
    }

    #[tokio::test]
    async fn should_reject_append_to_unknown_log() {
        // given
        let f = fixture(10);

        // when
        let result = f
            .service
            .append_records(
                &Cx::background(),
                &AppendRequest {
                    log_id: "ghost".into(),
                    payloads: vec![Bytes::from("x")],
                    expand_ids: false,
                },
            )
            .await;

        // then
        assert!(matches!(result, Err(Error::NotExist(_))));
    }

    #[tokio::test]
    async fn should_page_single_log_with_next_page_id() {
        // given
        let f = fixture(10);
        f.service.create_log("a", tags(&[])).await.unwrap();
        let ids = append(&f.service, "a", 15).await;
        let cx = Cx::background();

        // when
        let first = f.service.query_records(&cx, &across(&["a"])).await.unwrap();
        let second = f
            .service
            .query_records(
                &cx,
                &QueryRecordsRequest {
                    start_id: first.next_page_id.map(|id| id.to_string()),
                    ..across(&["a"])
                },
            )
            .await
            .unwrap();

        // then
        assert_eq!(first.records.len(), 10);
        assert_eq!(first.next_page_id, Some(next_id(ids[9])));
        assert_eq!(second.records.len(), 5);
        assert_eq!(second.records[0].id, ids[10]);
        assert_eq!(second.next_page_id, None);
    }

    #[tokio::test]
    async fn should_merge_logs_in_id_order() {
        // given
        let f = fixture(10);
        for id in ["a", "b", "c"] {
            f.service.create_log(id, tags(&[])).await.unwrap();
        }
        let mut all = Vec::new();
        for round in 0..4 {
            for id in ["a", "b", "c"] {
                all.extend(append(&f.service, id, round + 1).await);
            }
        }
        all.sort();
        let cx = Cx::background();

        // when
        let mut read = Vec::new();
        let mut start = None;
        loop {
            let page = f
                .service
                .query_records(
                    &cx,
                    &QueryRecordsRequest {
                        start_id: start,
                        ..across(&["c", "a", "b"])
                    },
                )
                .await
                .unwrap();
            read.extend(page.records.iter().map(|r| r.id));
            match page.next_page_id {
                Some(next) => start = Some(next.to_string()),
                None => break,
            }
        }
        let desc = f
            .service
            .query_records(
                &cx,
                &QueryRecordsRequest {
                    descending: true,
                    limit: 5,
                    ..across(&["a", "b", "c"])
                },
            )
            .await
            .unwrap();

        // then
        assert_eq!(read, all);
        let mut expected_desc = all.clone();
        expected_desc.reverse();
        expected_desc.truncate(5);
        assert_eq!(
            desc.records.iter().map(|r| r.id).collect::<Vec<_>>(),
            expected_desc
        );
        assert_eq!(desc.next_page_id, Some(all[all.len() - 6]));
    }

    #[tokio::test]
    async fn should_select_logs_by_condition_and_count() {
        // given
        let f = fixture(10);
        f.service
            .create_log("a", tags(&[("team", "x")]))
            .await
            .unwrap();
        f.service
            .create_log("b", tags(&[("team", "x")]))
            .await
            .unwrap();
        f.service
            .create_log("c", tags(&[("team", "y")]))
            .await
            .unwrap();
        append(&f.service, "a", 3).await;
        append(&f.service, "b", 4).await;
        append(&f.service, "c", 5).await;
        let request = QueryRecordsRequest {
            logs_condition: Some("tag('team') = 'x'".into()),
            ..Default::default()
        };

        // when
        let records = f
            .service
            .query_records(&Cx::background(), &request)
            .await
            .unwrap();
        let count = f
            .service
            .count_records(&Cx::background(), &request)
            .await
            .unwrap();

        // then
        assert_eq!(records.records.len(), 7);
        assert!(records.records.iter().all(|r| r.log_id != "c"));
        assert_eq!(count, CountResult { total: 7, count: 7 });
    }

    #[tokio::test]
    async fn should_refuse_to_merge_too_many_logs() {
        // given
        let f = fixture(2);
        for id in ["a", "b", "c"] {
            f.service.create_log(id, tags(&[])).await.unwrap();
        }

        // when
        let result = f
            .service
            .query_records(&Cx::background(), &across(&["a", "b", "c"]))
            .await;

        // then
        assert!(matches!(result, Err(Error::Exhausted(_))));
    }

    #[tokio::test]
    async fn should_delete_logs_with_their_records() {
        // given
        let f = fixture(10);
        f.service.create_log("a", tags(&[])).await.unwrap();
        f.service.create_log("b", tags(&[])).await.unwrap();
        append(&f.service, "a", 3).await;
        append(&f.service, "b", 3).await;
        let cx = Cx::background();

        // when
        let result = f.service.delete_logs(&cx, "logID = 'a'").await.unwrap();

        // then
        assert_eq!(result.deleted, vec!["a".to_string()]);
        assert!(matches!(f.service.get_log("a").await, Err(Error::NotExist(_))));
        let remaining = f
            .service
            .local_log()
            .count_records(
                &cx,
                &QueryRequest {
                    log_id: "a".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(remaining.total, 0);
        assert!(f.dir.path().join("chunks").exists());
    }

    #[test]
    fn should_order_heads_by_id_then_log() {
        // given
        let head = |id: u128, log: &str, descending: bool| Head {
            id: Ulid(id),
            log_id: log.into(),
            cursor: 0,
            descending,
        };

        // when
        let mut asc = BinaryHeap::from(vec![
            head(2, "a", false),
            head(1, "b", false),
            head(1, "a", false),
        ]);
        let mut desc = BinaryHeap::from(vec![
            head(1, "a", true),
            head(2, "a", true),
            head(2, "b", true),
        ]);

        // then
        let pop = |h: &mut BinaryHeap<Head>| h.pop().map(|h| (h.id.0, h.log_id));
        assert_eq!(pop(&mut asc), Some((1, "a".into())));
        assert_eq!(pop(&mut asc), Some((1, "b".into())));
        assert_eq!(pop(&mut desc), Some((2, "b".into())));
        assert_eq!(pop(&mut desc), Some((2, "a".into())));
    }
}
