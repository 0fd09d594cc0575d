//! Per-log orchestration of appends, queries and counts over chunks.
//!
//! [`LocalLog`] owns no data itself. Records live in chunk files reached
//! through the [`Provider`], and the ordered list of chunks of every log
//! lives in a [`ChunkCatalog`]. The orchestrator ties the two together:
//!
//! - appends to one log are serialized by the per-log lease's lock and
//!   fill the log's last chunk before moving on to fresh ones,
//! - queries and counts only hold the lease for admission and walk the
//!   chunks in ID order, skipping chunks a record condition rules out; a
//!   chunk being written is waited for at the chunk level,
//! - the catalog is updated once per append, after the data is durable.
//!
//! Per-log leases come from a bounded pool, so at most
//! [`LogConfig::max_locks`] logs are being worked on at any time; a call for
//! another log waits until one is released.
//!
//! If the chunk data of an append was written but the catalog could not be
//! updated, the chunk contents and the catalog disagree. The log is then
//! marked corrupted and refuses further appends until it is purged or the
//! process restarts.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use common::{Cx, Interval, Lease, OrdBasis, ReleasableCache};
use tokio::sync::Mutex as AsyncMutex;
use ulid::Ulid;

use crate::catalog::ChunkCatalog;
use crate::chunkfs::{AccessMode, AppendOutcome, Provider};
use crate::config::LogConfig;
use crate::error::{Error, Result};
use crate::id::{IdMinter, parse_id, time_of};
use crate::model::{
    AppendRequest, AppendResult, ChunkInfo, CountResult, Id, QueryRequest, QueryResult, Record,
};
use crate::ql::dialect::CTIME;
use crate::ql::{Dialect, Matcher, Op, ParamIntervalBuilder, parse};

type LogLease = Lease<String, AsyncMutex<()>>;

/// Append, query and count over the chunks of individual logs.
pub struct LocalLog {
    config: LogConfig,
    provider: Arc<Provider>,
    catalog: Arc<dyn ChunkCatalog>,
    minter: Arc<IdMinter>,
    leases: ReleasableCache<String, AsyncMutex<()>>,
    corrupted: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for LocalLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalLog")
            .field("config", &self.config)
            .field("provider", &self.provider)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl LocalLog {
    pub fn new(
        config: LogConfig,
        provider: Arc<Provider>,
        catalog: Arc<dyn ChunkCatalog>,
        minter: Arc<IdMinter>,
    ) -> Self {
        let leases = ReleasableCache::new(config.max_locks);
        Self {
            config,
            provider,
            catalog,
            minter,
            leases,
            corrupted: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<Provider> {
        &self.provider
    }

    /// Appends the payloads of `request` to its log.
    ///
    /// Payloads are written in order, filling the log's last chunk and then
    /// as many fresh chunks as needed. The first `added` payloads of the
    /// result are durable and visible to queries. When a later chunk fails
    /// after some payloads were written, the call still succeeds with the
    /// reduced count; it only fails when nothing was written.
    ///
    /// A payload too large for an empty chunk fails with
    /// [`Error::Invalid`]. A failure to record written chunks in the catalog
    /// fails with [`Error::Corruption`] and blocks further appends to the
    /// log.
    #[tracing::instrument(level = "trace", skip_all, fields(log = %request.log_id))]
    pub async fn append_records(&self, cx: &Cx, request: &AppendRequest) -> Result<AppendResult> {
        self.check_open()?;
        self.check_not_corrupted(&request.log_id)?;
        if request.payloads.is_empty() {
            return Ok(AppendResult::default());
        }

        let lease = self.lease(cx, &request.log_id).await?;
        let _exclusive = tokio::select! {
            biased;
            err = cx.done() => return Err(err.into()),
            guard = lease.lock() => guard,
        };
        self.check_not_corrupted(&request.log_id)?;

        let log_id = request.log_id.as_str();
        let mut current = self.catalog.get_last_chunk(log_id).await?;
        let mut remaining: &[Bytes] = &request.payloads;
        let mut touched: Vec<ChunkInfo> = Vec::new();
        let mut ids: Vec<Id> = Vec::new();
        let mut failure = None;

        while !remaining.is_empty() {
            let (info, fresh) = match current.take() {
                Some(info) => (info, false),
                None => (
                    ChunkInfo {
                        id: self.minter.next(),
                        min: Ulid::nil(),
                        max: Ulid::nil(),
                        records_count: 0,
                    },
                    true,
                ),
            };

            let outcome = match self.write_chunk(cx, info.id, fresh, remaining).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    if fresh {
                        self.discard_empty_chunk(info.id);
                    }
                    failure = Some(err);
                    break;
                }
            };

            if outcome.written == 0 {
                if fresh {
                    self.discard_empty_chunk(info.id);
                    failure = Some(Error::Invalid(format!(
                        "record of {} bytes does not fit into an empty chunk",
                        remaining[0].len()
                    )));
                    break;
                }
                // the last chunk is full
                continue;
            }

            touched.push(extend_info(info, &outcome));
            ids.extend_from_slice(&outcome.ids);
            remaining = &remaining[outcome.written..];
            if fresh {
                tracing::info!(log = log_id, chunk = %info.id, "started new chunk");
            }
        }

        if ids.is_empty() {
            return Err(failure.unwrap_or_else(|| {
                Error::Internal("append finished without writing or failing".into())
            }));
        }

        if let Err(err) = self.catalog.upsert_chunk_infos(log_id, &touched).await {
            tracing::error!(
                log = log_id,
                error = %err,
                written = ids.len(),
                "records are written but the catalog could not be updated, refusing further appends"
            );
            self.corrupted_set().insert(log_id.to_string());
            return Err(Error::Corruption(format!(
                "log {log_id}: chunk metadata update failed after write: {err}"
            )));
        }

        if let Some(err) = failure {
            tracing::warn!(
                log = log_id,
                error = %err,
                added = ids.len(),
                requested = request.payloads.len(),
                "append stopped early"
            );
        }

        Ok(AppendResult {
            added: ids.len(),
            record_ids: if request.expand_ids { ids } else { Vec::new() },
        })
    }

    async fn write_chunk(
        &self,
        cx: &Cx,
        id: Id,
        fresh: bool,
        payloads: &[Bytes],
    ) -> Result<AppendOutcome> {
        let handle = self
            .provider
            .get_chunk(cx, id, AccessMode::Write, fresh)
            .await?;
        handle.append(payloads, &self.minter)
    }

    fn discard_empty_chunk(&self, id: Id) {
        if let Err(err) = self.provider.delete_if_empty(id) {
            tracing::warn!(chunk = %id, error = %err, "could not remove empty chunk");
        }
    }

    /// Reads records of one log, in ID order starting from `start_id`.
    ///
    /// At most `limit` records are returned (zero or anything above
    /// [`LogConfig::max_records_limit`] means that cap), and reading also
    /// stops before the summed payload size would exceed
    /// [`LogConfig::max_bunch_size`]. At least one record is returned when
    /// one matches. `more` reports that reading stopped early and another
    /// matching record exists.
    #[tracing::instrument(level = "trace", skip_all, fields(log = %request.log_id))]
    pub async fn query_records(&self, cx: &Cx, request: &QueryRequest) -> Result<QueryResult> {
        self.check_open()?;
        let limit = self.effective_limit(request.limit);
        let start = request.start_id.as_deref().map(parse_id).transpose()?;
        let filter = RecordFilter::compile(request.condition.as_deref())?;

        // Admission only; concurrent appends are excluded per chunk.
        let _lease = self.lease(cx, &request.log_id).await?;

        let chunks = self.catalog.get_chunks(&request.log_id).await?;
        let mut result = QueryResult::default();
        let mut bytes = 0u64;

        'chunks: for (pos, info) in scan_order(&chunks, start, request.descending)
            .iter()
            .enumerate()
        {
            if !filter.may_contain(info) {
                continue;
            }
            if let Some(err) = cx.err() {
                return Err(err.into());
            }

            let handle = self
                .provider
                .get_chunk(cx, info.id, AccessMode::Read, false)
                .await?;
            let mut reader = handle.reader(request.descending);
            if pos == 0
                && let Some(start) = start
            {
                reader.set_start_id(start);
            }

            while let Some(id) = reader.peek_id() {
                let candidate = Record {
                    id,
                    log_id: request.log_id.clone(),
                    payload: Bytes::new(),
                    created_at: time_of(id),
                };
                if !filter.matches(&candidate) {
                    reader.skip_one();
                    continue;
                }
                let len = reader.peek_len().unwrap_or(0) as u64;
                if result.records.len() >= limit
                    || (!result.records.is_empty() && bytes + len > self.config.max_bunch_size)
                {
                    result.more = true;
                    break 'chunks;
                }
                let Some(raw) = reader.next() else {
                    break;
                };
                let raw = raw?;
                bytes += raw.payload.len() as u64;
                result.records.push(Record {
                    payload: raw.payload,
                    ..candidate
                });
            }
        }

        Ok(result)
    }

    /// Counts the records of one log.
    ///
    /// `total` covers the whole log. `count` covers the records from
    /// `start_id` in the requested direction that satisfy the condition;
    /// `limit` is ignored. Chunks entirely past the start position are
    /// counted from the catalog without being opened, unless a condition
    /// requires looking at their records.
    #[tracing::instrument(level = "trace", skip_all, fields(log = %request.log_id))]
    pub async fn count_records(&self, cx: &Cx, request: &QueryRequest) -> Result<CountResult> {
        self.check_open()?;
        let start = request.start_id.as_deref().map(parse_id).transpose()?;
        let filter = RecordFilter::compile(request.condition.as_deref())?;

        // Admission only; concurrent appends are excluded per chunk.
        let _lease = self.lease(cx, &request.log_id).await?;

        let chunks = self.catalog.get_chunks(&request.log_id).await?;
        let mut result = CountResult {
            total: chunks.iter().map(|c| c.records_count).sum(),
            count: 0,
        };

        for (pos, info) in scan_order(&chunks, start, request.descending)
            .iter()
            .enumerate()
        {
            let boundary = pos == 0 && start.is_some();
            if !boundary && filter.is_empty() {
                result.count += info.records_count;
                continue;
            }
            if !filter.may_contain(info) {
                continue;
            }
            if let Some(err) = cx.err() {
                return Err(err.into());
            }

            let handle = self
                .provider
                .get_chunk(cx, info.id, AccessMode::Read, false)
                .await?;
            let mut reader = handle.reader(request.descending);
            if let (true, Some(start)) = (boundary, start) {
                reader.set_start_id(start);
            }
            if filter.is_empty() {
                result.count += reader.remaining() as u64;
                continue;
            }
            while let Some(id) = reader.peek_id() {
                let candidate = Record {
                    id,
                    log_id: request.log_id.clone(),
                    payload: Bytes::new(),
                    created_at: time_of(id),
                };
                if filter.matches(&candidate) {
                    result.count += 1;
                }
                reader.skip_one();
            }
        }

        Ok(result)
    }

    /// Removes every chunk of the log, from disk and from the catalog.
    /// Chunks still held by readers are left on disk and reported in the
    /// log. Returns the number of chunk files removed.
    pub async fn purge(&self, cx: &Cx, log_id: &str) -> Result<usize> {
        self.check_open()?;
        let lease = self.lease(cx, log_id).await?;
        let _exclusive = tokio::select! {
            biased;
            err = cx.done() => return Err(err.into()),
            guard = lease.lock() => guard,
        };

        let chunks = self.catalog.delete_chunk_infos(log_id).await?;
        let mut removed = 0;
        for info in &chunks {
            match self.provider.delete_chunk(info.id) {
                Ok(true) => removed += 1,
                Ok(false) => {
                    tracing::warn!(log = log_id, chunk = %info.id, "chunk busy or missing, not removed")
                }
                Err(err) => {
                    tracing::warn!(log = log_id, chunk = %info.id, error = %err, "could not remove chunk")
                }
            }
        }
        self.corrupted_set().remove(log_id);
        tracing::info!(log = log_id, chunks = chunks.len(), removed, "purged log");
        Ok(removed)
    }

    /// Stops admitting calls. Calls that already hold a lease run to
    /// completion; everything else fails with [`Error::Closed`].
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.leases.close();
        self.provider.close();
        tracing::info!("log store shut down");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn is_corrupted(&self, log_id: &str) -> bool {
        self.corrupted_set().contains(log_id)
    }

    async fn lease(&self, cx: &Cx, log_id: &str) -> Result<LogLease> {
        self.leases
            .get_or_create(cx, &log_id.to_string(), || Ok::<_, Error>(AsyncMutex::new(())))
            .await
    }

    /// Number of records a query asking for `requested` may return.
    pub(crate) fn effective_limit(&self, requested: usize) -> usize {
        match requested {
            0 => self.config.max_records_limit,
            n => n.min(self.config.max_records_limit),
        }
    }

    fn check_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn check_not_corrupted(&self, log_id: &str) -> Result<()> {
        if self.is_corrupted(log_id) {
            return Err(Error::Corruption(format!(
                "log {log_id} is corrupted and accepts no more records"
            )));
        }
        Ok(())
    }

    fn corrupted_set(&self) -> MutexGuard<'_, HashSet<String>> {
        self.corrupted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn extend_info(mut info: ChunkInfo, outcome: &AppendOutcome) -> ChunkInfo {
    if info.records_count == 0
        && let Some(first) = outcome.first_id()
    {
        info.min = first;
    }
    if let Some(last) = outcome.last_id() {
        info.max = last;
    }
    info.records_count += outcome.written as u64;
    info
}

/// Chunks to visit, in visiting order, for a scan starting at `start`.
///
/// Ascending scans begin at the first chunk whose last record is not below
/// `start`; descending scans at the last chunk whose first record is not
/// above it.
fn scan_order(chunks: &[ChunkInfo], start: Option<Id>, descending: bool) -> Vec<ChunkInfo> {
    if descending {
        let end = match start {
            Some(start) => chunks.partition_point(|c| c.min <= start),
            None => chunks.len(),
        };
        chunks[..end].iter().rev().copied().collect()
    } else {
        let begin = match start {
            Some(start) => chunks.partition_point(|c| c.max < start),
            None => 0,
        };
        chunks[begin..].to_vec()
    }
}

/// A compiled record condition: an exact matcher plus the creation time
/// intervals used to skip whole chunks.
#[derive(Debug, Default)]
struct RecordFilter {
    inner: Option<(Matcher, Vec<Interval<DateTime<Utc>>>)>,
}

impl RecordFilter {
    fn compile(condition: Option<&str>) -> Result<Self> {
        let Some(condition) = condition.filter(|c| !c.trim().is_empty()) else {
            return Ok(Self::default());
        };
        let expr = parse(condition)?;
        let dialect = Dialect::records();
        let matcher = Matcher::compile(&expr, &dialect)?;
        let times =
            ParamIntervalBuilder::new(OrdBasis::timestamps(), &dialect, CTIME, &Op::ALL)
                .build(&expr)?;
        Ok(Self {
            inner: Some((matcher, times)),
        })
    }

    fn is_empty(&self) -> bool {
        self.inner.is_none()
    }

    fn may_contain(&self, info: &ChunkInfo) -> bool {
        match &self.inner {
            None => true,
            Some((_, times)) => {
                let (lo, hi) = (time_of(info.min), time_of(info.max));
                times.iter().any(|i| i.overlaps_closed(&lo, &hi))
            }
        }
    }

    fn matches(&self, record: &Record) -> bool {
        match &self.inner {
            None => true,
            Some((matcher, _)) => matcher.matches(record),
        }
    }
}
