//! Core data types for chunklog.
//!
//! This module defines the records, logs and chunk descriptors that flow
//! between the orchestrator, the catalog and the service layer, plus the
//! request and result types of the public operations.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Identifier of a record or a chunk.
///
/// IDs are ULIDs: 128-bit, lexicographically sortable and time-derived. The
/// [`IdMinter`](crate::IdMinter) guarantees that IDs minted by one process
/// strictly increase, so record order within a log is ID order.
pub type Id = Ulid;

/// Name of a log. Chosen by the client when the log is created.
pub type LogId = String;

/// A record read back from a log.
///
/// Records are immutable once written. `created_at` is the timestamp encoded
/// in the record ID.
///
/// # Example
///
/// ```ignore
/// let result = store.query_records(&cx, &query).await?;
/// for record in result.records {
///     println!("{} @ {}: {} bytes", record.id, record.created_at, record.payload.len());
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: Id,
    pub log_id: LogId,
    pub payload: Bytes,
    pub created_at: DateTime<Utc>,
}

/// Metadata of one physical chunk, as tracked by the catalog.
///
/// The chunks of a log are totally ordered by `id`, and their `[min, max]`
/// record ranges are disjoint and ascending in the same order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: Id,
    /// ID of the first record stored in the chunk.
    pub min: Id,
    /// ID of the last record stored in the chunk.
    pub max: Id,
    pub records_count: u64,
}

/// A log and its user supplied tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub id: LogId,
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Records to append to a single log.
#[derive(Debug, Clone, Default)]
pub struct AppendRequest {
    pub log_id: LogId,
    pub payloads: Vec<Bytes>,
    /// When set, the result carries the IDs assigned to the written records.
    pub expand_ids: bool,
}

/// Outcome of an append.
///
/// `added` may be smaller than the number of payloads submitted when a
/// later chunk could not be written; the first `added` payloads are durable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendResult {
    pub added: usize,
    /// IDs of the written records, only filled when `expand_ids` was set.
    pub record_ids: Vec<Id>,
}

/// A query against a single log.
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub log_id: LogId,
    /// Inclusive position to start from, as a ULID string. Reading starts at
    /// the log's first (or, descending, last) record when absent.
    pub start_id: Option<String>,
    pub descending: bool,
    /// Maximum number of records to return. Zero means the configured cap.
    pub limit: usize,
    /// Record filter, for example `ctime >= '2024-01-01T00:00:00Z'`.
    pub condition: Option<String>,
}

/// Records returned by a query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub records: Vec<Record>,
    /// True when the result was cut by the record limit or the byte budget
    /// and further matching records exist.
    pub more: bool,
}

/// Count of records in a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountResult {
    /// Every record in the log, regardless of start position or condition.
    pub total: u64,
    /// Records from the start position in the requested direction that
    /// satisfy the condition.
    pub count: u64,
}

impl std::ops::AddAssign for CountResult {
    fn add_assign(&mut self, other: Self) {
        self.total += other.total;
        self.count += other.count;
    }
}

/// A query spanning one or more logs.
#[derive(Debug, Clone, Default)]
pub struct QueryRecordsRequest {
    /// Logs to read. Ignored when `logs_condition` is set.
    pub log_ids: Vec<LogId>,
    /// Selects logs by condition, for example `tag('env') = 'prod'`.
    pub logs_condition: Option<String>,
    pub start_id: Option<String>,
    pub descending: bool,
    pub limit: usize,
    pub condition: Option<String>,
}

/// Records of a multi-log query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryRecordsResult {
    pub records: Vec<Record>,
    /// Start ID of the next page, present when more records remain.
    pub next_page_id: Option<Id>,
}

/// Changes applied by [`LogCatalog::update_log`](crate::LogCatalog::update_log).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogUpdate {
    pub tags: BTreeMap<String, String>,
}

/// Outcome of deleting logs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteLogsResult {
    pub deleted: Vec<LogId>,
}
