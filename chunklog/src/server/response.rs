//! HTTP response types for the chunklog server.
//!
//! Every successful response carries `"status": "success"`. Record payloads
//! are base64 encoded.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_with::{base64::Base64, serde_as};

use crate::model::{AppendResult, CountResult, Log, QueryRecordsResult, Record};

const SUCCESS: &str = "success";

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogView {
    pub id: String,
    pub tags: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Log> for LogView {
    fn from(log: Log) -> Self {
        Self {
            id: log.id,
            tags: log.tags,
            created_at: log.created_at,
            updated_at: log.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogResponse {
    pub status: &'static str,
    pub log: LogView,
}

impl LogResponse {
    pub fn success(log: Log) -> Self {
        Self {
            status: SUCCESS,
            log: log.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub status: &'static str,
    pub logs: Vec<LogView>,
}

impl LogsResponse {
    pub fn success(logs: Vec<Log>) -> Self {
        Self {
            status: SUCCESS,
            logs: logs.into_iter().map(LogView::from).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeleteLogsResponse {
    pub status: &'static str,
    pub deleted: Vec<String>,
}

impl DeleteLogsResponse {
    pub fn success(deleted: Vec<String>) -> Self {
        Self {
            status: SUCCESS,
            deleted,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponse {
    pub status: &'static str,
    pub added: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub record_ids: Vec<String>,
}

impl AppendResponse {
    pub fn success(result: AppendResult) -> Self {
        Self {
            status: SUCCESS,
            added: result.added,
            record_ids: result.record_ids.iter().map(|id| id.to_string()).collect(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordView {
    pub id: String,
    pub log_id: String,
    #[serde_as(as = "Base64")]
    pub payload: Bytes,
    pub created_at: DateTime<Utc>,
}

impl From<Record> for RecordView {
    fn from(record: Record) -> Self {
        Self {
            id: record.id.to_string(),
            log_id: record.log_id,
            payload: record.payload,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsResponse {
    pub status: &'static str,
    pub records: Vec<RecordView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_id: Option<String>,
}

impl RecordsResponse {
    pub fn success(result: QueryRecordsResult) -> Self {
        Self {
            status: SUCCESS,
            records: result.records.into_iter().map(RecordView::from).collect(),
            next_page_id: result.next_page_id.map(|id| id.to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub status: &'static str,
    pub total: u64,
    pub count: u64,
}

impl CountResponse {
    pub fn success(result: CountResult) -> Self {
        Self {
            status: SUCCESS,
            total: result.total,
            count: result.count,
        }
    }
}
