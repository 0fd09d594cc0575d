//! HTTP request types for the chunklog server.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::Deserialize;
use serde_with::{base64::Base64, serde_as};

use crate::model::{LogUpdate, QueryRecordsRequest};

/// Body of `POST /api/v1/logs`.
#[derive(Debug, Deserialize)]
pub struct CreateLogRequest {
    pub id: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// Body of `PUT /api/v1/logs/{id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateLogRequest {
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl From<UpdateLogRequest> for LogUpdate {
    fn from(request: UpdateLogRequest) -> Self {
        LogUpdate { tags: request.tags }
    }
}

/// Query parameters of `GET /api/v1/logs`.
#[derive(Debug, Default, Deserialize)]
pub struct ListLogsParams {
    /// Condition over `logID` and `tag('name')`.
    pub condition: Option<String>,
    pub limit: Option<usize>,
}

/// Query parameters of `DELETE /api/v1/logs`.
#[derive(Debug, Deserialize)]
pub struct DeleteLogsParams {
    pub condition: String,
}

/// Body of `POST /api/v1/logs/{id}/records`. Payloads are base64 encoded.
#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendRecordsRequest {
    #[serde_as(as = "Vec<Base64>")]
    pub records: Vec<Bytes>,
    #[serde(default)]
    pub expand_ids: bool,
}

/// Query parameters of `GET /api/v1/records` and
/// `GET /api/v1/records/count`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordsParams {
    /// Comma separated log IDs.
    pub log_ids: Option<String>,
    /// Selects logs by condition instead of by ID.
    pub logs_condition: Option<String>,
    pub start_id: Option<String>,
    #[serde(default)]
    pub descending: bool,
    pub limit: Option<usize>,
    /// Condition over the records, e.g. `ctime >= '2024-01-01T00:00:00Z'`.
    pub condition: Option<String>,
}

impl RecordsParams {
    pub fn to_request(&self) -> QueryRecordsRequest {
        let log_ids = self
            .log_ids
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        QueryRecordsRequest {
            log_ids,
            logs_condition: self.logs_condition.clone(),
            start_id: self.start_id.clone().filter(|s| !s.is_empty()),
            descending: self.descending,
            limit: self.limit.unwrap_or(0),
            condition: self.condition.clone(),
        }
    }
}
