//! HTTP route handlers for the chunklog server.

use std::sync::Arc;
use std::time::Duration;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use common::Cx;

use super::error::ApiError;
use super::metrics::Metrics;
use super::request::{
    AppendRecordsRequest, CreateLogRequest, DeleteLogsParams, ListLogsParams, RecordsParams,
    UpdateLogRequest,
};
use super::response::{
    AppendResponse, CountResponse, DeleteLogsResponse, LogResponse, LogsResponse, RecordsResponse,
};
use crate::Error;
use crate::model::AppendRequest;
use crate::service::Service;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Service>,
    pub metrics: Arc<Metrics>,
    pub request_timeout: Duration,
}

impl AppState {
    /// Context bounding one request.
    fn cx(&self) -> Cx {
        Cx::background().with_timeout(self.request_timeout)
    }
}

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError(Error::Invalid(rejection.body_text())))
}

/// Handle POST /api/v1/logs
pub async fn handle_create_log(
    State(state): State<AppState>,
    payload: Result<Json<CreateLogRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<LogResponse>), ApiError> {
    let request = body(payload)?;
    let log = state.service.create_log(&request.id, request.tags).await?;
    Ok((StatusCode::CREATED, Json(LogResponse::success(log))))
}

/// Handle GET /api/v1/logs
pub async fn handle_list_logs(
    State(state): State<AppState>,
    Query(params): Query<ListLogsParams>,
) -> Result<Json<LogsResponse>, ApiError> {
    let logs = state
        .service
        .query_logs(params.condition.as_deref(), params.limit.unwrap_or(0))
        .await?;
    Ok(Json(LogsResponse::success(logs)))
}

/// Handle GET /api/v1/logs/{id}
pub async fn handle_get_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<LogResponse>, ApiError> {
    let log = state.service.get_log(&id).await?;
    Ok(Json(LogResponse::success(log)))
}

/// Handle PUT /api/v1/logs/{id}
pub async fn handle_update_log(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<UpdateLogRequest>, JsonRejection>,
) -> Result<Json<LogResponse>, ApiError> {
    let update = body(payload)?;
    let log = state.service.update_log(&id, update.into()).await?;
    Ok(Json(LogResponse::success(log)))
}

/// Handle DELETE /api/v1/logs
///
/// Deletes every log matching `condition` together with its records.
pub async fn handle_delete_logs(
    State(state): State<AppState>,
    Query(params): Query<DeleteLogsParams>,
) -> Result<Json<DeleteLogsResponse>, ApiError> {
    let result = state
        .service
        .delete_logs(&state.cx(), &params.condition)
        .await?;
    Ok(Json(DeleteLogsResponse::success(result.deleted)))
}

/// Handle POST /api/v1/logs/{id}/records
pub async fn handle_append(
    State(state): State<AppState>,
    Path(log_id): Path<String>,
    payload: Result<Json<AppendRecordsRequest>, JsonRejection>,
) -> Result<Json<AppendResponse>, ApiError> {
    let request = body(payload)?;
    let request = AppendRequest {
        log_id,
        payloads: request.records,
        expand_ids: request.expand_ids,
    };

    let result = state.service.append_records(&state.cx(), &request).await?;

    let bytes: usize = request
        .payloads
        .iter()
        .take(result.added)
        .map(|p| p.len())
        .sum();
    state.metrics.append_records_total.inc_by(result.added as u64);
    state.metrics.append_bytes_total.inc_by(bytes as u64);

    Ok(Json(AppendResponse::success(result)))
}

/// Handle GET /api/v1/records
pub async fn handle_query(
    State(state): State<AppState>,
    Query(params): Query<RecordsParams>,
) -> Result<Json<RecordsResponse>, ApiError> {
    let result = state
        .service
        .query_records(&state.cx(), &params.to_request())
        .await?;

    let bytes: usize = result.records.iter().map(|r| r.payload.len()).sum();
    state
        .metrics
        .records_read_total
        .inc_by(result.records.len() as u64);
    state.metrics.bytes_read_total.inc_by(bytes as u64);

    Ok(Json(RecordsResponse::success(result)))
}

/// Handle GET /api/v1/records/count
pub async fn handle_count(
    State(state): State<AppState>,
    Query(params): Query<RecordsParams>,
) -> Result<Json<CountResponse>, ApiError> {
    let result = state
        .service
        .count_records(&state.cx(), &params.to_request())
        .await?;
    Ok(Json(CountResponse::success(result)))
}

/// Handle GET /metrics
pub async fn handle_metrics(State(state): State<AppState>) -> String {
    state.metrics.encode()
}

/// Handle GET /-/healthy
pub async fn handle_healthy() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Handle GET /-/ready
pub async fn handle_ready(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.service.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else {
        (StatusCode::OK, "OK")
    }
}
