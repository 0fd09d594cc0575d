//! Request middleware: HTTP metrics and request tracing.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::{MatchedPath, Request, State};
use axum::middleware::Next;
use axum::response::Response;

use super::metrics::{HttpLabels, HttpLabelsWithStatus, HttpMethod, Metrics};

const UNMATCHED_ENDPOINT: &str = "unmatched";

fn endpoint_label(request: &Request) -> String {
    request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| UNMATCHED_ENDPOINT.to_string(), |p| p.as_str().to_string())
}

/// Records request count, latency and in-flight requests.
///
/// Endpoints are labelled with the matched route template so that path
/// parameters do not explode label cardinality. Install with
/// `route_layer` for the matched path to be available.
pub async fn track_http(
    State(metrics): State<Arc<Metrics>>,
    request: Request,
    next: Next,
) -> Response {
    let method = HttpMethod::from(request.method());
    let endpoint = endpoint_label(&request);
    let start = Instant::now();

    metrics.http_requests_in_flight.inc();
    let response = next.run(request).await;
    metrics.http_requests_in_flight.dec();

    metrics
        .http_request_duration_seconds
        .get_or_create(&HttpLabels {
            method: method.clone(),
            endpoint: endpoint.clone(),
        })
        .observe(start.elapsed().as_secs_f64());
    metrics
        .http_requests_total
        .get_or_create(&HttpLabelsWithStatus {
            method,
            endpoint,
            status: response.status().as_u16(),
        })
        .inc();

    response
}

/// Logs every request at debug level.
pub async fn trace_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    tracing::debug!(
        %method,
        %uri,
        status = response.status().as_u16(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "handled request"
    );
    response
}
