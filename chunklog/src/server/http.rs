//! HTTP server for chunklog.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tokio::signal;

use super::config::LogServerConfig;
use super::handlers::{
    AppState, handle_append, handle_count, handle_create_log, handle_delete_logs, handle_get_log,
    handle_healthy, handle_list_logs, handle_metrics, handle_query, handle_ready,
    handle_update_log,
};
use super::metrics::Metrics;
use super::middleware::{trace_requests, track_http};
use crate::service::Service;

/// Builds the API router over `service`.
pub fn router(service: Arc<Service>, metrics: Arc<Metrics>, config: &LogServerConfig) -> Router {
    let state = AppState {
        service,
        metrics: metrics.clone(),
        request_timeout: config.request_timeout,
    };

    Router::new()
        .route(
            "/api/v1/logs",
            post(handle_create_log)
                .get(handle_list_logs)
                .delete(handle_delete_logs),
        )
        .route(
            "/api/v1/logs/{id}",
            get(handle_get_log).put(handle_update_log),
        )
        .route("/api/v1/logs/{id}/records", post(handle_append))
        .route("/api/v1/records", get(handle_query))
        .route("/api/v1/records/count", get(handle_count))
        .route("/metrics", get(handle_metrics))
        .route("/-/healthy", get(handle_healthy))
        .route("/-/ready", get(handle_ready))
        .route_layer(from_fn_with_state(metrics, track_http))
        .layer(from_fn(trace_requests))
        .with_state(state)
}

/// HTTP server for the log service.
pub struct LogServer {
    service: Arc<Service>,
    config: LogServerConfig,
}

impl LogServer {
    pub fn new(service: Arc<Service>, config: LogServerConfig) -> Self {
        Self { service, config }
    }

    /// Serves until SIGINT or SIGTERM, then closes the store.
    pub async fn run(self) -> std::io::Result<()> {
        let metrics = Arc::new(Metrics::new());
        let app = router(self.service.clone(), metrics, &self.config);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        tracing::info!("Starting chunklog HTTP server on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.service.shutdown();
        tracing::info!("Server shut down gracefully");
        Ok(())
    }
}

/// Resolves on SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
