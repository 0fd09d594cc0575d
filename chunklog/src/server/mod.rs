//! HTTP server for chunklog.
//!
//! Exposes the [`Service`](crate::Service) as a JSON API with Prometheus
//! metrics and health endpoints.

mod config;
pub mod error;
pub mod handlers;
mod http;
pub mod metrics;
pub mod middleware;
pub mod request;
pub mod response;

pub use config::{CliArgs, LogServerConfig};
pub use http::{LogServer, router};
