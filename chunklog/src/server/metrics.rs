//! Prometheus metrics for the chunklog server.

use axum::http::Method;
use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;

/// Labels for HTTP request metrics.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabelsWithStatus {
    pub method: HttpMethod,
    pub endpoint: String,
    pub status: u16,
}

/// HTTP method label value.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Other,
}

impl From<&Method> for HttpMethod {
    fn from(method: &Method) -> Self {
        match *method {
            Method::GET => HttpMethod::Get,
            Method::POST => HttpMethod::Post,
            Method::PUT => HttpMethod::Put,
            Method::DELETE => HttpMethod::Delete,
            _ => HttpMethod::Other,
        }
    }
}

/// Labels for the latency histogram. Status is unknown when timing starts.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct HttpLabels {
    pub method: HttpMethod,
    pub endpoint: String,
}

/// Container for all Prometheus metrics of the server.
pub struct Metrics {
    registry: Registry,

    pub append_records_total: Counter,
    pub append_bytes_total: Counter,
    /// Records returned by queries.
    pub records_read_total: Counter,
    pub bytes_read_total: Counter,

    pub http_requests_total: Family<HttpLabelsWithStatus, Counter>,
    /// Request latency in seconds.
    pub http_request_duration_seconds: Family<HttpLabels, Histogram>,
    pub http_requests_in_flight: Gauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let append_records_total = Counter::default();
        registry.register(
            "chunklog_append_records_total",
            "Total number of records appended",
            append_records_total.clone(),
        );

        let append_bytes_total = Counter::default();
        registry.register(
            "chunklog_append_bytes_total",
            "Total number of payload bytes appended",
            append_bytes_total.clone(),
        );

        let records_read_total = Counter::default();
        registry.register(
            "chunklog_records_read_total",
            "Total number of records returned by queries",
            records_read_total.clone(),
        );

        let bytes_read_total = Counter::default();
        registry.register(
            "chunklog_bytes_read_total",
            "Total number of payload bytes returned by queries",
            bytes_read_total.clone(),
        );

        let http_requests_total = Family::<HttpLabelsWithStatus, Counter>::default();
        registry.register(
            "http_requests_total",
            "Total number of HTTP requests",
            http_requests_total.clone(),
        );

        // 1ms to ~8s
        let http_request_duration_seconds =
            Family::<HttpLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 14))
            });
        registry.register(
            "http_request_duration_seconds",
            "HTTP request latency in seconds",
            http_request_duration_seconds.clone(),
        );

        let http_requests_in_flight = Gauge::default();
        registry.register(
            "http_requests_in_flight",
            "Number of HTTP requests currently being processed",
            http_requests_in_flight.clone(),
        );

        Self {
            registry,
            append_records_total,
            append_bytes_total,
            records_read_total,
            bytes_read_total,
            http_requests_total,
            http_request_duration_seconds,
            http_requests_in_flight,
        }
    }

    /// Registry for additional metrics. Only usable before the metrics are
    /// shared.
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Encodes all metrics in the Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if let Err(err) = prometheus_client::encoding::text::encode(&mut buffer, &self.registry) {
            tracing::error!(error = %err, "failed to encode metrics");
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_create_default_metrics() {
        // given/when
        let metrics = Metrics::new();

        // then
        let encoded = metrics.encode();
        assert!(encoded.contains("# HELP chunklog_append_records_total"));
        assert!(encoded.contains("# HELP chunklog_append_bytes_total"));
        assert!(encoded.contains("# HELP chunklog_records_read_total"));
        assert!(encoded.contains("# HELP chunklog_bytes_read_total"));
        assert!(encoded.contains("# HELP http_requests_total"));
        assert!(encoded.contains("# HELP http_request_duration_seconds"));
        assert!(encoded.contains("# HELP http_requests_in_flight"));
    }

    #[test]
    fn should_count_appended_records() {
        // given
        let metrics = Metrics::new();

        // when
        metrics.append_records_total.inc_by(3);

        // then
        assert!(metrics.encode().contains("chunklog_append_records_total_total 3"));
    }

    #[test]
    fn should_convert_http_method_to_label() {
        assert_eq!(HttpMethod::from(&Method::GET), HttpMethod::Get);
        assert_eq!(HttpMethod::from(&Method::PATCH), HttpMethod::Other);
    }
}
