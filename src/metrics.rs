use axum::{http::StatusCode, response::IntoResponse};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

pub struct MetricsRecorder {
    handle: PrometheusHandle,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder");

        metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
        metrics::describe_histogram!(
            "http_request_duration_seconds",
            "HTTP request duration in seconds"
        );
        metrics::describe_gauge!(
            "database_connections_active",
            "Number of active database connections"
        );
        metrics::describe_counter!("database_queries_total", "Total number of database queries");
        metrics::describe_counter!(
            "pds_write_requests_total",
            "Total number of authenticated write calls forwarded to a PDS"
        );
        metrics::describe_counter!(
            "firehose_events_total",
            "Total number of firehose events received, by kind"
        );
        metrics::describe_counter!(
            "token_refresh_total",
            "Total number of token refresh attempts, by outcome"
        );
        metrics::describe_gauge!(
            "token_refresh_mutex_map_size",
            "Number of per-community mutexes held by the token refresh engine"
        );
        metrics::describe_gauge!(
            "appview_index_lag_seconds",
            "Estimated lag between a commit's wall-clock time and its indexing"
        );
        metrics::describe_gauge!(
            "process_resident_memory_bytes",
            "Process resident memory in bytes"
        );
        metrics::describe_gauge!("process_cpu_seconds_total", "Total user and system CPU time");

        Self { handle }
    }

    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }
}

impl Default for MetricsRecorder {
    fn default() -> Self {
        Self::new()
    }
}

/// Handler for Prometheus metrics endpoint
pub async fn metrics_handler(handle: axum::extract::State<PrometheusHandle>) -> impl IntoResponse {
    let metrics = handle.render();
    (StatusCode::OK, metrics)
}

/// Middleware to track HTTP request metrics
pub async fn track_request_metrics(
    req: axum::extract::Request,
    next: axum::middleware::Next,
) -> impl IntoResponse {
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed();

    metrics::counter!("http_requests_total", 1);
    metrics::histogram!("http_request_duration_seconds", duration.as_secs_f64());

    response
}

pub fn record_db_query(_query_type: &str, duration: Duration, _success: bool) {
    metrics::counter!("database_queries_total", 1);
    metrics::histogram!("database_query_duration_seconds", duration.as_secs_f64());
}

pub fn record_pds_write(outcome: &'static str) {
    metrics::counter!("pds_write_requests_total", 1, "outcome" => outcome);
}

pub fn record_firehose_event(kind: &'static str) {
    metrics::counter!("firehose_events_total", 1, "kind" => kind);
}

pub fn record_token_refresh(outcome: &'static str) {
    metrics::counter!("token_refresh_total", 1, "outcome" => outcome);
}

pub fn record_mutex_map_size(size: usize) {
    metrics::gauge!("token_refresh_mutex_map_size", size as f64);
}
