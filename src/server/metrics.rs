use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all mirror metrics
const PREFIX: &str = "package_mirror";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Request Metrics
    pub static ref HTTP_REQUESTS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_http_requests_total"), "Total number of HTTP requests"),
        &["method", "path", "status"]
    ).expect("Failed to create http_requests_total metric");

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_http_request_duration_seconds"),
            "HTTP request duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Replication Metrics
    pub static ref SYNC_CYCLES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_sync_cycles_total"), "Replication cycles by outcome"),
        &["outcome"]
    ).expect("Failed to create sync_cycles_total metric");

    pub static ref SYNC_CYCLE_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_sync_cycle_duration_seconds"),
            "Replication cycle duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 5.0, 30.0, 60.0, 300.0, 900.0, 3600.0]),
        &["outcome"]
    ).expect("Failed to create sync_cycle_duration_seconds metric");

    pub static ref RELEASES_INGESTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_releases_ingested_total"), "Releases committed per uplink"),
        &["uplink"]
    ).expect("Failed to create releases_ingested_total metric");

    pub static ref INGESTION_FAILURES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_ingestion_failures_total"), "Ingestion failures per uplink and kind"),
        &["uplink", "kind"]
    ).expect("Failed to create ingestion_failures_total metric");

    pub static ref UPLINK_CURSOR: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_uplink_cursor"), "Last replicated position per uplink"),
        &["uplink"]
    ).expect("Failed to create uplink_cursor metric");

    pub static ref CATALOG_RELEASES_TOTAL: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_catalog_releases_total"), "Releases stored in the catalog"),
        &["scope"]
    ).expect("Failed to create catalog_releases_total metric");

    // Background Job Metrics
    pub static ref BACKGROUND_JOB_RUNNING: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job"]
    ).expect("Failed to create background_job_running metric");

    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions by status"),
        &["job", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.1, 1.0, 10.0, 60.0, 300.0, 900.0, 3600.0]),
        &["job"]
    ).expect("Failed to create background_job_duration_seconds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Ignore errors if already registered (tests call this repeatedly)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(SYNC_CYCLES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(SYNC_CYCLE_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(RELEASES_INGESTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(INGESTION_FAILURES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(UPLINK_CURSOR.clone()));
    let _ = REGISTRY.register(Box::new(CATALOG_RELEASES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn init_catalog_metrics(num_releases: usize) {
    set_catalog_releases(num_releases);
    tracing::info!("Catalog metrics initialized: {} releases", num_releases);
}

pub fn set_catalog_releases(num_releases: usize) {
    CATALOG_RELEASES_TOTAL
        .with_label_values(&["all"])
        .set(num_releases as f64);
}

/// Record an HTTP request
pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

/// Collapses per-package paths so label cardinality stays bounded.
pub fn categorize_endpoint(path: &str) -> &'static str {
    if path.starts_with("/all-packages/since") {
        "all_packages_since"
    } else if path.starts_with("/all-packages") {
        "all_packages"
    } else if path.ends_with("/releases.json") {
        "releases"
    } else if path.ends_with("/endpoint.json") {
        "endpoint"
    } else if path.starts_with("/packages/") {
        "release_document"
    } else if path == "/search.json" {
        "search"
    } else if path.starts_with("/jobs") {
        "jobs"
    } else {
        "other"
    }
}

pub fn record_sync_cycle(outcome: &str, duration: Duration) {
    SYNC_CYCLES_TOTAL.with_label_values(&[outcome]).inc();
    SYNC_CYCLE_DURATION_SECONDS
        .with_label_values(&[outcome])
        .observe(duration.as_secs_f64());
}

pub fn record_release_ingested(uplink: &str) {
    RELEASES_INGESTED_TOTAL.with_label_values(&[uplink]).inc();
    CATALOG_RELEASES_TOTAL.with_label_values(&["all"]).inc();
}

pub fn record_ingestion_failure(uplink: &str, kind: &str) {
    INGESTION_FAILURES_TOTAL
        .with_label_values(&[uplink, kind])
        .inc();
}

pub fn set_uplink_cursor(uplink: &str, cursor: i64) {
    UPLINK_CURSOR.with_label_values(&[uplink]).set(cursor as f64);
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(if running { 1.0 } else { 0.0 });
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, response)
        }
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
