use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all asset admin metrics
const PREFIX: &str = "assetadmin";

lazy_static! {
    // Global Prometheus registry
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
        .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["method", "path"]
    ).expect("Failed to create http_request_duration_seconds metric");

    // Background Job Metrics
    pub static ref JOB_RUNS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_job_runs_total"), "Background job runs by outcome"),
        &["job", "trigger", "status"]
    ).expect("Failed to create job_runs_total metric");

    pub static ref JOB_RUN_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_job_run_duration_seconds"),
            "Background job run duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 60.0, 300.0]),
        &["job"]
    ).expect("Failed to create job_run_duration_seconds metric");

    pub static ref JOB_LAST_PROCESSED: GaugeVec = GaugeVec::new(
        Opts::new(
            format!("{PREFIX}_job_last_processed"),
            "Items processed by the most recent successful run"
        ),
        &["job"]
    ).expect("Failed to create job_last_processed metric");

    // Lock Coordination Metrics
    pub static ref LOCK_ACQUISITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            format!("{PREFIX}_lock_acquisitions_total"),
            "Cluster lock acquisition attempts by result"
        ),
        &["result"]
    ).expect("Failed to create lock_acquisitions_total metric");

    pub static ref LOCK_WAIT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            format!("{PREFIX}_lock_wait_seconds"),
            "Time spent waiting for the cluster lock"
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0])
    ).expect("Failed to create lock_wait_seconds metric");
}

/// Initialize all metrics and register them with the Prometheus registry
pub fn init_metrics() {
    // Register all metrics - ignore errors if already registered (for tests)
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUNS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(JOB_RUN_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(JOB_LAST_PROCESSED.clone()));
    let _ = REGISTRY.register(Box::new(LOCK_ACQUISITIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(LOCK_WAIT_SECONDS.clone()));

    tracing::info!("Metrics system initialized successfully");
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

/// Record a background job run outcome
pub fn record_job_run(job: &str, trigger: &str, status: &str, duration: Duration) {
    JOB_RUNS_TOTAL
        .with_label_values(&[job, trigger, status])
        .inc();

    JOB_RUN_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration.as_secs_f64());
}

/// Update the processed-count gauge after a successful run
pub fn set_job_last_processed(job: &str, processed: usize) {
    JOB_LAST_PROCESSED
        .with_label_values(&[job])
        .set(processed as f64);
}

/// Record a cluster lock acquisition attempt
pub fn record_lock_acquisition(result: &str, wait: Duration) {
    LOCK_ACQUISITIONS_TOTAL.with_label_values(&[result]).inc();
    LOCK_WAIT_SECONDS.observe(wait.as_secs_f64());
}

/// Handler for the /metrics endpoint
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();

    let mut buffer = vec![];
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let response = String::from_utf8(buffer).unwrap_or_else(|_| String::from(""));
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
