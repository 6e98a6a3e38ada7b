use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};
use std::time::Duration;

/// Metric name prefix for all pipeline metrics
const PREFIX: &str = "content_pipeline";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP
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

    // Background jobs
    pub static ref BACKGROUND_JOB_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_background_job_executions_total"), "Background job executions"),
        &["job_id", "status"]
    ).expect("Failed to create background_job_executions_total metric");

    pub static ref BACKGROUND_JOB_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_background_job_duration_seconds"),
            "Background job duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["job_id"]
    ).expect("Failed to create background_job_duration_seconds metric");

    pub static ref BACKGROUND_JOB_RUNNING: IntGaugeVec = IntGaugeVec::new(
        Opts::new(format!("{PREFIX}_background_job_running"), "Whether a background job is running"),
        &["job_id"]
    ).expect("Failed to create background_job_running metric");

    // Queues and workers
    pub static ref ITEMS_ENQUEUED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_items_enqueued_total"), "Work items enqueued by scanners"),
        &["kind"]
    ).expect("Failed to create items_enqueued_total metric");

    pub static ref QUEUE_DEPTH: GaugeVec = GaugeVec::new(
        Opts::new(format!("{PREFIX}_queue_depth"), "Work items waiting in each queue"),
        &["kind"]
    ).expect("Failed to create queue_depth metric");

    pub static ref ITEMS_PROCESSED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_items_processed_total"), "Work items handled by workers"),
        &["kind", "outcome"]
    ).expect("Failed to create items_processed_total metric");

    // Gateway
    pub static ref GATEWAY_CALLS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_gateway_calls_total"), "AI gateway calls by operation and outcome"),
        &["operation", "outcome"]
    ).expect("Failed to create gateway_calls_total metric");

    pub static ref GATEWAY_RETRIES_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_gateway_retries_total"), "AI gateway retry attempts"),
        &["operation", "failure"]
    ).expect("Failed to create gateway_retries_total metric");

    pub static ref GATEWAY_CALL_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_gateway_call_duration_seconds"),
            "AI gateway call duration including retries"
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 90.0]),
        &["operation"]
    ).expect("Failed to create gateway_call_duration_seconds metric");

    // Cache
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cache_lookups_total"), "Cache lookups by namespace and result"),
        &["namespace", "result"]
    ).expect("Failed to create cache_lookups_total metric");

    pub static ref CACHE_INVALIDATIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_cache_invalidations_total"), "Cache keys invalidated"),
        &["namespace"]
    ).expect("Failed to create cache_invalidations_total metric");

    // Moderation
    pub static ref MODERATION_REPORTS_CREATED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_moderation_reports_created_total"), "Moderation reports created"),
        &["content_type"]
    ).expect("Failed to create moderation_reports_created_total metric");

    pub static ref REVIEW_TRANSITIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_review_transitions_total"), "Review workflow operations"),
        &["operation", "result"]
    ).expect("Failed to create review_transitions_total metric");
}

/// Registers every metric; safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(HTTP_REQUESTS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(HTTP_REQUEST_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(BACKGROUND_JOB_RUNNING.clone()));
    let _ = REGISTRY.register(Box::new(ITEMS_ENQUEUED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(QUEUE_DEPTH.clone()));
    let _ = REGISTRY.register(Box::new(ITEMS_PROCESSED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GATEWAY_CALLS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GATEWAY_RETRIES_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(GATEWAY_CALL_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_LOOKUPS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(CACHE_INVALIDATIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(MODERATION_REPORTS_CREATED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(REVIEW_TRANSITIONS_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_http_request(method: &str, path: &str, status: u16, duration: Duration) {
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method, path, &status.to_string()])
        .inc();
    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[method, path])
        .observe(duration.as_secs_f64());
}

pub fn record_background_job_execution(job_id: &str, status: &str, duration: Duration) {
    BACKGROUND_JOB_EXECUTIONS_TOTAL
        .with_label_values(&[job_id, status])
        .inc();
    BACKGROUND_JOB_DURATION_SECONDS
        .with_label_values(&[job_id])
        .observe(duration.as_secs_f64());
}

pub fn set_background_job_running(job_id: &str, running: bool) {
    BACKGROUND_JOB_RUNNING
        .with_label_values(&[job_id])
        .set(i64::from(running));
}

pub fn record_items_enqueued(kind: &str, count: usize) {
    ITEMS_ENQUEUED_TOTAL
        .with_label_values(&[kind])
        .inc_by(count as f64);
}

pub fn set_queue_depth(kind: &str, depth: usize) {
    QUEUE_DEPTH.with_label_values(&[kind]).set(depth as f64);
}

pub fn record_item_processed(kind: &str, outcome: &str) {
    ITEMS_PROCESSED_TOTAL
        .with_label_values(&[kind, outcome])
        .inc();
}

pub fn record_gateway_call(operation: &str, outcome: &str, duration: Duration) {
    GATEWAY_CALLS_TOTAL
        .with_label_values(&[operation, outcome])
        .inc();
    GATEWAY_CALL_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration.as_secs_f64());
}

pub fn record_gateway_retry(operation: &str, failure: &str) {
    GATEWAY_RETRIES_TOTAL
        .with_label_values(&[operation, failure])
        .inc();
}

pub fn record_cache_lookup(namespace: &str, hit: bool) {
    CACHE_LOOKUPS_TOTAL
        .with_label_values(&[namespace, if hit { "hit" } else { "miss" }])
        .inc();
}

pub fn record_cache_invalidation(namespace: &str) {
    CACHE_INVALIDATIONS_TOTAL
        .with_label_values(&[namespace])
        .inc();
}

pub fn record_moderation_report_created(content_type: &str) {
    MODERATION_REPORTS_CREATED_TOTAL
        .with_label_values(&[content_type])
        .inc();
}

pub fn record_review_transition(operation: &str, result: &str) {
    REVIEW_TRANSITIONS_TOTAL
        .with_label_values(&[operation, result])
        .inc();
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
