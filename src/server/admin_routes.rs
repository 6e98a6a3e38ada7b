//! Admin HTTP routes: moderation review, cached content projections, queue
//! depths and background jobs.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::state::{GuardedReviewWorkflow, OptionalSchedulerHandle, ServerState};
use crate::background_jobs::{HookEvent, JobError, SchedulerHandle};
use crate::cache::CacheKey;
use crate::content_store::{ContentRecord, ContentRef, ContentType, ModerationReport};
use crate::moderation::{ReviewError, ReviewResult};
use crate::pipeline::{ContentWriter, WorkQueues};

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

/// Marks a cache factory miss so it is not cached and maps to 404.
#[derive(Debug)]
struct NotFound;

impl std::fmt::Display for NotFound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("not found")
    }
}

impl std::error::Error for NotFound {}

fn lookup_response<T: Serialize>(what: &str, id: &str, result: anyhow::Result<T>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) if e.is::<NotFound>() => {
            error_response(StatusCode::NOT_FOUND, format!("{} {} not found", what, id))
        }
        Err(e) => {
            warn!("Failed to load {} {}: {:#}", what, id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to load {}", what))
        }
    }
}

fn review_response(
    operation: &str,
    report_id: &str,
    result: Result<ReviewResult, ReviewError>,
) -> Response {
    match result {
        Ok(result) => {
            if result.changed {
                info!("Report {} updated by {}", report_id, operation);
            }
            Json(result).into_response()
        }
        Err(e @ ReviewError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, e),
        Err(e @ ReviewError::Conflict(_)) => error_response(StatusCode::CONFLICT, e),
        Err(e @ ReviewError::Store(_)) => {
            warn!("{} failed for report {}: {}", operation, report_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e)
        }
    }
}

fn get_scheduler(handle: &OptionalSchedulerHandle) -> Result<&SchedulerHandle, Response> {
    handle.as_ref().ok_or_else(|| {
        error_response(StatusCode::SERVICE_UNAVAILABLE, "Job scheduler not available")
    })
}

// =============================================================================
// Moderation reports
// =============================================================================

/// GET /reports
async fn list_reports(State(writer): State<ContentWriter>) -> Response {
    let store = writer.store().clone();
    let result: anyhow::Result<Vec<ModerationReport>> = writer
        .cache()
        .get_or_create(&CacheKey::all_reports(), || store.list_reports());
    lookup_response("reports", "all", result)
}

/// GET /reports/{id}
async fn get_report(State(writer): State<ContentWriter>, Path(id): Path<String>) -> Response {
    let store = writer.store().clone();
    let result: anyhow::Result<ModerationReport> =
        writer.cache().get_or_create(&CacheKey::report(&id), || {
            store
                .get_report(&id)?
                .ok_or_else(|| anyhow::Error::new(NotFound))
        });
    lookup_response("report", &id, result)
}

#[derive(Deserialize, Debug)]
struct SetFlagBody {
    pub value: bool,
}

/// POST /reports/{id}/toggle-resolution
async fn toggle_resolution(
    State(review): State<GuardedReviewWorkflow>,
    Path(id): Path<String>,
) -> Response {
    review_response("toggle-resolution", &id, review.toggle_resolution(&id))
}

/// POST /reports/{id}/toggle-negative
async fn toggle_negative(
    State(review): State<GuardedReviewWorkflow>,
    Path(id): Path<String>,
) -> Response {
    review_response("toggle-negative", &id, review.toggle_negative(&id))
}

/// PUT /reports/{id}/resolution
async fn set_resolution(
    State(review): State<GuardedReviewWorkflow>,
    Path(id): Path<String>,
    Json(body): Json<SetFlagBody>,
) -> Response {
    review_response("set-resolution", &id, review.set_resolution(&id, body.value))
}

/// PUT /reports/{id}/negative
async fn set_negative(
    State(review): State<GuardedReviewWorkflow>,
    Path(id): Path<String>,
    Json(body): Json<SetFlagBody>,
) -> Response {
    review_response("set-negative", &id, review.set_negative(&id, body.value))
}

/// POST /reports/{id}/restore
async fn restore_content(
    State(review): State<GuardedReviewWorkflow>,
    Path(id): Path<String>,
) -> Response {
    review_response("restore", &id, review.restore_content(&id))
}

// =============================================================================
// Content and pipeline
// =============================================================================

/// GET /content/{content_type}/{id}
async fn get_content(
    State(writer): State<ContentWriter>,
    Path((content_type, id)): Path<(String, String)>,
) -> Response {
    let Some(content_type) = ContentType::parse(&content_type) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("Unknown content type: {}", content_type),
        );
    };
    let target = ContentRef::new(content_type, id.clone());
    let store = writer.store().clone();
    let result: anyhow::Result<ContentRecord> =
        writer.cache().get_or_create(&CacheKey::content(&target), || {
            store
                .get_content(&target)?
                .ok_or_else(|| anyhow::Error::new(NotFound))
        });
    lookup_response(content_type.as_str(), &id, result)
}

/// GET /queues
async fn get_queues(State(queues): State<WorkQueues>) -> impl IntoResponse {
    Json(queues.depths())
}

/// POST /pipeline/rescan
async fn request_rescan(State(handle): State<OptionalSchedulerHandle>) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match scheduler.fire_hook(HookEvent::OnRescanRequested).await {
        Ok(()) => {
            info!("Rescan requested");
            StatusCode::ACCEPTED.into_response()
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

// =============================================================================
// Background jobs
// =============================================================================

#[derive(Deserialize, Debug)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
}

fn default_history_limit() -> usize {
    20
}

#[derive(Deserialize, Debug)]
struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    job_id: Option<String>,
}

fn default_audit_limit() -> usize {
    100
}

/// GET /jobs
async fn list_jobs(State(handle): State<OptionalSchedulerHandle>) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match scheduler.list_jobs().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => {
            warn!("Failed to list jobs: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to list jobs")
        }
    }
}

/// GET /jobs/{id}
async fn get_job(State(handle): State<OptionalSchedulerHandle>, Path(id): Path<String>) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match scheduler.get_job(&id).await {
        Ok(Some(job)) => Json(job).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Job {} not found", id)),
        Err(e) => {
            warn!("Failed to get job {}: {:#}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job")
        }
    }
}

/// POST /jobs/{id}/trigger
async fn trigger_job(
    State(handle): State<OptionalSchedulerHandle>,
    Path(id): Path<String>,
) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(response) => return response,
    };
    match scheduler.trigger_job(&id).await {
        Ok(()) => {
            info!("Job {} triggered manually", id);
            StatusCode::ACCEPTED.into_response()
        }
        Err(JobError::NotFound) => {
            error_response(StatusCode::NOT_FOUND, format!("Job {} not found", id))
        }
        Err(JobError::AlreadyRunning) => {
            error_response(StatusCode::CONFLICT, format!("Job {} is already running", id))
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

/// GET /jobs/{id}/history
async fn get_job_history(
    State(handle): State<OptionalSchedulerHandle>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(response) => return response,
    };
    if !scheduler.job_exists(&id).await {
        return error_response(StatusCode::NOT_FOUND, format!("Job {} not found", id));
    }
    match scheduler.get_job_history(&id, query.limit) {
        Ok(history) => Json(history).into_response(),
        Err(e) => {
            warn!("Failed to get history for job {}: {:#}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get job history")
        }
    }
}

/// GET /jobs/audit
async fn get_job_audit_log(
    State(handle): State<OptionalSchedulerHandle>,
    Query(query): Query<AuditQuery>,
) -> Response {
    let scheduler = match get_scheduler(&handle) {
        Ok(s) => s,
        Err(response) => return response,
    };
    let result = match &query.job_id {
        Some(job_id) => scheduler.get_job_audit_log_by_job(job_id, query.limit, query.offset),
        None => scheduler.get_job_audit_log(query.limit, query.offset),
    };
    match result {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => {
            warn!("Failed to read job audit log: {:#}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read job audit log")
        }
    }
}

// =============================================================================
// Router Construction
// =============================================================================

/// Build the admin routes, nested under `/v1/admin`.
pub fn admin_routes() -> Router<ServerState> {
    let report_routes = Router::new()
        .route("/reports", get(list_reports))
        .route("/reports/{id}", get(get_report))
        .route("/reports/{id}/toggle-resolution", post(toggle_resolution))
        .route("/reports/{id}/toggle-negative", post(toggle_negative))
        .route("/reports/{id}/resolution", put(set_resolution))
        .route("/reports/{id}/negative", put(set_negative))
        .route("/reports/{id}/restore", post(restore_content));

    let pipeline_routes = Router::new()
        .route("/content/{content_type}/{id}", get(get_content))
        .route("/queues", get(get_queues))
        .route("/pipeline/rescan", post(request_rescan));

    // `/jobs/audit` is a static segment, so it wins over `/jobs/{id}`.
    let job_routes = Router::new()
        .route("/jobs", get(list_jobs))
        .route("/jobs/audit", get(get_job_audit_log))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/trigger", post(trigger_job))
        .route("/jobs/{id}/history", get(get_job_history));

    report_routes.merge(pipeline_routes).merge(job_routes)
}
