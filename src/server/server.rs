use anyhow::{Context, Result};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, middleware, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::admin_routes::admin_routes;
use super::metrics::metrics_handler;
use super::{log_requests, state::*, ServerConfig};
use crate::background_jobs::SchedulerHandle;
use crate::moderation::ReviewWorkflow;
use crate::pipeline::{ContentWriter, WorkQueues};

#[derive(Serialize)]
struct ServerStats {
    pub uptime: String,
    pub version: String,
}

fn format_uptime(duration: Duration) -> String {
    let total_seconds = duration.as_secs();

    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    format!("{}d {:02}:{:02}:{:02}", days, hours, minutes, seconds)
}

async fn home(State(state): State<ServerState>) -> impl IntoResponse {
    Json(ServerStats {
        uptime: format_uptime(state.start_time.elapsed()),
        version: format!("{}-{}", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
    })
}

pub fn make_app(state: ServerState) -> Router {
    Router::new()
        .route("/", get(home))
        .nest("/v1/admin", admin_routes())
        .layer(middleware::from_fn_with_state(state.clone(), log_requests))
        .with_state(state)
}

fn make_metrics_app() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

/// Serves the admin API and the metrics endpoint until `shutdown` is cancelled.
pub async fn run_server(
    config: ServerConfig,
    writer: ContentWriter,
    review_workflow: Arc<ReviewWorkflow>,
    queues: WorkQueues,
    scheduler_handle: Option<SchedulerHandle>,
    shutdown: CancellationToken,
) -> Result<()> {
    let port = config.port;
    let metrics_port = config.metrics_port;
    let state = ServerState {
        config,
        start_time: Instant::now(),
        writer,
        review_workflow,
        queues,
        scheduler_handle,
    };
    let app = make_app(state);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind port {}", port))?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", metrics_port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;

    info!("Ready to serve at port {}!", port);
    info!("Metrics available at port {}!", metrics_port);

    let metrics_server = axum::serve(metrics_listener, make_metrics_app())
        .with_graceful_shutdown(shutdown.clone().cancelled_owned());
    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown.cancelled_owned());

    tokio::try_join!(server.into_future(), metrics_server.into_future())?;
    Ok(())
}
