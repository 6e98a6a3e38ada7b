use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use std::{fmt::Debug, path::PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use content_pipeline::background_jobs::jobs::{AuditLogCleanupJob, DiscoveryScanJob};
use content_pipeline::background_jobs::{create_scheduler, JobContext};
use content_pipeline::cache::ProjectionCache;
use content_pipeline::config;
use content_pipeline::content_store::{ContentStore, SqliteContentStore};
use content_pipeline::gateway::{AiProvider, Gateway, OpenAiProvider};
use content_pipeline::moderation::ReviewWorkflow;
use content_pipeline::notifications::{NotificationService, StoreNotifier};
use content_pipeline::pipeline::handlers::{EmbeddingHandler, ModerationHandler, TaggingHandler};
use content_pipeline::pipeline::{ContentWriter, WorkHandler, WorkKind, WorkQueues, WorkerPool};
use content_pipeline::server::{metrics, run_server, RequestsLoggingLevel, ServerConfig};
use content_pipeline::server_store::{ServerStore, SqliteServerStore};

/// Extra time granted to in-flight items on shutdown, on top of the gateway timeout.
const WORKER_SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

fn parse_path(s: &str) -> Result<PathBuf, String> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(format!("Error resolving path '{}': {}", s, msg));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir().map_err(|e| format!("Failed to get current dir: {}", e))?;
    Ok(cwd.join(original_path))
}

fn parse_dir(s: &str) -> Result<PathBuf, String> {
    let path = parse_path(s)?;
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", s));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", s));
    }
    Ok(path)
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Directory containing database files (content.db, server.db).
    /// Can also be specified in config file.
    #[clap(long, value_parser = parse_dir)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9091)]
    pub metrics_port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Base URL of the OpenAI-compatible API.
    #[clap(long)]
    pub provider_url: Option<String>,

    /// Chat model used for moderation and tagging.
    #[clap(long)]
    pub provider_model: Option<String>,

    /// Model used for embeddings.
    #[clap(long)]
    pub embedding_model: Option<String>,

    /// API key sent as a bearer token.
    #[clap(long)]
    pub provider_api_key: Option<String>,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            db_dir: args.db_dir.clone(),
            port: args.port,
            metrics_port: args.metrics_port,
            logging_level: args.logging_level.clone(),
            provider_url: args.provider_url.clone(),
            provider_model: args.provider_model.clone(),
            embedding_model: args.embedding_model.clone(),
            provider_api_key: args.provider_api_key.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    info!("Configuration loaded:");
    info!("  db_dir: {:?}", app_config.db_dir);
    info!("  port: {}", app_config.port);
    info!(
        "  provider: {} ({} / {})",
        app_config.provider.base_url, app_config.provider.model, app_config.provider.embedding_model
    );

    info!("Initializing metrics...");
    metrics::init_metrics();

    info!(
        "Opening content database at {:?}",
        app_config.content_db_path()
    );
    let content_store: Arc<dyn ContentStore> =
        Arc::new(SqliteContentStore::new(app_config.content_db_path())?);

    info!(
        "Initializing server store at {:?}",
        app_config.server_db_path()
    );
    let server_store: Arc<dyn ServerStore> =
        Arc::new(SqliteServerStore::new(app_config.server_db_path())?);

    let cache = ProjectionCache::in_memory();
    let writer = ContentWriter::new(content_store.clone(), cache.clone());
    let notifications =
        NotificationService::new(Arc::new(StoreNotifier::new(content_store.clone())));

    let provider: Arc<dyn AiProvider> = Arc::new(OpenAiProvider::new(
        app_config.provider.base_url.clone(),
        app_config.provider.model.clone(),
        app_config.provider.embedding_model.clone(),
        app_config.provider.api_key.clone(),
        app_config.gateway.request_timeout,
    ));
    let gateway = Arc::new(
        Gateway::new(
            provider,
            app_config.gateway.retry.clone(),
            app_config.gateway.timeout,
            app_config.gateway.max_concurrent_calls,
        )
        .with_embedding_cache(cache),
    );

    let moderation_handler: Arc<dyn WorkHandler> = Arc::new(ModerationHandler::new(
        gateway.clone(),
        writer.clone(),
        app_config.thresholds,
        notifications.clone(),
    ));
    let tagging_handler: Arc<dyn WorkHandler> =
        Arc::new(TaggingHandler::new(gateway.clone(), writer.clone()));
    let embedding_handler: Arc<dyn WorkHandler> =
        Arc::new(EmbeddingHandler::new(gateway.clone(), writer.clone()));

    // Set up queues, worker pools and the job scheduler
    let shutdown_token = CancellationToken::new();
    let queues = WorkQueues::new();

    let job_context = JobContext::new(
        shutdown_token.child_token(),
        content_store.clone(),
        server_store.clone(),
    );
    let (mut scheduler, scheduler_handle) =
        create_scheduler(server_store.clone(), shutdown_token.clone(), job_context);

    let mut pools = Vec::new();
    for settings in &app_config.scanners {
        if !settings.enabled {
            info!("Scanner {} disabled", settings.kind);
            continue;
        }
        let handler = match settings.kind {
            WorkKind::ModeratePost | WorkKind::ModerateComment => moderation_handler.clone(),
            WorkKind::TagContent => tagging_handler.clone(),
            WorkKind::EmbedContent | WorkKind::EmbedSkill | WorkKind::RefreshUserInterests => {
                embedding_handler.clone()
            }
        };
        let queue = queues.get(settings.kind).clone();
        pools.push(WorkerPool::spawn(
            queue.clone(),
            handler,
            settings.worker_count,
            shutdown_token.child_token(),
        ));
        scheduler
            .register_job(Arc::new(DiscoveryScanJob::new(queue, settings.interval)))
            .await;
    }
    scheduler
        .register_job(Arc::new(AuditLogCleanupJob::new(
            app_config.audit_log_retention_days,
        )))
        .await;

    info!(
        "Job scheduler initialized with {} job(s), {} worker pool(s)",
        scheduler.job_count().await,
        pools.len()
    );

    let review_workflow = Arc::new(ReviewWorkflow::new(writer.clone(), notifications));
    let server_config = ServerConfig::from(&app_config);

    let mut server_task = tokio::spawn(run_server(
        server_config,
        writer,
        review_workflow,
        queues.clone(),
        Some(scheduler_handle),
        shutdown_token.clone(),
    ));
    let scheduler_task = tokio::spawn(async move { scheduler.run().await });

    let mut server_result = None;
    tokio::select! {
        result = &mut server_task => {
            info!("HTTP server stopped");
            server_result = Some(result);
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
    }
    shutdown_token.cancel();

    if let Err(e) = scheduler_task.await {
        error!("Scheduler task failed: {}", e);
    }

    let grace = app_config.gateway.timeout + WORKER_SHUTDOWN_SLACK;
    for pool in pools {
        let kind = pool.kind();
        if !pool.join(grace).await {
            warn!("Worker pool {} aborted during shutdown", kind);
        }
    }

    let server_result = match server_result {
        Some(result) => result,
        None => server_task.await,
    };
    match server_result {
        Ok(result) => result,
        Err(e) => {
            error!("HTTP server task failed: {}", e);
            Ok(())
        }
    }
}
