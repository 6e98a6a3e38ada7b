//! Fully wired pipeline over temporary databases, with the admin API served
//! on a random local port.

use super::provider::FakeProvider;
use content_pipeline::background_jobs::jobs::DiscoveryScanJob;
use content_pipeline::background_jobs::{
    create_scheduler, BackgroundJob, JobContext, JobScheduler, SchedulerHandle,
};
use content_pipeline::cache::ProjectionCache;
use content_pipeline::content_store::SqliteContentStore;
use content_pipeline::gateway::{Gateway, RetryPolicy};
use content_pipeline::moderation::{ReviewWorkflow, Thresholds};
use content_pipeline::notifications::{NotificationService, StoreNotifier};
use content_pipeline::pipeline::handlers::{EmbeddingHandler, ModerationHandler, TaggingHandler};
use content_pipeline::pipeline::{
    drain_queue, ContentWriter, WorkHandler, WorkKind, WorkQueues, WorkerPool,
};
use content_pipeline::server::state::ServerState;
use content_pipeline::server::{make_app, ServerConfig};
use content_pipeline::server_store::SqliteServerStore;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

pub struct TestPipeline {
    pub base_url: String,
    pub content_store: Arc<SqliteContentStore>,
    pub server_store: Arc<SqliteServerStore>,
    pub provider: Arc<FakeProvider>,
    pub queues: WorkQueues,
    pub scheduler_handle: SchedulerHandle,
    scheduler: Option<JobScheduler>,
    job_context: JobContext,
    moderation: Arc<dyn WorkHandler>,
    tagging: Arc<dyn WorkHandler>,
    embedding: Arc<dyn WorkHandler>,
    shutdown: CancellationToken,
    _temp_dir: TempDir,
}

fn fast_retries() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 5,
        base_delay: Duration::from_millis(5),
        jitter_ratio: 0.0,
        retry_transient: false,
    }
}

impl TestPipeline {
    pub async fn spawn() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let content_store = Arc::new(
            SqliteContentStore::new(temp_dir.path().join("content.db"))
                .expect("Failed to open content store"),
        );
        let server_store = Arc::new(
            SqliteServerStore::new(temp_dir.path().join("server.db"))
                .expect("Failed to open server store"),
        );

        let cache = ProjectionCache::in_memory();
        let writer = ContentWriter::new(content_store.clone(), cache.clone());
        let notifications =
            NotificationService::new(Arc::new(StoreNotifier::new(content_store.clone())));

        let provider = Arc::new(FakeProvider::new());
        let gateway = Arc::new(
            Gateway::new(provider.clone(), fast_retries(), Duration::from_secs(5), 4)
                .with_embedding_cache(cache),
        );

        let moderation: Arc<dyn WorkHandler> = Arc::new(ModerationHandler::new(
            gateway.clone(),
            writer.clone(),
            Thresholds::default(),
            notifications.clone(),
        ));
        let tagging: Arc<dyn WorkHandler> =
            Arc::new(TaggingHandler::new(gateway.clone(), writer.clone()));
        let embedding: Arc<dyn WorkHandler> =
            Arc::new(EmbeddingHandler::new(gateway, writer.clone()));

        let shutdown = CancellationToken::new();
        let queues = WorkQueues::new();
        let job_context = JobContext::new(
            shutdown.child_token(),
            content_store.clone(),
            server_store.clone(),
        );
        let (mut scheduler, scheduler_handle) =
            create_scheduler(server_store.clone(), shutdown.clone(), job_context.clone());
        for kind in WorkKind::ALL {
            scheduler
                .register_job(Arc::new(DiscoveryScanJob::new(
                    queues.get(kind).clone(),
                    Duration::from_secs(3600),
                )))
                .await;
        }

        let state = ServerState {
            config: ServerConfig::default(),
            start_time: Instant::now(),
            writer: writer.clone(),
            review_workflow: Arc::new(ReviewWorkflow::new(writer, notifications)),
            queues: queues.clone(),
            scheduler_handle: Some(scheduler_handle.clone()),
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let server_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(listener, make_app(state))
                .with_graceful_shutdown(server_shutdown.cancelled_owned())
                .await
                .expect("Test server failed");
        });

        Self {
            base_url,
            content_store,
            server_store,
            provider,
            queues,
            scheduler_handle,
            scheduler: Some(scheduler),
            job_context,
            moderation,
            tagging,
            embedding,
            shutdown,
            _temp_dir: temp_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn handler_for(&self, kind: WorkKind) -> &Arc<dyn WorkHandler> {
        match kind {
            WorkKind::ModeratePost | WorkKind::ModerateComment => &self.moderation,
            WorkKind::TagContent => &self.tagging,
            WorkKind::EmbedContent | WorkKind::EmbedSkill | WorkKind::RefreshUserInterests => {
                &self.embedding
            }
        }
    }

    /// Runs the scanner for `kind` once, synchronously.
    pub fn scan(&self, kind: WorkKind) {
        let job = DiscoveryScanJob::new(self.queues.get(kind).clone(), Duration::from_secs(3600));
        job.execute(&self.job_context).expect("Scan failed");
    }

    /// Processes everything currently queued for `kind` on the calling task.
    pub async fn drain(&self, kind: WorkKind) -> usize {
        drain_queue(self.queues.get(kind), self.handler_for(kind).as_ref()).await
    }

    pub async fn scan_and_drain(&self, kind: WorkKind) -> usize {
        self.scan(kind);
        self.drain(kind).await
    }

    /// Starts the scheduler and one worker pool per kind in the background.
    pub fn start_background(&mut self) -> Vec<WorkerPool> {
        let pools = WorkKind::ALL
            .into_iter()
            .map(|kind| {
                WorkerPool::spawn(
                    self.queues.get(kind).clone(),
                    self.handler_for(kind).clone(),
                    2,
                    self.shutdown.child_token(),
                )
            })
            .collect();
        if let Some(mut scheduler) = self.scheduler.take() {
            tokio::spawn(async move { scheduler.run().await });
        }
        pools
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for TestPipeline {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Polls `condition` every 20ms until it holds or `timeout` passes.
pub async fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}
