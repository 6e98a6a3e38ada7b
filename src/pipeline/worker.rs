//! Fixed-size worker pools draining a [`WorkQueue`].

use super::queue::WorkQueue;
use super::work_item::{WorkItem, WorkKind};
use crate::gateway::GatewayError;
use crate::server::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a handler did with an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Clean,
    Reported,
    /// Flagged, but an open AI report already covers the content.
    AlreadyReported,
    Tagged(usize),
    Embedded,
    /// The content was gone or already handled by another worker.
    Skipped,
}

impl WorkOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkOutcome::Clean => "clean",
            WorkOutcome::Reported => "reported",
            WorkOutcome::AlreadyReported => "already_reported",
            WorkOutcome::Tagged(_) => "tagged",
            WorkOutcome::Embedded => "embedded",
            WorkOutcome::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("store write failed: {0:#}")]
    Store(anyhow::Error),

    #[error("{0} handler cannot process {1} items")]
    UnsupportedKind(&'static str, WorkKind),
}

impl From<anyhow::Error> for WorkError {
    fn from(err: anyhow::Error) -> Self {
        WorkError::Store(err)
    }
}

impl WorkError {
    pub fn label(&self) -> &'static str {
        match self {
            WorkError::Gateway(err) => err.label(),
            WorkError::Store(_) => "store_error",
            WorkError::UnsupportedKind(..) => "unsupported",
        }
    }
}

#[async_trait]
pub trait WorkHandler: Send + Sync {
    async fn handle(&self, item: &WorkItem) -> Result<WorkOutcome, WorkError>;
}

/// Runs one item through the handler, logging and recording the result. Failures
/// leave the content untouched so the next scan picks it up again.
pub async fn process_item(handler: &dyn WorkHandler, item: WorkItem) -> Option<WorkOutcome> {
    let kind = item.kind.as_str();
    match handler.handle(&item).await {
        Ok(outcome) => {
            debug!("[{}] {} -> {}", kind, item.target, outcome.as_str());
            metrics::record_item_processed(kind, outcome.as_str());
            Some(outcome)
        }
        Err(err) => {
            match &err {
                WorkError::Gateway(GatewayError::Permanent { .. }) | WorkError::Store(_) => {
                    error!("[{}] {} failed: {}", kind, item.target, err)
                }
                WorkError::Gateway(_) => warn!("[{}] {} failed: {}", kind, item.target, err),
                WorkError::UnsupportedKind(..) => error!("[{}] {}", kind, err),
            }
            metrics::record_item_processed(kind, err.label());
            None
        }
    }
}

/// Processes whatever is queued right now and returns how many items were taken.
pub async fn drain_queue(queue: &WorkQueue, handler: &dyn WorkHandler) -> usize {
    let mut taken = 0;
    while let Some(item) = queue.try_dequeue() {
        process_item(handler, item).await;
        taken += 1;
    }
    taken
}

pub struct WorkerPool {
    kind: WorkKind,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn(
        queue: WorkQueue,
        handler: Arc<dyn WorkHandler>,
        worker_count: usize,
        shutdown: CancellationToken,
    ) -> Self {
        let kind = queue.kind();
        let workers = (0..worker_count.max(1))
            .map(|index| {
                let queue = queue.clone();
                let handler = handler.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { run_worker(index, queue, handler, shutdown).await })
            })
            .collect::<Vec<_>>();
        info!("Started {} worker(s) for {}", workers.len(), kind);
        Self { kind, workers }
    }

    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Waits for the workers to exit after shutdown was signalled. Workers still
    /// busy when `grace` runs out are aborted. Returns whether all exited in time.
    pub async fn join(self, grace: Duration) -> bool {
        let kind = self.kind;
        let aborts: Vec<_> = self.workers.iter().map(|w| w.abort_handle()).collect();
        let all = futures::future::join_all(self.workers);
        match tokio::time::timeout(grace, all).await {
            Ok(_) => {
                debug!("Worker pool {} stopped", kind);
                true
            }
            Err(_) => {
                warn!(
                    "Worker pool {} did not stop within {:?}, aborting",
                    kind, grace
                );
                aborts.iter().for_each(|a| a.abort());
                false
            }
        }
    }
}

async fn run_worker(
    index: usize,
    queue: WorkQueue,
    handler: Arc<dyn WorkHandler>,
    shutdown: CancellationToken,
) {
    let kind = queue.kind();
    debug!("Worker {}#{} started", kind, index);
    loop {
        let item = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            item = queue.dequeue() => item,
        };
        let Some(item) = item else { break };
        // Once dequeued, an item runs to completion even if shutdown fires.
        process_item(handler.as_ref(), item).await;
    }
    debug!("Worker {}#{} stopped", kind, index);
}
