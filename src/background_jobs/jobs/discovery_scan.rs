//! Scheduler job wrapping one discovery scanner.

use crate::background_jobs::{
    BackgroundJob, HookEvent, JobAuditLogger, JobContext, JobError, JobSchedule,
};
use crate::discovery::DiscoveryScanner;
use crate::pipeline::{WorkKind, WorkQueue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Runs the scanner on its interval (and on rescan requests) and feeds the
/// results into the matching queue.
pub struct DiscoveryScanJob {
    scanner: DiscoveryScanner,
    queue: WorkQueue,
    interval: Duration,
}

impl DiscoveryScanJob {
    pub fn new(queue: WorkQueue, interval: Duration) -> Self {
        Self {
            scanner: DiscoveryScanner::new(queue.kind()),
            queue,
            interval,
        }
    }

    pub fn job_id(kind: WorkKind) -> &'static str {
        match kind {
            WorkKind::ModeratePost => "scan-moderate-post",
            WorkKind::ModerateComment => "scan-moderate-comment",
            WorkKind::TagContent => "scan-tag-content",
            WorkKind::EmbedContent => "scan-embed-content",
            WorkKind::EmbedSkill => "scan-embed-skill",
            WorkKind::RefreshUserInterests => "scan-refresh-user-interests",
        }
    }
}

impl BackgroundJob for DiscoveryScanJob {
    fn id(&self) -> &'static str {
        Self::job_id(self.scanner.kind())
    }

    fn name(&self) -> &'static str {
        match self.scanner.kind() {
            WorkKind::ModeratePost => "Scan posts for moderation",
            WorkKind::ModerateComment => "Scan comments for moderation",
            WorkKind::TagContent => "Scan content for tagging",
            WorkKind::EmbedContent => "Scan content for embeddings",
            WorkKind::EmbedSkill => "Scan skills for embeddings",
            WorkKind::RefreshUserInterests => "Scan profiles for interest refresh",
        }
    }

    fn description(&self) -> &'static str {
        "Enqueue every row still matching the kind's unprocessed predicate"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Combined {
            interval: Some(self.interval),
            hooks: vec![HookEvent::OnRescanRequested],
        }
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let audit = JobAuditLogger::new(Arc::clone(&ctx.server_store), self.id());
        audit.log_started(Some(serde_json::json!({ "kind": self.scanner.kind() })));

        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let now = chrono::Utc::now().timestamp();
        let items = match self.scanner.scan(ctx.content_store.as_ref(), now) {
            Ok(items) => items,
            Err(e) => {
                let error_msg = format!("Scan failed: {:#}", e);
                audit.log_failed(&error_msg, None);
                return Err(JobError::ExecutionFailed(error_msg));
            }
        };
        let found = items.len();
        audit.log_progress(serde_json::json!({ "found": found }));

        if found == 0 {
            debug!("[{}] nothing to enqueue", self.scanner.kind());
            audit.log_completed(Some(serde_json::json!({ "found": 0, "enqueued": 0 })));
            return Ok(());
        }

        let enqueued = match self.queue.enqueue_all(items) {
            Ok(count) => count,
            Err(e) => {
                let error_msg = format!("Enqueue failed: {}", e);
                audit.log_failed(&error_msg, Some(serde_json::json!({ "found": found })));
                return Err(JobError::ExecutionFailed(error_msg));
            }
        };

        info!(
            "[{}] enqueued {} item(s), queue depth {}",
            self.scanner.kind(),
            enqueued,
            self.queue.depth()
        );
        audit.log_completed(Some(serde_json::json!({
            "found": found,
            "enqueued": enqueued,
            "queue_depth": self.queue.depth(),
        })));
        Ok(())
    }
}
