//! Job audit trail on top of the server store.

use crate::server_store::{JobAuditEventType, ServerStore};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Writes started/progress/completed/failed entries for one job execution.
///
/// Audit failures are logged and otherwise ignored; they never fail the job.
pub struct JobAuditLogger {
    server_store: Arc<dyn ServerStore>,
    job_id: &'static str,
    started: Instant,
}

impl JobAuditLogger {
    pub fn new(server_store: Arc<dyn ServerStore>, job_id: &'static str) -> Self {
        Self {
            server_store,
            job_id,
            started: Instant::now(),
        }
    }

    pub fn log_started(&self, details: Option<serde_json::Value>) {
        self.log(JobAuditEventType::Started, None, details, None);
    }

    pub fn log_progress(&self, details: serde_json::Value) {
        self.log(JobAuditEventType::Progress, None, Some(details), None);
    }

    pub fn log_completed(&self, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Completed,
            Some(self.elapsed_ms()),
            details,
            None,
        );
    }

    pub fn log_failed(&self, error: &str, details: Option<serde_json::Value>) {
        self.log(
            JobAuditEventType::Failed,
            Some(self.elapsed_ms()),
            details,
            Some(error),
        );
    }

    fn elapsed_ms(&self) -> i64 {
        self.started.elapsed().as_millis() as i64
    }

    fn log(
        &self,
        event_type: JobAuditEventType,
        duration_ms: Option<i64>,
        details: Option<serde_json::Value>,
        error: Option<&str>,
    ) {
        if let Err(e) = self.server_store.log_job_audit(
            self.job_id,
            event_type.clone(),
            duration_ms,
            details.as_ref(),
            error,
        ) {
            warn!(
                "Failed to write {} audit entry for job {}: {}",
                event_type.as_str(),
                self.job_id,
                e
            );
        }
    }
}
