//! Deletes job audit entries older than the retention window.

use crate::background_jobs::{BackgroundJob, JobContext, JobError, JobSchedule};
use std::time::Duration;
use tracing::info;

pub struct AuditLogCleanupJob {
    retention_days: u64,
}

impl AuditLogCleanupJob {
    pub fn new(retention_days: u64) -> Self {
        Self { retention_days }
    }

    fn cutoff(&self, now: i64) -> i64 {
        now - (self.retention_days as i64 * 24 * 60 * 60)
    }
}

impl BackgroundJob for AuditLogCleanupJob {
    fn id(&self) -> &'static str {
        "audit_log_cleanup"
    }

    fn name(&self) -> &'static str {
        "Audit Log Cleanup"
    }

    fn description(&self) -> &'static str {
        "Delete job audit log entries older than the retention period"
    }

    fn schedule(&self) -> JobSchedule {
        JobSchedule::Interval(Duration::from_secs(24 * 60 * 60))
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let cutoff = self.cutoff(chrono::Utc::now().timestamp());
        info!(
            "Cleaning up job audit entries older than {} days (cutoff: {})",
            self.retention_days, cutoff
        );

        let deleted = ctx
            .server_store
            .cleanup_old_job_audit_entries(cutoff)
            .map_err(|e| JobError::ExecutionFailed(e.to_string()))?;

        if deleted > 0 {
            info!("Deleted {} old job audit entries", deleted);
        } else {
            info!("No job audit entries to clean up");
        }
        Ok(())
    }
}
