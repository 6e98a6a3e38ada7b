//! Human review of moderation reports.
//!
//! Each operation computes the target state from the observed one and applies it
//! with a compare-and-set. Losing a race re-reads the report: if someone else
//! already reached the target the call is a no-op, so a double click never
//! produces a second notification.

use crate::content_store::{ModerationReport, ReportState, StateUpdate};
use crate::notifications::NotificationService;
use crate::pipeline::ContentWriter;
use crate::server::metrics;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

const MAX_CAS_ATTEMPTS: usize = 3;

#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("moderation report {0} not found")]
    NotFound(String),

    #[error("report {0} cannot be reopened while another AI report for the same content is open")]
    Conflict(String),

    #[error("store failure: {0:#}")]
    Store(anyhow::Error),
}

impl From<anyhow::Error> for ReviewError {
    fn from(err: anyhow::Error) -> Self {
        ReviewError::Store(err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewResult {
    pub report: ModerationReport,
    /// False when the report already was in the requested state.
    pub changed: bool,
}

pub struct ReviewWorkflow {
    writer: ContentWriter,
    notifications: NotificationService,
}

impl ReviewWorkflow {
    pub fn new(writer: ContentWriter, notifications: NotificationService) -> Self {
        Self {
            writer,
            notifications,
        }
    }

    /// Flips `is_resolved`. No visibility effect.
    pub fn toggle_resolution(&self, report_id: &str) -> Result<ReviewResult, ReviewError> {
        self.transition("toggle_resolution", report_id, |s| {
            s.with_resolved(!s.is_resolved())
        })
    }

    pub fn set_resolution(
        &self,
        report_id: &str,
        is_resolved: bool,
    ) -> Result<ReviewResult, ReviewError> {
        self.transition("set_resolution", report_id, |s| s.with_resolved(is_resolved))
    }

    /// Flips `is_negative` and resolves the report, hiding or restoring the content.
    pub fn toggle_negative(&self, report_id: &str) -> Result<ReviewResult, ReviewError> {
        self.transition("toggle_negative", report_id, |s| {
            s.with_negative(!s.is_negative()).with_resolved(true)
        })
    }

    pub fn set_negative(
        &self,
        report_id: &str,
        is_negative: bool,
    ) -> Result<ReviewResult, ReviewError> {
        self.transition("set_negative", report_id, |s| {
            s.with_negative(is_negative).with_resolved(true)
        })
    }

    /// Clears the report and makes the content visible again.
    pub fn restore_content(&self, report_id: &str) -> Result<ReviewResult, ReviewError> {
        self.transition("restore_content", report_id, |_| ReportState::ResolvedClean)
    }

    fn transition(
        &self,
        operation: &'static str,
        report_id: &str,
        target_of: impl Fn(ReportState) -> ReportState,
    ) -> Result<ReviewResult, ReviewError> {
        let result = self.apply(operation, report_id, &target_of);
        let label = match &result {
            Ok(r) if r.changed => "applied",
            Ok(_) => "noop",
            Err(ReviewError::NotFound(_)) => "not_found",
            Err(ReviewError::Conflict(_)) => "conflict",
            Err(ReviewError::Store(_)) => "error",
        };
        metrics::record_review_transition(operation, label);
        result
    }

    fn apply(
        &self,
        operation: &'static str,
        report_id: &str,
        target_of: &impl Fn(ReportState) -> ReportState,
    ) -> Result<ReviewResult, ReviewError> {
        let mut report = self.load(report_id)?;
        // The target is fixed by the first observation; later reads only
        // decide whether it was reached by someone else.
        let target = target_of(report.state());

        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = report.state();
            if current == target {
                debug!("{} on report {} is a no-op", operation, report_id);
                return Ok(ReviewResult {
                    report,
                    changed: false,
                });
            }

            let hide_content = if operation == "restore_content" {
                Some(false)
            } else if current.is_negative() != target.is_negative() {
                Some(target.is_negative())
            } else {
                None
            };

            match self
                .writer
                .update_report_state(&report, current, target, hide_content)?
            {
                StateUpdate::Applied => {
                    info!(
                        "Report {} moved {:?} -> {:?} by {}",
                        report_id, current, target, operation
                    );
                    if current.is_negative() != target.is_negative() {
                        self.notify_visibility_change(&report, target.is_negative());
                    }
                    let updated = self.load(report_id)?;
                    return Ok(ReviewResult {
                        report: updated,
                        changed: true,
                    });
                }
                StateUpdate::Conflict => {
                    return Err(ReviewError::Conflict(report_id.to_string()));
                }
                StateUpdate::Stale => {
                    debug!("Report {} changed concurrently, re-reading", report_id);
                    report = self.load(report_id)?;
                }
            }
        }

        warn!(
            "{} on report {} kept losing to concurrent updates",
            operation, report_id
        );
        Err(ReviewError::Store(anyhow::anyhow!(
            "report {} is being updated concurrently",
            report_id
        )))
    }

    fn load(&self, report_id: &str) -> Result<ModerationReport, ReviewError> {
        self.writer
            .store()
            .get_report(report_id)?
            .ok_or_else(|| ReviewError::NotFound(report_id.to_string()))
    }

    fn notify_visibility_change(&self, report: &ModerationReport, hidden: bool) {
        let Some(author_id) = report.author_id.as_deref() else {
            return;
        };
        let target = report.target();
        if hidden {
            self.notifications
                .content_hidden(author_id, &target, &report.id);
        } else {
            self.notifications
                .content_restored(author_id, &target, &report.id);
        }
    }
}
