//! Score thresholds and the human review workflow over moderation reports.

mod review;
mod thresholds;

pub use review::{ReviewError, ReviewResult, ReviewWorkflow};
pub use thresholds::Thresholds;
