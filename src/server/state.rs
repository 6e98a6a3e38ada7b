use axum::extract::FromRef;

use crate::background_jobs::SchedulerHandle;
use crate::moderation::ReviewWorkflow;
use crate::pipeline::{ContentWriter, WorkQueues};
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedReviewWorkflow = Arc<ReviewWorkflow>;
pub type OptionalSchedulerHandle = Option<SchedulerHandle>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub writer: ContentWriter,
    pub review_workflow: GuardedReviewWorkflow,
    pub queues: WorkQueues,
    pub scheduler_handle: OptionalSchedulerHandle,
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}

impl FromRef<ServerState> for ContentWriter {
    fn from_ref(input: &ServerState) -> Self {
        input.writer.clone()
    }
}

impl FromRef<ServerState> for GuardedReviewWorkflow {
    fn from_ref(input: &ServerState) -> Self {
        input.review_workflow.clone()
    }
}

impl FromRef<ServerState> for WorkQueues {
    fn from_ref(input: &ServerState) -> Self {
        input.queues.clone()
    }
}

impl FromRef<ServerState> for OptionalSchedulerHandle {
    fn from_ref(input: &ServerState) -> Self {
        input.scheduler_handle.clone()
    }
}
