use crate::gateway::Gateway;
use crate::pipeline::work_item::{WorkItem, WorkKind};
use crate::pipeline::worker::{WorkError, WorkHandler, WorkOutcome};
use crate::pipeline::writer::ContentWriter;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Computes content, skill and user-interest vectors.
pub struct EmbeddingHandler {
    gateway: Arc<Gateway>,
    writer: ContentWriter,
}

impl EmbeddingHandler {
    pub fn new(gateway: Arc<Gateway>, writer: ContentWriter) -> Self {
        Self { gateway, writer }
    }
}

fn embedding_text(item: &WorkItem) -> String {
    match item.kind {
        WorkKind::EmbedContent => item.analysis_input().prompt_text(),
        _ => item.content.clone(),
    }
}

#[async_trait]
impl WorkHandler for EmbeddingHandler {
    async fn handle(&self, item: &WorkItem) -> Result<WorkOutcome, WorkError> {
        if !matches!(
            item.kind,
            WorkKind::EmbedContent | WorkKind::EmbedSkill | WorkKind::RefreshUserInterests
        ) {
            return Err(WorkError::UnsupportedKind("embedding", item.kind));
        }

        let text = embedding_text(item);
        if text.trim().is_empty() {
            debug!("Nothing to embed for {}", item.target);
            return Ok(WorkOutcome::Skipped);
        }

        let vector = self.gateway.embed(text.clone()).await?;
        if self.writer.set_embedding(&item.target, &vector, &text)? {
            Ok(WorkOutcome::Embedded)
        } else {
            Ok(WorkOutcome::Skipped)
        }
    }
}
