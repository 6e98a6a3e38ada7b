use crate::gateway::Gateway;
use crate::pipeline::work_item::{WorkItem, WorkKind};
use crate::pipeline::worker::{WorkError, WorkHandler, WorkOutcome};
use crate::pipeline::writer::ContentWriter;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Asks the model for topic tags and links them to the content and its author.
pub struct TaggingHandler {
    gateway: Arc<Gateway>,
    writer: ContentWriter,
}

impl TaggingHandler {
    pub fn new(gateway: Arc<Gateway>, writer: ContentWriter) -> Self {
        Self { gateway, writer }
    }
}

#[async_trait]
impl WorkHandler for TaggingHandler {
    async fn handle(&self, item: &WorkItem) -> Result<WorkOutcome, WorkError> {
        if item.kind != WorkKind::TagContent {
            return Err(WorkError::UnsupportedKind("tagging", item.kind));
        }

        let tags = self.gateway.tag(item.analysis_input()).await?;
        let stored = self
            .writer
            .set_content_tags(&item.target, item.author_id.as_deref(), &tags)?;
        debug!(
            "Tagged {} as {} with [{}]",
            item.target,
            tags.language,
            stored
                .iter()
                .map(|t| t.english_name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(WorkOutcome::Tagged(stored.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProjectionCache;
    use crate::content_store::{
        ContentRef, ContentStore, ContentType, ModerationScores, SqliteContentStore,
    };
    use crate::gateway::testing::ScriptedProvider;
    use crate::gateway::RetryPolicy;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_tags_content_and_invalidates_interest_embedding() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteContentStore::new(dir.path().join("content.db")).unwrap());
        store.insert_profile("u1", "User").unwrap();
        store.set_user_interest_embedding("u1", &[1.0], "").unwrap();
        let id = store.insert_job_posting("u1", "Rust dev", "Backend role").unwrap();
        let target = ContentRef::new(ContentType::JobPosting, id);
        store
            .apply_moderation_result(&target, &ModerationScores::default(), false)
            .unwrap();

        let gateway = Arc::new(Gateway::new(
            Arc::new(ScriptedProvider::with_scores(ModerationScores::default())),
            RetryPolicy::default(),
            Duration::from_secs(5),
            1,
        ));
        let handler = TaggingHandler::new(
            gateway,
            ContentWriter::new(store.clone(), ProjectionCache::in_memory()),
        );
        let item = WorkItem {
            kind: WorkKind::TagContent,
            target: target.clone(),
            author_id: Some("u1".into()),
            title: Some("Rust dev".into()),
            content: "Backend role".into(),
            enqueued_at: 0,
        };

        assert_eq!(handler.handle(&item).await.unwrap(), WorkOutcome::Tagged(3));

        let record = store.get_content(&target).unwrap().unwrap();
        assert_eq!(record.is_tagged, Some(true));
        assert_eq!(record.language.as_deref(), Some("English"));
        assert_eq!(record.tags.len(), 3);
        assert_eq!(store.get_profile_interests("u1").unwrap().len(), 3);
        assert_eq!(
            store.list_profiles_missing_interest_embedding().unwrap().len(),
            1
        );
        assert!(store.list_untagged(ContentType::JobPosting).unwrap().is_empty());
    }
}
