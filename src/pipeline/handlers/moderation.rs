use crate::content_store::ModerationOutcome;
use crate::gateway::Gateway;
use crate::moderation::Thresholds;
use crate::notifications::NotificationService;
use crate::pipeline::work_item::{WorkItem, WorkKind};
use crate::pipeline::worker::{WorkError, WorkHandler, WorkOutcome};
use crate::pipeline::writer::ContentWriter;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Scores posts, job postings and comments and reports the ones over threshold.
pub struct ModerationHandler {
    gateway: Arc<Gateway>,
    writer: ContentWriter,
    thresholds: Thresholds,
    notifications: NotificationService,
}

impl ModerationHandler {
    pub fn new(
        gateway: Arc<Gateway>,
        writer: ContentWriter,
        thresholds: Thresholds,
        notifications: NotificationService,
    ) -> Self {
        Self {
            gateway,
            writer,
            thresholds,
            notifications,
        }
    }
}

#[async_trait]
impl WorkHandler for ModerationHandler {
    async fn handle(&self, item: &WorkItem) -> Result<WorkOutcome, WorkError> {
        if !matches!(item.kind, WorkKind::ModeratePost | WorkKind::ModerateComment) {
            return Err(WorkError::UnsupportedKind("moderation", item.kind));
        }

        // Duplicate items for already moderated content are not scored again
        match self.writer.store().get_content(&item.target)? {
            Some(record) if record.is_processed != Some(true) => {}
            _ => {
                debug!("{} is already moderated or gone, skipping", item.target);
                return Ok(WorkOutcome::Skipped);
            }
        }

        let scores = self.gateway.moderate(item.analysis_input()).await?;
        let flagged = self.thresholds.flagged_categories(&scores);

        let outcome = match self
            .writer
            .apply_moderation_result(&item.target, &scores, !flagged.is_empty())?
        {
            ModerationOutcome::Clean => WorkOutcome::Clean,
            ModerationOutcome::Reported(report) => {
                info!(
                    "Reported {} ({}), report {}",
                    item.target,
                    flagged.join(", "),
                    report.id
                );
                if let Some(author_id) = report.author_id.as_deref() {
                    self.notifications
                        .content_hidden(author_id, &item.target, &report.id);
                }
                WorkOutcome::Reported
            }
            ModerationOutcome::AlreadyReported => WorkOutcome::AlreadyReported,
            ModerationOutcome::AlreadyProcessed | ModerationOutcome::Missing => {
                WorkOutcome::Skipped
            }
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ProjectionCache;
    use crate::content_store::{
        ContentRef, ContentStore, ContentType, ModerationScores, Notification, ReportedBy,
        SqliteContentStore,
    };
    use crate::gateway::testing::ScriptedProvider;
    use crate::gateway::{ProviderError, RetryPolicy};
    use crate::notifications::Notifier;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> anyhow::Result<()> {
            self.sent.lock().unwrap().push(notification.clone());
            Ok(())
        }
    }

    struct Fixture {
        _dir: TempDir,
        store: Arc<SqliteContentStore>,
        provider: Arc<ScriptedProvider>,
        notifier: Arc<RecordingNotifier>,
        handler: ModerationHandler,
    }

    fn fixture(provider: ScriptedProvider, max_attempts: u32) -> Fixture {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(SqliteContentStore::new(dir.path().join("content.db")).unwrap());
        let provider = Arc::new(provider);
        let gateway = Arc::new(Gateway::new(
            provider.clone(),
            RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(1),
                jitter_ratio: 0.0,
                retry_transient: false,
            },
            Duration::from_secs(5),
            2,
        ));
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = ModerationHandler::new(
            gateway,
            ContentWriter::new(store.clone(), ProjectionCache::in_memory()),
            Thresholds::default(),
            NotificationService::new(notifier.clone()),
        );
        Fixture {
            _dir: dir,
            store,
            provider,
            notifier,
            handler,
        }
    }

    fn post_item(store: &SqliteContentStore) -> WorkItem {
        let id = store.insert_post("author-1", "Title", "Body").unwrap();
        WorkItem {
            kind: WorkKind::ModeratePost,
            target: ContentRef::new(ContentType::Post, id),
            author_id: Some("author-1".into()),
            title: Some("Title".into()),
            content: "Body".into(),
            enqueued_at: 0,
        }
    }

    fn toxic() -> ModerationScores {
        ModerationScores {
            toxicity: 0.85,
            ..Default::default()
        }
    }

    async fn wait_for_notifications(notifier: &RecordingNotifier, count: usize) {
        for _ in 0..200 {
            if notifier.sent.lock().unwrap().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_clean_content_is_processed_without_report() {
        let f = fixture(ScriptedProvider::with_scores(ModerationScores::default()), 1);
        let item = post_item(&f.store);

        assert_eq!(f.handler.handle(&item).await.unwrap(), WorkOutcome::Clean);

        let record = f.store.get_content(&item.target).unwrap().unwrap();
        assert_eq!(record.is_processed, Some(true));
        assert_eq!(record.is_deleted, Some(false));
        assert!(f.store.list_reports().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_toxic_content_is_reported_hidden_and_author_notified() {
        let f = fixture(ScriptedProvider::with_scores(toxic()), 1);
        let item = post_item(&f.store);

        assert_eq!(f.handler.handle(&item).await.unwrap(), WorkOutcome::Reported);

        let reports = f.store.list_reports().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].reported_by, ReportedBy::Ai);
        assert!(reports[0].is_negative);
        assert!(!reports[0].is_resolved);
        let record = f.store.get_content(&item.target).unwrap().unwrap();
        assert_eq!(record.is_deleted, Some(true));
        assert_eq!(record.is_processed, Some(true));

        wait_for_notifications(&f.notifier, 1).await;
        let sent = f.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].user_id, "author-1");
    }

    #[tokio::test]
    async fn test_duplicate_items_create_one_report() {
        let f = fixture(ScriptedProvider::with_scores(toxic()), 1);
        let item = post_item(&f.store);

        assert_eq!(f.handler.handle(&item).await.unwrap(), WorkOutcome::Reported);
        assert_eq!(f.handler.handle(&item).await.unwrap(), WorkOutcome::Skipped);

        assert_eq!(f.store.list_reports().unwrap().len(), 1);
        // The second item never reached the provider
        assert_eq!(f.provider.calls.load(Ordering::SeqCst), 1);
        wait_for_notifications(&f.notifier, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_gateway_failure_leaves_content_unprocessed() {
        let f = fixture(
            ScriptedProvider::always_failing(ProviderError::MalformedResponse("nope".into())),
            5,
        );
        let item = post_item(&f.store);

        let err = f.handler.handle(&item).await.unwrap_err();
        assert!(matches!(err, WorkError::Gateway(_)));
        let record = f.store.get_content(&item.target).unwrap().unwrap();
        assert_eq!(record.is_processed, Some(false));
        assert_eq!(
            f.store.list_unprocessed(ContentType::Post).unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_rejects_foreign_kinds() {
        let f = fixture(ScriptedProvider::with_scores(ModerationScores::default()), 1);
        let mut item = post_item(&f.store);
        item.kind = WorkKind::EmbedContent;
        assert!(matches!(
            f.handler.handle(&item).await,
            Err(WorkError::UnsupportedKind(..))
        ));
    }
}
