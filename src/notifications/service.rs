//! Builds moderation notifications and hands them to the notifier off the
//! caller's task.

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::Notifier;
use crate::content_store::{ContentRef, Notification, NotificationType, AI_REPORT_REASON};

#[derive(Clone)]
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    /// Tells the author their content was hidden by a moderation report.
    pub fn content_hidden(
        &self,
        user_id: &str,
        target: &ContentRef,
        report_id: &str,
    ) -> JoinHandle<()> {
        self.dispatch(build(
            user_id,
            NotificationType::ContentHidden,
            format!("Your {} was hidden", describe(target)),
            Some(AI_REPORT_REASON.to_string()),
            target,
            report_id,
        ))
    }

    pub fn content_restored(
        &self,
        user_id: &str,
        target: &ContentRef,
        report_id: &str,
    ) -> JoinHandle<()> {
        self.dispatch(build(
            user_id,
            NotificationType::ContentRestored,
            format!("Your {} is visible again", describe(target)),
            Some("A moderator reviewed it and restored it.".to_string()),
            target,
            report_id,
        ))
    }

    /// Fire-and-forget: failures are logged and never reach the caller.
    fn dispatch(&self, notification: Notification) -> JoinHandle<()> {
        let notifier = self.notifier.clone();
        tokio::task::spawn_blocking(move || match notifier.notify(&notification) {
            Ok(()) => debug!(
                "Sent {} notification to user {}",
                notification.notification_type.as_str(),
                notification.user_id
            ),
            Err(e) => warn!(
                "Failed to send {} notification to user {}: {}",
                notification.notification_type.as_str(),
                notification.user_id,
                e
            ),
        })
    }
}

fn describe(target: &ContentRef) -> &'static str {
    use crate::content_store::ContentType::*;
    match target.content_type {
        Post => "post",
        Comment => "comment",
        JobPosting => "job posting",
        Skill => "skill",
        Profile => "profile",
        Message => "message",
        Video => "video",
        Image => "image",
        File => "file",
    }
}

fn build(
    user_id: &str,
    notification_type: NotificationType,
    title: String,
    body: Option<String>,
    target: &ContentRef,
    report_id: &str,
) -> Notification {
    Notification {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        notification_type,
        title,
        body,
        data: serde_json::json!({
            "content_type": target.content_type.as_str(),
            "content_id": target.content_id,
            "report_id": report_id,
        }),
        created_at: chrono::Utc::now().timestamp(),
        read_at: None,
    }
}
