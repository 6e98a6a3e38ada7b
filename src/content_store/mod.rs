mod models;
mod schema;
mod sqlite_content_store;

pub use models::*;
pub use schema::CONTENT_VERSIONED_SCHEMAS;
pub use sqlite_content_store::SqliteContentStore;

use anyhow::Result;

/// Result of a compare-and-set on a report's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateUpdate {
    Applied,
    /// The report was not in the expected state anymore.
    Stale,
    /// Reopening an AI report would leave two unresolved AI reports for the same content.
    Conflict,
}

pub trait ContentStore: Send + Sync {
    // Application-layer writes
    fn insert_post(&self, author_id: &str, title: &str, content: &str) -> Result<String>;
    fn insert_job_posting(&self, author_id: &str, title: &str, content: &str) -> Result<String>;
    fn insert_comment(&self, author_id: &str, post_id: &str, content: &str) -> Result<String>;
    fn insert_skill(&self, name: &str, description: Option<&str>) -> Result<String>;
    fn insert_profile(&self, user_id: &str, display_name: &str) -> Result<()>;

    fn get_content(&self, target: &ContentRef) -> Result<Option<ContentRecord>>;

    // Discovery predicates
    /// Posts, job postings or comments not yet moderated and not hidden.
    fn list_unprocessed(&self, content_type: ContentType) -> Result<Vec<PendingContent>>;
    /// Moderated posts or job postings without tags.
    fn list_untagged(&self, content_type: ContentType) -> Result<Vec<PendingContent>>;
    /// Moderated posts or job postings without a content embedding.
    fn list_missing_embedding(&self, content_type: ContentType) -> Result<Vec<PendingContent>>;
    fn list_skills_missing_embedding(&self) -> Result<Vec<PendingContent>>;
    /// Profiles with interest tags but no interest embedding. The content is the
    /// concatenated interest text the embedding is computed from.
    fn list_profiles_missing_interest_embedding(&self) -> Result<Vec<PendingContent>>;

    // Enrichment writes
    /// Marks the content processed and, when `flagged`, creates an unresolved AI
    /// report and hides the content unless one is already open. Runs in one transaction.
    fn apply_moderation_result(
        &self,
        target: &ContentRef,
        scores: &ModerationScores,
        flagged: bool,
    ) -> Result<ModerationOutcome>;
    /// Upserts the tags, links them to the content and to the author's interests,
    /// and clears the author's interest embedding.
    fn set_content_tags(&self, target: &ContentRef, tags: &TagSet) -> Result<Vec<Tag>>;
    fn set_content_embedding(&self, target: &ContentRef, embedding: &[f32]) -> Result<bool>;
    fn set_skill_embedding(&self, skill_id: &str, embedding: &[f32]) -> Result<bool>;
    /// Stores the vector only if the profile's interest text still equals
    /// `source_text`, the text the vector was computed from.
    fn set_user_interest_embedding(
        &self,
        user_id: &str,
        embedding: &[f32],
        source_text: &str,
    ) -> Result<bool>;
    fn get_profile_interests(&self, user_id: &str) -> Result<Vec<Tag>>;
    fn set_content_hidden(&self, target: &ContentRef, hidden: bool) -> Result<bool>;

    // Moderation reports
    fn insert_report(&self, report: &NewReport) -> Result<ModerationReport>;
    fn get_report(&self, id: &str) -> Result<Option<ModerationReport>>;
    fn list_reports(&self) -> Result<Vec<ModerationReport>>;
    fn find_unresolved_ai_report(&self, target: &ContentRef) -> Result<Option<ModerationReport>>;
    /// Moves the report from `expected` to `next` and, if `hide_content` is set,
    /// updates the reported content's visibility in the same transaction.
    fn update_report_state(
        &self,
        id: &str,
        expected: ReportState,
        next: ReportState,
        hide_content: Option<bool>,
    ) -> Result<StateUpdate>;

    // Notifications
    fn insert_notification(&self, notification: &Notification) -> Result<()>;
    fn list_notifications(&self, user_id: &str) -> Result<Vec<Notification>>;
}
