use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Content
// =============================================================================

/// Kind of content a work item or a moderation report points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Post,
    Comment,
    JobPosting,
    Skill,
    Profile,
    Message,
    Video,
    Image,
    File,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Post => "post",
            ContentType::Comment => "comment",
            ContentType::JobPosting => "job_posting",
            ContentType::Skill => "skill",
            ContentType::Profile => "profile",
            ContentType::Message => "message",
            ContentType::Video => "video",
            ContentType::Image => "image",
            ContentType::File => "file",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "post" => Some(ContentType::Post),
            "comment" => Some(ContentType::Comment),
            "job_posting" => Some(ContentType::JobPosting),
            "skill" => Some(ContentType::Skill),
            "profile" => Some(ContentType::Profile),
            "message" => Some(ContentType::Message),
            "video" => Some(ContentType::Video),
            "image" => Some(ContentType::Image),
            "file" => Some(ContentType::File),
            _ => None,
        }
    }

    /// Table backing this content type, when the pipeline stores it.
    pub(crate) fn table(&self) -> Option<&'static str> {
        match self {
            ContentType::Post => Some("posts"),
            ContentType::Comment => Some("comments"),
            ContentType::JobPosting => Some("job_postings"),
            ContentType::Skill => Some("skills"),
            ContentType::Profile => Some("profiles"),
            _ => None,
        }
    }

    /// Whether content of this type can be soft-hidden by moderation.
    pub fn is_moderated(&self) -> bool {
        matches!(
            self,
            ContentType::Post | ContentType::Comment | ContentType::JobPosting
        )
    }
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentRef {
    pub content_type: ContentType,
    pub content_id: String,
}

impl ContentRef {
    pub fn new(content_type: ContentType, content_id: impl Into<String>) -> Self {
        Self {
            content_type,
            content_id: content_id.into(),
        }
    }
}

impl fmt::Display for ContentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.content_type, self.content_id)
    }
}

/// A row that matched one of the "still needs work" predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingContent {
    pub target: ContentRef,
    pub author_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
}

/// Admin read projection of a single content item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub content_type: ContentType,
    pub id: String,
    pub author_id: Option<String>,
    pub title: Option<String>,
    pub content: Option<String>,
    pub language: Option<String>,
    pub is_processed: Option<bool>,
    pub is_tagged: Option<bool>,
    pub is_deleted: Option<bool>,
    pub has_embedding: bool,
    pub tags: Vec<String>,
    pub created_at: i64,
}

// =============================================================================
// Enrichment results
// =============================================================================

/// Per-category probabilities returned by the toxicity model, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModerationScores {
    pub toxicity: f64,
    pub severe_toxicity: f64,
    pub obscene: f64,
    pub threat: f64,
    pub insult: f64,
    pub identity_attack: f64,
    pub sexual_explicit: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSuggestion {
    pub english: String,
    pub arabic: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagSet {
    pub language: String,
    pub tags: Vec<TagSuggestion>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub english_name: String,
    pub arabic_name: String,
    pub description: String,
}

// =============================================================================
// Moderation reports
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedBy {
    Ai,
    User,
    Admin,
}

impl ReportedBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportedBy::Ai => "ai",
            ReportedBy::User => "user",
            ReportedBy::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(ReportedBy::Ai),
            "user" => Some(ReportedBy::User),
            "admin" => Some(ReportedBy::Admin),
            _ => None,
        }
    }
}

/// The (resolved, negative) pair of a report, as one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    UnresolvedClean,
    UnresolvedFlagged,
    ResolvedClean,
    ResolvedFlagged,
}

impl ReportState {
    pub fn from_flags(is_resolved: bool, is_negative: bool) -> Self {
        match (is_resolved, is_negative) {
            (false, false) => ReportState::UnresolvedClean,
            (false, true) => ReportState::UnresolvedFlagged,
            (true, false) => ReportState::ResolvedClean,
            (true, true) => ReportState::ResolvedFlagged,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ReportState::ResolvedClean | ReportState::ResolvedFlagged)
    }

    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            ReportState::UnresolvedFlagged | ReportState::ResolvedFlagged
        )
    }

    pub fn with_resolved(self, is_resolved: bool) -> Self {
        Self::from_flags(is_resolved, self.is_negative())
    }

    pub fn with_negative(self, is_negative: bool) -> Self {
        Self::from_flags(self.is_resolved(), is_negative)
    }
}

pub const AI_REPORT_REASON: &str = "Your post does not follow our Community Guidelines.";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationReport {
    pub id: String,
    pub content_id: String,
    pub content_type: ContentType,
    pub author_id: Option<String>,
    pub scores: ModerationScores,
    pub reported_by: ReportedBy,
    pub reason: String,
    pub is_resolved: bool,
    pub is_negative: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ModerationReport {
    pub fn state(&self) -> ReportState {
        ReportState::from_flags(self.is_resolved, self.is_negative)
    }

    pub fn target(&self) -> ContentRef {
        ContentRef::new(self.content_type, self.content_id.clone())
    }
}

#[derive(Debug, Clone)]
pub struct NewReport {
    pub target: ContentRef,
    pub author_id: Option<String>,
    pub scores: ModerationScores,
    pub reported_by: ReportedBy,
    pub reason: String,
    pub is_negative: bool,
}

/// What `apply_moderation_result` did to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    /// Scores under every threshold; content marked processed.
    Clean,
    /// A new AI report was created and the content hidden.
    Reported(ModerationReport),
    /// Flagged, but an unresolved AI report already existed.
    AlreadyReported,
    /// Another worker already processed this content.
    AlreadyProcessed,
    /// The content row no longer exists.
    Missing,
}

// =============================================================================
// Notifications
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationType {
    ContentHidden,
    ContentRestored,
}

impl NotificationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::ContentHidden => "content_hidden",
            NotificationType::ContentRestored => "content_restored",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "content_hidden" => Some(NotificationType::ContentHidden),
            "content_restored" => Some(NotificationType::ContentRestored),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub user_id: String,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: Option<String>,
    pub data: serde_json::Value,
    pub created_at: i64,
    pub read_at: Option<i64>,
}

/// Encodes an embedding as little-endian f32 bytes.
pub fn embedding_to_blob(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
