use crate::content_store::{ContentRef, PendingContent};
use crate::gateway::AnalysisInput;
use serde::Serialize;
use std::fmt;

/// The kinds of enrichment work, one queue and one scanner each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkKind {
    /// Posts and job postings.
    ModeratePost,
    ModerateComment,
    TagContent,
    EmbedContent,
    EmbedSkill,
    RefreshUserInterests,
}

impl WorkKind {
    pub const ALL: [WorkKind; 6] = [
        WorkKind::ModeratePost,
        WorkKind::ModerateComment,
        WorkKind::TagContent,
        WorkKind::EmbedContent,
        WorkKind::EmbedSkill,
        WorkKind::RefreshUserInterests,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkKind::ModeratePost => "moderate-post",
            WorkKind::ModerateComment => "moderate-comment",
            WorkKind::TagContent => "tag-content",
            WorkKind::EmbedContent => "embed-content",
            WorkKind::EmbedSkill => "embed-skill",
            WorkKind::RefreshUserInterests => "refresh-user-interests",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work, produced by a scanner and consumed by exactly one worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub kind: WorkKind,
    pub target: ContentRef,
    pub author_id: Option<String>,
    pub title: Option<String>,
    pub content: String,
    /// Unix seconds.
    pub enqueued_at: i64,
}

impl WorkItem {
    pub fn from_pending(kind: WorkKind, pending: PendingContent, enqueued_at: i64) -> Self {
        Self {
            kind,
            target: pending.target,
            author_id: pending.author_id,
            title: pending.title,
            content: pending.content,
            enqueued_at,
        }
    }

    pub fn analysis_input(&self) -> AnalysisInput {
        AnalysisInput {
            content_id: self.target.content_id.clone(),
            title: self.title.clone(),
            content: self.content.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names_round_trip() {
        for kind in WorkKind::ALL {
            assert_eq!(WorkKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(WorkKind::parse("moderate-video"), None);
        assert_eq!(
            serde_json::to_string(&WorkKind::RefreshUserInterests).unwrap(),
            "\"refresh-user-interests\""
        );
    }
}
