//! The AI provider seam: what the pipeline asks of an external model.

use crate::content_store::{ModerationScores, TagSet};
use async_trait::async_trait;
use thiserror::Error;

/// Errors a single provider request can fail with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Rate limited")]
    RateLimited,

    #[error("Request timed out")]
    Timeout,

    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

/// How the gateway treats a failure when deciding whether to retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Connection errors, 5xx, 429 and per-request timeouts.
    Transient,
    /// The model answered, but not in the expected shape.
    Malformed,
    /// Anything retrying cannot fix (auth, other 4xx).
    Permanent,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureClass::Transient => "transient",
            FailureClass::Malformed => "malformed_response",
            FailureClass::Permanent => "permanent",
        }
    }
}

impl ProviderError {
    pub fn class(&self) -> FailureClass {
        match self {
            ProviderError::Connection(_) | ProviderError::RateLimited | ProviderError::Timeout => {
                FailureClass::Transient
            }
            ProviderError::Api { status, .. } if *status >= 500 => FailureClass::Transient,
            ProviderError::Api { .. } => FailureClass::Permanent,
            ProviderError::MalformedResponse(_) => FailureClass::Malformed,
        }
    }
}

/// Content handed to the model for scoring or tagging.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisInput {
    pub content_id: String,
    pub title: Option<String>,
    pub content: String,
}

impl AnalysisInput {
    /// Title and body joined the way the prompts expect them.
    pub fn prompt_text(&self) -> String {
        match self.title.as_deref() {
            Some(title) if !title.is_empty() => format!("{} {}", title, self.content),
            _ => self.content.clone(),
        }
    }
}

#[async_trait]
pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn score_toxicity(&self, input: &AnalysisInput)
        -> Result<ModerationScores, ProviderError>;

    async fn suggest_tags(&self, input: &AnalysisInput) -> Result<TagSet, ProviderError>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_classes() {
        assert_eq!(
            ProviderError::Connection("refused".into()).class(),
            FailureClass::Transient
        );
        assert_eq!(ProviderError::RateLimited.class(), FailureClass::Transient);
        assert_eq!(ProviderError::Timeout.class(), FailureClass::Transient);
        assert_eq!(
            ProviderError::Api {
                status: 503,
                message: String::new()
            }
            .class(),
            FailureClass::Transient
        );
        assert_eq!(
            ProviderError::Api {
                status: 401,
                message: String::new()
            }
            .class(),
            FailureClass::Permanent
        );
        assert_eq!(
            ProviderError::MalformedResponse("not json".into()).class(),
            FailureClass::Malformed
        );
    }

    #[test]
    fn test_prompt_text_joins_title() {
        let mut input = AnalysisInput {
            content_id: "p1".into(),
            title: Some("Hello".into()),
            content: "world".into(),
        };
        assert_eq!(input.prompt_text(), "Hello world");
        input.title = None;
        assert_eq!(input.prompt_text(), "world");
    }
}
