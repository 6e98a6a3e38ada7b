//! Scriptable AI provider for end-to-end tests.

use async_trait::async_trait;
use content_pipeline::content_store::{ModerationScores, TagSet, TagSuggestion};
use content_pipeline::gateway::{AiProvider, AnalysisInput, ProviderError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub struct FakeProvider {
    scores: Mutex<ModerationScores>,
    /// Number of upcoming calls that answer with garbage.
    malformed_remaining: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            scores: Mutex::new(ModerationScores::default()),
            malformed_remaining: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn set_scores(&self, scores: ModerationScores) {
        *self.scores.lock().unwrap() = scores;
    }

    pub fn fail_next(&self, count: usize) {
        self.malformed_remaining.store(count, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .malformed_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(ProviderError::MalformedResponse(
                "expected a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl AiProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn score_toxicity(
        &self,
        _input: &AnalysisInput,
    ) -> Result<ModerationScores, ProviderError> {
        self.begin_call()?;
        Ok(*self.scores.lock().unwrap())
    }

    async fn suggest_tags(&self, _input: &AnalysisInput) -> Result<TagSet, ProviderError> {
        self.begin_call()?;
        let tag = |english: &str, arabic: &str| TagSuggestion {
            english: english.to_string(),
            arabic: arabic.to_string(),
            description: format!("About {}", english),
        };
        Ok(TagSet {
            language: "en".to_string(),
            tags: vec![
                tag("rust", "رست"),
                tag("hiring", "توظيف"),
                tag("backend", "الخلفية"),
            ],
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        self.begin_call()?;
        Ok(vec![text.len() as f32, 0.5, 1.0])
    }
}
