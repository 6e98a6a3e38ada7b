//! Scriptable in-memory provider for unit tests.

use super::provider::{AiProvider, AnalysisInput, ProviderError};
use crate::content_store::{ModerationScores, TagSet, TagSuggestion};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct ScriptedProvider {
    pub calls: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    in_flight: AtomicUsize,
    failures_left: AtomicUsize,
    failure: Option<ProviderError>,
    always_fail: bool,
    latency: Duration,
    scores: Mutex<ModerationScores>,
    tags: TagSet,
    embedding: Vec<f32>,
    call_times: Mutex<Vec<Instant>>,
}

impl ScriptedProvider {
    fn base() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            failures_left: AtomicUsize::new(0),
            failure: None,
            always_fail: false,
            latency: Duration::ZERO,
            scores: Mutex::new(ModerationScores::default()),
            tags: TagSet {
                language: "English".into(),
                tags: vec![
                    TagSuggestion {
                        english: "rust".into(),
                        arabic: "صدأ".into(),
                        description: "programming language".into(),
                    },
                    TagSuggestion {
                        english: "jobs".into(),
                        arabic: "وظائف".into(),
                        description: "hiring".into(),
                    },
                    TagSuggestion {
                        english: "backend".into(),
                        arabic: "خلفية".into(),
                        description: "server side".into(),
                    },
                ],
            },
            embedding: vec![0.25, 0.5, 0.75],
            call_times: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scores(scores: ModerationScores) -> Self {
        let provider = Self::base();
        *provider.scores.lock().unwrap() = scores;
        provider
    }

    pub fn with_tags(tags: TagSet) -> Self {
        Self {
            tags,
            ..Self::base()
        }
    }

    pub fn with_embedding(embedding: Vec<f32>) -> Self {
        Self {
            embedding,
            ..Self::base()
        }
    }

    pub fn always_failing(error: ProviderError) -> Self {
        Self {
            failure: Some(error),
            always_fail: true,
            ..Self::base()
        }
    }

    pub fn fail_first(mut self, count: usize, error: ProviderError) -> Self {
        self.failures_left = AtomicUsize::new(count);
        self.failure = Some(error);
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_scores(&self, scores: ModerationScores) {
        *self.scores.lock().unwrap() = scores;
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.call_times.lock().unwrap().clone()
    }

    async fn enter(&self) -> Result<(), ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(failure) = &self.failure {
            if self.always_fail {
                return Err(failure.clone());
            }
            let consumed = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if consumed {
                return Err(failure.clone());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn score_toxicity(
        &self,
        _input: &AnalysisInput,
    ) -> Result<ModerationScores, ProviderError> {
        self.enter().await?;
        Ok(*self.scores.lock().unwrap())
    }

    async fn suggest_tags(&self, _input: &AnalysisInput) -> Result<TagSet, ProviderError> {
        self.enter().await?;
        Ok(self.tags.clone())
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        self.enter().await?;
        Ok(self.embedding.clone())
    }
}
