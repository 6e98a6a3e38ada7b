use super::provider::{AiProvider, AnalysisInput, FailureClass, ProviderError};
use crate::cache::{CacheKey, ProjectionCache};
use crate::content_store::{ModerationScores, TagSet};
use crate::server::metrics;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Most tags kept from a single tagging answer.
pub const MAX_TAGS: usize = 6;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    #[error("transient provider failure after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    #[error("malformed provider response after {attempts} attempt(s): {message}")]
    MalformedResponse { attempts: u32, message: String },

    #[error("permanent provider failure after {attempts} attempt(s): {message}")]
    Permanent { attempts: u32, message: String },

    #[error("provider call did not complete within {0:?}")]
    Timeout(Duration),
}

impl GatewayError {
    fn from_provider(err: ProviderError, attempts: u32) -> Self {
        let message = err.to_string();
        match err.class() {
            FailureClass::Transient => GatewayError::Transient { attempts, message },
            FailureClass::Malformed => GatewayError::MalformedResponse { attempts, message },
            FailureClass::Permanent => GatewayError::Permanent { attempts, message },
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            GatewayError::Transient { .. } => "transient",
            GatewayError::MalformedResponse { .. } => "malformed_response",
            GatewayError::Permanent { .. } => "permanent",
            GatewayError::Timeout(_) => "timeout",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisRequest {
    Moderate(AnalysisInput),
    Tag(AnalysisInput),
    Embed(String),
}

impl AnalysisRequest {
    pub fn operation(&self) -> &'static str {
        match self {
            AnalysisRequest::Moderate(_) => "moderate",
            AnalysisRequest::Tag(_) => "tag",
            AnalysisRequest::Embed(_) => "embed",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Analysis {
    Scores(ModerationScores),
    Tags(TagSet),
    Embedding(Vec<f32>),
}

/// Exponential backoff with jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_ratio: f64,
    /// Also retry connection errors, 5xx, 429 and request timeouts.
    pub retry_transient: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(2),
            jitter_ratio: 0.2,
            retry_transient: false,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based) before the next one:
    /// `base_delay * 2^(attempt - 1)`, scaled by a random factor in `1 ± jitter_ratio`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let nominal = self.base_delay.as_secs_f64() * f64::from(1u32 << exponent);
        let jitter = if self.jitter_ratio > 0.0 {
            rand::rng().random_range(-self.jitter_ratio..=self.jitter_ratio)
        } else {
            0.0
        };
        Duration::from_secs_f64((nominal * (1.0 + jitter)).max(0.0))
    }

    pub fn should_retry(&self, class: FailureClass) -> bool {
        match class {
            FailureClass::Malformed => true,
            FailureClass::Transient => self.retry_transient,
            FailureClass::Permanent => false,
        }
    }
}

/// Single entry point to the external AI provider.
///
/// Every call is bounded by `timeout` (all attempts and backoff included) and
/// acquires a permit from a limiter shared by every worker pool. The permit is
/// held for one attempt, never across a backoff sleep.
pub struct Gateway {
    provider: Arc<dyn AiProvider>,
    policy: RetryPolicy,
    timeout: Duration,
    limiter: Arc<Semaphore>,
    embedding_cache: Option<ProjectionCache>,
}

impl Gateway {
    pub fn new(
        provider: Arc<dyn AiProvider>,
        policy: RetryPolicy,
        timeout: Duration,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            provider,
            policy,
            timeout,
            limiter: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
            embedding_cache: None,
        }
    }

    /// Memoizes embedding requests under `Embedding:{text}`.
    pub fn with_embedding_cache(mut self, cache: ProjectionCache) -> Self {
        self.embedding_cache = Some(cache);
        self
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub async fn analyze(&self, request: AnalysisRequest) -> Result<Analysis, GatewayError> {
        if let (AnalysisRequest::Embed(text), Some(cache)) = (&request, &self.embedding_cache) {
            if let Some(vector) = cache.get::<Vec<f32>>(&CacheKey::embedding(text)) {
                debug!("Embedding served from cache");
                return Ok(Analysis::Embedding(vector));
            }
        }

        let operation = request.operation();
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.call_with_retries(&request))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.timeout)),
        };
        let outcome = match &result {
            Ok(_) => "ok",
            Err(err) => err.label(),
        };
        metrics::record_gateway_call(operation, outcome, started.elapsed());

        if let (Ok(Analysis::Embedding(vector)), AnalysisRequest::Embed(text), Some(cache)) =
            (&result, &request, &self.embedding_cache)
        {
            cache.set(&CacheKey::embedding(text), vector);
        }
        result
    }

    pub async fn moderate(&self, input: AnalysisInput) -> Result<ModerationScores, GatewayError> {
        match self.analyze(AnalysisRequest::Moderate(input)).await? {
            Analysis::Scores(scores) => Ok(scores),
            other => Err(unexpected("scores", &other)),
        }
    }

    pub async fn tag(&self, input: AnalysisInput) -> Result<TagSet, GatewayError> {
        match self.analyze(AnalysisRequest::Tag(input)).await? {
            Analysis::Tags(tags) => Ok(tags),
            other => Err(unexpected("tags", &other)),
        }
    }

    pub async fn embed(&self, text: impl Into<String>) -> Result<Vec<f32>, GatewayError> {
        match self.analyze(AnalysisRequest::Embed(text.into())).await? {
            Analysis::Embedding(vector) => Ok(vector),
            other => Err(unexpected("embedding", &other)),
        }
    }

    async fn call_with_retries(&self, request: &AnalysisRequest) -> Result<Analysis, GatewayError> {
        let operation = request.operation();
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = {
                let _permit = self.limiter.acquire().await.map_err(|_| {
                    GatewayError::Permanent {
                        attempts: attempt,
                        message: "gateway limiter closed".to_string(),
                    }
                })?;
                self.call_once(request).await
            };

            let err = match result.and_then(validate) {
                Ok(analysis) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Provider call succeeded after retry");
                    }
                    return Ok(analysis);
                }
                Err(err) => err,
            };

            let class = err.class();
            if attempt >= max_attempts || !self.policy.should_retry(class) {
                return Err(GatewayError::from_provider(err, attempt));
            }

            let delay = self.policy.delay_for(attempt);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Provider call failed, retrying"
            );
            metrics::record_gateway_retry(operation, class.as_str());
            tokio::time::sleep(delay).await;
        }
    }

    async fn call_once(&self, request: &AnalysisRequest) -> Result<Analysis, ProviderError> {
        match request {
            AnalysisRequest::Moderate(input) => {
                self.provider.score_toxicity(input).await.map(Analysis::Scores)
            }
            AnalysisRequest::Tag(input) => self.provider.suggest_tags(input).await.map(Analysis::Tags),
            AnalysisRequest::Embed(text) => self.provider.embed(text).await.map(Analysis::Embedding),
        }
    }
}

fn unexpected(expected: &str, got: &Analysis) -> GatewayError {
    GatewayError::MalformedResponse {
        attempts: 1,
        message: format!("expected {}, got {:?}", expected, got),
    }
}

/// Rejects answers that parsed but are unusable.
fn validate(analysis: Analysis) -> Result<Analysis, ProviderError> {
    match analysis {
        Analysis::Scores(scores) => {
            let all = [
                scores.toxicity,
                scores.severe_toxicity,
                scores.obscene,
                scores.threat,
                scores.insult,
                scores.identity_attack,
                scores.sexual_explicit,
            ];
            if all.iter().any(|s| !(0.0..=1.0).contains(s)) {
                return Err(ProviderError::MalformedResponse(format!(
                    "score out of [0, 1]: {:?}",
                    scores
                )));
            }
            Ok(Analysis::Scores(scores))
        }
        Analysis::Tags(mut tags) => {
            tags.tags.retain(|t| !t.english.trim().is_empty());
            if tags.tags.is_empty() || tags.language.trim().is_empty() {
                return Err(ProviderError::MalformedResponse(
                    "tagging answer without language or tags".to_string(),
                ));
            }
            tags.tags.truncate(MAX_TAGS);
            Ok(Analysis::Tags(tags))
        }
        Analysis::Embedding(vector) => {
            if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
                return Err(ProviderError::MalformedResponse(
                    "empty or non-finite embedding".to_string(),
                ));
            }
            Ok(Analysis::Embedding(vector))
        }
    }
}
