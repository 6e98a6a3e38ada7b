//! Access to the external AI service: the provider seam, an OpenAI-compatible
//! client, and the retrying, rate-limited gateway every worker goes through.

mod openai;
mod provider;
mod resilience;

#[cfg(test)]
pub(crate) mod testing;

pub use openai::OpenAiProvider;
pub use provider::{AiProvider, AnalysisInput, FailureClass, ProviderError};
pub use resilience::{
    Analysis, AnalysisRequest, Gateway, GatewayError, RetryPolicy, MAX_TAGS,
};
