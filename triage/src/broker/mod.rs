//! LLM broker: schema-constrained calls behind a provider-isolating result.
//!
//! The broker never lets a provider error escape as a panic or a raw HTTP
//! error; everything comes back as `Result<T, BrokerFailure>` with the
//! failure classified for the runtime's replan policy. Structured outputs
//! (plans, classifications) use JSON-schema response formats; the retrieval
//! loop's next-query decision uses a line-protocol text completion with
//! tunable sampling parameters.

mod mock;
mod openai;

pub use mock::MockBroker;
pub use openai::OpenAiBroker;

use async_trait::async_trait;

use crate::plan::{ClassificationOutput, ConvClassificationPlan};

/// How a provider failure should be treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// 4xx-class: bad request, auth, permissions. Fatal for the current tick.
    Client,
    /// 5xx/timeout/transport. Retryable; counts as a planning failure.
    Server,
    /// The model's constrained output never parsed within the retry budget.
    Validation,
}

/// Provider failure: kind + one failure-log line for the context.
#[derive(Clone, Debug)]
pub struct BrokerFailure {
    pub kind: ProviderErrorKind,
    pub failure_log: String,
}

impl BrokerFailure {
    pub fn client(log: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Client,
            failure_log: log.into(),
        }
    }

    pub fn server(log: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Server,
            failure_log: log.into(),
        }
    }

    pub fn validation(log: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Validation,
            failure_log: log.into(),
        }
    }

    /// Server-class failures are the only retryable ones.
    pub fn is_retryable(&self) -> bool {
        self.kind == ProviderErrorKind::Server
    }
}

impl std::fmt::Display for BrokerFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            ProviderErrorKind::Client => "provider_client_error",
            ProviderErrorKind::Server => "provider_server_error",
            ProviderErrorKind::Validation => "validation_failure",
        };
        write!(f, "{kind}: {}", self.failure_log)
    }
}

pub type BrokerResult<T> = Result<T, BrokerFailure>;

/// Sampling parameters for text-protocol calls. The retrieval loop tunes
/// these per iteration; structured calls use provider defaults.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SamplingParams {
    pub temperature: f32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            top_p: 1.0,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
        }
    }
}

/// LLM broker interface.
///
/// **Interaction**: the runtime calls `plan`/`classify`/`summarize`; the
/// agentic retrieval loop calls `decide_next_query` with its tuned params.
#[async_trait]
pub trait LlmBroker: Send + Sync {
    /// Requests a sampling plan as schema-constrained structured output.
    async fn plan(&self, prompt: &str) -> BrokerResult<ConvClassificationPlan>;

    /// Classifies one batch as schema-constrained structured output.
    async fn classify(&self, prompt: &str) -> BrokerResult<Vec<ClassificationOutput>>;

    /// Produces the user-facing run summary (plain text).
    async fn summarize(&self, prompt: &str) -> BrokerResult<String>;

    /// Retrieval-loop decision call: returns the model's raw line-protocol
    /// reply (`TERMINATE` / `NEXT_QUERY: ...`).
    async fn decide_next_query(
        &self,
        prompt: &str,
        params: &SamplingParams,
    ) -> BrokerResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: Display carries the taxonomy tag and the log line.
    #[test]
    fn failure_display_has_taxonomy_tag() {
        assert_eq!(
            BrokerFailure::client("401 unauthorized").to_string(),
            "provider_client_error: 401 unauthorized"
        );
        assert_eq!(
            BrokerFailure::server("timeout").to_string(),
            "provider_server_error: timeout"
        );
        assert_eq!(
            BrokerFailure::validation("bad json").to_string(),
            "validation_failure: bad json"
        );
    }

    /// **Scenario**: only server failures are retryable.
    #[test]
    fn retryability() {
        assert!(BrokerFailure::server("x").is_retryable());
        assert!(!BrokerFailure::client("x").is_retryable());
        assert!(!BrokerFailure::validation("x").is_retryable());
    }
}
