//! Completion back-ends for Starling agents.
//!
//! Agents consume language models through the [`CompletionProvider`] trait
//! and never see a vendor API directly. Two adapters ship with the crate:
//! [`AnthropicProvider`] (primary) and [`OpenAiProvider`] (fallback). The
//! coordination layers treat the provider as an opaque capability; a
//! collective runs fine with no provider wired at all.

pub mod anthropic;
pub mod openai;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;

/// Default model when neither the request nor the provider names one.
pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Environment variable holding the Anthropic API key.
pub const ANTHROPIC_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Environment variable holding the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Interface every model back-end implements.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Generate a completion for the given request.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Short provider name, e.g. "anthropic".
    fn name(&self) -> &str;
}

/// A single completion request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

/// The text result of a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: String,
    pub finish_reason: String,
    pub tokens_used: u32,
}

/// Common provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    /// Override the endpoint, e.g. for a proxy. `None` uses the vendor URL.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Transient failures (network, 429, 5xx) are retried up to this many
    /// times with backoff before surfacing.
    pub max_retries: u32,
    pub default_model: String,
}

impl ProviderConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: None,
            timeout_secs: 60,
            max_retries: 3,
            default_model: DEFAULT_MODEL.to_string(),
        }
    }

    /// Read the key from an environment variable, preferring the
    /// environment over the provided fallback.
    pub fn from_env(var: &str, fallback: impl Into<String>) -> Self {
        let key = std::env::var(var).ok().filter(|k| !k.is_empty());
        Self::new(key.unwrap_or_else(|| fallback.into()))
    }

    /// Config keyed from `ANTHROPIC_API_KEY`, falling back to `fallback`
    /// (e.g. a key carried in application config).
    pub fn anthropic_from_env(fallback: impl Into<String>) -> Self {
        Self::from_env(ANTHROPIC_API_KEY_ENV, fallback)
    }

    /// Config keyed from `OPENAI_API_KEY`, falling back to `fallback`.
    pub fn openai_from_env(fallback: impl Into<String>) -> Self {
        Self::from_env(OPENAI_API_KEY_ENV, fallback)
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }
}

/// Errors a provider can report.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("rate limit exceeded")]
    RateLimit,

    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("malformed provider response: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

pub(crate) fn status_error(status: u16, message: String) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Authentication(message),
        429 => ProviderError::RateLimit,
        _ => ProviderError::Api { status, message },
    }
}

/// Whether an error is worth retrying: transport faults, rate limits, and
/// server-side errors. Auth failures and malformed responses are not.
pub(crate) fn is_retryable(error: &ProviderError) -> bool {
    match error {
        ProviderError::Network(_) | ProviderError::RateLimit => true,
        ProviderError::Api { status, .. } => (500..600).contains(status),
        _ => false,
    }
}

/// Linear backoff before retry `attempt` (1-based).
pub(crate) fn retry_delay(attempt: u32) -> Duration {
    Duration::from_millis(500) * attempt
}
