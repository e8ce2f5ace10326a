// src/providers/mod.rs
// Embedding and synthesis provider abstraction layer

mod deepseek;
mod fallback;
mod gemini;
mod ollama;
mod openai;

pub use deepseek::DeepSeekSynthesis;
pub use fallback::{ChainConfig, EmbeddingChain, SynthesisChain};
pub use gemini::GeminiSynthesis;
pub use ollama::{OllamaEmbeddings, OllamaSynthesis};
pub use openai::OpenAiEmbeddings;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::config::SynthesisConfig;

/// Provider identities across both roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    OpenAi,
    DeepSeek,
    Gemini,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Gemini => "gemini",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure classification applied before an error leaves an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Timeout,
    Unavailable,
    RateLimited,
    ModelNotFound,
    Auth,
    Other,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
            Self::RateLimited => "rate_limited",
            Self::ModelNotFound => "model_not_found",
            Self::Auth => "auth",
            Self::Other => "other",
        }
    }
}

/// Classified provider failure
#[derive(Debug, Clone)]
pub struct ProviderError {
    pub provider: Provider,
    pub class: FailureClass,
    pub message: String,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}): {}",
            self.provider,
            self.class.as_str(),
            self.message
        )
    }
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn new(provider: Provider, class: FailureClass, message: impl Into<String>) -> Self {
        Self {
            provider,
            class,
            message: message.into(),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn from_reqwest(provider: Provider, err: &reqwest::Error) -> Self {
        let class = if err.is_timeout() {
            FailureClass::Timeout
        } else if err.is_connect() {
            FailureClass::Unavailable
        } else {
            FailureClass::Other
        };
        Self::new(provider, class, err.to_string())
    }

    /// Classify a non-success HTTP status
    pub fn from_status(provider: Provider, status: reqwest::StatusCode, body: &str) -> Self {
        let class = match status.as_u16() {
            429 => FailureClass::RateLimited,
            401 | 403 => FailureClass::Auth,
            404 => FailureClass::ModelNotFound,
            500..=599 => FailureClass::Unavailable,
            _ => FailureClass::Other,
        };
        let snippet: String = body.chars().take(200).collect();
        Self::new(provider, class, format!("HTTP {status}: {snippet}"))
    }
}

/// Per-call knobs; defaults come from `SynthesisConfig`
#[derive(Debug, Clone, Copy)]
pub struct CallOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Fixed seed for determinism where the provider supports one
    pub seed: Option<u64>,
    pub deadline: Duration,
}

impl CallOptions {
    pub fn from_config(config: &SynthesisConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            seed: Some(config.seed),
            deadline: Duration::from_secs(30),
        }
    }

    /// Options for embedding calls, where only the deadline applies
    pub fn embedding(deadline: Duration) -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 0,
            seed: None,
            deadline,
        }
    }
}

impl Default for CallOptions {
    fn default() -> Self {
        Self {
            temperature: 0.3,
            max_tokens: 2048,
            seed: Some(42),
            deadline: Duration::from_secs(30),
        }
    }
}

/// Text → fixed-dimension vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn dimensions(&self) -> usize;

    async fn embed(
        &self,
        text: &str,
        options: &CallOptions,
    ) -> std::result::Result<Vec<f32>, ProviderError>;
}

/// (system prompt, user prompt, options) → text
#[async_trait]
pub trait SynthesisProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn model(&self) -> &str;

    async fn synthesize(
        &self,
        system: &str,
        user: &str,
        options: &CallOptions,
    ) -> std::result::Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let rate_limited =
            ProviderError::from_status(Provider::DeepSeek, reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(rate_limited.class, FailureClass::RateLimited);

        let auth =
            ProviderError::from_status(Provider::DeepSeek, reqwest::StatusCode::UNAUTHORIZED, "");
        assert_eq!(auth.class, FailureClass::Auth);

        let drift = ProviderError::from_status(
            Provider::Gemini,
            reqwest::StatusCode::NOT_FOUND,
            "model not found",
        );
        assert_eq!(drift.class, FailureClass::ModelNotFound);

        let down =
            ProviderError::from_status(Provider::Ollama, reqwest::StatusCode::BAD_GATEWAY, "");
        assert_eq!(down.class, FailureClass::Unavailable);
    }

    #[test]
    fn test_status_body_is_truncated() {
        let long_body = "x".repeat(1000);
        let err = ProviderError::from_status(
            Provider::OpenAi,
            reqwest::StatusCode::BAD_REQUEST,
            &long_body,
        );
        assert!(err.message.len() < 300);
    }
}
