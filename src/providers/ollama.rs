// src/providers/ollama.rs
// Ollama adapters - local embeddings and local LLM synthesis (no auth required)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{CallOptions, EmbeddingProvider, Provider, ProviderError, SynthesisProvider};

/// Default Ollama embedding model
const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Default Ollama chat model
const DEFAULT_CHAT_MODEL: &str = "llama3.1";

/// Max characters to embed (conservative limit for local models)
const MAX_TEXT_CHARS: usize = 8192 * 4;

/// OpenAI-compatible embedding response shape
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Ollama embeddings client (OpenAI-compatible /v1/embeddings endpoint)
pub struct OllamaEmbeddings {
    base_url: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl OllamaEmbeddings {
    pub fn new(base_url: String, model: Option<String>, dimensions: usize) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
            dimensions,
            http_client,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(
        &self,
        text: &str,
        options: &CallOptions,
    ) -> std::result::Result<Vec<f32>, ProviderError> {
        let input: String = text.chars().take(MAX_TEXT_CHARS).collect();
        let body = json!({ "model": self.model, "input": input });
        let url = format!("{}/v1/embeddings", self.base_url);

        let response = self
            .http_client
            .post(&url)
            .timeout(options.deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(Provider::Ollama, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(Provider::Ollama, status, &body_text));
        }

        let resp: EmbeddingResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                Provider::Ollama,
                super::FailureClass::Other,
                format!("malformed embedding response: {e}"),
            )
        })?;

        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                ProviderError::new(
                    Provider::Ollama,
                    super::FailureClass::Other,
                    "empty embedding response",
                )
            })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

/// Ollama chat client used as the local synthesis runtime
pub struct OllamaSynthesis {
    base_url: String,
    model: String,
    http_client: reqwest::Client,
}

impl OllamaSynthesis {
    pub fn new(base_url: String, model: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            http_client,
        }
    }
}

#[async_trait]
impl SynthesisProvider for OllamaSynthesis {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn synthesize(
        &self,
        system: &str,
        user: &str,
        options: &CallOptions,
    ) -> std::result::Result<String, ProviderError> {
        let mut request_options = json!({
            "temperature": options.temperature,
            "num_predict": options.max_tokens,
        });
        if let Some(seed) = options.seed {
            request_options["seed"] = json!(seed);
        }

        let body = json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "options": request_options,
        });
        let url = format!("{}/api/chat", self.base_url);

        debug!(model = %self.model, "Ollama synthesis request");
        let response = self
            .http_client
            .post(&url)
            .timeout(options.deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(Provider::Ollama, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(Provider::Ollama, status, &body_text));
        }

        let resp: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                Provider::Ollama,
                super::FailureClass::Other,
                format!("malformed chat response: {e}"),
            )
        })?;
        Ok(resp.message.content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embed_defaults() {
        let client = OllamaEmbeddings::new("http://localhost:11434/".to_string(), None, 768);
        assert_eq!(client.base_url, "http://localhost:11434");
        assert_eq!(client.model, DEFAULT_EMBED_MODEL);
        assert_eq!(client.dimensions(), 768);
    }

    #[test]
    fn test_synthesis_custom_model() {
        let client = OllamaSynthesis::new(
            "http://localhost:11434".to_string(),
            Some("qwen2.5-coder".to_string()),
        );
        assert_eq!(client.model(), "qwen2.5-coder");
        assert_eq!(client.provider(), Provider::Ollama);
    }
}
