// src/providers/openai.rs
// Hosted embedding adapter (OpenAI-compatible /v1/embeddings)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{CallOptions, EmbeddingProvider, FailureClass, Provider, ProviderError};

/// Default hosted embedding model
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Hosted inference service client
pub struct OpenAiEmbeddings {
    api_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_url: String, api_key: String, model: Option<String>, dimensions: usize) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            api_url,
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            dimensions,
            http_client,
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn provider(&self) -> Provider {
        Provider::OpenAi
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed(
        &self,
        text: &str,
        options: &CallOptions,
    ) -> std::result::Result<Vec<f32>, ProviderError> {
        let body = json!({
            "model": self.model,
            "input": text,
            "dimensions": self.dimensions,
        });

        let response = self
            .http_client
            .post(&self.api_url)
            .timeout(options.deadline)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(Provider::OpenAi, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(Provider::OpenAi, status, &body_text));
        }

        let resp: EmbeddingResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                Provider::OpenAi,
                FailureClass::Other,
                format!("malformed embedding response: {e}"),
            )
        })?;

        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                ProviderError::new(
                    Provider::OpenAi,
                    FailureClass::Other,
                    "empty embedding response",
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_model() {
        let client = OpenAiEmbeddings::new(
            "https://api.openai.com/v1/embeddings".into(),
            "test-key".into(),
            None,
            768,
        );
        assert_eq!(client.model, DEFAULT_MODEL);
        assert_eq!(client.dimensions(), 768);
        assert_eq!(client.provider(), Provider::OpenAi);
    }
}
