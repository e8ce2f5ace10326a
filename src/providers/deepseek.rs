// src/providers/deepseek.rs
// DeepSeek synthesis adapter (OpenAI-compatible chat completions)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{CallOptions, FailureClass, Provider, ProviderError, SynthesisProvider};

const DEEPSEEK_API_URL: &str = "https://api.deepseek.com/chat/completions";
const DEFAULT_MODEL: &str = "deepseek-chat";

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: String,
}

/// DeepSeek API client
pub struct DeepSeekSynthesis {
    api_url: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl DeepSeekSynthesis {
    pub fn new(api_key: String, api_url: Option<String>, model: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            api_url: api_url.unwrap_or_else(|| DEEPSEEK_API_URL.to_string()),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http_client,
        }
    }
}

#[async_trait]
impl SynthesisProvider for DeepSeekSynthesis {
    fn provider(&self) -> Provider {
        Provider::DeepSeek
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
        let mut body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": options.temperature,
            "max_tokens": options.max_tokens,
            "stream": false,
        });
        if let Some(seed) = options.seed {
            body["seed"] = json!(seed);
        }

        debug!(model = %self.model, "DeepSeek synthesis request");
        let response = self
            .http_client
            .post(&self.api_url)
            .timeout(options.deadline)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(Provider::DeepSeek, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(Provider::DeepSeek, status, &body_text));
        }

        let resp: ChatResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                Provider::DeepSeek,
                FailureClass::Other,
                format!("malformed chat response: {e}"),
            )
        })?;

        resp.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| {
                ProviderError::new(Provider::DeepSeek, FailureClass::Other, "empty choices")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = DeepSeekSynthesis::new("key".into(), None, None);
        assert_eq!(client.api_url, DEEPSEEK_API_URL);
        assert_eq!(client.model(), DEFAULT_MODEL);
    }

    #[test]
    fn test_custom_endpoint() {
        let client = DeepSeekSynthesis::new(
            "key".into(),
            Some("https://proxy.internal/v1/chat".into()),
            Some("deepseek-reasoner".into()),
        );
        assert_eq!(client.api_url, "https://proxy.internal/v1/chat");
        assert_eq!(client.model(), "deepseek-reasoner");
    }
}
