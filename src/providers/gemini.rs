// src/providers/gemini.rs
// Gemini synthesis adapter (generateContent API shape)

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{CallOptions, FailureClass, Provider, ProviderError, SynthesisProvider};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.0-flash";

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

/// Gemini API client
pub struct GeminiSynthesis {
    api_base: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl GeminiSynthesis {
    pub fn new(api_key: String, api_base: Option<String>, model: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            api_base: api_base
                .unwrap_or_else(|| GEMINI_API_BASE.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            http_client,
        }
    }
}

#[async_trait]
impl SynthesisProvider for GeminiSynthesis {
    fn provider(&self) -> Provider {
        Provider::Gemini
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
        let mut generation_config = json!({
            "temperature": options.temperature,
            "maxOutputTokens": options.max_tokens,
        });
        if let Some(seed) = options.seed {
            generation_config["seed"] = json!(seed);
        }

        let body = json!({
            "system_instruction": { "parts": [{ "text": system }] },
            "contents": [{ "role": "user", "parts": [{ "text": user }] }],
            "generationConfig": generation_config,
        });
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );

        debug!(model = %self.model, "Gemini synthesis request");
        let response = self
            .http_client
            .post(&url)
            .timeout(options.deadline)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(Provider::Gemini, &e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(Provider::Gemini, status, &body_text));
        }

        let resp: GenerateResponse = response.json().await.map_err(|e| {
            ProviderError::new(
                Provider::Gemini,
                FailureClass::Other,
                format!("malformed generate response: {e}"),
            )
        })?;

        resp.candidates
            .into_iter()
            .next()
            .map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .map(|p| p.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| {
                ProviderError::new(Provider::Gemini, FailureClass::Other, "empty candidates")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = GeminiSynthesis::new("key".into(), None, None);
        assert_eq!(client.api_base, GEMINI_API_BASE);
        assert_eq!(client.model(), DEFAULT_MODEL);
        assert_eq!(client.provider(), Provider::Gemini);
    }
}
