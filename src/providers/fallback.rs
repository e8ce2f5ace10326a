// src/providers/fallback.rs
// Ordered provider chains with classified-failure transitions, bounded
// backoff between providers, and cross-request cooldown demotion.
// The chains are the only callers of the adapters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use super::{
    CallOptions, EmbeddingProvider, FailureClass, Provider, ProviderError, SynthesisProvider,
};
use crate::config::{EmbeddingConfig, SynthesisConfig};
use crate::error::{GatewayError, Result};
use crate::providers::{
    DeepSeekSynthesis, GeminiSynthesis, OllamaEmbeddings, OllamaSynthesis, OpenAiEmbeddings,
};

/// Bounded backoff before trying the provider at each chain position
const BACKOFF_MS: [u64; 3] = [0, 50, 200];

/// Chain-level tuning shared by both roles
#[derive(Debug, Clone, Copy)]
pub struct ChainConfig {
    /// Failures within `failure_window` before a provider is demoted
    pub demote_after: u32,
    pub failure_window: Duration,
    /// How long a demoted provider sits at the back of the chain
    pub cooldown: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            demote_after: 3,
            failure_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(120),
        }
    }
}

#[derive(Default)]
struct ProviderHealth {
    failures: Vec<Instant>,
    demoted_until: Option<Instant>,
}

/// Tracks per-provider failures across requests and demotes repeat offenders
struct CooldownTracker {
    config: ChainConfig,
    state: Mutex<HashMap<Provider, ProviderHealth>>,
}

impl CooldownTracker {
    fn new(config: ChainConfig) -> Self {
        Self {
            config,
            state: Mutex::new(HashMap::new()),
        }
    }

    fn is_demoted(&self, provider: Provider) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let health = state.entry(provider).or_default();
        match health.demoted_until {
            Some(until) if Instant::now() < until => true,
            Some(_) => {
                health.demoted_until = None;
                false
            }
            None => false,
        }
    }

    fn record_success(&self, provider: Provider) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let health = state.entry(provider).or_default();
        health.failures.clear();
        health.demoted_until = None;
    }

    fn record_failure(&self, provider: Provider) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let health = state.entry(provider).or_default();
        let now = Instant::now();
        health.failures.push(now);
        health
            .failures
            .retain(|t| now.duration_since(*t) < self.config.failure_window);

        if health.failures.len() as u32 >= self.config.demote_after {
            info!(
                provider = %provider,
                cooldown_secs = self.config.cooldown.as_secs(),
                "Provider demoted after repeated failures"
            );
            health.demoted_until = Some(now + self.config.cooldown);
            health.failures.clear();
        }
    }
}

/// Head-sticky call order: healthy providers in configured order, demoted
/// providers appended so they are still reachable when everything is down
fn call_order<P: ?Sized>(providers: &[Arc<P>], demoted: impl Fn(usize) -> bool) -> Vec<usize> {
    let mut order: Vec<usize> = (0..providers.len()).filter(|i| !demoted(*i)).collect();
    order.extend((0..providers.len()).filter(|i| demoted(*i)));
    order
}

/// Decide whether to keep walking the chain after a classified failure.
/// Returns the error to surface when the chain must stop.
fn on_failure(
    err: ProviderError,
    role: &str,
    other_seen: &mut bool,
) -> std::result::Result<(), GatewayError> {
    match err.class {
        FailureClass::Auth => {
            warn!(provider = %err.provider, role, "Provider auth failure — not retrying");
            Err(GatewayError::Auth(err.to_string()))
        }
        FailureClass::ModelNotFound => {
            warn!(
                provider = %err.provider,
                role,
                "Configuration drift: {} — advancing to next provider", err.message
            );
            Ok(())
        }
        FailureClass::Other => {
            if *other_seen {
                return Err(GatewayError::Internal(err.to_string()));
            }
            *other_seen = true;
            warn!(provider = %err.provider, role, error = %err, "Unclassified provider failure — advancing once");
            Ok(())
        }
        FailureClass::Timeout | FailureClass::Unavailable | FailureClass::RateLimited => {
            warn!(provider = %err.provider, role, error = %err, "Provider failed — advancing");
            Ok(())
        }
    }
}

/// Ordered embedding providers behaving as one logical provider
pub struct EmbeddingChain {
    providers: Vec<Arc<dyn EmbeddingProvider>>,
    cooldowns: CooldownTracker,
}

impl EmbeddingChain {
    pub fn new(providers: Vec<Arc<dyn EmbeddingProvider>>, config: ChainConfig) -> Self {
        Self {
            providers,
            cooldowns: CooldownTracker::new(config),
        }
    }

    /// Build from configuration: hosted service first, local runtime second
    pub fn from_config(config: &EmbeddingConfig, chain: ChainConfig) -> Self {
        let mut providers: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();
        if let Some(ref api_key) = config.api_key {
            providers.push(Arc::new(OpenAiEmbeddings::new(
                config.api_url.clone(),
                api_key.clone(),
                None,
                config.dimensions,
            )));
        }
        if let Some(ref host) = config.ollama_host {
            providers.push(Arc::new(OllamaEmbeddings::new(
                host.clone(),
                Some(config.model.clone()),
                config.dimensions,
            )));
        }
        let names: Vec<_> = providers.iter().map(|p| p.provider().to_string()).collect();
        info!(providers = ?names, "Embedding chain configured");
        Self::new(providers, chain)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn embed(&self, text: &str, options: &CallOptions) -> Result<Vec<f32>> {
        if self.providers.is_empty() {
            return Err(GatewayError::Unavailable(
                "no embedding providers configured".into(),
            ));
        }

        let order = call_order(&self.providers, |i| {
            self.cooldowns.is_demoted(self.providers[i].provider())
        });
        let mut other_seen = false;
        let mut last_error = None;

        for (attempt, idx) in order.into_iter().enumerate() {
            let backoff = BACKOFF_MS[attempt.min(BACKOFF_MS.len() - 1)];
            if backoff > 0 {
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let provider = &self.providers[idx];
            match provider.embed(text, options).await {
                Ok(vector) => {
                    self.cooldowns.record_success(provider.provider());
                    return Ok(vector);
                }
                Err(err) => {
                    self.cooldowns.record_failure(provider.provider());
                    last_error = Some(err.to_string());
                    on_failure(err, "embedding", &mut other_seen)?;
                }
            }
        }

        Err(GatewayError::Unavailable(format!(
            "retry_exhausted: all embedding providers failed (last: {})",
            last_error.unwrap_or_default()
        )))
    }
}

/// Ordered synthesis providers behaving as one logical provider
pub struct SynthesisChain {
    providers: Vec<Arc<dyn SynthesisProvider>>,
    cooldowns: CooldownTracker,
}

impl SynthesisChain {
    pub fn new(providers: Vec<Arc<dyn SynthesisProvider>>, config: ChainConfig) -> Self {
        Self {
            providers,
            cooldowns: CooldownTracker::new(config),
        }
    }

    /// Build from configuration with the preferred provider at the head
    pub fn from_config(config: &SynthesisConfig, chain: ChainConfig) -> Self {
        let mut available: Vec<(Provider, Arc<dyn SynthesisProvider>)> = Vec::new();
        if let Some(ref host) = config.ollama_host {
            available.push((
                Provider::Ollama,
                Arc::new(OllamaSynthesis::new(host.clone(), config.model.clone())),
            ));
        }
        if let Some(ref key) = config.deepseek_api_key {
            available.push((
                Provider::DeepSeek,
                Arc::new(DeepSeekSynthesis::new(
                    key.clone(),
                    config.api_url.clone(),
                    config.model.clone(),
                )),
            ));
        }
        if let Some(ref key) = config.gemini_api_key {
            available.push((
                Provider::Gemini,
                Arc::new(GeminiSynthesis::new(key.clone(), None, config.model.clone())),
            ));
        }

        // Preferred provider moves to the head; the rest keep their order
        available.sort_by_key(|(p, _)| p.as_str() != config.provider);
        let names: Vec<_> = available.iter().map(|(p, _)| p.to_string()).collect();
        info!(providers = ?names, preferred = %config.provider, "Synthesis chain configured");

        Self::new(available.into_iter().map(|(_, c)| c).collect(), chain)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub async fn synthesize(
        &self,
        system: &str,
        user: &str,
        options: &CallOptions,
    ) -> Result<String> {
        if self.providers.is_empty() {
            return Err(GatewayError::Unavailable(
                "no synthesis providers configured".into(),
            ));
        }

        let order = call_order(&self.providers, |i| {
            self.cooldowns.is_demoted(self.providers[i].provider())
        });
        let mut other_seen = false;
        let mut last_error = None;

        for (attempt, idx) in order.into_iter().enumerate() {
            let backoff = BACKOFF_MS[attempt.min(BACKOFF_MS.len() - 1)];
            if backoff > 0 {
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }

            let provider = &self.providers[idx];
            match provider.synthesize(system, user, options).await {
                Ok(text) => {
                    self.cooldowns.record_success(provider.provider());
                    return Ok(text);
                }
                Err(err) => {
                    self.cooldowns.record_failure(provider.provider());
                    last_error = Some(err.to_string());
                    on_failure(err, "synthesis", &mut other_seen)?;
                }
            }
        }

        Err(GatewayError::Unavailable(format!(
            "retry_exhausted: all synthesis providers failed (last: {})",
            last_error.unwrap_or_default()
        )))
    }
}
