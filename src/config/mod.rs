// src/config/mod.rs
// Environment-based configuration - single source of truth for all env vars

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Read a string env var, filtering empty values
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Read and parse an env var, falling back to a default
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    match read_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("Ignoring unparseable {}={:?}", name, raw);
            default
        }),
        None => default,
    }
}

/// HTTP server binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: read_var("LANTERN_HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port: parse_var("LANTERN_PORT", 8600),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Qdrant vector store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub url: String,
    pub collection: String,
    /// Embedding dimension of the indexed chunks
    pub dimensions: u64,
}

impl VectorStoreConfig {
    pub fn from_env() -> Self {
        Self {
            url: read_var("QDRANT_URL").unwrap_or_else(|| "http://localhost:6334".into()),
            collection: read_var("QDRANT_COLLECTION").unwrap_or_else(|| "lantern_chunks".into()),
            dimensions: parse_var("EMBEDDING_DIMENSIONS", 768),
        }
    }
}

/// Neo4j graph store credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStoreConfig {
    pub url: String,
    pub user: String,
    pub password: String,
}

impl GraphStoreConfig {
    pub fn from_env() -> Self {
        Self {
            url: read_var("NEO4J_URL").unwrap_or_else(|| "bolt://localhost:7687".into()),
            user: read_var("NEO4J_USER").unwrap_or_else(|| "neo4j".into()),
            password: read_var("NEO4J_PASSWORD").unwrap_or_default(),
        }
    }
}

/// Shared cache (conversation persistence)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis URL; unset disables cross-replica conversation persistence
    pub url: Option<String>,
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            url: read_var("REDIS_URL"),
        }
    }
}

/// Embedding provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Primary embedding model identity
    pub model: String,
    /// Local inference server (Ollama-compatible)
    pub ollama_host: Option<String>,
    /// Hosted inference service key (OpenAI-compatible)
    pub api_key: Option<String>,
    pub api_url: String,
    pub dimensions: usize,
}

impl EmbeddingConfig {
    pub fn from_env() -> Self {
        Self {
            model: read_var("EMBEDDING_MODEL").unwrap_or_else(|| "nomic-embed-text".into()),
            ollama_host: read_var("OLLAMA_HOST"),
            api_key: read_var("OPENAI_API_KEY"),
            api_url: read_var("EMBEDDING_API_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1/embeddings".into()),
            dimensions: parse_var("EMBEDDING_DIMENSIONS", 768),
        }
    }
}

/// Synthesis provider selection and determinism knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Preferred provider: "ollama", "deepseek", or "gemini"
    pub provider: String,
    pub model: Option<String>,
    pub api_url: Option<String>,
    pub deepseek_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama_host: Option<String>,
    pub temperature: f32,
    pub seed: u64,
    pub max_tokens: u32,
}

impl SynthesisConfig {
    pub fn from_env() -> Self {
        Self {
            provider: read_var("SYNTHESIS_PROVIDER").unwrap_or_else(|| "ollama".into()),
            model: read_var("SYNTHESIS_MODEL"),
            api_url: read_var("SYNTHESIS_API_URL"),
            deepseek_api_key: read_var("DEEPSEEK_API_KEY"),
            gemini_api_key: read_var("GEMINI_API_KEY").or_else(|| read_var("GOOGLE_API_KEY")),
            ollama_host: read_var("OLLAMA_HOST"),
            temperature: parse_var("SYNTHESIS_TEMPERATURE", 0.3),
            seed: parse_var("SYNTHESIS_SEED", 42),
            max_tokens: parse_var("SYNTHESIS_MAX_TOKENS", 2048),
        }
    }
}

/// Conversation lifecycle caps
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub max_rounds: u32,
    pub ttl_seconds: u64,
}

impl ConversationConfig {
    pub fn from_env() -> Self {
        Self {
            max_rounds: parse_var("CONVERSATION_MAX_ROUNDS", 3),
            ttl_seconds: parse_var("CONVERSATION_TTL_SECONDS", 3600),
        }
    }
}

/// Retrieval fan-out tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub max_depth: u32,
    pub max_edges: usize,
    pub vector_deadline_ms: u64,
    pub graph_deadline_ms: u64,
}

impl RetrievalConfig {
    pub fn from_env() -> Self {
        Self {
            top_k: parse_var("RETRIEVAL_TOP_K", 20),
            max_depth: parse_var("GRAPH_MAX_DEPTH", 2),
            max_edges: parse_var("GRAPH_MAX_EDGES", 50),
            vector_deadline_ms: parse_var("VECTOR_DEADLINE_MS", 2000),
            graph_deadline_ms: parse_var("GRAPH_DEADLINE_MS", 2000),
        }
    }
}

/// Health monitor cadence
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub probe_interval_secs: u64,
    /// Latency above this for 3 consecutive probes marks a service degraded
    pub degraded_latency_ms: u64,
    pub history_size: usize,
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self {
            probe_interval_secs: parse_var("HEALTH_PROBE_INTERVAL_SECS", 30),
            degraded_latency_ms: parse_var("HEALTH_DEGRADED_LATENCY_MS", 1000),
            history_size: parse_var("HEALTH_HISTORY_SIZE", 32),
        }
    }
}

/// Circuit breaker tuning
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub half_open_trials: u32,
}

impl BreakerConfig {
    pub fn from_env() -> Self {
        Self {
            failure_threshold: parse_var("BREAKER_FAILURE_THRESHOLD", 5),
            reset_timeout_secs: parse_var("BREAKER_RESET_TIMEOUT_SECS", 30),
            half_open_trials: parse_var("BREAKER_HALF_OPEN_TRIALS", 1),
        }
    }
}

/// Recovery engine guardrails
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    pub cooldown_secs: u64,
    pub max_attempts_per_hour: u32,
    /// Shell command the restart action runs, with the service name appended
    pub restart_command: Option<String>,
}

impl RecoveryConfig {
    pub fn from_env() -> Self {
        Self {
            cooldown_secs: parse_var("RECOVERY_COOLDOWN_SECS", 60),
            max_attempts_per_hour: parse_var("RECOVERY_MAX_ATTEMPTS_PER_HOUR", 5),
            restart_command: read_var("RECOVERY_RESTART_COMMAND"),
        }
    }
}

/// Confidence tuner guardrails
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TunerConfig {
    pub window_days: i64,
    pub min_samples: usize,
    pub max_step: f32,
    pub learning_rate: f32,
    /// Absolute bound on accumulated deltas
    pub delta_bound: f32,
}

impl TunerConfig {
    pub fn from_env() -> Self {
        Self {
            window_days: parse_var("TUNING_WINDOW_DAYS", 7),
            min_samples: parse_var("TUNING_MIN_SAMPLES", 20),
            max_step: parse_var("TUNING_MAX_STEP", 0.05),
            learning_rate: parse_var("TUNING_LEARNING_RATE", 0.5),
            delta_bound: parse_var("TUNING_DELTA_BOUND", 0.25),
        }
    }
}

/// Main configuration structure - composes all domain configs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub vector: VectorStoreConfig,
    pub graph: GraphStoreConfig,
    pub cache: CacheConfig,
    pub embedding: EmbeddingConfig,
    pub synthesis: SynthesisConfig,
    pub conversation: ConversationConfig,
    pub retrieval: RetrievalConfig,
    pub monitor: MonitorConfig,
    pub breaker: BreakerConfig,
    pub recovery: RecoveryConfig,
    pub tuner: TunerConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            vector: VectorStoreConfig::from_env(),
            graph: GraphStoreConfig::from_env(),
            cache: CacheConfig::from_env(),
            embedding: EmbeddingConfig::from_env(),
            synthesis: SynthesisConfig::from_env(),
            conversation: ConversationConfig::from_env(),
            retrieval: RetrievalConfig::from_env(),
            monitor: MonitorConfig::from_env(),
            breaker: BreakerConfig::from_env(),
            recovery: RecoveryConfig::from_env(),
            tuner: TunerConfig::from_env(),
        }
    }

    /// Validate config on startup
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.conversation.max_rounds == 0 {
            return Err(crate::error::GatewayError::Config(
                "CONVERSATION_MAX_ROUNDS must be at least 1".into(),
            ));
        }
        if self.embedding.ollama_host.is_none() && self.embedding.api_key.is_none() {
            warn!("No embedding provider configured - semantic retrieval will degrade");
        }
        match self.synthesis.provider.as_str() {
            "ollama" | "deepseek" | "gemini" => {}
            other => {
                return Err(crate::error::GatewayError::Config(format!(
                    "unknown SYNTHESIS_PROVIDER {other:?} (expected ollama, deepseek, or gemini)"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_on_missing() {
        assert_eq!(parse_var("LANTERN_TEST_UNSET_VAR", 42u32), 42);
    }

    #[test]
    fn test_bind_address() {
        let server = ServerConfig {
            host: "127.0.0.1".into(),
            port: 9000,
        };
        assert_eq!(server.bind_address(), "127.0.0.1:9000");
    }
}
