// src/state.rs
// Application state: constructed once at boot, injected into handlers.
// No lazy globals; teardown happens through the shutdown watch channel.

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::GatewayConfig;
use crate::conversation::ConversationManager;
use crate::error::Result;
use crate::metrics::{PromMetrics, RecordStore};
use crate::monitor::{
    CacheProbe, CircuitBreaker, GraphProbe, HealthMonitor, RecoveryEngine, VectorProbe,
    recovery::{LogOnlyRestart, RestartHandle, ShellRestart},
    spawn_cascade,
};
use crate::orchestrator::Orchestrator;
use crate::providers::{CallOptions, ChainConfig, EmbeddingChain, SynthesisChain};
use crate::retrieval::{GraphRetriever, VectorRetriever};
use crate::stores::{GraphStore, MemoryCache, RedisCache, SharedCache, VectorStore};
use crate::synthesis::SynthesisEngine;
use crate::tuning::ConfidenceTuner;

/// Application state shared across handlers
pub struct AppState {
    pub config: GatewayConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub conversations: Arc<ConversationManager>,
    pub monitor: Arc<HealthMonitor>,
    pub breaker: Arc<CircuitBreaker>,
    pub recovery: Arc<RecoveryEngine>,
    pub tuner: Arc<ConfidenceTuner>,
    pub records: Arc<dyn RecordStore>,
    pub cache: Arc<dyn SharedCache>,
    pub prom: Arc<PromMetrics>,
    shutdown_tx: watch::Sender<bool>,
}

impl AppState {
    pub async fn new(config: GatewayConfig) -> Result<Self> {
        config.validate()?;

        // Shared cache: Redis when configured, process-local otherwise
        let cache: Arc<dyn SharedCache> = match config.cache.url.as_deref() {
            Some(url) => match RedisCache::connect(url).await {
                Ok(redis) => Arc::new(redis),
                Err(e) => {
                    warn!(error = %e, "Redis unavailable at boot — conversations held locally only");
                    Arc::new(MemoryCache::new())
                }
            },
            None => {
                warn!("No REDIS_URL configured — conversations held locally only");
                Arc::new(MemoryCache::new())
            }
        };

        info!("Connecting to vector store");
        let vector_store = Arc::new(VectorStore::connect(&config.vector).await?);

        info!("Connecting to graph store");
        let graph_store = Arc::new(GraphStore::connect(&config.graph).await?);
        let records: Arc<dyn RecordStore> = graph_store.clone();

        // Provider chains
        let embedding_chain = Arc::new(EmbeddingChain::from_config(
            &config.embedding,
            ChainConfig::default(),
        ));
        let synthesis_chain = Arc::new(SynthesisChain::from_config(
            &config.synthesis,
            ChainConfig::default(),
        ));

        // Retrievers and synthesis
        let semantic = Arc::new(VectorRetriever::new(
            embedding_chain.clone(),
            vector_store.clone(),
        ));
        let structural = Arc::new(GraphRetriever::new(graph_store.clone()));
        let synthesis = Arc::new(SynthesisEngine::new(
            synthesis_chain,
            CallOptions::from_config(&config.synthesis),
        ));

        // Conversation manager over the shared cache
        let conversations = Arc::new(ConversationManager::new(
            cache.clone(),
            config.conversation.max_rounds,
            config.conversation.ttl_seconds,
        ));

        // Operational plane
        let prom = Arc::new(PromMetrics::new());
        let breaker = Arc::new(CircuitBreaker::new(config.breaker));
        let probes: Vec<Arc<dyn crate::monitor::HealthProbe>> = vec![
            Arc::new(VectorProbe::new(vector_store.clone())),
            Arc::new(GraphProbe::new(graph_store.clone())),
            Arc::new(CacheProbe::new(cache.clone())),
        ];
        let monitor = Arc::new(HealthMonitor::new(probes.clone(), config.monitor));

        let restart: Arc<dyn RestartHandle> = match config.recovery.restart_command.clone() {
            Some(command) => Arc::new(ShellRestart::new(command)),
            None => Arc::new(LogOnlyRestart),
        };
        let recovery = Arc::new(RecoveryEngine::new(
            RecoveryEngine::default_rules(),
            cache.clone(),
            restart,
            probes,
            config.recovery.clone(),
            prom.clone(),
        ));

        let tuner = Arc::new(ConfidenceTuner::new(records.clone(), config.tuner));

        let orchestrator = Arc::new(Orchestrator::new(
            conversations.clone(),
            semantic,
            structural,
            synthesis,
            breaker.clone(),
            records.clone(),
            prom.clone(),
            config.retrieval,
        ));

        let (shutdown_tx, _) = watch::channel(false);

        info!("Application state initialized");
        Ok(Self {
            config,
            orchestrator,
            conversations,
            monitor,
            breaker,
            recovery,
            tuner,
            records,
            cache,
            prom,
            shutdown_tx,
        })
    }

    /// Assemble state from pre-built components. Used by integration tests
    /// and alternate wirings that substitute in-memory stores.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        config: GatewayConfig,
        orchestrator: Arc<Orchestrator>,
        conversations: Arc<ConversationManager>,
        monitor: Arc<HealthMonitor>,
        breaker: Arc<CircuitBreaker>,
        recovery: Arc<RecoveryEngine>,
        tuner: Arc<ConfidenceTuner>,
        records: Arc<dyn RecordStore>,
        cache: Arc<dyn SharedCache>,
        prom: Arc<PromMetrics>,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            orchestrator,
            conversations,
            monitor,
            breaker,
            recovery,
            tuner,
            records,
            cache,
            prom,
            shutdown_tx,
        }
    }

    /// Start the background loops: health probing, the breaker cascade,
    /// rule-driven recovery, and the scheduled tuner.
    pub fn spawn_background(&self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        handles.push(tokio::spawn(
            self.monitor.clone().run(self.shutdown_tx.subscribe()),
        ));
        handles.push(spawn_cascade(
            &self.monitor,
            self.breaker.clone(),
            self.shutdown_tx.subscribe(),
        ));
        handles.push(tokio::spawn(self.recovery.clone().run(
            self.monitor.subscribe(),
            self.shutdown_tx.subscribe(),
        )));
        handles.push(tokio::spawn(
            self.tuner.clone().run_scheduled(self.shutdown_tx.subscribe()),
        ));

        handles
    }

    /// Signal every background loop to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}
