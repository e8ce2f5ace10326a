// tests/test_helpers.rs
// Shared wiring for HTTP integration tests: the full router over in-memory
// stores and canned retrievers, so no external service is needed.

use async_trait::async_trait;
use std::sync::Arc;

use lantern::classify::ClarificationGenerator;
use lantern::config::GatewayConfig;
use lantern::conversation::ConversationManager;
use lantern::error::Result;
use lantern::metrics::{MemoryRecordStore, PromMetrics, RecordStore};
use lantern::monitor::recovery::LogOnlyRestart;
use lantern::monitor::{CircuitBreaker, HealthMonitor, RecoveryEngine};
use lantern::orchestrator::Orchestrator;
use lantern::providers::{
    CallOptions, ChainConfig, Provider, ProviderError, SynthesisChain, SynthesisProvider,
};
use lantern::retrieval::types::{
    ContentType, RelationKind, RetrievalFilter, SemanticMatch, StructuralRelationship,
};
use lantern::retrieval::{SemanticRetriever, StructuralResult, StructuralRetriever};
use lantern::state::AppState;
use lantern::stores::{MemoryCache, SharedCache};
use lantern::synthesis::SynthesisEngine;
use lantern::tuning::ConfidenceTuner;

// Not every test file uses every helper
#[allow(dead_code)]
pub fn clarifier() -> ClarificationGenerator {
    ClarificationGenerator::new()
}

/// Canned semantic retriever serving an AuthService chunk
pub struct CannedSemantic;

#[async_trait]
impl SemanticRetriever for CannedSemantic {
    async fn retrieve(
        &self,
        _query: &str,
        _project: &str,
        _top_k: usize,
        _filter: &RetrievalFilter,
    ) -> Result<Vec<SemanticMatch>> {
        Ok(vec![SemanticMatch {
            chunk_id: "chunk-auth-1".into(),
            score: 0.92,
            content: "pub struct AuthService { sessions: SessionStore }".into(),
            source: "src/auth/auth_service.rs".into(),
            content_type: ContentType::Code,
            language: Some("rust".into()),
            line_start: Some(10),
            line_end: Some(80),
            rank: 1,
            staleness_days: Some(4.0),
        }])
    }
}

/// Canned structural retriever serving one AuthService relationship
pub struct CannedStructural;

#[async_trait]
impl StructuralRetriever for CannedStructural {
    async fn retrieve(
        &self,
        _query: &str,
        _project: &str,
        _kinds: &[RelationKind],
        _max_depth: u32,
        _max_edges: usize,
    ) -> Result<StructuralResult> {
        Ok(StructuralResult {
            relationships: vec![StructuralRelationship {
                source: "AuthService".into(),
                target: "SessionStore".into(),
                relation: RelationKind::Calls,
                path: vec!["AuthService".into(), "SessionStore".into()],
                explanation: Some("AuthService calls SessionStore".into()),
                source_path: Some("src/auth/auth_service.rs".into()),
            }],
            anchor_count: 1,
            connected_anchors: 1,
        })
    }
}

/// Synthesis provider returning a fixed, correctly cited answer
pub struct CannedSynthesis;

#[async_trait]
impl SynthesisProvider for CannedSynthesis {
    fn provider(&self) -> Provider {
        Provider::Ollama
    }

    fn model(&self) -> &str {
        "canned"
    }

    async fn synthesize(
        &self,
        _system: &str,
        _user: &str,
        _options: &CallOptions,
    ) -> std::result::Result<String, ProviderError> {
        Ok("AuthService manages sessions [Source: src/auth/auth_service.rs:10-80] and \
            delegates persistence [Graph: AuthService → SessionStore]."
            .into())
    }
}

#[allow(dead_code)]
pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: axum::Router,
    pub records: Arc<MemoryRecordStore>,
    pub cache: Arc<MemoryCache>,
}

/// Build the gateway over in-memory components
pub fn create_test_app() -> TestApp {
    let config = GatewayConfig::from_env();
    let cache = Arc::new(MemoryCache::new());
    let shared: Arc<dyn SharedCache> = cache.clone();
    let records = Arc::new(MemoryRecordStore::new());
    let record_store: Arc<dyn RecordStore> = records.clone();
    let prom = Arc::new(PromMetrics::new());

    let conversations = Arc::new(ConversationManager::new(
        shared.clone(),
        config.conversation.max_rounds,
        config.conversation.ttl_seconds,
    ));
    let breaker = Arc::new(CircuitBreaker::new(config.breaker));
    let monitor = Arc::new(HealthMonitor::new(Vec::new(), config.monitor));
    let recovery = Arc::new(RecoveryEngine::new(
        RecoveryEngine::default_rules(),
        shared.clone(),
        Arc::new(LogOnlyRestart),
        Vec::new(),
        config.recovery.clone(),
        prom.clone(),
    ));
    let tuner = Arc::new(ConfidenceTuner::new(record_store.clone(), config.tuner));

    let synthesis = Arc::new(SynthesisEngine::new(
        Arc::new(SynthesisChain::new(
            vec![Arc::new(CannedSynthesis)],
            ChainConfig::default(),
        )),
        CallOptions::default(),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        conversations.clone(),
        Arc::new(CannedSemantic),
        Arc::new(CannedStructural),
        synthesis,
        breaker.clone(),
        record_store.clone(),
        prom.clone(),
        config.retrieval,
    ));

    let state = Arc::new(AppState::from_parts(
        config,
        orchestrator,
        conversations,
        monitor,
        breaker,
        recovery,
        tuner,
        record_store,
        shared,
        prom,
    ));
    let router = lantern::api::router(state.clone());

    TestApp {
        state,
        router,
        records,
        cache,
    }
}
