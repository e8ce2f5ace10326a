// src/conversation/mod.rs
// Multi-round clarification conversations: lifecycle, state machine, and
// persistence. The shared cache is the owner of record across replicas; the
// process-local map is a write-through read cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::stores::SharedCache;

/// Shared-cache key namespace for conversation state
pub const CONVERSATION_KEY_PREFIX: &str = "conversation:";

/// Conversation lifecycle phase. Transitions only move forward; `Completed`
/// is terminal. `Clarifying` and `Executing` are caller-controlled overlays
/// on `Analyzing` and do not alter round accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Analyzing,
    Clarifying,
    Executing,
    Completed,
}

impl Phase {
    fn order(&self) -> u8 {
        match self {
            Self::Analyzing => 0,
            Self::Clarifying => 1,
            Self::Executing => 2,
            Self::Completed => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analyzing => "analyzing",
            Self::Clarifying => "clarifying",
            Self::Executing => "executing",
            Self::Completed => "completed",
        }
    }
}

/// Kind of entry in the conversation history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Query,
    Clarification,
    Answer,
    Response,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub round: u32,
    pub kind: TurnKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationState {
    pub id: String,
    pub original_query: String,
    /// Project tag the query is scoped to
    #[serde(default)]
    pub project: String,
    /// Query record opened when the conversation started; finalized when
    /// the conversation executes
    #[serde(default)]
    pub initial_query_id: Option<String>,
    /// 1-based; never exceeds `max_rounds`
    pub round: u32,
    pub max_rounds: u32,
    pub phase: Phase,
    /// Clarification key → user-supplied answer (last writer wins)
    pub context: BTreeMap<String, String>,
    pub history: Vec<HistoryEntry>,
    pub started_at: DateTime<Utc>,
}

impl ConversationState {
    fn new(query: &str, max_rounds: u32) -> Self {
        let mut state = Self {
            id: Uuid::new_v4().to_string(),
            original_query: query.to_string(),
            project: String::new(),
            initial_query_id: None,
            round: 1,
            max_rounds,
            phase: Phase::Analyzing,
            context: BTreeMap::new(),
            history: Vec::new(),
            started_at: Utc::now(),
        };
        state.record(TurnKind::Query, query);
        state
    }

    pub fn record(&mut self, kind: TurnKind, content: &str) {
        self.history.push(HistoryEntry {
            round: self.round,
            kind,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
    }

    /// Move the phase forward; backward transitions are ignored
    pub fn advance_phase(&mut self, phase: Phase) {
        if phase.order() > self.phase.order() {
            self.phase = phase;
        }
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn non_empty_context(&self) -> usize {
        self.context.values().filter(|v| !v.trim().is_empty()).count()
    }

    /// Compact descriptor appended to the query when executing with context
    pub fn context_descriptor(&self) -> String {
        self.context
            .iter()
            .filter(|(_, v)| !v.trim().is_empty())
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Lifecycle and persistence of clarification conversations
pub struct ConversationManager {
    cache: Arc<dyn SharedCache>,
    local: RwLock<HashMap<String, ConversationState>>,
    ttl_seconds: u64,
    max_rounds: u32,
}

impl ConversationManager {
    pub fn new(cache: Arc<dyn SharedCache>, max_rounds: u32, ttl_seconds: u64) -> Self {
        Self {
            cache,
            local: RwLock::new(HashMap::new()),
            ttl_seconds,
            max_rounds,
        }
    }

    fn key(id: &str) -> String {
        format!("{CONVERSATION_KEY_PREFIX}{id}")
    }

    /// Write-through persist. Shared-cache failures degrade to local-only
    /// operation (state lost on restart) rather than failing the request.
    async fn persist(&self, state: &ConversationState) {
        self.local
            .write()
            .expect("conversation lock")
            .insert(state.id.clone(), state.clone());

        match serde_json::to_string(state) {
            Ok(json) => {
                if let Err(e) = self
                    .cache
                    .set_ex(&Self::key(&state.id), &json, self.ttl_seconds)
                    .await
                {
                    warn!(conversation_id = %state.id, error = %e, "Shared cache unavailable — conversation held locally only");
                }
            }
            Err(e) => warn!(conversation_id = %state.id, error = %e, "Failed to serialize conversation state"),
        }
    }

    /// Create a conversation at round 1, phase `analyzing`
    pub async fn start(&self, query: &str) -> ConversationState {
        let state = ConversationState::new(query, self.max_rounds);
        self.persist(&state).await;
        state
    }

    /// Read from the local cache, falling back to the shared cache and
    /// repopulating local on a hit
    pub async fn get(&self, id: &str) -> Option<ConversationState> {
        if let Some(state) = self.local.read().expect("conversation lock").get(id) {
            return Some(state.clone());
        }

        let json = match self.cache.get(&Self::key(id)).await {
            Ok(found) => found?,
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Shared cache read failed");
                return None;
            }
        };
        match serde_json::from_str::<ConversationState>(&json) {
            Ok(state) => {
                self.local
                    .write()
                    .expect("conversation lock")
                    .insert(id.to_string(), state.clone());
                Some(state)
            }
            Err(e) => {
                warn!(conversation_id = %id, error = %e, "Corrupt conversation state in cache");
                None
            }
        }
    }

    /// Merge one collected answer into the context and refresh the TTL.
    /// Last writer wins; no cross-key atomicity is promised.
    pub async fn add_context(&self, id: &str, key: &str, value: &str) -> Option<ConversationState> {
        let mut state = self.get(id).await?;
        if state.is_completed() {
            return Some(state);
        }
        state.context.insert(key.to_string(), value.to_string());
        state.record(TurnKind::Response, &format!("{key}={value}"));
        self.persist(&state).await;
        Some(state)
    }

    /// Advance the round, completing the conversation at the cap
    pub async fn advance(&self, id: &str) -> Option<ConversationState> {
        let mut state = self.get(id).await?;
        if state.is_completed() {
            return Some(state);
        }
        if state.round >= state.max_rounds {
            state.advance_phase(Phase::Completed);
        } else {
            state.round += 1;
        }
        self.persist(&state).await;
        Some(state)
    }

    /// Complete and delete the conversation, returning the final snapshot.
    /// Idempotent: a second call returns `None`.
    pub async fn end(&self, id: &str) -> Option<ConversationState> {
        let mut state = self.get(id).await?;
        state.advance_phase(Phase::Completed);

        self.local.write().expect("conversation lock").remove(id);
        if let Err(e) = self.cache.delete(&Self::key(id)).await {
            warn!(conversation_id = %id, error = %e, "Failed to delete conversation from shared cache");
        }
        Some(state)
    }

    /// Persist a caller-mutated state (phase overlays, history entries)
    pub async fn save(&self, state: &ConversationState) {
        self.persist(state).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use crate::stores::MemoryCache;
    use async_trait::async_trait;

    fn manager() -> ConversationManager {
        ConversationManager::new(Arc::new(MemoryCache::new()), 3, 3600)
    }

    #[tokio::test]
    async fn test_start_initializes_round_and_phase() {
        let manager = manager();
        let state = manager.start("What about the auth thing?").await;
        assert_eq!(state.round, 1);
        assert_eq!(state.max_rounds, 3);
        assert_eq!(state.phase, Phase::Analyzing);
        assert!(state.context.is_empty());
        assert_eq!(state.history.len(), 1);
    }

    #[tokio::test]
    async fn test_get_round_trips_through_shared_cache() {
        let cache = Arc::new(MemoryCache::new());
        let writer = ConversationManager::new(cache.clone(), 3, 3600);
        let state = writer.start("query").await;

        // A second manager over the same cache simulates another replica
        let reader = ConversationManager::new(cache, 3, 3600);
        let loaded = reader.get(&state.id).await.unwrap();
        assert_eq!(loaded.original_query, "query");
        assert_eq!(loaded.round, 1);
    }

    #[tokio::test]
    async fn test_add_context_merges_keys() {
        let manager = manager();
        let state = manager.start("query").await;
        manager.add_context(&state.id, "aspect", "How it works").await.unwrap();
        let updated = manager
            .add_context(&state.id, "scope", "All components")
            .await
            .unwrap();
        assert_eq!(updated.non_empty_context(), 2);
        assert_eq!(updated.context["aspect"], "How it works");
    }

    #[tokio::test]
    async fn test_advance_completes_at_max_rounds() {
        let manager = manager();
        let state = manager.start("query").await;

        let state = manager.advance(&state.id).await.unwrap();
        assert_eq!(state.round, 2);
        let state = manager.advance(&state.id).await.unwrap();
        assert_eq!(state.round, 3);
        // At the cap, advancing completes instead of incrementing
        let state = manager.advance(&state.id).await.unwrap();
        assert_eq!(state.round, 3);
        assert!(state.is_completed());
    }

    #[tokio::test]
    async fn test_round_never_exceeds_max() {
        let manager = manager();
        let state = manager.start("query").await;
        for _ in 0..10 {
            let state = manager.advance(&state.id).await.unwrap();
            assert!(state.round <= state.max_rounds);
        }
    }

    #[tokio::test]
    async fn test_end_is_idempotent() {
        let manager = manager();
        let state = manager.start("query").await;

        let ended = manager.end(&state.id).await.unwrap();
        assert!(ended.is_completed());
        assert!(manager.end(&state.id).await.is_none());
        assert!(manager.get(&state.id).await.is_none());
    }

    #[tokio::test]
    async fn test_completed_conversation_rejects_mutation() {
        let manager = manager();
        let started = manager.start("query").await;
        let mut state = manager.get(&started.id).await.unwrap();
        state.advance_phase(Phase::Completed);
        manager.save(&state).await;

        let after = manager.add_context(&started.id, "k", "v").await.unwrap();
        assert!(after.context.is_empty());
    }

    #[tokio::test]
    async fn test_phase_never_moves_backward() {
        let mut state = ConversationState::new("q", 3);
        state.advance_phase(Phase::Executing);
        state.advance_phase(Phase::Clarifying);
        assert_eq!(state.phase, Phase::Executing);
    }

    #[tokio::test]
    async fn test_context_descriptor_skips_empty_values() {
        let mut state = ConversationState::new("q", 3);
        state.context.insert("aspect".into(), "How it works".into());
        state.context.insert("scope".into(), "  ".into());
        assert_eq!(state.context_descriptor(), "aspect: How it works");
    }

    /// Cache that always fails, to exercise the degraded path
    struct BrokenCache;

    #[async_trait]
    impl SharedCache for BrokenCache {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(GatewayError::Unavailable("down".into()))
        }
        async fn set_ex(&self, _key: &str, _value: &str, _ttl: u64) -> Result<()> {
            Err(GatewayError::Unavailable("down".into()))
        }
        async fn expire(&self, _key: &str, _ttl: u64) -> Result<()> {
            Err(GatewayError::Unavailable("down".into()))
        }
        async fn delete(&self, _key: &str) -> Result<()> {
            Err(GatewayError::Unavailable("down".into()))
        }
        async fn delete_prefix(&self, _prefix: &str) -> Result<u64> {
            Err(GatewayError::Unavailable("down".into()))
        }
        async fn ping(&self) -> Result<()> {
            Err(GatewayError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn test_operations_survive_cache_outage() {
        let manager = ConversationManager::new(Arc::new(BrokenCache), 3, 3600);
        let state = manager.start("query").await;
        let state = manager
            .add_context(&state.id, "aspect", "How it works")
            .await
            .unwrap();
        assert_eq!(state.non_empty_context(), 1);
        let state = manager.advance(&state.id).await.unwrap();
        assert_eq!(state.round, 2);
        assert!(manager.end(&state.id).await.is_some());
    }
}
