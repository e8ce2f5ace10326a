// src/orchestrator/mod.rs
// Hybrid query orchestrator: classify → (conversation | concurrent
// retrieval) → optional synthesis → persisted query record → response

pub mod types;

pub use types::{
    BackendLatencies, Clarifications, ContinueRequest, ConversationMeta, ConversationResponse,
    GatewayResponse, QueryMode, QueryRequest, QueryResponse, QueryResults, ResponseMeta,
    ResponseStatus, SemanticResults, StructuralResults, SynthesisMode,
};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::classify::{Clarity, Classification, ClarificationGenerator, QueryClassifier};
use crate::config::RetrievalConfig;
use crate::conversation::{ConversationManager, Phase, TurnKind};
use crate::error::{GatewayError, Result};
use crate::metrics::{PromMetrics, QueryRecord, QueryStatus, RecordStore, ScoringFeatures, WeightDeltas};
use crate::monitor::{CircuitBreaker, SERVICE_GRAPH, SERVICE_VECTOR};
use crate::retrieval::types::{RelationKind, RetrievalFilter, SemanticMatch, StructuralRelationship};
use crate::retrieval::{SemanticRetriever, StructuralResult, StructuralRetriever};
use crate::synthesis::SynthesisEngine;

/// Warnings attached when a backend degrades
pub const WARN_SEMANTIC_UNAVAILABLE: &str = "semantic_unavailable";
pub const WARN_STRUCTURAL_UNAVAILABLE: &str = "structural_unavailable";
pub const WARN_SYNTHESIS_UNAVAILABLE: &str = "synthesis_unavailable";

/// Fallback message when no backend produced evidence
pub const UNAVAILABLE_MESSAGE: &str =
    "All retrieval backends are currently unavailable. Please retry shortly.";

/// Project tag applied when the caller does not send one
const DEFAULT_PROJECT: &str = "default";

/// Evidence passed to synthesis
const SYNTHESIS_TOP: usize = 5;

/// Non-empty context keys considered sufficient to execute a conversation
const SUFFICIENT_CONTEXT_KEYS: usize = 2;

struct RetrievalOutcome {
    matches: Vec<SemanticMatch>,
    structural: StructuralResult,
    vector_ok: bool,
    graph_ok: bool,
    vector_latency_ms: Option<u64>,
    graph_latency_ms: Option<u64>,
}

/// Composes the request → response pipeline
pub struct Orchestrator {
    classifier: QueryClassifier,
    clarifier: ClarificationGenerator,
    conversations: Arc<ConversationManager>,
    semantic: Arc<dyn SemanticRetriever>,
    structural: Arc<dyn StructuralRetriever>,
    synthesis: Arc<SynthesisEngine>,
    breaker: Arc<CircuitBreaker>,
    records: Arc<dyn RecordStore>,
    prom: Arc<PromMetrics>,
    retrieval: RetrievalConfig,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<ConversationManager>,
        semantic: Arc<dyn SemanticRetriever>,
        structural: Arc<dyn StructuralRetriever>,
        synthesis: Arc<SynthesisEngine>,
        breaker: Arc<CircuitBreaker>,
        records: Arc<dyn RecordStore>,
        prom: Arc<PromMetrics>,
        retrieval: RetrievalConfig,
    ) -> Self {
        Self {
            classifier: QueryClassifier::new(),
            clarifier: ClarificationGenerator::new(),
            conversations,
            semantic,
            structural,
            synthesis,
            breaker,
            records,
            prom,
            retrieval,
        }
    }

    /// Entry point for POST /query
    pub async fn handle_query(&self, request: QueryRequest) -> Result<GatewayResponse> {
        if request.query.trim().is_empty() {
            return Err(GatewayError::Validation("query must not be empty".into()));
        }

        let submitted_at = Utc::now();
        let started = Instant::now();
        let query_id = request
            .request_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let project = request
            .project
            .clone()
            .unwrap_or_else(|| DEFAULT_PROJECT.to_string());

        let classification = self.classifier.classify(&request.query);
        debug!(
            query_id = %query_id,
            intent = classification.intent.as_str(),
            clarity = classification.clarity.as_str(),
            "Query classified"
        );

        let conversational = request.mode == QueryMode::Conversational
            || (request.mode == QueryMode::Auto && classification.clarity != Clarity::Clear);

        if conversational {
            return self
                .open_conversation(&request.query, &project, &query_id, &classification, submitted_at)
                .await;
        }

        let outcome = self.run_retrieval(&request.query, &project).await;
        self.complete_query(
            query_id,
            &request.query,
            &project,
            &classification,
            request.synthesis_mode,
            outcome,
            submitted_at,
            started,
            None,
        )
        .await
    }

    /// Entry point for POST /query/continue
    pub async fn continue_conversation(&self, request: ContinueRequest) -> Result<GatewayResponse> {
        let submitted_at = Utc::now();
        let started = Instant::now();
        let id = &request.conversation_id;

        let state = self
            .conversations
            .get(id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {id} not found")))?;
        if state.is_completed() {
            return Err(GatewayError::Conflict(format!(
                "conversation {id} is already completed"
            )));
        }

        for (key, value) in &request.answers {
            self.conversations.add_context(id, key, value).await;
        }
        let state = self
            .conversations
            .get(id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {id} not found")))?;

        let sufficient = state.non_empty_context() >= SUFFICIENT_CONTEXT_KEYS
            || state.round >= state.max_rounds;

        if !sufficient {
            return self.ask_follow_up(&state).await;
        }

        // Enough context collected (or the round cap forces completion):
        // rewrite the query with the collected context and execute
        let mut exec = self
            .conversations
            .advance(id)
            .await
            .ok_or_else(|| GatewayError::NotFound(format!("conversation {id} not found")))?;
        let rounds = exec.round;
        exec.advance_phase(Phase::Executing);
        self.conversations.save(&exec).await;

        let rewritten = if exec.context_descriptor().is_empty() {
            exec.original_query.clone()
        } else {
            format!("{} (context: {})", exec.original_query, exec.context_descriptor())
        };
        let classification = self.classifier.classify(&exec.original_query);
        let project = if exec.project.is_empty() {
            DEFAULT_PROJECT.to_string()
        } else {
            exec.project.clone()
        };
        let query_id = exec
            .initial_query_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let outcome = self.run_retrieval(&rewritten, &project).await;
        let response = self
            .complete_query(
                query_id,
                &exec.original_query,
                &project,
                &classification,
                SynthesisMode::Synthesized,
                outcome,
                submitted_at,
                started,
                Some(rounds),
            )
            .await?;

        self.conversations.end(id).await;
        Ok(response)
    }

    async fn open_conversation(
        &self,
        query: &str,
        project: &str,
        query_id: &str,
        classification: &Classification,
        submitted_at: DateTime<Utc>,
    ) -> Result<GatewayResponse> {
        let mut state = self.conversations.start(query).await;
        state.project = project.to_string();
        state.initial_query_id = Some(query_id.to_string());
        state.advance_phase(Phase::Clarifying);

        let questions = self.clarifier.generate(query, classification);
        for question in &questions {
            state.record(TurnKind::Clarification, &question.question);
        }
        self.conversations.save(&state).await;

        let record = QueryRecord {
            id: query_id.to_string(),
            project: project.to_string(),
            query: query.to_string(),
            intent: classification.intent.as_str().to_string(),
            clarity: classification.clarity.as_str().to_string(),
            status: QueryStatus::PendingClarification,
            submitted_at,
            completed_at: None,
            vector_latency_ms: None,
            graph_latency_ms: None,
            synthesis_latency_ms: None,
            semantic_count: 0,
            structural_count: 0,
            confidence: None,
            cache_hit: false,
            features: ScoringFeatures::default(),
        };
        if let Err(e) = self.records.upsert_query(&record).await {
            warn!(query_id = %query_id, error = %e, "Failed to persist pending query record");
        }

        Ok(GatewayResponse::Conversation(Box::new(ConversationResponse {
            response_type: "conversation",
            conversation_id: state.id.clone(),
            round: state.round,
            max_rounds: state.max_rounds,
            phase: state.phase,
            clarifications: Clarifications {
                questions,
                message: "The query is ambiguous. Please answer the questions below to narrow the search.".into(),
            },
            meta: ConversationMeta {
                original_query: query.to_string(),
                detected_intent: classification.intent,
                confidence: classification.confidence,
            },
        })))
    }

    async fn ask_follow_up(
        &self,
        state: &crate::conversation::ConversationState,
    ) -> Result<GatewayResponse> {
        let classification = self.classifier.classify(&state.original_query);
        let mut questions = self
            .clarifier
            .generate(&state.original_query, &classification);
        questions.retain(|q| !state.context.contains_key(&q.key));

        let advanced = self
            .conversations
            .advance(&state.id)
            .await
            .ok_or_else(|| GatewayError::NotFound("conversation vanished".into()))?;

        Ok(GatewayResponse::Conversation(Box::new(ConversationResponse {
            response_type: "conversation",
            conversation_id: advanced.id.clone(),
            round: advanced.round,
            max_rounds: advanced.max_rounds,
            phase: advanced.phase,
            clarifications: Clarifications {
                questions,
                message: "A bit more detail is needed before the search can run.".into(),
            },
            meta: ConversationMeta {
                original_query: advanced.original_query.clone(),
                detected_intent: classification.intent,
                confidence: classification.confidence,
            },
        })))
    }

    /// Run vector and graph retrieval concurrently with independent
    /// deadlines, each gated by its circuit breaker. A failed or skipped
    /// branch yields an empty result; partial evidence always survives.
    async fn run_retrieval(&self, query: &str, project: &str) -> RetrievalOutcome {
        let filter = RetrievalFilter::default();

        let vector_branch = async {
            if !self.breaker.check(SERVICE_VECTOR) {
                debug!("Vector circuit open — skipping semantic retrieval");
                return None;
            }
            let started = Instant::now();
            let deadline = Duration::from_millis(self.retrieval.vector_deadline_ms);
            match tokio::time::timeout(
                deadline,
                self.semantic
                    .retrieve(query, project, self.retrieval.top_k, &filter),
            )
            .await
            {
                Ok(Ok(matches)) => {
                    self.breaker.record_success(SERVICE_VECTOR);
                    Some((matches, started.elapsed().as_millis() as u64))
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Semantic retrieval failed");
                    self.breaker.record_failure(SERVICE_VECTOR);
                    None
                }
                Err(_) => {
                    warn!("Semantic retrieval deadline exceeded");
                    self.breaker.record_failure(SERVICE_VECTOR);
                    None
                }
            }
        };

        let graph_branch = async {
            if !self.breaker.check(SERVICE_GRAPH) {
                debug!("Graph circuit open — skipping structural retrieval");
                return None;
            }
            let started = Instant::now();
            let deadline = Duration::from_millis(self.retrieval.graph_deadline_ms);
            match tokio::time::timeout(
                deadline,
                self.structural.retrieve(
                    query,
                    project,
                    &RelationKind::ALL,
                    self.retrieval.max_depth,
                    self.retrieval.max_edges,
                ),
            )
            .await
            {
                Ok(Ok(result)) => {
                    self.breaker.record_success(SERVICE_GRAPH);
                    Some((result, started.elapsed().as_millis() as u64))
                }
                Ok(Err(e)) => {
                    warn!(error = %e, "Structural retrieval failed");
                    self.breaker.record_failure(SERVICE_GRAPH);
                    None
                }
                Err(_) => {
                    warn!("Structural retrieval deadline exceeded");
                    self.breaker.record_failure(SERVICE_GRAPH);
                    None
                }
            }
        };

        let (vector_result, graph_result) = tokio::join!(vector_branch, graph_branch);

        let (matches, vector_ok, vector_latency_ms) = match vector_result {
            Some((matches, latency)) => (matches, true, Some(latency)),
            None => (Vec::new(), false, None),
        };
        let (structural, graph_ok, graph_latency_ms) = match graph_result {
            Some((result, latency)) => (result, true, Some(latency)),
            None => (StructuralResult::default(), false, None),
        };

        if let Some(latency) = vector_latency_ms {
            self.prom
                .backend_latency_seconds
                .with_label_values(&[SERVICE_VECTOR])
                .observe(latency as f64 / 1000.0);
        }
        if let Some(latency) = graph_latency_ms {
            self.prom
                .backend_latency_seconds
                .with_label_values(&[SERVICE_GRAPH])
                .observe(latency as f64 / 1000.0);
        }

        RetrievalOutcome {
            matches,
            structural,
            vector_ok,
            graph_ok,
            vector_latency_ms,
            graph_latency_ms,
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn complete_query(
        &self,
        query_id: String,
        query_text: &str,
        project: &str,
        classification: &Classification,
        synthesis_mode: SynthesisMode,
        outcome: RetrievalOutcome,
        submitted_at: DateTime<Utc>,
        started: Instant,
        conversation_rounds: Option<u32>,
    ) -> Result<GatewayResponse> {
        let deltas = match self.records.tuning_config(project).await {
            Ok(Some(state)) => state.deltas,
            Ok(None) => WeightDeltas::default(),
            Err(e) => {
                warn!(error = %e, "Failed to read tuning configuration");
                WeightDeltas::default()
            }
        };

        let matches = outcome.matches;
        let mut relationships = outcome.structural.relationships.clone();
        apply_structural_tuning(&mut relationships, &deltas);

        let mut warnings = Vec::new();
        if !outcome.vector_ok {
            warnings.push(WARN_SEMANTIC_UNAVAILABLE.to_string());
        }
        if !outcome.graph_ok {
            warnings.push(WARN_STRUCTURAL_UNAVAILABLE.to_string());
        }

        let mut status = match (outcome.vector_ok, outcome.graph_ok) {
            (false, false) => ResponseStatus::Unavailable,
            (true, true) => ResponseStatus::Success,
            _ => ResponseStatus::Partial,
        };

        let features = scoring_features(&matches, &outcome.structural);

        let mut answer = None;
        let mut insights = None;
        let mut synthesis_latency_ms = None;
        if synthesis_mode == SynthesisMode::Synthesized {
            let top_matches = &matches[..matches.len().min(SYNTHESIS_TOP)];
            let top_relationships = &relationships[..relationships.len().min(SYNTHESIS_TOP)];
            let synthesis_started = Instant::now();
            match self
                .synthesis
                .synthesize(query_text, top_matches, top_relationships)
                .await
            {
                Ok((mut synthesized, derived)) => {
                    synthesis_latency_ms = Some(synthesis_started.elapsed().as_millis() as u64);
                    synthesized.confidence = adjust_confidence(
                        synthesized.confidence,
                        &features,
                        &deltas,
                    );
                    answer = Some(synthesized);
                    insights = Some(derived);
                }
                Err(e) => {
                    warn!(error = %e, "Synthesis failed — returning retrieved evidence only");
                    warnings.push(WARN_SYNTHESIS_UNAVAILABLE.to_string());
                }
            }

            // No evidence at all means the synthesized answer is the
            // designated insufficient-information response
            if matches.is_empty() && relationships.is_empty() {
                status = ResponseStatus::Unavailable;
            }
        }

        let message = (status == ResponseStatus::Unavailable)
            .then(|| UNAVAILABLE_MESSAGE.to_string());

        let record = QueryRecord {
            id: query_id.clone(),
            project: project.to_string(),
            query: query_text.to_string(),
            intent: classification.intent.as_str().to_string(),
            clarity: classification.clarity.as_str().to_string(),
            status: match status {
                ResponseStatus::Success => QueryStatus::Success,
                ResponseStatus::Partial => QueryStatus::Partial,
                ResponseStatus::Unavailable => QueryStatus::Unavailable,
            },
            submitted_at,
            completed_at: Some(Utc::now()),
            vector_latency_ms: outcome.vector_latency_ms,
            graph_latency_ms: outcome.graph_latency_ms,
            synthesis_latency_ms,
            semantic_count: matches.len(),
            structural_count: relationships.len(),
            confidence: answer.as_ref().map(|a| a.confidence),
            cache_hit: false,
            features,
        };
        if let Err(e) = self.records.upsert_query(&record).await {
            warn!(query_id = %query_id, error = %e, "Failed to persist query record");
        }
        self.prom
            .queries_total
            .with_label_values(&[record.status.as_str()])
            .inc();

        Ok(GatewayResponse::Query(Box::new(QueryResponse {
            request_id: query_id,
            status,
            answer,
            insights,
            results: QueryResults {
                semantic: SemanticResults { matches },
                structural: StructuralResults { relationships },
            },
            meta: ResponseMeta {
                backend_latencies: BackendLatencies {
                    vector: outcome.vector_latency_ms,
                    graph: outcome.graph_latency_ms,
                    synthesis: synthesis_latency_ms,
                },
                cache_hit: false,
                conversation_rounds,
                message,
                total_latency_ms: started.elapsed().as_millis() as u64,
            },
            warnings,
        })))
    }
}

/// Tuned confidence: staleness and orphan penalties subtract, connectivity
/// bonus adds, clamped back into [0, 1]
fn adjust_confidence(base: f32, features: &ScoringFeatures, deltas: &WeightDeltas) -> f32 {
    (base - deltas.staleness_penalty * features.staleness
        - deltas.orphan_penalty * features.orphan_ratio
        + deltas.connectivity_bonus * features.connectivity)
        .clamp(0.0, 1.0)
}

/// Learned connectivity bonus nudges well-connected sources up the ranking
fn apply_structural_tuning(relationships: &mut [StructuralRelationship], deltas: &WeightDeltas) {
    if deltas.connectivity_bonus.abs() < f32::EPSILON {
        return;
    }
    let mut degree: HashMap<&str, usize> = HashMap::new();
    for r in relationships.iter() {
        *degree.entry(r.source.as_str()).or_default() += 1;
    }
    let keys: HashMap<String, f32> = relationships
        .iter()
        .map(|r| {
            let base = r.path.len() as f32 * 10.0 + r.relation.priority() as f32;
            let bonus =
                deltas.connectivity_bonus * degree.get(r.source.as_str()).copied().unwrap_or(0) as f32;
            (relationship_key(r), base - bonus)
        })
        .collect();
    relationships.sort_by(|a, b| {
        keys[&relationship_key(a)]
            .total_cmp(&keys[&relationship_key(b)])
            .then_with(|| a.source_path.cmp(&b.source_path))
    });
}

fn relationship_key(r: &StructuralRelationship) -> String {
    format!("{}|{}|{}", r.source, r.relation.as_str(), r.target)
}

fn scoring_features(matches: &[SemanticMatch], structural: &StructuralResult) -> ScoringFeatures {
    let staleness = if matches.is_empty() {
        0.0
    } else {
        matches
            .iter()
            .map(|m| (m.staleness_days.unwrap_or(0.0) / 365.0).clamp(0.0, 1.0))
            .sum::<f32>()
            / matches.len() as f32
    };
    let orphan_ratio = if structural.anchor_count == 0 {
        0.0
    } else {
        1.0 - structural.connected_anchors as f32 / structural.anchor_count as f32
    };
    let connectivity = (structural.relationships.len() as f32
        / (structural.anchor_count.max(1) as f32 * 10.0))
        .clamp(0.0, 1.0);

    ScoringFeatures {
        staleness,
        orphan_ratio,
        connectivity,
    }
}
