// src/orchestrator/types.rs
// Request and response shapes for the query pipeline. The response is a
// tagged variant: conversation responses carry a `type` discriminator,
// query responses do not.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::classify::{ClarificationQuestion, Intent};
use crate::conversation::Phase;
use crate::retrieval::types::{SemanticMatch, StructuralRelationship, SynthesizedAnswer};
use crate::synthesis::Insights;

/// How the caller wants ambiguity handled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueryMode {
    OneShot,
    Conversational,
    #[default]
    Auto,
}

/// Whether to run the synthesis step
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisMode {
    #[default]
    Synthesized,
    Raw,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub mode: QueryMode,
    #[serde(default)]
    pub synthesis_mode: SynthesisMode,
    #[serde(default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContinueRequest {
    pub conversation_id: String,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
}

/// Overall outcome of a completed query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Success,
    Partial,
    Unavailable,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendLatencies {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synthesis: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseMeta {
    pub backend_latencies: BackendLatencies,
    pub cache_hit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_rounds: Option<u32>,
    /// Fallback message when no backend produced evidence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub total_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SemanticResults {
    pub matches: Vec<SemanticMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StructuralResults {
    pub relationships: Vec<StructuralRelationship>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResults {
    pub semantic: SemanticResults,
    pub structural: StructuralResults,
}

/// Response for a query that ran retrieval (and possibly synthesis)
#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub request_id: String,
    pub status: ResponseStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<SynthesizedAnswer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insights: Option<Insights>,
    pub results: QueryResults,
    pub meta: ResponseMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Clarifications {
    pub questions: Vec<ClarificationQuestion>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConversationMeta {
    pub original_query: String,
    pub detected_intent: Intent,
    pub confidence: f32,
}

/// Response when a query opens (or continues) a clarification conversation
#[derive(Debug, Clone, Serialize)]
pub struct ConversationResponse {
    /// Discriminator field, always "conversation"
    #[serde(rename = "type")]
    pub response_type: &'static str,
    pub conversation_id: String,
    pub round: u32,
    pub max_rounds: u32,
    pub phase: Phase,
    pub clarifications: Clarifications,
    pub meta: ConversationMeta,
}

/// Tagged variant returned by the orchestrator
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum GatewayResponse {
    Conversation(Box<ConversationResponse>),
    Query(Box<QueryResponse>),
}
