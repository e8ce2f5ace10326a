// src/metrics/mod.rs
// Query records, feedback linkage, tuning state, and Prometheus exposition

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, Registry, TextEncoder, histogram_opts, opts,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::{GatewayError, Result};

/// Terminal (or pending) state of a query record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    PendingClarification,
    Success,
    Partial,
    Unavailable,
}

impl QueryStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_clarification" => Some(Self::PendingClarification),
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "unavailable" => Some(Self::Unavailable),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingClarification => "pending_clarification",
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingClarification)
    }
}

/// Scoring signals captured per query, correlated with feedback by the tuner
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScoringFeatures {
    /// Mean staleness (days, normalized) of the semantic matches
    pub staleness: f32,
    /// Share of structural results with no connecting path
    pub orphan_ratio: f32,
    /// Mean edge count touching the returned structural results
    pub connectivity: f32,
}

/// One record per completed or failed query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    pub project: String,
    pub query: String,
    pub intent: String,
    pub clarity: String,
    pub status: QueryStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub vector_latency_ms: Option<u64>,
    pub graph_latency_ms: Option<u64>,
    pub synthesis_latency_ms: Option<u64>,
    pub semantic_count: usize,
    pub structural_count: usize,
    pub confidence: Option<f32>,
    pub cache_hit: bool,
    pub features: ScoringFeatures,
}

/// User verdict on a query result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackRating {
    Useful,
    NotUseful,
    Partial,
}

impl FeedbackRating {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "useful" => Some(Self::Useful),
            "not_useful" => Some(Self::NotUseful),
            "partial" => Some(Self::Partial),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Useful => "useful",
            Self::NotUseful => "not_useful",
            Self::Partial => "partial",
        }
    }

    /// Binary-ish usefulness signal the tuner correlates against
    pub fn usefulness(&self) -> f32 {
        match self {
            Self::Useful => 1.0,
            Self::Partial => 0.5,
            Self::NotUseful => 0.0,
        }
    }
}

/// Feedback attached to a query record (at most one per query)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feedback {
    pub query_id: String,
    pub rating: FeedbackRating,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Aggregate feedback counts
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub useful: u64,
    pub not_useful: u64,
    pub partial: u64,
}

impl FeedbackStats {
    pub fn total(&self) -> u64 {
        self.useful + self.not_useful + self.partial
    }

    pub fn usefulness_rate(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.useful as f64 + 0.5 * self.partial as f64) / total as f64
    }
}

/// A query's scoring features paired with its feedback signal
#[derive(Debug, Clone)]
pub struct LabeledRecord {
    pub project: String,
    pub features: ScoringFeatures,
    pub usefulness: f32,
}

/// Learned deltas applied on top of the built-in scoring weights
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightDeltas {
    pub staleness_penalty: f32,
    pub orphan_penalty: f32,
    pub connectivity_bonus: f32,
}

impl WeightDeltas {
    /// Clip every delta into [-bound, bound]
    pub fn clipped(self, bound: f32) -> Self {
        Self {
            staleness_penalty: self.staleness_penalty.clamp(-bound, bound),
            orphan_penalty: self.orphan_penalty.clamp(-bound, bound),
            connectivity_bonus: self.connectivity_bonus.clamp(-bound, bound),
        }
    }
}

/// Per-project tuning configuration persisted in the graph store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningState {
    pub project: String,
    pub deltas: WeightDeltas,
    pub tuning_count: u64,
    pub last_tuned: Option<DateTime<Utc>>,
}

/// Persistence surface for query records, feedback, and tuning state.
/// The graph store implements this in production; `MemoryRecordStore`
/// backs tests and store-less development.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Insert or finalize a query record (merge on id)
    async fn upsert_query(&self, record: &QueryRecord) -> Result<()>;

    async fn get_query(&self, id: &str) -> Result<Option<QueryRecord>>;

    /// Attach feedback; `NotFound` if the query does not exist, `Conflict`
    /// if feedback is already attached
    async fn attach_feedback(&self, feedback: &Feedback) -> Result<()>;

    async fn feedback_stats(&self, project: Option<&str>) -> Result<FeedbackStats>;

    /// Query records with feedback completed since the given instant
    async fn labeled_records_since(
        &self,
        since: DateTime<Utc>,
        project: Option<&str>,
    ) -> Result<Vec<LabeledRecord>>;

    async fn tuning_config(&self, project: &str) -> Result<Option<TuningState>>;

    async fn save_tuning_config(&self, state: &TuningState) -> Result<()>;
}

/// In-memory record store
#[derive(Default)]
pub struct MemoryRecordStore {
    queries: RwLock<HashMap<String, QueryRecord>>,
    feedback: RwLock<HashMap<String, Feedback>>,
    tuning: RwLock<HashMap<String, TuningState>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn upsert_query(&self, record: &QueryRecord) -> Result<()> {
        self.queries
            .write()
            .expect("record lock")
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_query(&self, id: &str) -> Result<Option<QueryRecord>> {
        Ok(self.queries.read().expect("record lock").get(id).cloned())
    }

    async fn attach_feedback(&self, feedback: &Feedback) -> Result<()> {
        if !self
            .queries
            .read()
            .expect("record lock")
            .contains_key(&feedback.query_id)
        {
            return Err(GatewayError::NotFound(format!(
                "query {} does not exist",
                feedback.query_id
            )));
        }
        let mut attached = self.feedback.write().expect("record lock");
        if attached.contains_key(&feedback.query_id) {
            return Err(GatewayError::Conflict(format!(
                "feedback already attached to query {}",
                feedback.query_id
            )));
        }
        attached.insert(feedback.query_id.clone(), feedback.clone());
        Ok(())
    }

    async fn feedback_stats(&self, project: Option<&str>) -> Result<FeedbackStats> {
        let queries = self.queries.read().expect("record lock");
        let mut stats = FeedbackStats::default();
        for feedback in self.feedback.read().expect("record lock").values() {
            if let Some(p) = project {
                match queries.get(&feedback.query_id) {
                    Some(record) if record.project == p => {}
                    _ => continue,
                }
            }
            match feedback.rating {
                FeedbackRating::Useful => stats.useful += 1,
                FeedbackRating::NotUseful => stats.not_useful += 1,
                FeedbackRating::Partial => stats.partial += 1,
            }
        }
        Ok(stats)
    }

    async fn labeled_records_since(
        &self,
        since: DateTime<Utc>,
        project: Option<&str>,
    ) -> Result<Vec<LabeledRecord>> {
        let queries = self.queries.read().expect("record lock");
        let mut records = Vec::new();
        for feedback in self.feedback.read().expect("record lock").values() {
            let Some(record) = queries.get(&feedback.query_id) else {
                continue;
            };
            if record.completed_at.is_none_or(|t| t < since) {
                continue;
            }
            if project.is_some_and(|p| record.project != p) {
                continue;
            }
            records.push(LabeledRecord {
                project: record.project.clone(),
                features: record.features,
                usefulness: feedback.rating.usefulness(),
            });
        }
        Ok(records)
    }

    async fn tuning_config(&self, project: &str) -> Result<Option<TuningState>> {
        Ok(self
            .tuning
            .read()
            .expect("record lock")
            .get(project)
            .cloned())
    }

    async fn save_tuning_config(&self, state: &TuningState) -> Result<()> {
        self.tuning
            .write()
            .expect("record lock")
            .insert(state.project.clone(), state.clone());
        Ok(())
    }
}

/// Prometheus counters and histograms served at GET /metrics
pub struct PromMetrics {
    registry: Registry,
    pub queries_total: IntCounterVec,
    pub backend_latency_seconds: HistogramVec,
    pub recovery_attempts_total: IntCounterVec,
}

impl PromMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let queries_total = IntCounterVec::new(
            opts!("lantern_queries_total", "Completed queries by status"),
            &["status"],
        )
        .expect("metric definition");
        let backend_latency_seconds = HistogramVec::new(
            histogram_opts!(
                "lantern_backend_latency_seconds",
                "Outbound backend latency",
                vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
            ),
            &["backend"],
        )
        .expect("metric definition");
        let recovery_attempts_total = IntCounterVec::new(
            opts!(
                "lantern_recovery_attempts_total",
                "Recovery actions by kind"
            ),
            &["action"],
        )
        .expect("metric definition");

        registry
            .register(Box::new(queries_total.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(backend_latency_seconds.clone()))
            .expect("metric registration");
        registry
            .register(Box::new(recovery_attempts_total.clone()))
            .expect("metric registration");

        Self {
            registry,
            queries_total,
            backend_latency_seconds,
            recovery_attempts_total,
        }
    }

    /// Text exposition for GET /metrics
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder
            .encode(&self.registry.gather(), &mut buffer)
            .is_err()
        {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for PromMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, project: &str) -> QueryRecord {
        QueryRecord {
            id: id.into(),
            project: project.into(),
            query: "how does auth work".into(),
            intent: "explanation".into(),
            clarity: "clear".into(),
            status: QueryStatus::Success,
            submitted_at: Utc::now(),
            completed_at: Some(Utc::now()),
            vector_latency_ms: Some(40),
            graph_latency_ms: Some(25),
            synthesis_latency_ms: None,
            semantic_count: 5,
            structural_count: 3,
            confidence: Some(0.8),
            cache_hit: false,
            features: ScoringFeatures::default(),
        }
    }

    #[tokio::test]
    async fn test_feedback_requires_existing_query() {
        let store = MemoryRecordStore::new();
        let feedback = Feedback {
            query_id: "missing".into(),
            rating: FeedbackRating::Useful,
            comment: None,
            created_at: Utc::now(),
        };
        assert!(matches!(
            store.attach_feedback(&feedback).await,
            Err(GatewayError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_second_feedback_conflicts() {
        let store = MemoryRecordStore::new();
        store.upsert_query(&record("q1", "demo")).await.unwrap();
        let feedback = Feedback {
            query_id: "q1".into(),
            rating: FeedbackRating::Useful,
            comment: None,
            created_at: Utc::now(),
        };
        store.attach_feedback(&feedback).await.unwrap();
        assert!(matches!(
            store.attach_feedback(&feedback).await,
            Err(GatewayError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_feedback_stats_by_project() {
        let store = MemoryRecordStore::new();
        store.upsert_query(&record("q1", "alpha")).await.unwrap();
        store.upsert_query(&record("q2", "beta")).await.unwrap();
        for (id, rating) in [("q1", FeedbackRating::Useful), ("q2", FeedbackRating::Partial)] {
            store
                .attach_feedback(&Feedback {
                    query_id: id.into(),
                    rating,
                    comment: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let all = store.feedback_stats(None).await.unwrap();
        assert_eq!(all.total(), 2);
        let alpha = store.feedback_stats(Some("alpha")).await.unwrap();
        assert_eq!(alpha.useful, 1);
        assert_eq!(alpha.total(), 1);
    }

    #[test]
    fn test_usefulness_rate() {
        let stats = FeedbackStats {
            useful: 2,
            not_useful: 1,
            partial: 1,
        };
        assert!((stats.usefulness_rate() - 0.625).abs() < 1e-9);
    }

    #[test]
    fn test_weight_deltas_clipped() {
        let deltas = WeightDeltas {
            staleness_penalty: 0.9,
            orphan_penalty: -0.9,
            connectivity_bonus: 0.1,
        };
        let clipped = deltas.clipped(0.25);
        assert_eq!(clipped.staleness_penalty, 0.25);
        assert_eq!(clipped.orphan_penalty, -0.25);
        assert_eq!(clipped.connectivity_bonus, 0.1);
    }

    #[test]
    fn test_prom_metrics_render() {
        let prom = PromMetrics::new();
        prom.queries_total.with_label_values(&["success"]).inc();
        let text = prom.render();
        assert!(text.contains("lantern_queries_total"));
    }
}
