// src/stores/graph.rs
// Neo4j (bolt) wrapper - structural graph reads plus the gateway-owned
// Query / Feedback / TuningConfig record types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use neo4rs::{Graph, query};
use tracing::debug;

use crate::config::GraphStoreConfig;
use crate::error::{GatewayError, Result};
use crate::metrics::{
    Feedback, FeedbackRating, FeedbackStats, LabeledRecord, QueryRecord, QueryStatus,
    RecordStore, ScoringFeatures, TuningState, WeightDeltas,
};
use crate::retrieval::types::{GraphNode, NodeKind, RelationKind};

/// One hop returned from the structural graph
#[derive(Debug, Clone)]
pub struct EdgeRow {
    pub source: String,
    pub relation: RelationKind,
    pub target: String,
    pub source_path: Option<String>,
    pub target_path: Option<String>,
}

/// Read surface the graph retriever needs; kept narrow so the BFS logic can
/// be exercised against an in-memory graph in tests.
#[async_trait]
pub trait GraphReader: Send + Sync {
    /// Resolve candidate anchor nodes by exact/fuzzy match on name or path
    async fn resolve_anchors(
        &self,
        project: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<GraphNode>>;

    /// Outgoing edges from a set of nodes along the allowed relation kinds
    async fn outgoing_edges(
        &self,
        project: &str,
        names: &[String],
        kinds: &[RelationKind],
        limit: usize,
    ) -> Result<Vec<EdgeRow>>;

    /// Highest-degree nodes in the project, optionally restricted by type
    async fn top_connected(
        &self,
        project: &str,
        kind: Option<NodeKind>,
        limit: usize,
    ) -> Result<Vec<GraphNode>>;
}

/// Bolt-backed graph store
pub struct GraphStore {
    graph: Graph,
}

impl GraphStore {
    pub async fn connect(config: &GraphStoreConfig) -> Result<Self> {
        let graph = Graph::new(&config.url, &config.user, &config.password)
            .await
            .map_err(|e| GatewayError::Unavailable(format!("neo4j connect: {e}")))?;
        Ok(Self { graph })
    }

    /// Liveness probe used by the health monitor
    pub async fn ping(&self) -> Result<()> {
        let mut rows = self.graph.execute(query("RETURN 1 AS ok")).await?;
        rows.next().await?;
        Ok(())
    }

    fn node_from_row(row: &neo4rs::Row) -> Option<GraphNode> {
        let name: String = row.get("name").ok()?;
        let kind = row
            .get::<String>("kind")
            .ok()
            .and_then(|k| NodeKind::parse(&k))?;
        Some(GraphNode {
            name,
            kind,
            path: row.get::<Option<String>>("path").ok().flatten(),
            line_start: row
                .get::<Option<i64>>("line_start")
                .ok()
                .flatten()
                .map(|v| v as u32),
            line_end: row
                .get::<Option<i64>>("line_end")
                .ok()
                .flatten()
                .map(|v| v as u32),
        })
    }
}

#[async_trait]
impl GraphReader for GraphStore {
    async fn resolve_anchors(
        &self,
        project: &str,
        terms: &[String],
        limit: usize,
    ) -> Result<Vec<GraphNode>> {
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let lowered: Vec<String> = terms.iter().map(|t| t.to_lowercase()).collect();
        let q = query(
            "MATCH (n) WHERE n.project = $project \
             AND any(term IN $terms WHERE toLower(n.name) CONTAINS term \
                 OR toLower(coalesce(n.path, '')) CONTAINS term) \
             RETURN n.name AS name, labels(n)[0] AS kind, n.path AS path, \
                    n.line_start AS line_start, n.line_end AS line_end \
             LIMIT $limit",
        )
        .param("project", project)
        .param("terms", lowered)
        .param("limit", limit as i64);

        let mut rows = self.graph.execute(q).await?;
        let mut anchors = Vec::new();
        while let Some(row) = rows.next().await? {
            if let Some(node) = Self::node_from_row(&row) {
                anchors.push(node);
            }
        }
        Ok(anchors)
    }

    async fn outgoing_edges(
        &self,
        project: &str,
        names: &[String],
        kinds: &[RelationKind],
        limit: usize,
    ) -> Result<Vec<EdgeRow>> {
        if names.is_empty() || kinds.is_empty() {
            return Ok(Vec::new());
        }
        let kind_names: Vec<String> = kinds.iter().map(|k| k.as_str().to_string()).collect();
        let q = query(
            "MATCH (a)-[r]->(b) WHERE a.project = $project \
             AND a.name IN $names AND type(r) IN $kinds \
             RETURN a.name AS source, type(r) AS relation, b.name AS target, \
                    a.path AS source_path, b.path AS target_path \
             LIMIT $limit",
        )
        .param("project", project)
        .param("names", names.to_vec())
        .param("kinds", kind_names)
        .param("limit", limit as i64);

        let mut rows = self.graph.execute(q).await?;
        let mut edges = Vec::new();
        while let Some(row) = rows.next().await? {
            let relation = row
                .get::<String>("relation")
                .ok()
                .and_then(|r| RelationKind::parse(&r));
            let (Ok(source), Ok(target), Some(relation)) = (
                row.get::<String>("source"),
                row.get::<String>("target"),
                relation,
            ) else {
                continue;
            };
            edges.push(EdgeRow {
                source,
                relation,
                target,
                source_path: row.get::<Option<String>>("source_path").ok().flatten(),
                target_path: row.get::<Option<String>>("target_path").ok().flatten(),
            });
        }
        Ok(edges)
    }

    async fn top_connected(
        &self,
        project: &str,
        kind: Option<NodeKind>,
        limit: usize,
    ) -> Result<Vec<GraphNode>> {
        let type_clause = match kind {
            Some(k) => format!("AND '{}' IN labels(n) ", k.as_str()),
            None => String::new(),
        };
        let q = query(&format!(
            "MATCH (n)-[r]-() WHERE n.project = $project {type_clause}\
             RETURN n.name AS name, labels(n)[0] AS kind, n.path AS path, \
                    n.line_start AS line_start, n.line_end AS line_end, \
                    count(r) AS degree \
             ORDER BY degree DESC LIMIT $limit"
        ))
        .param("project", project)
        .param("limit", limit as i64);

        let mut rows = self.graph.execute(q).await?;
        let mut nodes = Vec::new();
        while let Some(row) = rows.next().await? {
            if let Some(node) = Self::node_from_row(&row) {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}

#[async_trait]
impl RecordStore for GraphStore {
    async fn upsert_query(&self, record: &QueryRecord) -> Result<()> {
        let q = query(
            "MERGE (q:Query {id: $id}) \
             SET q.project = $project, q.query = $query, q.intent = $intent, \
                 q.clarity = $clarity, q.status = $status, \
                 q.submitted_at = $submitted_at, q.completed_at = $completed_at, \
                 q.vector_latency_ms = $vector_latency_ms, \
                 q.graph_latency_ms = $graph_latency_ms, \
                 q.synthesis_latency_ms = $synthesis_latency_ms, \
                 q.semantic_count = $semantic_count, \
                 q.structural_count = $structural_count, \
                 q.confidence = $confidence, q.cache_hit = $cache_hit, \
                 q.staleness = $staleness, q.orphan_ratio = $orphan_ratio, \
                 q.connectivity = $connectivity",
        )
        .param("id", record.id.as_str())
        .param("project", record.project.as_str())
        .param("query", record.query.as_str())
        .param("intent", record.intent.as_str())
        .param("clarity", record.clarity.as_str())
        .param("status", record.status.as_str())
        .param("submitted_at", record.submitted_at.timestamp())
        .param(
            "completed_at",
            record.completed_at.map(|t| t.timestamp()).unwrap_or(-1),
        )
        .param(
            "vector_latency_ms",
            record.vector_latency_ms.map(|v| v as i64).unwrap_or(-1),
        )
        .param(
            "graph_latency_ms",
            record.graph_latency_ms.map(|v| v as i64).unwrap_or(-1),
        )
        .param(
            "synthesis_latency_ms",
            record.synthesis_latency_ms.map(|v| v as i64).unwrap_or(-1),
        )
        .param("semantic_count", record.semantic_count as i64)
        .param("structural_count", record.structural_count as i64)
        .param(
            "confidence",
            record.confidence.map(|c| c as f64).unwrap_or(-1.0),
        )
        .param("cache_hit", record.cache_hit)
        .param("staleness", record.features.staleness as f64)
        .param("orphan_ratio", record.features.orphan_ratio as f64)
        .param("connectivity", record.features.connectivity as f64);

        self.graph.run(q).await?;
        debug!(query_id = %record.id, status = record.status.as_str(), "Persisted query record");
        Ok(())
    }

    async fn get_query(&self, id: &str) -> Result<Option<QueryRecord>> {
        let q = query(
            "MATCH (q:Query {id: $id}) \
             RETURN q.id AS id, q.project AS project, q.query AS query, \
                    q.intent AS intent, q.clarity AS clarity, q.status AS status, \
                    q.submitted_at AS submitted_at, q.completed_at AS completed_at, \
                    q.vector_latency_ms AS vector_latency_ms, \
                    q.graph_latency_ms AS graph_latency_ms, \
                    q.synthesis_latency_ms AS synthesis_latency_ms, \
                    q.semantic_count AS semantic_count, \
                    q.structural_count AS structural_count, \
                    q.confidence AS confidence, q.cache_hit AS cache_hit, \
                    q.staleness AS staleness, q.orphan_ratio AS orphan_ratio, \
                    q.connectivity AS connectivity",
        )
        .param("id", id);

        let mut rows = self.graph.execute(q).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let opt_latency = |key: &str| -> Option<u64> {
            row.get::<i64>(key).ok().filter(|v| *v >= 0).map(|v| v as u64)
        };
        let status = row
            .get::<String>("status")
            .ok()
            .and_then(|s| QueryStatus::parse(&s))
            .unwrap_or(QueryStatus::Unavailable);

        Ok(Some(QueryRecord {
            id: row.get("id").unwrap_or_default(),
            project: row.get("project").unwrap_or_default(),
            query: row.get("query").unwrap_or_default(),
            intent: row.get("intent").unwrap_or_default(),
            clarity: row.get("clarity").unwrap_or_default(),
            status,
            submitted_at: DateTime::from_timestamp(row.get("submitted_at").unwrap_or(0), 0)
                .unwrap_or_else(Utc::now),
            completed_at: row
                .get::<i64>("completed_at")
                .ok()
                .filter(|v| *v >= 0)
                .and_then(|v| DateTime::from_timestamp(v, 0)),
            vector_latency_ms: opt_latency("vector_latency_ms"),
            graph_latency_ms: opt_latency("graph_latency_ms"),
            synthesis_latency_ms: opt_latency("synthesis_latency_ms"),
            semantic_count: row.get::<i64>("semantic_count").unwrap_or(0) as usize,
            structural_count: row.get::<i64>("structural_count").unwrap_or(0) as usize,
            confidence: row
                .get::<f64>("confidence")
                .ok()
                .filter(|c| *c >= 0.0)
                .map(|c| c as f32),
            cache_hit: row.get("cache_hit").unwrap_or(false),
            features: ScoringFeatures {
                staleness: row.get::<f64>("staleness").unwrap_or(0.0) as f32,
                orphan_ratio: row.get::<f64>("orphan_ratio").unwrap_or(0.0) as f32,
                connectivity: row.get::<f64>("connectivity").unwrap_or(0.0) as f32,
            },
        }))
    }

    async fn attach_feedback(&self, feedback: &Feedback) -> Result<()> {
        let check = query(
            "MATCH (q:Query {id: $id}) \
             OPTIONAL MATCH (q)-[:HAS_FEEDBACK]->(f:Feedback) \
             RETURN q.id AS id, count(f) > 0 AS has_feedback",
        )
        .param("id", feedback.query_id.as_str());

        let mut rows = self.graph.execute(check).await?;
        let Some(row) = rows.next().await? else {
            return Err(GatewayError::NotFound(format!(
                "query {} does not exist",
                feedback.query_id
            )));
        };
        if row.get::<bool>("has_feedback").unwrap_or(false) {
            return Err(GatewayError::Conflict(format!(
                "feedback already attached to query {}",
                feedback.query_id
            )));
        }

        let insert = query(
            "MATCH (q:Query {id: $id}) \
             CREATE (q)-[:HAS_FEEDBACK]->(:Feedback {rating: $rating, \
                 comment: $comment, created_at: $created_at})",
        )
        .param("id", feedback.query_id.as_str())
        .param("rating", feedback.rating.as_str())
        .param("comment", feedback.comment.clone().unwrap_or_default())
        .param("created_at", feedback.created_at.timestamp());

        self.graph.run(insert).await?;
        Ok(())
    }

    async fn feedback_stats(&self, project: Option<&str>) -> Result<FeedbackStats> {
        let project_clause = if project.is_some() {
            "AND q.project = $project "
        } else {
            ""
        };
        let mut q = query(&format!(
            "MATCH (q:Query)-[:HAS_FEEDBACK]->(f:Feedback) WHERE true {project_clause}\
             RETURN f.rating AS rating, count(*) AS total"
        ));
        if let Some(p) = project {
            q = q.param("project", p);
        }

        let mut rows = self.graph.execute(q).await?;
        let mut stats = FeedbackStats::default();
        while let Some(row) = rows.next().await? {
            let total = row.get::<i64>("total").unwrap_or(0) as u64;
            match row
                .get::<String>("rating")
                .ok()
                .and_then(|r| FeedbackRating::parse(&r))
            {
                Some(FeedbackRating::Useful) => stats.useful = total,
                Some(FeedbackRating::NotUseful) => stats.not_useful = total,
                Some(FeedbackRating::Partial) => stats.partial = total,
                None => {}
            }
        }
        Ok(stats)
    }

    async fn labeled_records_since(
        &self,
        since: DateTime<Utc>,
        project: Option<&str>,
    ) -> Result<Vec<LabeledRecord>> {
        let project_clause = if project.is_some() {
            "AND q.project = $project "
        } else {
            ""
        };
        let mut q = query(&format!(
            "MATCH (q:Query)-[:HAS_FEEDBACK]->(f:Feedback) \
             WHERE q.completed_at >= $since {project_clause}\
             RETURN q.project AS project, q.staleness AS staleness, \
                    q.orphan_ratio AS orphan_ratio, q.connectivity AS connectivity, \
                    f.rating AS rating"
        ))
        .param("since", since.timestamp());
        if let Some(p) = project {
            q = q.param("project", p);
        }

        let mut rows = self.graph.execute(q).await?;
        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let Some(rating) = row
                .get::<String>("rating")
                .ok()
                .and_then(|r| FeedbackRating::parse(&r))
            else {
                continue;
            };
            records.push(LabeledRecord {
                project: row.get("project").unwrap_or_default(),
                features: ScoringFeatures {
                    staleness: row.get::<f64>("staleness").unwrap_or(0.0) as f32,
                    orphan_ratio: row.get::<f64>("orphan_ratio").unwrap_or(0.0) as f32,
                    connectivity: row.get::<f64>("connectivity").unwrap_or(0.0) as f32,
                },
                usefulness: rating.usefulness(),
            });
        }
        Ok(records)
    }

    async fn tuning_config(&self, project: &str) -> Result<Option<TuningState>> {
        let q = query(
            "MATCH (t:TuningConfig {project: $project}) \
             RETURN t.staleness_delta AS staleness_delta, \
                    t.orphan_delta AS orphan_delta, \
                    t.connectivity_delta AS connectivity_delta, \
                    t.tuning_count AS tuning_count, t.last_tuned AS last_tuned",
        )
        .param("project", project);

        let mut rows = self.graph.execute(q).await?;
        let Some(row) = rows.next().await? else {
            return Ok(None);
        };
        Ok(Some(TuningState {
            project: project.to_string(),
            deltas: WeightDeltas {
                staleness_penalty: row.get::<f64>("staleness_delta").unwrap_or(0.0) as f32,
                orphan_penalty: row.get::<f64>("orphan_delta").unwrap_or(0.0) as f32,
                connectivity_bonus: row.get::<f64>("connectivity_delta").unwrap_or(0.0) as f32,
            },
            tuning_count: row.get::<i64>("tuning_count").unwrap_or(0) as u64,
            last_tuned: row
                .get::<i64>("last_tuned")
                .ok()
                .and_then(|v| DateTime::from_timestamp(v, 0)),
        }))
    }

    async fn save_tuning_config(&self, state: &TuningState) -> Result<()> {
        let q = query(
            "MERGE (t:TuningConfig {project: $project}) \
             SET t.staleness_delta = $staleness_delta, \
                 t.orphan_delta = $orphan_delta, \
                 t.connectivity_delta = $connectivity_delta, \
                 t.tuning_count = $tuning_count, t.last_tuned = $last_tuned",
        )
        .param("project", state.project.as_str())
        .param("staleness_delta", state.deltas.staleness_penalty as f64)
        .param("orphan_delta", state.deltas.orphan_penalty as f64)
        .param("connectivity_delta", state.deltas.connectivity_bonus as f64)
        .param("tuning_count", state.tuning_count as i64)
        .param(
            "last_tuned",
            state.last_tuned.map(|t| t.timestamp()).unwrap_or(-1),
        );

        self.graph.run(q).await?;
        Ok(())
    }
}
