// src/retrieval/structural.rs
// Graph retriever: anchor resolution, bounded BFS over typed edges, ranking

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::retrieval::types::{NodeKind, RelationKind, StructuralRelationship};
use crate::stores::{EdgeRow, GraphReader};

/// How many anchor candidates to resolve per query
const MAX_ANCHORS: usize = 10;

/// Fallback sample size when no anchors resolve
const FALLBACK_NODES: usize = 5;

/// Retrieval result with the anchor accounting the tuner feeds on
#[derive(Debug, Clone, Default)]
pub struct StructuralResult {
    pub relationships: Vec<StructuralRelationship>,
    pub anchor_count: usize,
    /// Anchors that produced at least one relationship
    pub connected_anchors: usize,
}

/// Retriever seam the orchestrator composes over; faked in tests
#[async_trait]
pub trait StructuralRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        project: &str,
        kinds: &[RelationKind],
        max_depth: u32,
        max_edges: usize,
    ) -> Result<StructuralResult>;
}

/// Bolt-backed structural retriever
pub struct GraphRetriever {
    reader: Arc<dyn GraphReader>,
}

impl GraphRetriever {
    pub fn new(reader: Arc<dyn GraphReader>) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl StructuralRetriever for GraphRetriever {
    async fn retrieve(
        &self,
        query: &str,
        project: &str,
        kinds: &[RelationKind],
        max_depth: u32,
        max_edges: usize,
    ) -> Result<StructuralResult> {
        let terms = identifier_terms(query);
        let mut anchors = self
            .reader
            .resolve_anchors(project, &terms, MAX_ANCHORS)
            .await?;

        if anchors.is_empty() {
            // Degree-bounded fallback: sample the best-connected nodes of a
            // type hinted by the query
            anchors = self
                .reader
                .top_connected(project, hinted_kind(query), FALLBACK_NODES)
                .await?;
            debug!(project, fallback = anchors.len(), "No anchors resolved, sampling top-connected nodes");
        }
        if anchors.is_empty() {
            return Ok(StructuralResult::default());
        }

        let anchor_names: Vec<String> = anchors.iter().map(|n| n.name.clone()).collect();
        let mut relationships = Vec::new();
        // Node name → path walked from its anchor
        let mut paths: HashMap<String, Vec<String>> = anchor_names
            .iter()
            .map(|name| (name.clone(), vec![name.clone()]))
            .collect();
        let mut visited: HashSet<String> = anchor_names.iter().cloned().collect();
        let mut frontier = anchor_names.clone();

        for _ in 0..max_depth {
            if frontier.is_empty() || relationships.len() >= max_edges {
                break;
            }
            let edges = self
                .reader
                .outgoing_edges(project, &frontier, kinds, max_edges - relationships.len())
                .await?;
            if edges.is_empty() {
                break;
            }

            let mut next_frontier = Vec::new();
            for edge in edges {
                let path = paths
                    .get(&edge.source)
                    .cloned()
                    .unwrap_or_else(|| vec![edge.source.clone()]);
                let mut full_path = path;
                full_path.push(edge.target.clone());

                if visited.insert(edge.target.clone()) {
                    paths.insert(edge.target.clone(), full_path.clone());
                    next_frontier.push(edge.target.clone());
                }

                relationships.push(relationship_from_edge(&edge, full_path));
                if relationships.len() >= max_edges {
                    break;
                }
            }
            frontier = next_frontier;
        }

        let connected: HashSet<&str> = relationships
            .iter()
            .map(|r| r.path.first().map(String::as_str).unwrap_or(""))
            .collect();
        let connected_anchors = anchor_names
            .iter()
            .filter(|name| connected.contains(name.as_str()))
            .count();

        rank_relationships(&mut relationships);
        relationships.truncate(max_edges);

        Ok(StructuralResult {
            relationships,
            anchor_count: anchor_names.len(),
            connected_anchors,
        })
    }
}

fn relationship_from_edge(edge: &EdgeRow, path: Vec<String>) -> StructuralRelationship {
    StructuralRelationship {
        source: edge.source.clone(),
        target: edge.target.clone(),
        relation: edge.relation,
        explanation: Some(explain(edge)),
        source_path: edge.source_path.clone(),
        path,
    }
}

fn explain(edge: &EdgeRow) -> String {
    let verb = match edge.relation {
        RelationKind::Defines => "defines",
        RelationKind::Calls => "calls",
        RelationKind::Imports => "imports",
        RelationKind::DependsOn => "depends on",
        RelationKind::HasComponent => "has component",
        RelationKind::Extends => "extends",
        RelationKind::Implements => "implements",
    };
    format!("{} {} {}", edge.source, verb, edge.target)
}

/// Rank by path length ascending, then relation-kind priority, then source
/// node path ascending
pub fn rank_relationships(relationships: &mut [StructuralRelationship]) {
    relationships.sort_by(|a, b| {
        a.path
            .len()
            .cmp(&b.path.len())
            .then_with(|| a.relation.priority().cmp(&b.relation.priority()))
            .then_with(|| a.source_path.cmp(&b.source_path))
    });
}

/// Extract identifier-shaped terms worth anchoring on
fn identifier_terms(query: &str) -> Vec<String> {
    const STOPWORDS: &[&str] = &[
        "the", "and", "for", "with", "how", "what", "where", "why", "does", "show",
        "find", "about", "this", "that", "all", "any", "are", "can", "you", "who",
        "which", "when", "from", "into", "not", "use", "used", "uses", "work",
        "works", "class", "function", "file", "code",
    ];
    query
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|token| token.len() >= 3)
        .filter(|token| !STOPWORDS.contains(&token.to_lowercase().as_str()))
        .map(str::to_string)
        .collect()
}

/// Guess a node type from the query wording, used by the fallback sampler
fn hinted_kind(query: &str) -> Option<NodeKind> {
    let lowered = query.to_lowercase();
    if lowered.contains("class") || lowered.contains("struct") {
        Some(NodeKind::Class)
    } else if lowered.contains("function") || lowered.contains("method") {
        Some(NodeKind::Function)
    } else if lowered.contains("file") || lowered.contains("module") {
        Some(NodeKind::File)
    } else if lowered.contains("doc") || lowered.contains("readme") {
        Some(NodeKind::Document)
    } else if lowered.contains("component") || lowered.contains("service") {
        Some(NodeKind::Component)
    } else {
        None
    }
}
