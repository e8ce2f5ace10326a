// src/retrieval/types.rs
// Shared retrieval data model: semantic matches, structural relationships, citations

use serde::{Deserialize, Serialize};
use std::fmt;

/// Content type tag carried by indexed chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Code,
    Doc,
    Comment,
}

impl ContentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "doc" => Some(Self::Doc),
            "comment" => Some(Self::Comment),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Doc => "doc",
            Self::Comment => "comment",
        }
    }
}

/// A single result from the vector store, normalized and ranked
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticMatch {
    pub chunk_id: String,
    /// Similarity in [0, 1]
    pub score: f32,
    pub content: String,
    pub source: String,
    pub content_type: ContentType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    /// 1-based retrieval rank after normalization
    pub rank: usize,
    /// Indexer-reported staleness, consumed by the confidence tuner
    #[serde(skip)]
    pub staleness_days: Option<f32>,
}

impl SemanticMatch {
    /// `path:start-end` marker used in synthesis context documents
    pub fn source_marker(&self) -> String {
        match (self.line_start, self.line_end) {
            (Some(start), Some(end)) => format!("{}:{}-{}", self.source, start, end),
            (Some(start), None) => format!("{}:{}", self.source, start),
            _ => self.source.clone(),
        }
    }
}

/// Node types in the structural code graph (external, read-only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    File,
    Class,
    Function,
    Document,
    Component,
    Capability,
    Feature,
}

impl NodeKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "File" => Some(Self::File),
            "Class" => Some(Self::Class),
            "Function" => Some(Self::Function),
            "Document" => Some(Self::Document),
            "Component" => Some(Self::Component),
            "Capability" => Some(Self::Capability),
            "Feature" => Some(Self::Feature),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "File",
            Self::Class => "Class",
            Self::Function => "Function",
            Self::Document => "Document",
            Self::Component => "Component",
            Self::Capability => "Capability",
            Self::Feature => "Feature",
        }
    }
}

/// A typed node resolved from the graph store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub name: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
}

/// Directed edge types in the structural graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationKind {
    Defines,
    Calls,
    Imports,
    DependsOn,
    HasComponent,
    Extends,
    Implements,
}

impl RelationKind {
    pub const ALL: [RelationKind; 7] = [
        Self::Defines,
        Self::Calls,
        Self::Imports,
        Self::DependsOn,
        Self::HasComponent,
        Self::Extends,
        Self::Implements,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEFINES" => Some(Self::Defines),
            "CALLS" => Some(Self::Calls),
            "IMPORTS" => Some(Self::Imports),
            "DEPENDS_ON" => Some(Self::DependsOn),
            "HAS_COMPONENT" => Some(Self::HasComponent),
            "EXTENDS" => Some(Self::Extends),
            "IMPLEMENTS" => Some(Self::Implements),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Defines => "DEFINES",
            Self::Calls => "CALLS",
            Self::Imports => "IMPORTS",
            Self::DependsOn => "DEPENDS_ON",
            Self::HasComponent => "HAS_COMPONENT",
            Self::Extends => "EXTENDS",
            Self::Implements => "IMPLEMENTS",
        }
    }

    /// Ranking priority: lower sorts first
    pub fn priority(&self) -> u8 {
        match self {
            Self::Defines => 0,
            Self::Calls => 1,
            Self::Imports => 2,
            Self::DependsOn => 3,
            Self::HasComponent => 4,
            Self::Extends => 5,
            Self::Implements => 6,
        }
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A derived relationship produced by the graph retriever
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralRelationship {
    pub source: String,
    pub target: String,
    pub relation: RelationKind,
    /// Ordered node names traversed from anchor to target
    pub path: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// File path of the source node, used for ranking ties
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_path: Option<String>,
}

impl StructuralRelationship {
    /// `A → B` marker used in synthesis context documents
    pub fn graph_marker(&self) -> String {
        format!("{} → {}", self.source, self.target)
    }
}

/// Evidence pointer type carried in citations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CitationKind {
    Code,
    Doc,
    Graph,
}

/// An evidence pointer carried in a synthesized answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<u32>,
    /// Relevance in [0, 1]
    pub relevance: f32,
    pub kind: CitationKind,
}

/// LLM output grounded in retrieved evidence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesizedAnswer {
    pub text: String,
    pub confidence: f32,
    pub citations: Vec<Citation>,
}

/// Optional payload filters for vector search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilter {
    pub content_type: Option<ContentType>,
    pub language: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relation_kind_round_trip() {
        for kind in RelationKind::ALL {
            assert_eq!(RelationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RelationKind::parse("KNOWS"), None);
    }

    #[test]
    fn test_relation_priority_order() {
        assert!(RelationKind::Defines.priority() < RelationKind::Calls.priority());
        assert!(RelationKind::Calls.priority() < RelationKind::Imports.priority());
        assert!(RelationKind::Imports.priority() < RelationKind::DependsOn.priority());
    }

    #[test]
    fn test_source_marker_with_lines() {
        let m = SemanticMatch {
            chunk_id: "c1".into(),
            score: 0.9,
            content: String::new(),
            source: "src/auth/service.rs".into(),
            content_type: ContentType::Code,
            language: Some("rust".into()),
            line_start: Some(10),
            line_end: Some(42),
            rank: 1,
            staleness_days: None,
        };
        assert_eq!(m.source_marker(), "src/auth/service.rs:10-42");
    }

    #[test]
    fn test_graph_marker() {
        let rel = StructuralRelationship {
            source: "AuthService".into(),
            target: "TokenStore".into(),
            relation: RelationKind::Calls,
            path: vec!["AuthService".into(), "TokenStore".into()],
            explanation: None,
            source_path: None,
        };
        assert_eq!(rel.graph_marker(), "AuthService → TokenStore");
    }
}
