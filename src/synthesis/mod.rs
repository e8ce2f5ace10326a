// src/synthesis/mod.rs
// Evidence-grounded answer synthesis: context document assembly, the cited
// provider call, citation parse-back, and the confidence formula

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tracing::debug;

use crate::error::Result;
use crate::providers::{CallOptions, SynthesisChain};
use crate::retrieval::types::{
    Citation, CitationKind, ContentType, SemanticMatch, StructuralRelationship, SynthesizedAnswer,
};

/// The designated answer when no evidence supports the question
pub const INSUFFICIENT_EVIDENCE: &str =
    "Insufficient information in the indexed codebase to answer this question.";

/// How many of each evidence kind go into the context document
const CONTEXT_MATCHES: usize = 5;
const CONTEXT_RELATIONSHIPS: usize = 5;

/// Citations synthesized from top matches when none parse back
const FALLBACK_CITATIONS: usize = 3;

const SYSTEM_PROMPT: &str = "You are an engineering assistant answering questions about a codebase. \
Answer ONLY from the provided context. Cite every claim using the markers exactly as they appear \
in the context: [Source: path:start-end] for code or documentation evidence and [Graph: A → B] \
for structural relationships. If the context does not contain the answer, reply exactly: \
\"Insufficient information in the indexed codebase to answer this question.\" Do not speculate.";

static SOURCE_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Source:\s*([^\]]+)\]").expect("source citation pattern"));
static GRAPH_CITATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[Graph:\s*([^\]]+)\]").expect("graph citation pattern"));

/// Compact digest attached alongside the synthesized answer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insights {
    pub summary: String,
    pub key_findings: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub recommendations: Vec<String>,
}

/// LLM synthesis step over retrieved evidence
pub struct SynthesisEngine {
    chain: Arc<SynthesisChain>,
    options: CallOptions,
}

impl SynthesisEngine {
    pub fn new(chain: Arc<SynthesisChain>, options: CallOptions) -> Self {
        Self { chain, options }
    }

    /// Produce a cited answer from the retrieved evidence. With both inputs
    /// empty, returns the designated insufficient-information answer without
    /// calling any provider.
    pub async fn synthesize(
        &self,
        query: &str,
        matches: &[SemanticMatch],
        relationships: &[StructuralRelationship],
    ) -> Result<(SynthesizedAnswer, Insights)> {
        if matches.is_empty() && relationships.is_empty() {
            let answer = SynthesizedAnswer {
                text: INSUFFICIENT_EVIDENCE.to_string(),
                confidence: 0.0,
                citations: Vec::new(),
            };
            let insights = Insights {
                summary: INSUFFICIENT_EVIDENCE.to_string(),
                key_findings: Vec::new(),
                recommendations: Vec::new(),
            };
            return Ok((answer, insights));
        }

        let context = build_context(matches, relationships);
        let user_prompt = format!("Question: {query}\n\nContext:\n{context}");
        let text = self
            .chain
            .synthesize(SYSTEM_PROMPT, &user_prompt, &self.options)
            .await?;

        let mut citations = parse_citations(&text, matches, relationships);
        if citations.is_empty() {
            debug!("No citations parsed from answer — synthesizing from top matches");
            citations = fallback_citations(matches);
        }

        let confidence = confidence_score(matches, relationships, citations.len());
        let insights = derive_insights(&text, &citations);

        Ok((
            SynthesizedAnswer {
                text,
                confidence,
                citations,
            },
            insights,
        ))
    }
}

/// Concatenate evidence into the prompt context document
pub fn build_context(
    matches: &[SemanticMatch],
    relationships: &[StructuralRelationship],
) -> String {
    let mut sections = Vec::new();

    for m in matches.iter().take(CONTEXT_MATCHES) {
        sections.push(format!("[Source: {}]\n{}", m.source_marker(), m.content));
    }
    for r in relationships.iter().take(CONTEXT_RELATIONSHIPS) {
        let line = match &r.explanation {
            Some(explanation) => format!("[Graph: {}]\n{}", r.graph_marker(), explanation),
            None => format!("[Graph: {}]", r.graph_marker()),
        };
        sections.push(line);
    }

    sections.join("\n\n")
}

/// Parse citation markers back out of the answer, matching them against the
/// retrieved inputs and carrying forward the original score and line range.
/// Unmatched markers are tolerated and dropped.
pub fn parse_citations(
    answer: &str,
    matches: &[SemanticMatch],
    relationships: &[StructuralRelationship],
) -> Vec<Citation> {
    let mut citations = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for capture in SOURCE_CITATION.captures_iter(answer) {
        let cited = capture[1].trim();
        let Some(m) = matches
            .iter()
            .find(|m| m.source_marker() == cited || m.source == cited)
        else {
            continue;
        };
        if seen.insert(m.source_marker()) {
            citations.push(Citation {
                source: m.source.clone(),
                line_start: m.line_start,
                line_end: m.line_end,
                relevance: m.score,
                kind: match m.content_type {
                    ContentType::Code => CitationKind::Code,
                    ContentType::Doc | ContentType::Comment => CitationKind::Doc,
                },
            });
        }
    }

    for capture in GRAPH_CITATION.captures_iter(answer) {
        let cited = capture[1].trim();
        let Some(r) = relationships.iter().find(|r| r.graph_marker() == cited) else {
            continue;
        };
        let marker = r.graph_marker();
        if seen.insert(marker.clone()) {
            citations.push(Citation {
                source: marker,
                line_start: None,
                line_end: None,
                relevance: 1.0 / r.path.len().max(1) as f32,
                kind: CitationKind::Graph,
            });
        }
    }

    citations
}

/// Top-3 semantic matches as citations when the answer cites nothing
pub fn fallback_citations(matches: &[SemanticMatch]) -> Vec<Citation> {
    matches
        .iter()
        .take(FALLBACK_CITATIONS)
        .map(|m| Citation {
            source: m.source.clone(),
            line_start: m.line_start,
            line_end: m.line_end,
            relevance: m.score,
            kind: match m.content_type {
                ContentType::Code => CitationKind::Code,
                ContentType::Doc | ContentType::Comment => CitationKind::Doc,
            },
        })
        .collect()
}

/// 0.7 × mean semantic score + 0.1 × structural presence + 0.2 × citation coverage
pub fn confidence_score(
    matches: &[SemanticMatch],
    relationships: &[StructuralRelationship],
    citations_found: usize,
) -> f32 {
    let mean_score = if matches.is_empty() {
        0.0
    } else {
        matches.iter().map(|m| m.score).sum::<f32>() / matches.len() as f32
    };
    let structural = if relationships.is_empty() { 0.0 } else { 1.0 };
    let coverage = (citations_found as f32 / 3.0).min(1.0);

    (0.7 * mean_score + 0.1 * structural + 0.2 * coverage).clamp(0.0, 1.0)
}

fn derive_insights(answer: &str, citations: &[Citation]) -> Insights {
    let summary = answer
        .lines()
        .find(|line| !line.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string();
    let key_findings = citations.iter().map(|c| c.source.clone()).collect();

    Insights {
        summary,
        key_findings,
        recommendations: Vec::new(),
    }
}
