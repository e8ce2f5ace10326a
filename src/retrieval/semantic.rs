// src/retrieval/semantic.rs
// Vector retriever: embed the query, search the chunk collection, normalize

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::providers::{CallOptions, EmbeddingChain};
use crate::retrieval::types::{RetrievalFilter, SemanticMatch};
use crate::stores::{ScoredChunk, VectorStore};

/// Retriever seam the orchestrator composes over; faked in tests
#[async_trait]
pub trait SemanticRetriever: Send + Sync {
    async fn retrieve(
        &self,
        query: &str,
        project: &str,
        top_k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<SemanticMatch>>;
}

/// Qdrant-backed semantic retriever
pub struct VectorRetriever {
    chain: Arc<EmbeddingChain>,
    store: Arc<VectorStore>,
    embed_deadline: Duration,
}

impl VectorRetriever {
    pub fn new(chain: Arc<EmbeddingChain>, store: Arc<VectorStore>) -> Self {
        Self {
            chain,
            store,
            embed_deadline: Duration::from_secs(10),
        }
    }
}

#[async_trait]
impl SemanticRetriever for VectorRetriever {
    async fn retrieve(
        &self,
        query: &str,
        project: &str,
        top_k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<SemanticMatch>> {
        let options = CallOptions::embedding(self.embed_deadline);
        let embedding = self.chain.embed(query, &options).await?;

        // Over-fetch slightly so deterministic tie-breaking is stable at the cut
        let chunks = self
            .store
            .search(embedding, project, (top_k + 5) as u64, filter)
            .await?;
        debug!(project, raw = chunks.len(), "Vector search returned");

        Ok(normalize_matches(chunks, top_k))
    }
}

/// Map backend scores into [0, 1], order deterministically, truncate to K.
/// Qdrant cosine similarity is used as-is (clamped); ties break by source
/// path ascending, then line start ascending.
pub fn normalize_matches(chunks: Vec<ScoredChunk>, top_k: usize) -> Vec<SemanticMatch> {
    let mut matches: Vec<SemanticMatch> = chunks
        .into_iter()
        .map(|chunk| SemanticMatch {
            chunk_id: chunk.chunk_id,
            score: chunk.score.clamp(0.0, 1.0),
            content: chunk.content,
            source: chunk.source,
            content_type: chunk.content_type,
            language: chunk.language,
            line_start: chunk.line_start,
            line_end: chunk.line_end,
            rank: 0,
            staleness_days: chunk.staleness_days,
        })
        .collect();

    matches.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.line_start.unwrap_or(0).cmp(&b.line_start.unwrap_or(0)))
    });
    matches.truncate(top_k);
    for (i, m) in matches.iter_mut().enumerate() {
        m.rank = i + 1;
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::types::ContentType;

    fn chunk(id: &str, score: f32, source: &str, line_start: Option<u32>) -> ScoredChunk {
        ScoredChunk {
            chunk_id: id.into(),
            score,
            content: format!("content of {id}"),
            source: source.into(),
            content_type: ContentType::Code,
            language: Some("rust".into()),
            line_start,
            line_end: line_start.map(|l| l + 10),
            staleness_days: None,
        }
    }

    #[test]
    fn test_scores_clamped_to_unit_interval() {
        let matches = normalize_matches(
            vec![chunk("a", 1.3, "src/a.rs", None), chunk("b", -0.2, "src/b.rs", None)],
            10,
        );
        assert_eq!(matches[0].score, 1.0);
        assert_eq!(matches[1].score, 0.0);
    }

    #[test]
    fn test_ties_break_by_path_then_line() {
        let matches = normalize_matches(
            vec![
                chunk("late", 0.8, "src/z.rs", Some(5)),
                chunk("early", 0.8, "src/a.rs", Some(50)),
                chunk("earlier_line", 0.8, "src/a.rs", Some(3)),
            ],
            10,
        );
        assert_eq!(matches[0].chunk_id, "earlier_line");
        assert_eq!(matches[1].chunk_id, "early");
        assert_eq!(matches[2].chunk_id, "late");
    }

    #[test]
    fn test_truncates_and_ranks() {
        let chunks = (0..30)
            .map(|i| chunk(&format!("c{i}"), 1.0 - i as f32 * 0.01, "src/x.rs", Some(i)))
            .collect();
        let matches = normalize_matches(chunks, 20);
        assert_eq!(matches.len(), 20);
        assert_eq!(matches[0].rank, 1);
        assert_eq!(matches[19].rank, 20);
        assert!(matches[0].score >= matches[19].score);
    }
}
