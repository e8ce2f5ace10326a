// src/stores/vector.rs
// Qdrant wrapper for the indexed chunk collection

use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, Distance, Filter, SearchPointsBuilder,
    VectorParamsBuilder,
};
use tracing::{debug, info};

use crate::config::VectorStoreConfig;
use crate::error::{GatewayError, Result};
use crate::retrieval::types::{ContentType, RetrievalFilter};

/// A raw scored chunk before rank assignment
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_id: String,
    pub score: f32,
    pub content: String,
    pub source: String,
    pub content_type: ContentType,
    pub language: Option<String>,
    pub line_start: Option<u32>,
    pub line_end: Option<u32>,
    /// Days since the chunk was last reindexed, when the indexer recorded it
    pub staleness_days: Option<f32>,
}

/// Read-only client over the chunk collection
pub struct VectorStore {
    client: Qdrant,
    collection: String,
}

impl VectorStore {
    /// Connect and make sure the collection exists with the expected shape
    pub async fn connect(config: &VectorStoreConfig) -> Result<Self> {
        let client = Qdrant::from_url(&config.url)
            .skip_compatibility_check()
            .build()
            .map_err(|e| GatewayError::Unavailable(format!("qdrant connect: {e}")))?;

        let store = Self {
            client,
            collection: config.collection.clone(),
        };
        store.ensure_collection(config.dimensions).await?;
        Ok(store)
    }

    async fn ensure_collection(&self, dimensions: u64) -> Result<()> {
        let exists = self.client.collection_exists(&self.collection).await?;
        if !exists {
            info!("Creating Qdrant collection: {}", self.collection);
            match self
                .client
                .create_collection(
                    CreateCollectionBuilder::new(&self.collection)
                        .vectors_config(VectorParamsBuilder::new(dimensions, Distance::Cosine)),
                )
                .await
            {
                Ok(_) => {}
                Err(e) if e.to_string().contains("already exists") => {
                    // Another replica won the create race
                    debug!("Collection {} already exists", self.collection);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Cosine nearest-neighbor search scoped to a project, with optional
    /// content-type and language payload filters
    pub async fn search(
        &self,
        embedding: Vec<f32>,
        project: &str,
        limit: u64,
        filter: &RetrievalFilter,
    ) -> Result<Vec<ScoredChunk>> {
        let mut conditions = vec![Condition::matches("project", project.to_string())];
        if let Some(content_type) = filter.content_type {
            conditions.push(Condition::matches(
                "content_type",
                content_type.as_str().to_string(),
            ));
        }
        if let Some(ref language) = filter.language {
            conditions.push(Condition::matches("language", language.clone()));
        }

        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(&self.collection, embedding, limit)
                    .filter(Filter::must(conditions))
                    .with_payload(true),
            )
            .await?;

        Ok(results
            .result
            .into_iter()
            .filter_map(Self::point_to_chunk)
            .collect())
    }

    /// Liveness probe used by the health monitor
    pub async fn ping(&self) -> Result<()> {
        self.client.health_check().await?;
        Ok(())
    }

    fn point_to_chunk(point: qdrant_client::qdrant::ScoredPoint) -> Option<ScoredChunk> {
        let payload = point.payload;

        let chunk_id = payload.get("chunk_id")?.as_str()?.to_string();
        let content = payload.get("content")?.as_str()?.to_string();
        let source = payload.get("source")?.as_str()?.to_string();
        let content_type = payload
            .get("content_type")
            .and_then(|v| v.as_str())
            .and_then(|s| ContentType::parse(s))
            .unwrap_or(ContentType::Code);

        let language = payload
            .get("language")
            .and_then(|v| v.as_str())
            .map(String::from);
        let line_start = payload
            .get("line_start")
            .and_then(|v| v.as_integer())
            .map(|i| i as u32);
        let line_end = payload
            .get("line_end")
            .and_then(|v| v.as_integer())
            .map(|i| i as u32);
        let staleness_days = payload
            .get("staleness_days")
            .and_then(|v| v.as_double())
            .map(|f| f as f32);

        Some(ScoredChunk {
            chunk_id,
            score: point.score,
            content,
            source,
            content_type,
            language,
            line_start,
            line_end,
            staleness_days,
        })
    }
}
