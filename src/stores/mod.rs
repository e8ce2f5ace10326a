// src/stores/mod.rs
// External store clients: vector (Qdrant), graph (Neo4j), shared cache (Redis)

pub mod cache;
pub mod graph;
pub mod vector;

pub use cache::{MemoryCache, RedisCache, SharedCache};
pub use graph::{EdgeRow, GraphReader, GraphStore};
pub use vector::{ScoredChunk, VectorStore};
