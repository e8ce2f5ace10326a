// src/monitor/probes.rs
// Concrete health probes for the three external stores

use async_trait::async_trait;
use std::sync::Arc;

use super::{HealthProbe, SERVICE_CACHE, SERVICE_GRAPH, SERVICE_VECTOR};
use crate::stores::{GraphStore, SharedCache, VectorStore};

pub struct VectorProbe {
    store: Arc<VectorStore>,
}

impl VectorProbe {
    pub fn new(store: Arc<VectorStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for VectorProbe {
    fn name(&self) -> &'static str {
        SERVICE_VECTOR
    }

    async fn probe(&self) -> std::result::Result<(), String> {
        self.store.ping().await.map_err(|e| e.to_string())
    }
}

pub struct GraphProbe {
    store: Arc<GraphStore>,
}

impl GraphProbe {
    pub fn new(store: Arc<GraphStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl HealthProbe for GraphProbe {
    fn name(&self) -> &'static str {
        SERVICE_GRAPH
    }

    async fn probe(&self) -> std::result::Result<(), String> {
        self.store.ping().await.map_err(|e| e.to_string())
    }
}

pub struct CacheProbe {
    cache: Arc<dyn SharedCache>,
}

impl CacheProbe {
    pub fn new(cache: Arc<dyn SharedCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl HealthProbe for CacheProbe {
    fn name(&self) -> &'static str {
        SERVICE_CACHE
    }

    async fn probe(&self) -> std::result::Result<(), String> {
        self.cache.ping().await.map_err(|e| e.to_string())
    }
}
