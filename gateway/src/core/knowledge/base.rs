use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum KnowledgeError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Search failed: {0}")]
    SearchFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),
}

/// One retrieved knowledge passage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    /// Similarity, higher is closer
    pub score: f32,
    #[serde(default)]
    pub source: String,
}

/// Metadata filters forwarded verbatim to the retrieval service
/// (e.g. `agent_id`, `knowledge_base_id`).
pub type SearchFilters = HashMap<String, String>;

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError>;
}

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        min_score: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<Passage>, KnowledgeError>;
}
