//! Knowledge augmentation for the reasoning prompt.

mod base;
pub mod embeddings;
pub mod http;
pub mod relevance;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

pub use base::{Embedder, KnowledgeError, KnowledgeRetriever, Passage, SearchFilters};
pub use embeddings::OpenAIEmbedder;
pub use http::HttpRetriever;

/// Retrieval limits applied to every lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            top_k: 3,
            min_score: 0.5,
            max_context_chars: 2000,
        }
    }
}

/// Embeds a query, searches, and renders the bounded context block.
pub struct KnowledgeAugmenter {
    embedder: Arc<dyn Embedder>,
    retriever: Arc<dyn KnowledgeRetriever>,
    settings: RetrievalSettings,
}

impl KnowledgeAugmenter {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        retriever: Arc<dyn KnowledgeRetriever>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            retriever,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// `Ok(None)` means augmentation was skipped (not relevant or nothing
    /// above the similarity floor).
    pub async fn augment(
        &self,
        text: &str,
        filters: &SearchFilters,
    ) -> Result<Option<String>, KnowledgeError> {
        if !relevance::needs_knowledge(text) {
            debug!("Utterance judged conversational, skipping retrieval");
            return Ok(None);
        }

        let embedding = self.embedder.embed(text).await?;
        let passages = self
            .retriever
            .search(
                &embedding,
                self.settings.top_k,
                self.settings.min_score,
                filters,
            )
            .await?;

        let context = relevance::build_context(
            &passages,
            self.settings.min_score,
            self.settings.max_context_chars,
        );
        debug!(
            passages = passages.len(),
            context_chars = context.as_ref().map(|c| c.len()).unwrap_or(0),
            "Knowledge retrieval complete"
        );
        Ok(context)
    }
}
