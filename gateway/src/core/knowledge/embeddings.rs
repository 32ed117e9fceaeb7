//! OpenAI embeddings (`POST /v1/embeddings`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::base::{Embedder, KnowledgeError};

pub const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

pub struct OpenAIEmbedder {
    api_key: String,
    url: String,
    model: String,
    http_client: Client,
}

impl OpenAIEmbedder {
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<&str>,
        model: Option<&str>,
    ) -> Result<Self, KnowledgeError> {
        let api_key = api_key.into();
        if api_key.is_empty() {
            return Err(KnowledgeError::ConfigurationError(
                "API key is required for OpenAI embeddings".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| KnowledgeError::ConfigurationError(e.to_string()))?;

        Ok(Self {
            api_key,
            url: base_url
                .map(|b| format!("{}/v1/embeddings", b.trim_end_matches('/')))
                .unwrap_or_else(|| OPENAI_EMBEDDINGS_URL.to_string()),
            model: model.unwrap_or(DEFAULT_EMBEDDING_MODEL).to_string(),
            http_client,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, KnowledgeError> {
        let response = self
            .http_client
            .post(&self.url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|e| KnowledgeError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(KnowledgeError::EmbeddingFailed(format!(
                "Embeddings API error ({status}): {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::EmbeddingFailed(e.to_string()))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| KnowledgeError::EmbeddingFailed("Empty embedding response".to_string()))
    }
}
