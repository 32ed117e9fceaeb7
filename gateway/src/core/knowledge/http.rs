//! Knowledge retrieval over a JSON search endpoint.
//!
//! `POST {base_url}/search` with
//! `{"embedding": [...], "top_k": N, "min_score": S, "filters": {...}}`,
//! answered by `{"results": [{"text", "score", "source"}]}`.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::base::{KnowledgeError, KnowledgeRetriever, Passage, SearchFilters};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    embedding: &'a [f32],
    top_k: usize,
    min_score: f32,
    filters: &'a SearchFilters,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Passage>,
}

pub struct HttpRetriever {
    url: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpRetriever {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, KnowledgeError> {
        if base_url.is_empty() {
            return Err(KnowledgeError::ConfigurationError(
                "Retrieval service URL is required".to_string(),
            ));
        }
        let http_client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| KnowledgeError::ConfigurationError(e.to_string()))?;

        Ok(Self {
            url: format!("{}/search", base_url.trim_end_matches('/')),
            api_key: api_key.filter(|k| !k.is_empty()),
            http_client,
        })
    }
}

#[async_trait]
impl KnowledgeRetriever for HttpRetriever {
    async fn search(
        &self,
        query_embedding: &[f32],
        top_k: usize,
        min_score: f32,
        filters: &SearchFilters,
    ) -> Result<Vec<Passage>, KnowledgeError> {
        let mut request = self.http_client.post(&self.url).json(&SearchRequest {
            embedding: query_embedding,
            top_k,
            min_score,
            filters,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| KnowledgeError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(KnowledgeError::SearchFailed(format!(
                "Retrieval service returned {status}"
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| KnowledgeError::SearchFailed(e.to_string()))?;
        Ok(parsed.results)
    }
}
