//! Call-record collaborator: seeds session configuration at start and
//! receives the final transcript at close.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::config::SessionOverrides;
use super::history::Turn;
use super::state::CloseReason;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RecordError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Record service error: {0}")]
    ServiceError(String),
}

/// Everything persisted when a session closes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRecord {
    /// Call id from the handshake, or the session id when none was given
    pub call_id: String,
    pub session_id: String,
    pub stream_token: Option<String>,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub close_reason: CloseReason,
    pub turns: Vec<Turn>,
}

#[async_trait]
pub trait CallRecordStore: Send + Sync {
    /// Per-call overrides for the session configuration; `None` when the
    /// call is unknown and server defaults apply.
    async fn session_overrides(&self, call_id: &str)
    -> Result<Option<SessionOverrides>, RecordError>;

    async fn save_transcript(&self, record: &CallRecord) -> Result<(), RecordError>;
}

/// In-process store: fixed overrides per call id, transcripts kept in memory.
#[derive(Default)]
pub struct StaticCallRecordStore {
    overrides: HashMap<String, SessionOverrides>,
    saved: Mutex<Vec<CallRecord>>,
}

impl StaticCallRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_overrides(mut self, call_id: impl Into<String>, overrides: SessionOverrides) -> Self {
        self.overrides.insert(call_id.into(), overrides);
        self
    }

    pub fn saved(&self) -> Vec<CallRecord> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl CallRecordStore for StaticCallRecordStore {
    async fn session_overrides(
        &self,
        call_id: &str,
    ) -> Result<Option<SessionOverrides>, RecordError> {
        Ok(self.overrides.get(call_id).cloned())
    }

    async fn save_transcript(&self, record: &CallRecord) -> Result<(), RecordError> {
        self.saved.lock().push(record.clone());
        Ok(())
    }
}

/// REST call-record service.
///
/// - `GET {base}/calls/{id}/config` returns [`SessionOverrides`] (404 = unknown call)
/// - `POST {base}/calls/{id}/transcript` accepts a [`CallRecord`]
pub struct HttpCallRecordStore {
    base_url: String,
    api_key: Option<String>,
    http_client: Client,
}

impl HttpCallRecordStore {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, RecordError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(RecordError::ConfigurationError(
                "Call record service URL is required".to_string(),
            ));
        }
        let http_client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| RecordError::ConfigurationError(e.to_string()))?;
        Ok(Self {
            base_url,
            api_key: api_key.filter(|k| !k.is_empty()),
            http_client,
        })
    }

    fn call_url(&self, call_id: &str, suffix: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(call_id.as_bytes()).collect();
        format!("{}/calls/{}/{}", self.base_url, encoded, suffix)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl CallRecordStore for HttpCallRecordStore {
    async fn session_overrides(
        &self,
        call_id: &str,
    ) -> Result<Option<SessionOverrides>, RecordError> {
        let response = self
            .authorize(self.http_client.get(self.call_url(call_id, "config")))
            .send()
            .await
            .map_err(|e| RecordError::NetworkError(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<SessionOverrides>()
                .await
                .map(Some)
                .map_err(|e| RecordError::ServiceError(format!("Invalid config body: {e}"))),
            status => Err(RecordError::ServiceError(format!(
                "Config lookup returned {status}"
            ))),
        }
    }

    async fn save_transcript(&self, record: &CallRecord) -> Result<(), RecordError> {
        let response = self
            .authorize(
                self.http_client
                    .post(self.call_url(&record.call_id, "transcript"))
                    .json(record),
            )
            .send()
            .await
            .map_err(|e| RecordError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(RecordError::ServiceError(format!(
                "Transcript upload returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_url_encodes_id() {
        let store = HttpCallRecordStore::new("http://records.local/", None).unwrap();
        assert_eq!(
            store.call_url("CA 1/2", "config"),
            "http://records.local/calls/CA+1%2F2/config"
        );
    }

    #[tokio::test]
    async fn test_static_store_round_trip() {
        let store = StaticCallRecordStore::new().with_overrides(
            "CA1",
            SessionOverrides {
                greeting: Some("Hi".to_string()),
                ..Default::default()
            },
        );
        assert!(store.session_overrides("CA1").await.unwrap().is_some());
        assert!(store.session_overrides("CA2").await.unwrap().is_none());

        let record = CallRecord {
            call_id: "CA1".to_string(),
            session_id: "s1".to_string(),
            stream_token: None,
            started_at_ms: 1,
            ended_at_ms: 2,
            close_reason: CloseReason::StopEvent,
            turns: Vec::new(),
        };
        store.save_transcript(&record).await.unwrap();
        assert_eq!(store.saved(), vec![record]);
    }
}
