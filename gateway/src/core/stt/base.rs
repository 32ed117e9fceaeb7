//! Base trait and types for transcription collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while transcribing an utterance.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum STTError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Audio processing error: {0}")]
    AudioProcessingError(String),

    #[error("Transcription timed out after {0}ms")]
    Timeout(u64),
}

/// Final transcription of one utterance.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub text: String,
    /// 0.0 - 1.0
    pub confidence: f32,
}

impl Transcript {
    pub fn new(text: impl Into<String>, confidence: f32) -> Self {
        Self {
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// True when the provider heard nothing worth answering.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Provider-agnostic transcription settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct STTConfig {
    /// Provider name (e.g., "openai", "deepgram")
    pub provider: String,
    pub api_key: String,
    /// Override for the provider endpoint (tests, proxies)
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    /// BCP-47 language code; empty lets the provider detect it
    #[serde(default)]
    pub language: String,
    /// Sample rate the provider should receive, in Hz
    pub sample_rate: u32,
}

impl Default for STTConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: String::new(),
            base_url: None,
            model: String::new(),
            language: "en".to_string(),
            sample_rate: 16000,
        }
    }
}

/// Batch transcription of one utterance.
///
/// `audio` is mono 16-bit little-endian PCM at `sample_rate`. Implementations
/// own any conversion to the format their service expects.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Provider name for logs
    fn name(&self) -> &str;

    async fn transcribe(&self, audio: Bytes, sample_rate: u32) -> Result<Transcript, STTError>;
}
