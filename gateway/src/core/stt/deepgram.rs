//! Deepgram pre-recorded transcription (`POST /v1/listen`) with raw linear16.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use serde::Deserialize;
use tracing::info;

use super::base::{STTConfig, STTError, Transcriber, Transcript};
use crate::core::codec::{AudioFormat, FrameCodec};

pub const DEEPGRAM_STT_URL: &str = "https://api.deepgram.com/v1/listen";

pub const DEFAULT_MODEL: &str = "nova-2";

#[derive(Debug, Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

#[derive(Debug, Deserialize)]
struct ListenResults {
    channels: Vec<ListenChannel>,
}

#[derive(Debug, Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
}

#[derive(Debug, Deserialize)]
struct ListenAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

pub struct DeepgramSTT {
    config: STTConfig,
    http_client: Client,
}

impl DeepgramSTT {
    pub fn new(config: STTConfig) -> Result<Self, STTError> {
        if config.api_key.is_empty() {
            return Err(STTError::AuthenticationFailed(
                "API key is required for Deepgram STT".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| {
                STTError::ConfigurationError(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn api_url(&self) -> String {
        match &self.config.base_url {
            Some(base) => format!("{}/v1/listen", base.trim_end_matches('/')),
            None => DEEPGRAM_STT_URL.to_string(),
        }
    }
}

#[async_trait]
impl Transcriber for DeepgramSTT {
    fn name(&self) -> &str {
        "deepgram"
    }

    async fn transcribe(&self, audio: Bytes, sample_rate: u32) -> Result<Transcript, STTError> {
        let upload_format = AudioFormat::linear16(self.config.sample_rate);
        let pcm = FrameCodec::new(AudioFormat::linear16(sample_rate), upload_format)
            .and_then(|codec| codec.transform(&audio))
            .map_err(|e| STTError::AudioProcessingError(e.to_string()))?;

        let model = if self.config.model.is_empty() {
            DEFAULT_MODEL
        } else {
            self.config.model.as_str()
        };

        let mut query: Vec<(&str, String)> = vec![
            ("model", model.to_string()),
            ("encoding", "linear16".to_string()),
            ("sample_rate", upload_format.sample_rate.to_string()),
            ("channels", "1".to_string()),
            ("punctuate", "true".to_string()),
        ];
        if !self.config.language.is_empty() {
            query.push(("language", self.config.language.clone()));
        }

        info!(bytes = pcm.len(), model, "Sending utterance to Deepgram");

        let response = self
            .http_client
            .post(self.api_url())
            .query(&query)
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Content-Type", "application/octet-stream")
            .body(pcm)
            .send()
            .await
            .map_err(|e| STTError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("Deepgram API error ({status}): {body}");
            return Err(if status.as_u16() == 401 {
                STTError::AuthenticationFailed(message)
            } else {
                STTError::ProviderError(message)
            });
        }

        let parsed: ListenResponse = response
            .json()
            .await
            .map_err(|e| STTError::ProviderError(format!("Failed to parse response: {e}")))?;

        let best = parsed
            .results
            .channels
            .into_iter()
            .next()
            .and_then(|channel| channel.alternatives.into_iter().next());

        Ok(match best {
            Some(alt) => Transcript::new(alt.transcript.trim(), alt.confidence),
            None => Transcript::default(),
        })
    }
}
