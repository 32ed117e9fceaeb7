//! OpenAI Whisper transcription over the Audio Transcriptions REST API.
//!
//! The utterance is resampled to the configured upload rate, wrapped in a
//! WAV container and posted as multipart form data.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, info};

use super::base::{STTConfig, STTError, Transcriber, Transcript};
use crate::core::codec::{AudioFormat, FrameCodec, wav};

/// OpenAI Audio Transcriptions endpoint
pub const OPENAI_STT_URL: &str = "https://api.openai.com/v1/audio/transcriptions";

/// Default Whisper model
pub const DEFAULT_MODEL: &str = "whisper-1";

/// Whisper rejects uploads above 25 MB; stay below it with room for the header
const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Deserialize)]
struct VerboseTranscriptionResponse {
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
}

#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    avg_logprob: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorDetail {
    message: String,
    #[serde(rename = "type", default)]
    error_type: String,
}

impl VerboseTranscriptionResponse {
    /// Whisper reports log-probabilities per segment; map their mean back to 0..1.
    fn confidence(&self) -> f32 {
        let logprobs: Vec<f64> = self
            .segments
            .iter()
            .filter_map(|s| s.avg_logprob)
            .collect();
        if logprobs.is_empty() {
            return 1.0;
        }
        let mean = logprobs.iter().sum::<f64>() / logprobs.len() as f64;
        mean.exp().clamp(0.0, 1.0) as f32
    }
}

pub struct OpenAISTT {
    config: STTConfig,
    http_client: Client,
}

impl OpenAISTT {
    pub fn new(config: STTConfig) -> Result<Self, STTError> {
        if config.api_key.is_empty() {
            return Err(STTError::AuthenticationFailed(
                "API key is required for OpenAI STT".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
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
            Some(base) => format!("{}/v1/audio/transcriptions", base.trim_end_matches('/')),
            None => OPENAI_STT_URL.to_string(),
        }
    }

    fn model(&self) -> &str {
        if self.config.model.is_empty() {
            DEFAULT_MODEL
        } else {
            &self.config.model
        }
    }
}

#[async_trait]
impl Transcriber for OpenAISTT {
    fn name(&self) -> &str {
        "openai"
    }

    async fn transcribe(&self, audio: Bytes, sample_rate: u32) -> Result<Transcript, STTError> {
        let upload_format = AudioFormat::linear16(self.config.sample_rate);
        let pcm = FrameCodec::new(AudioFormat::linear16(sample_rate), upload_format)
            .and_then(|codec| codec.transform(&audio))
            .map_err(|e| STTError::AudioProcessingError(e.to_string()))?;

        if pcm.len() > MAX_UPLOAD_BYTES {
            return Err(STTError::AudioProcessingError(format!(
                "Utterance ({} bytes) exceeds maximum upload size ({} bytes)",
                pcm.len(),
                MAX_UPLOAD_BYTES
            )));
        }

        let wav_data = wav::wrap_pcm(&pcm, &upload_format)
            .map_err(|e| STTError::AudioProcessingError(e.to_string()))?;

        info!(
            bytes = wav_data.len(),
            model = self.model(),
            "Sending utterance to OpenAI Whisper"
        );

        let file_part = Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| STTError::ConfigurationError(format!("Invalid MIME type: {e}")))?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model().to_string())
            .text("response_format", "verbose_json");

        if !self.config.language.is_empty() {
            form = form.text("language", self.config.language.clone());
        }

        let response = self
            .http_client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| STTError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        let response_text = response
            .text()
            .await
            .map_err(|e| STTError::NetworkError(format!("Failed to read response: {e}")))?;

        if !status.is_success() {
            let error_msg = if let Ok(error_response) =
                serde_json::from_str::<OpenAIErrorResponse>(&response_text)
            {
                format!(
                    "OpenAI API error: {} ({})",
                    error_response.error.message, error_response.error.error_type
                )
            } else {
                format!("OpenAI API error ({status}): {response_text}")
            };

            return Err(if status.as_u16() == 401 {
                STTError::AuthenticationFailed(error_msg)
            } else {
                STTError::ProviderError(error_msg)
            });
        }

        let parsed: VerboseTranscriptionResponse = serde_json::from_str(&response_text)
            .map_err(|e| STTError::ProviderError(format!("Failed to parse response: {e}")))?;

        let transcript = Transcript::new(parsed.text.trim(), parsed.confidence());
        debug!(
            chars = transcript.text.len(),
            confidence = transcript.confidence,
            "Whisper transcription complete"
        );
        Ok(transcript)
    }
}
