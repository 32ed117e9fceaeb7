//! Shared HTTP plumbing for REST synthesis providers.
//!
//! A provider only describes how to build its request and what format comes
//! back; [`HttpSynthesizer`] owns the client, error mapping and body collection.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tracing::debug;

use super::base::{SynthesizedAudio, Synthesizer, TTSConfig, TTSError, TTSResult, VoiceConfig};
use crate::core::codec::AudioFormat;

/// Provider-specific request construction.
pub trait SpeechRequestBuilder: Send + Sync {
    fn provider_name(&self) -> &'static str;

    fn build_http_request(
        &self,
        client: &Client,
        text: &str,
        voice: &VoiceConfig,
    ) -> reqwest::RequestBuilder;

    /// Format of the response body
    fn output_format(&self) -> AudioFormat;
}

pub struct HttpSynthesizer<B> {
    client: Client,
    builder: B,
}

impl<B: SpeechRequestBuilder> HttpSynthesizer<B> {
    pub fn new(builder: B) -> TTSResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                TTSError::InvalidConfiguration(format!("Failed to create HTTP client: {e}"))
            })?;
        Ok(Self { client, builder })
    }

    pub fn builder(&self) -> &B {
        &self.builder
    }
}

#[async_trait]
impl<B: SpeechRequestBuilder> Synthesizer for HttpSynthesizer<B> {
    fn name(&self) -> &str {
        self.builder.provider_name()
    }

    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> TTSResult<SynthesizedAudio> {
        if text.trim().is_empty() {
            return Err(TTSError::InvalidConfiguration(
                "Cannot synthesize empty text".to_string(),
            ));
        }

        let started = Instant::now();
        let response = self
            .builder
            .build_http_request(&self.client, text, voice)
            .send()
            .await
            .map_err(|e| TTSError::NetworkError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TTSError::ProviderError(format!(
                "{} API error ({status}): {body}",
                self.builder.provider_name()
            )));
        }

        let mut data = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| TTSError::NetworkError(e.to_string()))?;
            data.extend_from_slice(&chunk);
        }

        if data.is_empty() {
            return Err(TTSError::AudioGenerationFailed(
                "Provider returned no audio".to_string(),
            ));
        }

        let format = self.builder.output_format();
        // Drop a dangling odd byte rather than fail the whole sentence
        data.truncate(data.len() - data.len() % format.block_align());

        debug!(
            provider = self.builder.provider_name(),
            bytes = data.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Synthesis complete"
        );

        Ok(SynthesizedAudio {
            data: data.into(),
            format,
        })
    }
}

/// Join a configured base URL with a path, falling back to the public endpoint.
pub(crate) fn endpoint(config: &TTSConfig, default_url: &str, path: &str) -> String {
    match &config.base_url {
        Some(base) => format!("{}{}", base.trim_end_matches('/'), path),
        None => default_url.to_string(),
    }
}
