//! Deepgram Aura synthesis (`POST /v1/speak`) returning raw linear16.

use reqwest::Client;
use serde_json::json;

use super::base::{TTSConfig, TTSError, TTSResult, VoiceConfig};
use super::provider::{HttpSynthesizer, SpeechRequestBuilder, endpoint};
use crate::core::codec::AudioFormat;

pub const DEEPGRAM_TTS_URL: &str = "https://api.deepgram.com/v1/speak";

pub const DEFAULT_VOICE: &str = "aura-asteria-en";

const DEFAULT_SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Clone)]
pub struct DeepgramRequestBuilder {
    config: TTSConfig,
}

impl DeepgramRequestBuilder {
    fn sample_rate(&self) -> u32 {
        self.config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }
}

impl SpeechRequestBuilder for DeepgramRequestBuilder {
    fn provider_name(&self) -> &'static str {
        "deepgram"
    }

    fn build_http_request(
        &self,
        client: &Client,
        text: &str,
        voice: &VoiceConfig,
    ) -> reqwest::RequestBuilder {
        let model = if !voice.voice_id.is_empty() {
            voice.voice_id.as_str()
        } else if !voice.model.is_empty() {
            voice.model.as_str()
        } else {
            DEFAULT_VOICE
        };

        client
            .post(endpoint(&self.config, DEEPGRAM_TTS_URL, "/v1/speak"))
            .query(&[
                ("model", model.to_string()),
                ("encoding", "linear16".to_string()),
                ("sample_rate", self.sample_rate().to_string()),
                ("container", "none".to_string()),
            ])
            .header("Authorization", format!("Token {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&json!({ "text": text }))
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::linear16(self.sample_rate())
    }
}

pub type DeepgramTTS = HttpSynthesizer<DeepgramRequestBuilder>;

pub fn new_deepgram_tts(config: TTSConfig) -> TTSResult<DeepgramTTS> {
    if config.api_key.is_empty() {
        return Err(TTSError::InvalidConfiguration(
            "API key is required for Deepgram TTS".to_string(),
        ));
    }
    HttpSynthesizer::new(DeepgramRequestBuilder { config })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requested_rate_drives_output_format() {
        let tts = new_deepgram_tts(TTSConfig {
            api_key: "dg-test".to_string(),
            sample_rate: Some(8000),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(tts.builder().output_format(), AudioFormat::linear16(8000));

        let request = tts
            .builder()
            .build_http_request(&Client::new(), "Hi", &VoiceConfig::default())
            .build()
            .unwrap();
        let query = request.url().query().unwrap_or_default();
        assert!(query.contains("model=aura-asteria-en"));
        assert!(query.contains("sample_rate=8000"));
    }
}
