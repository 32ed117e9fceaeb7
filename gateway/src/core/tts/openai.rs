//! OpenAI speech synthesis (`POST /v1/audio/speech`).
//!
//! Always requests `pcm`, which OpenAI returns as 24 kHz mono linear16.

use reqwest::Client;
use serde_json::json;

use super::base::{TTSConfig, TTSError, TTSResult, VoiceConfig};
use super::provider::{HttpSynthesizer, SpeechRequestBuilder, endpoint};
use crate::core::codec::AudioFormat;

pub const OPENAI_TTS_URL: &str = "https://api.openai.com/v1/audio/speech";

pub const DEFAULT_MODEL: &str = "tts-1";
pub const DEFAULT_VOICE: &str = "alloy";

/// OpenAI fixes `pcm` output at this rate
pub const OPENAI_PCM_SAMPLE_RATE: u32 = 24000;

#[derive(Debug, Clone)]
pub struct OpenAIRequestBuilder {
    config: TTSConfig,
}

impl SpeechRequestBuilder for OpenAIRequestBuilder {
    fn provider_name(&self) -> &'static str {
        "openai"
    }

    fn build_http_request(
        &self,
        client: &Client,
        text: &str,
        voice: &VoiceConfig,
    ) -> reqwest::RequestBuilder {
        let model = if voice.model.is_empty() {
            DEFAULT_MODEL
        } else {
            voice.model.as_str()
        };
        let voice_id = if voice.voice_id.is_empty() {
            DEFAULT_VOICE
        } else {
            voice.voice_id.as_str()
        };

        let mut body = json!({
            "model": model,
            "input": text,
            "voice": voice_id,
            "response_format": "pcm",
        });

        let speed = voice.speaking_rate.clamp(0.25, 4.0);
        if (speed - 1.0).abs() > 0.001 {
            body["speed"] = json!(speed);
        }

        client
            .post(endpoint(&self.config, OPENAI_TTS_URL, "/v1/audio/speech"))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
    }

    fn output_format(&self) -> AudioFormat {
        AudioFormat::linear16(OPENAI_PCM_SAMPLE_RATE)
    }
}

pub type OpenAITTS = HttpSynthesizer<OpenAIRequestBuilder>;

pub fn new_openai_tts(config: TTSConfig) -> TTSResult<OpenAITTS> {
    if config.api_key.is_empty() {
        return Err(TTSError::InvalidConfiguration(
            "API key is required for OpenAI TTS".to_string(),
        ));
    }
    HttpSynthesizer::new(OpenAIRequestBuilder { config })
}
