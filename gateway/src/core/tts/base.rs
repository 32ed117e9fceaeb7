//! Base trait and types for speech synthesis collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::codec::AudioFormat;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TTSError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Audio generation failed: {0}")]
    AudioGenerationFailed(String),

    #[error("Synthesis timed out after {0}ms")]
    Timeout(u64),
}

pub type TTSResult<T> = Result<T, TTSError>;

/// Per-session voice selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceConfig {
    /// Provider-specific voice identifier ("nova", "aura-asteria-en", ...)
    pub voice_id: String,
    /// Model override; empty uses the provider default
    #[serde(default)]
    pub model: String,
    /// Playback speed multiplier (1.0 = normal)
    #[serde(default = "default_speaking_rate")]
    pub speaking_rate: f32,
}

fn default_speaking_rate() -> f32 {
    1.0
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice_id: String::new(),
            model: String::new(),
            speaking_rate: default_speaking_rate(),
        }
    }
}

/// Provider connection settings for synthesis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TTSConfig {
    pub provider: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Output sample rate requested from providers that support choosing one
    #[serde(default)]
    pub sample_rate: Option<u32>,
}

/// Complete audio for one piece of text, in the provider's native format.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub data: Bytes,
    pub format: AudioFormat,
}

impl SynthesizedAudio {
    pub fn duration_ms(&self) -> u64 {
        self.format.duration_ms(self.data.len())
    }
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    fn name(&self) -> &str;

    async fn synthesize(&self, text: &str, voice: &VoiceConfig) -> TTSResult<SynthesizedAudio>;
}
