//! Transcription collaborators
//!
//! One utterance in, one [`Transcript`] out. Providers are batch REST APIs;
//! streaming recognition is out of scope for the turn pipeline.

mod base;
pub mod deepgram;
pub mod openai;

use std::sync::Arc;

pub use base::{STTConfig, STTError, Transcriber, Transcript};
pub use deepgram::DeepgramSTT;
pub use openai::OpenAISTT;

/// Supported transcription providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum STTProvider {
    /// OpenAI Whisper REST API
    OpenAI,
    /// Deepgram pre-recorded REST API
    Deepgram,
}

impl std::fmt::Display for STTProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            STTProvider::OpenAI => write!(f, "openai"),
            STTProvider::Deepgram => write!(f, "deepgram"),
        }
    }
}

impl std::str::FromStr for STTProvider {
    type Err = STTError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "whisper" => Ok(STTProvider::OpenAI),
            "deepgram" => Ok(STTProvider::Deepgram),
            _ => Err(STTError::ConfigurationError(format!(
                "Unsupported STT provider: {s}. Supported providers: openai, deepgram"
            ))),
        }
    }
}

/// Factory function to create a transcriber by provider name
pub fn create_transcriber(
    provider: &str,
    config: STTConfig,
) -> Result<Arc<dyn Transcriber>, STTError> {
    match provider.parse::<STTProvider>()? {
        STTProvider::OpenAI => Ok(Arc::new(OpenAISTT::new(config)?)),
        STTProvider::Deepgram => Ok(Arc::new(DeepgramSTT::new(config)?)),
    }
}

pub fn get_supported_stt_providers() -> Vec<&'static str> {
    vec!["openai", "deepgram"]
}
