mod base;
pub mod deepgram;
pub mod openai;
pub mod provider;

use std::sync::Arc;

pub use base::{SynthesizedAudio, Synthesizer, TTSConfig, TTSError, TTSResult, VoiceConfig};
pub use deepgram::{DEEPGRAM_TTS_URL, DeepgramTTS, new_deepgram_tts};
pub use openai::{OPENAI_TTS_URL, OpenAITTS, new_openai_tts};
pub use provider::{HttpSynthesizer, SpeechRequestBuilder};

/// Factory function to create a synthesizer.
///
/// # Supported Providers
///
/// - `"openai"` - OpenAI speech API (24 kHz pcm)
/// - `"deepgram"` or `"aura"` - Deepgram Aura REST API
pub fn create_synthesizer(provider_type: &str, config: TTSConfig) -> TTSResult<Arc<dyn Synthesizer>> {
    match provider_type.to_lowercase().as_str() {
        "openai" => Ok(Arc::new(new_openai_tts(config)?)),
        "deepgram" | "aura" => Ok(Arc::new(new_deepgram_tts(config)?)),
        _ => Err(TTSError::InvalidConfiguration(format!(
            "Unsupported TTS provider: {provider_type}. Supported providers: openai, deepgram"
        ))),
    }
}

pub fn get_supported_tts_providers() -> Vec<&'static str> {
    vec!["openai", "deepgram"]
}
