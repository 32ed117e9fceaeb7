use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::core::codec::AudioEncoding;

/// Complete YAML configuration structure
///
/// Every field is optional so a file may override only part of the
/// configuration. Values present here win over environment variables.
///
/// # Example YAML structure
/// ```yaml
/// server:
///   host: "0.0.0.0"
///   port: 3001
///   max_concurrent_calls: 200
///   max_calls_per_ip: 50
///
/// providers:
///   openai_api_key: "sk-..."
///   deepgram_api_key: "dg-..."
///
/// pipeline:
///   stt_provider: "deepgram"
///   stt_secondary_provider: "openai"
///   llm_provider: "openai"
///   tts_provider: "openai"
///   transcription_timeout_ms: 8000
///   streaming: true
///
/// knowledge:
///   url: "http://retrieval.internal:8100"
///   top_k: 3
///   min_score: 0.55
///
/// records:
///   url: "http://calls.internal:8200"
///
/// session:
///   greeting: "Thanks for calling, how can I help?"
///   filler_phrase: "Let me check."
///   silence_threshold_ms: 900
///   wire_encoding: "linear16"
///   wire_sample_rate: 8000
///   voice:
///     voice_id: "nova"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: Option<ServerYaml>,
    pub security: Option<SecurityYaml>,
    pub providers: Option<ProvidersYaml>,
    pub pipeline: Option<PipelineYaml>,
    pub knowledge: Option<KnowledgeYaml>,
    pub records: Option<RecordsYaml>,
    pub session: Option<SessionYaml>,
}

/// Server configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ServerYaml {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_concurrent_calls: Option<usize>,
    pub max_calls_per_ip: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SecurityYaml {
    /// Comma-separated origins or "*"
    pub cors_allowed_origins: Option<String>,
}

/// Provider credentials from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    /// OpenAI key for Whisper, chat completions, speech and embeddings
    pub openai_api_key: Option<String>,
    /// Override for OpenAI-compatible endpoints
    pub openai_base_url: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub deepgram_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PipelineYaml {
    pub stt_provider: Option<String>,
    pub stt_secondary_provider: Option<String>,
    pub stt_model: Option<String>,
    pub stt_language: Option<String>,
    pub llm_provider: Option<String>,
    pub llm_base_url: Option<String>,
    pub llm_model: Option<String>,
    pub tts_provider: Option<String>,
    pub transcription_timeout_ms: Option<u64>,
    pub augmentation_timeout_ms: Option<u64>,
    pub reasoning_timeout_ms: Option<u64>,
    pub synthesis_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: Option<u64>,
    pub streaming: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct KnowledgeYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub embedding_model: Option<String>,
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub max_context_chars: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RecordsYaml {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Default session behaviour from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub greeting: Option<String>,
    pub filler_phrase: Option<String>,
    pub apology_phrase: Option<String>,
    pub closing_phrase: Option<String>,
    pub system_prompt: Option<String>,
    pub voice: Option<VoiceYaml>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub silence_threshold_ms: Option<u64>,
    pub energy_threshold: Option<f32>,
    pub max_utterance_ms: Option<u64>,
    pub wire_encoding: Option<AudioEncoding>,
    pub wire_sample_rate: Option<u32>,
    pub outbound_frame_ms: Option<u32>,
    pub max_consecutive_failures: Option<u32>,
    pub end_call_phrases: Option<Vec<String>>,
    pub knowledge_filters: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct VoiceYaml {
    pub voice_id: Option<String>,
    pub model: Option<String>,
    pub speaking_rate: Option<f32>,
}

impl YamlConfig {
    /// Load YAML configuration from a file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;

        let config: YamlConfig = serde_yaml::from_str(&contents)
            .map_err(|e| format!("Failed to parse YAML config: {e}"))?;

        Ok(config)
    }
}
