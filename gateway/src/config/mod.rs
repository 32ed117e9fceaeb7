//! Configuration module for the call bridge
//!
//! Server configuration comes from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//! - `env`: Environment variable loading
//! - `merge`: Merging YAML and environment configurations
//! - `validation`: Configuration validation logic
//! - `utils`: Utility functions for configuration parsing
//!
//! # Example
//! ```rust,no_run
//! use callbridge_gateway::config::ServerConfig;
//! use std::path::PathBuf;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = ServerConfig::from_env()?;
//!
//! // Load from YAML file with environment variable overrides
//! let config = ServerConfig::from_file(&PathBuf::from("config.yaml"))?;
//!
//! println!("Server listening on {}", config.address());
//! # Ok(())
//! # }
//! ```

use std::path::PathBuf;
use std::time::Duration;

mod env;
mod merge;
mod utils;
mod validation;
mod yaml;

pub use yaml::YamlConfig;

use crate::core::call::{PipelineSettings, SessionConfig};
use crate::core::knowledge::RetrievalSettings;
use crate::core::llm::LLMConfig;
use crate::core::stt::STTConfig;
use crate::core::tts::TTSConfig;

/// Provider selection and per-stage limits for the turn pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub stt_provider: String,
    /// Tried once when the primary transcriber fails or hears nothing
    pub stt_secondary_provider: Option<String>,
    pub stt_model: Option<String>,
    pub stt_language: String,
    pub llm_provider: String,
    /// OpenAI-compatible chat endpoint override
    pub llm_base_url: Option<String>,
    pub llm_model: String,
    pub tts_provider: String,
    pub transcription_timeout_ms: u64,
    pub augmentation_timeout_ms: u64,
    pub reasoning_timeout_ms: u64,
    pub synthesis_timeout_ms: u64,
    /// How long a connection may stay silent before `start` arrives
    pub handshake_timeout_ms: u64,
    /// Stream reasoning tokens and synthesize sentence by sentence
    pub streaming: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stt_provider: "openai".to_string(),
            stt_secondary_provider: None,
            stt_model: None,
            stt_language: "en".to_string(),
            llm_provider: "openai".to_string(),
            llm_base_url: None,
            llm_model: "gpt-4o-mini".to_string(),
            tts_provider: "openai".to_string(),
            transcription_timeout_ms: 10_000,
            augmentation_timeout_ms: 3_000,
            reasoning_timeout_ms: 15_000,
            synthesis_timeout_ms: 10_000,
            handshake_timeout_ms: 2_000,
            streaming: true,
        }
    }
}

/// Knowledge retrieval service settings. Retrieval is disabled when `url`
/// is unset.
#[derive(Debug, Clone, PartialEq)]
pub struct KnowledgeConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
    pub embedding_model: Option<String>,
    pub top_k: usize,
    pub min_score: f32,
    pub max_context_chars: usize,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        let retrieval = RetrievalSettings::default();
        Self {
            url: None,
            api_key: None,
            embedding_model: None,
            top_k: retrieval.top_k,
            min_score: retrieval.min_score,
            max_context_chars: retrieval.max_context_chars,
        }
    }
}

/// Call-record service. When `url` is unset an in-memory store is used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordsConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// Server configuration
///
/// Holds the listener settings, provider credentials, pipeline and
/// collaborator settings, and the default [`SessionConfig`] every call
/// starts from.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    // Server settings
    pub host: String,
    pub port: u16,

    // Connection limits
    /// Maximum concurrent calls; `None` is unlimited
    pub max_concurrent_calls: Option<usize>,
    pub max_calls_per_ip: u32,

    /// CORS allowed origins (comma-separated list or "*")
    pub cors_allowed_origins: Option<String>,

    // Provider credentials
    /// OpenAI key for Whisper, chat, speech and embeddings
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub deepgram_base_url: Option<String>,

    pub pipeline: PipelineConfig,
    pub knowledge: KnowledgeConfig,
    pub records: RecordsConfig,

    /// Defaults for every session before call-record overrides
    pub session: SessionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            max_concurrent_calls: None,
            max_calls_per_ip: 100,
            cors_allowed_origins: None,
            openai_api_key: None,
            openai_base_url: None,
            deepgram_api_key: None,
            deepgram_base_url: None,
            pipeline: PipelineConfig::default(),
            knowledge: KnowledgeConfig::default(),
            records: RecordsConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

/// Zeroize every secret when the configuration is dropped.
impl Drop for ServerConfig {
    fn drop(&mut self) {
        use zeroize::Zeroize;

        if let Some(ref mut key) = self.openai_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.deepgram_api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.knowledge.api_key {
            key.zeroize();
        }
        if let Some(ref mut key) = self.records.api_key {
            key.zeroize();
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables only, then validate it.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config = merge::merge_config(None)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file layered over the environment
    ///
    /// Priority order (highest to lowest):
    /// 1. YAML file values
    /// 2. Environment variables (actual ENV vars override .env values)
    /// 3. .env file values
    /// 4. Default values
    ///
    /// # Errors
    /// Returns an error if the YAML file cannot be read or is malformed, an
    /// environment variable has an invalid format, or validation fails.
    pub fn from_file(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        // .env is loaded into the process environment by main before this runs
        let yaml_config = yaml::YamlConfig::from_file(path)?;
        let config = merge::merge_config(Some(yaml_config))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        validation::validate_limits(self)?;
        validation::validate_pipeline(self)?;
        validation::validate_providers(self)?;
        self.session.validate()?;
        Ok(())
    }

    /// Get the server address as "host:port"
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get API key for a specific provider
    ///
    /// # Arguments
    /// * `provider` - The name of the provider (e.g., "openai", "deepgram")
    pub fn get_api_key(&self, provider: &str) -> Result<String, String> {
        match provider.to_lowercase().as_str() {
            "openai" | "openai-compatible" | "whisper" => {
                self.openai_api_key.as_ref().cloned().ok_or_else(|| {
                    "OpenAI API key not configured in server environment".to_string()
                })
            }
            "deepgram" | "aura" => self.deepgram_api_key.as_ref().cloned().ok_or_else(|| {
                "Deepgram API key not configured in server environment".to_string()
            }),
            _ => Err(format!("Unsupported provider: {provider}")),
        }
    }

    fn base_url_for(&self, provider: &str) -> Option<String> {
        match provider.to_lowercase().as_str() {
            "openai" | "openai-compatible" | "whisper" => self.openai_base_url.clone(),
            "deepgram" | "aura" => self.deepgram_base_url.clone(),
            _ => None,
        }
    }

    /// Transcriber settings for `provider`, which may be the primary or the
    /// secondary.
    pub fn stt_config(&self, provider: &str) -> Result<STTConfig, String> {
        let defaults = STTConfig::default();
        Ok(STTConfig {
            provider: provider.to_string(),
            api_key: self.get_api_key(provider)?,
            base_url: self.base_url_for(provider),
            model: self.pipeline.stt_model.clone().unwrap_or(defaults.model),
            language: self.pipeline.stt_language.clone(),
            sample_rate: defaults.sample_rate,
        })
    }

    pub fn llm_config(&self) -> Result<LLMConfig, String> {
        let provider = &self.pipeline.llm_provider;
        let defaults = LLMConfig::default();
        Ok(LLMConfig {
            provider: provider.clone(),
            api_key: self.get_api_key(provider)?,
            base_url: self
                .pipeline
                .llm_base_url
                .clone()
                .or_else(|| self.base_url_for(provider)),
            model: self.pipeline.llm_model.clone(),
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
        })
    }

    pub fn tts_config(&self) -> Result<TTSConfig, String> {
        let provider = &self.pipeline.tts_provider;
        Ok(TTSConfig {
            provider: provider.clone(),
            api_key: self.get_api_key(provider)?,
            base_url: self.base_url_for(provider),
            sample_rate: None,
        })
    }

    pub fn retrieval_settings(&self) -> RetrievalSettings {
        RetrievalSettings {
            top_k: self.knowledge.top_k,
            min_score: self.knowledge.min_score,
            max_context_chars: self.knowledge.max_context_chars,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            transcription_timeout: Duration::from_millis(self.pipeline.transcription_timeout_ms),
            augmentation_timeout: Duration::from_millis(self.pipeline.augmentation_timeout_ms),
            reasoning_timeout: Duration::from_millis(self.pipeline.reasoning_timeout_ms),
            synthesis_timeout: Duration::from_millis(self.pipeline.synthesis_timeout_ms),
            streaming: self.pipeline.streaming,
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.handshake_timeout_ms)
    }
}
