//! Per-session configuration.
//!
//! Resolved once while the session is `Connecting` (server defaults with any
//! call-record overrides applied) and immutable afterwards.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CallError;
use crate::core::codec::AudioFormat;
use crate::core::tts::VoiceConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// First outbound turn, spoken before any caller audio
    pub greeting: String,
    /// Played the moment a turn starts processing
    pub filler_phrase: String,
    /// Played when a turn fails
    pub apology_phrase: String,
    /// Played before the session closes after repeated failures
    pub closing_phrase: String,
    pub system_prompt: String,
    pub voice: VoiceConfig,
    /// Reasoning model override; empty uses the provider default
    pub llm_model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,

    /// Quiet interval after the last voiced frame that ends an utterance
    pub silence_threshold_ms: u64,
    /// RMS energy (0.0 - 1.0) at or above which a frame counts as voiced
    pub energy_threshold: f32,
    /// Longest utterance before a forced flush
    pub max_utterance_ms: u64,
    /// Telephony leg audio format
    pub wire_format: AudioFormat,
    /// Duration of each outbound media frame
    pub outbound_frame_ms: u32,
    pub max_consecutive_failures: u32,
    /// Case-insensitive phrases that end the call once the reply has played
    pub end_call_phrases: Vec<String>,
    /// Forwarded to knowledge retrieval
    pub knowledge_filters: HashMap<String, String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            greeting: "Hello! How can I help you today?".to_string(),
            filler_phrase: "One moment.".to_string(),
            apology_phrase: "Sorry, I didn't catch that. Could you say it again?".to_string(),
            closing_phrase: "I'm having trouble right now. Please call back later. Goodbye."
                .to_string(),
            system_prompt: "You are a helpful voice assistant.".to_string(),
            voice: VoiceConfig::default(),
            llm_model: String::new(),
            temperature: None,
            max_tokens: None,
            silence_threshold_ms: 1000,
            energy_threshold: 0.01,
            max_utterance_ms: 30_000,
            wire_format: AudioFormat::linear16(8000),
            outbound_frame_ms: 100,
            max_consecutive_failures: 3,
            end_call_phrases: vec!["goodbye".to_string(), "have a great day".to_string()],
            knowledge_filters: HashMap::new(),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), CallError> {
        for (name, value) in [
            ("greeting", &self.greeting),
            ("filler_phrase", &self.filler_phrase),
            ("apology_phrase", &self.apology_phrase),
            ("closing_phrase", &self.closing_phrase),
        ] {
            if value.trim().is_empty() {
                return Err(CallError::Configuration(format!("{name} must not be empty")));
            }
        }

        if !(100..=10_000).contains(&self.silence_threshold_ms) {
            return Err(CallError::Configuration(format!(
                "silence_threshold_ms must be between 100 and 10000, got {}",
                self.silence_threshold_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.energy_threshold) {
            return Err(CallError::Configuration(format!(
                "energy_threshold must be between 0.0 and 1.0, got {}",
                self.energy_threshold
            )));
        }

        if self.max_utterance_ms < self.silence_threshold_ms {
            return Err(CallError::Configuration(
                "max_utterance_ms must not be shorter than silence_threshold_ms".to_string(),
            ));
        }

        self.wire_format
            .validate()
            .map_err(|e| CallError::Configuration(format!("wire_format: {e}")))?;

        if !(10..=1000).contains(&self.outbound_frame_ms) || self.outbound_frame_bytes() == 0 {
            return Err(CallError::Configuration(format!(
                "outbound_frame_ms must be between 10 and 1000, got {}",
                self.outbound_frame_ms
            )));
        }

        if self.max_consecutive_failures == 0 {
            return Err(CallError::Configuration(
                "max_consecutive_failures must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    pub fn silence_threshold(&self) -> Duration {
        Duration::from_millis(self.silence_threshold_ms)
    }

    pub fn outbound_frame_duration(&self) -> Duration {
        Duration::from_millis(self.outbound_frame_ms as u64)
    }

    pub fn outbound_frame_bytes(&self) -> usize {
        self.wire_format.frame_bytes(self.outbound_frame_ms)
    }

    /// Accumulator cap in bytes of 16-bit mono PCM at the wire rate.
    pub fn max_utterance_bytes(&self) -> usize {
        let samples = self.wire_format.sample_rate as u64 * self.max_utterance_ms / 1000;
        samples as usize * 2
    }

    /// Returns the first configured end-call phrase contained in `reply`.
    pub fn end_call_phrase_in(&self, reply: &str) -> Option<&str> {
        let reply = reply.to_lowercase();
        self.end_call_phrases
            .iter()
            .map(|p| p.trim())
            .find(|p| !p.is_empty() && reply.contains(&p.to_lowercase()))
    }

    pub fn with_overrides(mut self, overrides: SessionOverrides) -> Self {
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = overrides.$field {
                    self.$field = value;
                })*
            };
        }
        apply!(
            greeting,
            filler_phrase,
            apology_phrase,
            closing_phrase,
            system_prompt,
            voice,
            llm_model,
            silence_threshold_ms,
            energy_threshold,
            max_utterance_ms,
            wire_format,
            outbound_frame_ms,
            max_consecutive_failures,
            end_call_phrases,
            knowledge_filters,
        );
        if overrides.temperature.is_some() {
            self.temperature = overrides.temperature;
        }
        if overrides.max_tokens.is_some() {
            self.max_tokens = overrides.max_tokens;
        }
        self
    }
}

/// Partial configuration supplied by a call record. Unset fields keep the
/// server defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionOverrides {
    pub greeting: Option<String>,
    pub filler_phrase: Option<String>,
    pub apology_phrase: Option<String>,
    pub closing_phrase: Option<String>,
    pub system_prompt: Option<String>,
    pub voice: Option<VoiceConfig>,
    pub llm_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub silence_threshold_ms: Option<u64>,
    pub energy_threshold: Option<f32>,
    pub max_utterance_ms: Option<u64>,
    pub wire_format: Option<AudioFormat>,
    pub outbound_frame_ms: Option<u32>,
    pub max_consecutive_failures: Option<u32>,
    pub end_call_phrases: Option<Vec<String>>,
    pub knowledge_filters: Option<HashMap<String, String>>,
}
