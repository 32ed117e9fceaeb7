use super::ServerConfig;
use super::env::load_from_env;
use super::yaml::YamlConfig;
use crate::core::codec::AudioFormat;

/// Merge YAML overrides on top of the environment-derived configuration.
///
/// Priority: YAML > environment (including `.env`) > defaults.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let mut config = load_from_env()?;

    let Some(yaml) = yaml else {
        return Ok(config);
    };

    macro_rules! set {
        ($target:expr, $value:expr) => {
            if let Some(value) = $value {
                $target = value;
            }
        };
    }
    macro_rules! set_opt {
        ($target:expr, $value:expr) => {
            if $value.is_some() {
                $target = $value;
            }
        };
    }

    if let Some(server) = yaml.server {
        set!(config.host, server.host);
        set!(config.port, server.port);
        set_opt!(config.max_concurrent_calls, server.max_concurrent_calls);
        set!(config.max_calls_per_ip, server.max_calls_per_ip);
    }

    if let Some(security) = yaml.security {
        set_opt!(config.cors_allowed_origins, security.cors_allowed_origins);
    }

    if let Some(providers) = yaml.providers {
        set_opt!(config.openai_api_key, providers.openai_api_key);
        set_opt!(config.openai_base_url, providers.openai_base_url);
        set_opt!(config.deepgram_api_key, providers.deepgram_api_key);
        set_opt!(config.deepgram_base_url, providers.deepgram_base_url);
    }

    if let Some(pipeline) = yaml.pipeline {
        let target = &mut config.pipeline;
        set!(target.stt_provider, pipeline.stt_provider);
        set_opt!(target.stt_secondary_provider, pipeline.stt_secondary_provider);
        set_opt!(target.stt_model, pipeline.stt_model);
        set!(target.stt_language, pipeline.stt_language);
        set!(target.llm_provider, pipeline.llm_provider);
        set_opt!(target.llm_base_url, pipeline.llm_base_url);
        set!(target.llm_model, pipeline.llm_model);
        set!(target.tts_provider, pipeline.tts_provider);
        set!(target.transcription_timeout_ms, pipeline.transcription_timeout_ms);
        set!(target.augmentation_timeout_ms, pipeline.augmentation_timeout_ms);
        set!(target.reasoning_timeout_ms, pipeline.reasoning_timeout_ms);
        set!(target.synthesis_timeout_ms, pipeline.synthesis_timeout_ms);
        set!(target.handshake_timeout_ms, pipeline.handshake_timeout_ms);
        set!(target.streaming, pipeline.streaming);
    }

    if let Some(knowledge) = yaml.knowledge {
        let target = &mut config.knowledge;
        set_opt!(target.url, knowledge.url);
        set_opt!(target.api_key, knowledge.api_key);
        set_opt!(target.embedding_model, knowledge.embedding_model);
        set!(target.top_k, knowledge.top_k);
        set!(target.min_score, knowledge.min_score);
        set!(target.max_context_chars, knowledge.max_context_chars);
    }

    if let Some(records) = yaml.records {
        set_opt!(config.records.url, records.url);
        set_opt!(config.records.api_key, records.api_key);
    }

    if let Some(session) = yaml.session {
        let target = &mut config.session;
        set!(target.greeting, session.greeting);
        set!(target.filler_phrase, session.filler_phrase);
        set!(target.apology_phrase, session.apology_phrase);
        set!(target.closing_phrase, session.closing_phrase);
        set!(target.system_prompt, session.system_prompt);
        set_opt!(target.temperature, session.temperature);
        set_opt!(target.max_tokens, session.max_tokens);
        set!(target.silence_threshold_ms, session.silence_threshold_ms);
        set!(target.energy_threshold, session.energy_threshold);
        set!(target.max_utterance_ms, session.max_utterance_ms);
        set!(target.outbound_frame_ms, session.outbound_frame_ms);
        set!(target.max_consecutive_failures, session.max_consecutive_failures);
        set!(target.end_call_phrases, session.end_call_phrases);
        set!(target.knowledge_filters, session.knowledge_filters);

        if let Some(voice) = session.voice {
            set!(target.voice.voice_id, voice.voice_id);
            set!(target.voice.model, voice.model);
            set!(target.voice.speaking_rate, voice.speaking_rate);
        }

        let encoding = session.wire_encoding.unwrap_or(target.wire_format.encoding);
        let sample_rate = session
            .wire_sample_rate
            .unwrap_or(target.wire_format.sample_rate);
        target.wire_format = AudioFormat::new(encoding, sample_rate, 1);
    }

    Ok(config)
}
