//! Environment variable loading
//!
//! Builds a complete [`ServerConfig`] from the process environment (which
//! already contains any `.env` values loaded at startup), falling back to
//! defaults for anything unset.

use super::utils::{env_bool, env_parse, env_string, parse_list};
use super::{KnowledgeConfig, PipelineConfig, RecordsConfig, ServerConfig};
use crate::core::call::SessionConfig;
use crate::core::codec::{AudioEncoding, AudioFormat};

pub(super) fn load_from_env() -> Result<ServerConfig, Box<dyn std::error::Error>> {
    let defaults = ServerConfig::default();

    let pipeline_defaults = PipelineConfig::default();
    let pipeline = PipelineConfig {
        stt_provider: env_string("STT_PROVIDER").unwrap_or(pipeline_defaults.stt_provider),
        stt_secondary_provider: env_string("STT_SECONDARY_PROVIDER"),
        stt_model: env_string("STT_MODEL"),
        stt_language: env_string("STT_LANGUAGE").unwrap_or(pipeline_defaults.stt_language),
        llm_provider: env_string("LLM_PROVIDER").unwrap_or(pipeline_defaults.llm_provider),
        llm_base_url: env_string("LLM_BASE_URL"),
        llm_model: env_string("LLM_MODEL").unwrap_or(pipeline_defaults.llm_model),
        tts_provider: env_string("TTS_PROVIDER").unwrap_or(pipeline_defaults.tts_provider),
        transcription_timeout_ms: env_parse("TRANSCRIPTION_TIMEOUT_MS")?
            .unwrap_or(pipeline_defaults.transcription_timeout_ms),
        augmentation_timeout_ms: env_parse("AUGMENTATION_TIMEOUT_MS")?
            .unwrap_or(pipeline_defaults.augmentation_timeout_ms),
        reasoning_timeout_ms: env_parse("REASONING_TIMEOUT_MS")?
            .unwrap_or(pipeline_defaults.reasoning_timeout_ms),
        synthesis_timeout_ms: env_parse("SYNTHESIS_TIMEOUT_MS")?
            .unwrap_or(pipeline_defaults.synthesis_timeout_ms),
        handshake_timeout_ms: env_parse("HANDSHAKE_TIMEOUT_MS")?
            .unwrap_or(pipeline_defaults.handshake_timeout_ms),
        streaming: env_bool("LLM_STREAMING")?.unwrap_or(pipeline_defaults.streaming),
    };

    let knowledge_defaults = KnowledgeConfig::default();
    let knowledge = KnowledgeConfig {
        url: env_string("KNOWLEDGE_URL"),
        api_key: env_string("KNOWLEDGE_API_KEY"),
        embedding_model: env_string("EMBEDDING_MODEL"),
        top_k: env_parse("KNOWLEDGE_TOP_K")?.unwrap_or(knowledge_defaults.top_k),
        min_score: env_parse("KNOWLEDGE_MIN_SCORE")?.unwrap_or(knowledge_defaults.min_score),
        max_context_chars: env_parse("KNOWLEDGE_MAX_CONTEXT_CHARS")?
            .unwrap_or(knowledge_defaults.max_context_chars),
    };

    let records = RecordsConfig {
        url: env_string("CALL_RECORDS_URL"),
        api_key: env_string("CALL_RECORDS_API_KEY"),
    };

    Ok(ServerConfig {
        host: env_string("HOST").unwrap_or(defaults.host.clone()),
        port: env_parse("PORT")?.unwrap_or(defaults.port),
        max_concurrent_calls: env_parse("MAX_CONCURRENT_CALLS")?,
        max_calls_per_ip: env_parse("MAX_CALLS_PER_IP")?.unwrap_or(defaults.max_calls_per_ip),
        cors_allowed_origins: env_string("CORS_ALLOWED_ORIGINS"),
        openai_api_key: env_string("OPENAI_API_KEY"),
        openai_base_url: env_string("OPENAI_BASE_URL"),
        deepgram_api_key: env_string("DEEPGRAM_API_KEY"),
        deepgram_base_url: env_string("DEEPGRAM_BASE_URL"),
        pipeline,
        knowledge,
        records,
        session: session_from_env()?,
    })
}

fn session_from_env() -> Result<SessionConfig, Box<dyn std::error::Error>> {
    let mut session = SessionConfig::default();

    if let Some(v) = env_string("GREETING") {
        session.greeting = v;
    }
    if let Some(v) = env_string("FILLER_PHRASE") {
        session.filler_phrase = v;
    }
    if let Some(v) = env_string("APOLOGY_PHRASE") {
        session.apology_phrase = v;
    }
    if let Some(v) = env_string("CLOSING_PHRASE") {
        session.closing_phrase = v;
    }
    if let Some(v) = env_string("SYSTEM_PROMPT") {
        session.system_prompt = v;
    }
    if let Some(v) = env_string("TTS_VOICE") {
        session.voice.voice_id = v;
    }
    if let Some(v) = env_string("TTS_MODEL") {
        session.voice.model = v;
    }
    if let Some(v) = env_parse("SILENCE_THRESHOLD_MS")? {
        session.silence_threshold_ms = v;
    }
    if let Some(v) = env_parse("ENERGY_THRESHOLD")? {
        session.energy_threshold = v;
    }
    if let Some(v) = env_parse("MAX_UTTERANCE_MS")? {
        session.max_utterance_ms = v;
    }
    if let Some(v) = env_parse("OUTBOUND_FRAME_MS")? {
        session.outbound_frame_ms = v;
    }
    if let Some(v) = env_parse("MAX_CONSECUTIVE_FAILURES")? {
        session.max_consecutive_failures = v;
    }
    if let Some(v) = env_string("END_CALL_PHRASES") {
        session.end_call_phrases = parse_list(&v);
    }

    let encoding = env_parse::<AudioEncoding>("WIRE_ENCODING")?
        .unwrap_or(session.wire_format.encoding);
    let sample_rate =
        env_parse::<u32>("WIRE_SAMPLE_RATE")?.unwrap_or(session.wire_format.sample_rate);
    session.wire_format = AudioFormat::new(encoding, sample_rate, 1);

    Ok(session)
}
