use super::ServerConfig;
use crate::core::llm::get_supported_llm_providers;
use crate::core::stt::get_supported_stt_providers;
use crate::core::tts::get_supported_tts_providers;

fn check_provider(kind: &str, name: &str, supported: &[&str]) -> Result<(), String> {
    if supported.iter().any(|p| p.eq_ignore_ascii_case(name)) {
        Ok(())
    } else {
        Err(format!(
            "Unsupported {kind} provider '{name}'. Supported: {}",
            supported.join(", ")
        ))
    }
}

/// Providers named by the pipeline must exist and have credentials.
pub fn validate_providers(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = &config.pipeline;

    let stt = get_supported_stt_providers();
    check_provider("STT", &pipeline.stt_provider, &stt)?;
    if let Some(secondary) = &pipeline.stt_secondary_provider {
        check_provider("secondary STT", secondary, &stt)?;
    }
    check_provider("LLM", &pipeline.llm_provider, &get_supported_llm_providers())?;
    check_provider("TTS", &pipeline.tts_provider, &get_supported_tts_providers())?;

    let mut needed = vec![
        pipeline.stt_provider.as_str(),
        pipeline.llm_provider.as_str(),
        pipeline.tts_provider.as_str(),
    ];
    if let Some(secondary) = &pipeline.stt_secondary_provider {
        needed.push(secondary.as_str());
    }
    if config.knowledge.url.is_some() {
        needed.push("openai");
    }
    for provider in needed {
        config.get_api_key(provider)?;
    }

    Ok(())
}

pub fn validate_pipeline(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = &config.pipeline;
    for (name, value) in [
        ("transcription_timeout_ms", pipeline.transcription_timeout_ms),
        ("augmentation_timeout_ms", pipeline.augmentation_timeout_ms),
        ("reasoning_timeout_ms", pipeline.reasoning_timeout_ms),
        ("synthesis_timeout_ms", pipeline.synthesis_timeout_ms),
        ("handshake_timeout_ms", pipeline.handshake_timeout_ms),
    ] {
        if value == 0 {
            return Err(format!("{name} must be greater than 0").into());
        }
    }

    let knowledge = &config.knowledge;
    if knowledge.top_k == 0 {
        return Err("knowledge top_k must be greater than 0".into());
    }
    if !(0.0..=1.0).contains(&knowledge.min_score) {
        return Err(format!(
            "knowledge min_score must be between 0.0 and 1.0, got {}",
            knowledge.min_score
        )
        .into());
    }

    Ok(())
}

pub fn validate_limits(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.max_concurrent_calls == Some(0) {
        return Err("max_concurrent_calls must be greater than 0 when set".into());
    }
    if config.max_calls_per_ip == 0 {
        return Err("max_calls_per_ip must be greater than 0".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.openai_api_key = Some("sk-test".to_string());
        config.deepgram_api_key = Some("dg-test".to_string());
        config
    }

    #[test]
    fn test_validate_providers_ok() {
        assert!(validate_providers(&config_with_keys()).is_ok());
    }

    #[test]
    fn test_validate_providers_unknown() {
        let mut config = config_with_keys();
        config.pipeline.tts_provider = "polly".to_string();
        let err = validate_providers(&config).unwrap_err().to_string();
        assert!(err.contains("Unsupported TTS provider"));
    }

    #[test]
    fn test_validate_providers_missing_key() {
        let mut config = config_with_keys();
        config.pipeline.stt_provider = "deepgram".to_string();
        config.deepgram_api_key = None;
        let err = validate_providers(&config).unwrap_err().to_string();
        assert!(err.contains("Deepgram API key"));
    }

    #[test]
    fn test_validate_pipeline_zero_timeout() {
        let mut config = config_with_keys();
        config.pipeline.reasoning_timeout_ms = 0;
        assert!(validate_pipeline(&config).is_err());
    }

    #[test]
    fn test_validate_limits() {
        let mut config = config_with_keys();
        assert!(validate_limits(&config).is_ok());
        config.max_concurrent_calls = Some(0);
        assert!(validate_limits(&config).is_err());
    }
}
