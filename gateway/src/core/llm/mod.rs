//! Reasoning collaborators and reply text handling.

mod base;
pub mod openai;
pub mod prompt;
pub mod sentence;

use std::sync::Arc;

pub use base::{ChatMessage, LLMConfig, LLMError, Reasoner, ReasoningRequest, Role, TextStream};
pub use openai::OpenAIChat;
pub use sentence::{SentenceBoundaryDetector, split_sentences};

pub fn create_reasoner(provider: &str, config: LLMConfig) -> Result<Arc<dyn Reasoner>, LLMError> {
    match provider.to_lowercase().as_str() {
        "openai" | "openai-compatible" => Ok(Arc::new(OpenAIChat::new(config)?)),
        _ => Err(LLMError::ConfigurationError(format!(
            "Unsupported LLM provider: {provider}. Supported providers: openai"
        ))),
    }
}

pub fn get_supported_llm_providers() -> Vec<&'static str> {
    vec!["openai", "openai-compatible"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_reasoner() {
        let config = LLMConfig {
            api_key: "sk-test".to_string(),
            ..Default::default()
        };
        let reasoner = create_reasoner("OpenAI", config).unwrap();
        assert_eq!(reasoner.name(), "openai");
    }

    #[test]
    fn test_create_reasoner_unknown() {
        let result = create_reasoner("anthropic-direct", LLMConfig::default());
        assert!(matches!(result, Err(LLMError::ConfigurationError(_))));
    }
}
