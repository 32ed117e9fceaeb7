use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LLMError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Reasoning timed out after {0}ms")]
    Timeout(u64),

    #[error("Provider returned an empty reply")]
    EmptyReply,
}

/// Speaker of one chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Everything the reasoning collaborator needs for one reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReasoningRequest {
    pub system_prompt: String,
    /// Prior turns, oldest first
    pub history: Vec<ChatMessage>,
    pub user_text: String,
    /// Retrieved knowledge, already bounded to the context budget
    pub context: Option<String>,
    /// Model override; empty uses the provider default
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// Incremental reply text.
pub type TextStream = BoxStream<'static, Result<String, LLMError>>;

#[async_trait]
pub trait Reasoner: Send + Sync {
    fn name(&self) -> &str;

    async fn converse(&self, request: &ReasoningRequest) -> Result<String, LLMError>;

    /// Token-streaming variant. Providers without streaming deliver the whole
    /// reply as a single fragment.
    async fn converse_stream(&self, request: &ReasoningRequest) -> Result<TextStream, LLMError> {
        let reply = self.converse(request).await?;
        Ok(stream::once(async move { Ok(reply) }).boxed())
    }
}

/// Provider connection settings for reasoning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

impl Default for LLMConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            api_key: String::new(),
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(300),
        }
    }
}
