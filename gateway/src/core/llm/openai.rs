//! OpenAI-compatible chat completions, blocking and SSE streaming.
//!
//! Any server speaking the `/v1/chat/completions` dialect works through
//! `base_url` (vLLM, Groq, Azure proxies, ...).

use std::time::Duration;

use async_stream::try_stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::base::{ChatMessage, LLMConfig, LLMError, Reasoner, ReasoningRequest, TextStream};
use super::prompt::build_messages;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// One parsed server-sent event line.
#[derive(Debug, PartialEq)]
enum SseLine {
    Data(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let line = line.trim_end_matches(['\r', '\n']);
    match line.strip_prefix("data:") {
        Some(payload) => {
            let payload = payload.trim_start();
            if payload == "[DONE]" {
                SseLine::Done
            } else if payload.is_empty() {
                SseLine::Skip
            } else {
                SseLine::Data(payload.to_string())
            }
        }
        None => SseLine::Skip,
    }
}

fn chunk_text(payload: &str) -> Result<Option<String>, LLMError> {
    let chunk: ChatCompletionChunk = serde_json::from_str(payload)
        .map_err(|e| LLMError::StreamError(format!("Malformed chunk: {e}")))?;
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

pub struct OpenAIChat {
    config: LLMConfig,
    http_client: Client,
}

impl OpenAIChat {
    pub fn new(config: LLMConfig) -> Result<Self, LLMError> {
        if config.api_key.is_empty() {
            return Err(LLMError::ConfigurationError(
                "API key is required for OpenAI chat".to_string(),
            ));
        }

        let http_client = Client::builder()
            .timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| {
                LLMError::ConfigurationError(format!("Failed to create HTTP client: {e}"))
            })?;

        Ok(Self {
            config,
            http_client,
        })
    }

    fn api_url(&self) -> String {
        match &self.config.base_url {
            Some(base) => format!("{}/v1/chat/completions", base.trim_end_matches('/')),
            None => OPENAI_CHAT_URL.to_string(),
        }
    }

    async fn send(
        &self,
        request: &ReasoningRequest,
        stream: bool,
    ) -> Result<reqwest::Response, LLMError> {
        let messages = build_messages(request);
        let model = if request.model.is_empty() {
            self.config.model.as_str()
        } else {
            request.model.as_str()
        };

        let body = ChatCompletionRequest {
            model,
            messages: &messages,
            temperature: request.temperature.or(self.config.temperature),
            max_tokens: request.max_tokens.or(self.config.max_tokens),
            stream,
        };

        debug!(model, messages = messages.len(), stream, "Sending chat completion");

        let response = self
            .http_client
            .post(self.api_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LLMError::NetworkError(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LLMError::ProviderError(format!(
                "Chat API error ({status}): {body}"
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl Reasoner for OpenAIChat {
    fn name(&self) -> &str {
        "openai"
    }

    async fn converse(&self, request: &ReasoningRequest) -> Result<String, LLMError> {
        let response = self.send(request, false).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LLMError::ProviderError(format!("Failed to parse response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(LLMError::EmptyReply)
    }

    async fn converse_stream(&self, request: &ReasoningRequest) -> Result<TextStream, LLMError> {
        let response = self.send(request, true).await?;
        let mut bytes = response.bytes_stream();

        let stream = try_stream! {
            let mut pending = String::new();
            'events: while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| LLMError::StreamError(e.to_string()))?;
                pending.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = pending.find('\n') {
                    let line: String = pending.drain(..=newline).collect();
                    match parse_sse_line(&line) {
                        SseLine::Done => break 'events,
                        SseLine::Skip => {}
                        SseLine::Data(payload) => {
                            if let Some(text) = chunk_text(&payload)? {
                                yield text;
                            }
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }
}
