use thiserror::Error;

use crate::core::codec::CodecError;
use crate::core::llm::LLMError;
use crate::core::stt::STTError;
use crate::core::tts::TTSError;

/// Session-level error taxonomy.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    /// Connection lost or unwritable; ends the session
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Transcription error: {0}")]
    Transcription(#[from] STTError),

    #[error("Reasoning error: {0}")]
    Reasoning(#[from] LLMError),

    #[error("Synthesis error: {0}")]
    Synthesis(#[from] TTSError),

    /// A frame presented a stream token different from the captured one
    #[error("Stream token conflict: kept {expected}, ignored {received}")]
    Correlation { expected: String, received: String },

    /// Missing or invalid session configuration; the session never leaves Connecting
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Cancelled")]
    Cancelled,
}

impl CallError {
    /// Session-fatal errors. Everything else is recovered within the turn policy.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallError::Transport(_) | CallError::Configuration(_) | CallError::Cancelled
        )
    }

    /// Stage label for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            CallError::Transport(_) => "transport",
            CallError::Transcription(_) => "transcription",
            CallError::Reasoning(_) => "reasoning",
            CallError::Synthesis(_) => "synthesis",
            CallError::Correlation { .. } => "correlation",
            CallError::Configuration(_) => "configuration",
            CallError::Codec(_) => "codec",
            CallError::Cancelled => "cancelled",
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;
