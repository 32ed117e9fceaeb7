use serde::{Deserialize, Serialize};

/// Lifecycle state of one call session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Resolving configuration and pre-synthesizing phrases
    Connecting,
    /// Greeting queued, no inbound audio yet
    AwaitingSpeech,
    /// Accumulating caller audio until silence
    Buffering,
    /// A turn is running through the pipeline
    Processing,
    /// Reply audio is being transmitted
    Speaking,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Connecting => "connecting",
            SessionState::AwaitingSpeech => "awaiting_speech",
            SessionState::Buffering => "buffering",
            SessionState::Processing => "processing",
            SessionState::Speaking => "speaking",
            SessionState::Closed => "closed",
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SessionState::Closed)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session reached `Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Transport closed by the remote party
    TransportClosed,
    /// Outbound transmission failed
    TransportError,
    /// Explicit `stop` event
    StopEvent,
    /// Reply contained an end-call phrase
    AgentEnded,
    /// Consecutive turn failures reached the limit
    TooManyFailures,
    /// Session configuration could not be resolved
    ConfigurationError,
    /// Server shutdown or external cancellation
    Cancelled,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::TransportClosed => "transport_closed",
            CloseReason::TransportError => "transport_error",
            CloseReason::StopEvent => "stop_event",
            CloseReason::AgentEnded => "agent_ended",
            CloseReason::TooManyFailures => "too_many_failures",
            CloseReason::ConfigurationError => "configuration_error",
            CloseReason::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
