//! Per-call conversational session engine.
//!
//! A [`session`] task owns one call: it feeds inbound frames through the
//! [`UtteranceBuffer`], runs each completed utterance through the
//! [`PipelineOrchestrator`], and hands synthesized audio to the
//! [`OutboundStreamer`] for paced transmission. The [`SessionRegistry`] is
//! the only state shared across calls.

pub mod config;
pub mod error;
pub mod history;
pub mod messages;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod session;
pub mod state;
pub mod streamer;
pub mod utterance;

pub use config::{SessionConfig, SessionOverrides};
pub use error::{CallError, CallResult};
pub use history::{Turn, TurnHistory};
pub use messages::{InboundEvent, MAX_INBOUND_MESSAGE_SIZE, MediaRoute, OutboundEvent};
pub use pipeline::{Collaborators, PipelineOrchestrator, PipelineSettings, TurnOutcome, TurnReply};
pub use record::{
    CallRecord, CallRecordStore, HttpCallRecordStore, RecordError, StaticCallRecordStore,
};
pub use registry::{RegistrationGuard, RegistryError, SessionHandle, SessionRegistry, SessionSnapshot};
pub use session::{SessionParams, SessionServices, SessionSummary, spawn_session};
pub use state::{CloseReason, SessionState};
pub use streamer::{OutboundStreamer, SpeechKind, SpeechQueue, StreamerEvent, StreamerSettings};
pub use utterance::{IngestOutcome, UtteranceBuffer};
