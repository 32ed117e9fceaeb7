//! Per-call conversation state machine.
//!
//! One task per call. The task owns every piece of mutable session state and
//! multiplexes four inputs: inbound wire events, the utterance silence
//! deadline, streamer progress events and the result of the in-flight turn.
//! At most one turn runs at a time; utterances completed while a turn is busy
//! are merged into a single pending utterance and run next.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::config::SessionConfig;
use super::error::CallError;
use super::history::{TurnHistory, now_ms};
use super::messages::{InboundEvent, MediaPayload, MediaRoute};
use super::pipeline::{PipelineOrchestrator, TurnOutcome};
use super::record::{CallRecord, CallRecordStore};
use super::registry::{RegistrationGuard, SessionHandle, SessionRegistry};
use super::state::{CloseReason, SessionState};
use super::streamer::{
    OutboundStreamer, SpeechKind, SpeechQueue, StreamerEvent, StreamerSettings,
};
use super::utterance::{IngestOutcome, UtteranceBuffer};
use crate::core::codec::{AudioFormat, FrameCodec};

/// Upper bound on persisting the transcript at close.
const PERSIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared, process-wide dependencies of every session.
#[derive(Clone)]
pub struct SessionServices {
    pub pipeline: Arc<PipelineOrchestrator>,
    pub records: Arc<dyn CallRecordStore>,
    pub registry: Arc<SessionRegistry>,
    /// Server-wide defaults that call records may override
    pub defaults: Arc<SessionConfig>,
    /// How long to wait for a `start` event when the connection did not
    /// identify the call
    pub handshake_timeout: Duration,
}

/// Identity supplied when the transport connection was accepted.
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    pub connection_id: String,
    pub call_id: Option<String>,
    pub stream_token: Option<String>,
}

/// Final state handed back to the transport handler.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: String,
    pub close_reason: CloseReason,
    pub history: TurnHistory,
    pub turns: u64,
}

/// Start a session task for one accepted connection.
///
/// Closing `inbound` (dropping its sender) is how the transport reports that
/// the connection is gone. `shutdown` is the server-wide cancellation token.
pub fn spawn_session(
    services: SessionServices,
    params: SessionParams,
    inbound: mpsc::Receiver<InboundEvent>,
    out: mpsc::Sender<MediaRoute>,
    shutdown: CancellationToken,
) -> JoinHandle<SessionSummary> {
    tokio::spawn(run_session(services, params, inbound, out, shutdown))
}

pub async fn run_session(
    services: SessionServices,
    params: SessionParams,
    mut inbound: mpsc::Receiver<InboundEvent>,
    out: mpsc::Sender<MediaRoute>,
    shutdown: CancellationToken,
) -> SessionSummary {
    let session_id = Uuid::new_v4().to_string();
    let cancel = shutdown.child_token();
    let started_at_ms = now_ms();

    let initial_token = params.stream_token.clone().filter(|t| !t.is_empty());
    let (state_tx, state_rx) = watch::channel(SessionState::Connecting);
    let (token_tx, token_rx) = watch::channel(initial_token);

    let guard = match services.registry.register(SessionHandle {
        session_id: session_id.clone(),
        connection_id: params.connection_id.clone(),
        started_at_ms,
        state: state_rx,
        stream_token: token_rx,
        cancel: cancel.clone(),
    }) {
        Ok(guard) => guard,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Failed to register session");
            let _ = out.try_send(MediaRoute::Close);
            return SessionSummary {
                session_id,
                close_reason: CloseReason::ConfigurationError,
                history: TurnHistory::new(),
                turns: 0,
            };
        }
    };

    info!(
        session_id = %session_id,
        connection_id = %params.connection_id,
        "Session connecting"
    );

    let mut call_id = params.call_id.clone().filter(|c| !c.is_empty());
    let mut early_events = Vec::new();

    if call_id.is_none() {
        let handshake =
            await_handshake(&mut inbound, services.handshake_timeout, &cancel, &token_tx).await;
        call_id = handshake.call_id;
        early_events = handshake.early_events;
        if let Some(reason) = handshake.ended {
            let record_key = call_id.unwrap_or_else(|| session_id.clone());
            return close_unstarted(
                &services, guard, &state_tx, &token_tx, session_id, record_key, started_at_ms,
                reason, &out,
            )
            .await;
        }
    }

    let record_key = call_id.clone().unwrap_or_else(|| session_id.clone());

    let config = match resolve_config(&services, call_id.as_deref(), &session_id).await {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Session configuration rejected");
            return close_unstarted(
                &services,
                guard,
                &state_tx,
                &token_tx,
                session_id,
                record_key,
                started_at_ms,
                CloseReason::ConfigurationError,
                &out,
            )
            .await;
        }
    };

    let inbound_codec = match FrameCodec::new(
        config.wire_format,
        AudioFormat::linear16(config.wire_format.sample_rate),
    ) {
        Ok(codec) => codec,
        Err(e) => {
            error!(session_id = %session_id, error = %e, "Unsupported wire format");
            return close_unstarted(
                &services,
                guard,
                &state_tx,
                &token_tx,
                session_id,
                record_key,
                started_at_ms,
                CloseReason::ConfigurationError,
                &out,
            )
            .await;
        }
    };

    let (speech, streamer_events, _streamer) = OutboundStreamer::spawn(
        session_id.clone(),
        StreamerSettings {
            frame_bytes: config.outbound_frame_bytes(),
            frame_duration: config.outbound_frame_duration(),
        },
        out.clone(),
        token_tx.subscribe(),
        cancel.child_token(),
    );

    let phrases = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        phrases = PhraseCache::prepare(&services.pipeline, &config, &session_id) => Some(phrases),
    };
    let Some(phrases) = phrases else {
        return close_unstarted(
            &services,
            guard,
            &state_tx,
            &token_tx,
            session_id,
            record_key,
            started_at_ms,
            CloseReason::Cancelled,
            &out,
        )
        .await;
    };

    let mut session = CallSession {
        buffer: UtteranceBuffer::new(
            config.silence_threshold(),
            config.energy_threshold,
            config.max_utterance_bytes(),
        ),
        session_id,
        record_key,
        started_at_ms,
        services,
        config,
        state: SessionState::Connecting,
        state_tx,
        token_tx,
        inbound_codec,
        history: TurnHistory::new(),
        speech,
        phrases,
        turn_seq: 0,
        in_flight: None,
        awaiting_drain: None,
        pending: None,
        consecutive_failures: 0,
        close_after_drain: None,
        last_sequence: None,
        cancel,
        out,
    };

    let reason = session.run(inbound, streamer_events, early_events).await;
    session.teardown(reason, guard).await
}

struct Handshake {
    call_id: Option<String>,
    early_events: Vec<InboundEvent>,
    ended: Option<CloseReason>,
}

/// Wait for the `start` event to learn the call id. Media that arrives first
/// is kept for replay once the session is ready.
async fn await_handshake(
    inbound: &mut mpsc::Receiver<InboundEvent>,
    limit: Duration,
    cancel: &CancellationToken,
    token_tx: &watch::Sender<Option<String>>,
) -> Handshake {
    let deadline = Instant::now() + limit;
    let mut handshake = Handshake {
        call_id: None,
        early_events: Vec::new(),
        ended: None,
    };

    loop {
        let event = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                handshake.ended = Some(CloseReason::Cancelled);
                break;
            }
            _ = sleep_until(deadline) => {
                debug!("No start event before handshake timeout, using defaults");
                break;
            }
            event = inbound.recv() => event,
        };

        match event {
            None => {
                handshake.ended = Some(CloseReason::TransportClosed);
                break;
            }
            Some(InboundEvent::Connected) => {}
            Some(InboundEvent::Stop { .. }) => {
                handshake.ended = Some(CloseReason::StopEvent);
                break;
            }
            Some(event @ InboundEvent::Start { .. }) => {
                let unset = token_tx.borrow().is_none();
                if let Some(token) = event.stream_token()
                    && unset
                {
                    token_tx.send_replace(Some(token.to_string()));
                }
                if let InboundEvent::Start {
                    start: Some(start), ..
                } = event
                {
                    handshake.call_id = start.call_id.filter(|c| !c.is_empty()).or_else(|| {
                        start
                            .custom_parameters
                            .get("call_id")
                            .and_then(|v| v.as_str())
                            .map(str::to_string)
                    });
                }
                break;
            }
            Some(other) => handshake.early_events.push(other),
        }
    }

    handshake
}

async fn resolve_config(
    services: &SessionServices,
    call_id: Option<&str>,
    session_id: &str,
) -> Result<SessionConfig, CallError> {
    let mut config = services.defaults.as_ref().clone();

    if let Some(call_id) = call_id {
        match services.records.session_overrides(call_id).await {
            Ok(Some(overrides)) => {
                debug!(session_id, call_id, "Applying call record overrides");
                config = config.with_overrides(overrides);
            }
            Ok(None) => debug!(session_id, call_id, "No call record, using defaults"),
            Err(e) => {
                warn!(session_id, call_id, error = %e, "Call record lookup failed, using defaults")
            }
        }
    }

    config.validate()?;
    Ok(config)
}

#[allow(clippy::too_many_arguments)]
async fn close_unstarted(
    services: &SessionServices,
    guard: RegistrationGuard,
    state_tx: &watch::Sender<SessionState>,
    token_tx: &watch::Sender<Option<String>>,
    session_id: String,
    record_key: String,
    started_at_ms: u64,
    reason: CloseReason,
    out: &mpsc::Sender<MediaRoute>,
) -> SessionSummary {
    state_tx.send_replace(SessionState::Closed);
    let _ = out.try_send(MediaRoute::Close);

    let record = CallRecord {
        call_id: record_key,
        session_id: session_id.clone(),
        stream_token: token_tx.borrow().clone(),
        started_at_ms,
        ended_at_ms: now_ms(),
        close_reason: reason,
        turns: Vec::new(),
    };
    persist(services.records.as_ref(), &record).await;
    drop(guard);

    info!(session_id = %session_id, reason = %reason, "Session closed before start");
    SessionSummary {
        session_id,
        close_reason: reason,
        history: TurnHistory::new(),
        turns: 0,
    }
}

async fn persist(records: &dyn CallRecordStore, record: &CallRecord) {
    match timeout(PERSIST_TIMEOUT, records.save_transcript(record)).await {
        Ok(Ok(())) => debug!(session_id = %record.session_id, turns = record.turns.len(), "Transcript persisted"),
        Ok(Err(e)) => error!(session_id = %record.session_id, error = %e, "Failed to persist transcript"),
        Err(_) => error!(session_id = %record.session_id, "Timed out persisting transcript"),
    }
}

/// Fixed phrases synthesized once per session, already in wire format.
#[derive(Debug, Default)]
struct PhraseCache {
    greeting: Option<Bytes>,
    filler: Option<Bytes>,
    apology: Option<Bytes>,
    closing: Option<Bytes>,
}

impl PhraseCache {
    fn get(&self, kind: SpeechKind) -> Option<Bytes> {
        match kind {
            SpeechKind::Greeting => self.greeting.clone(),
            SpeechKind::Filler => self.filler.clone(),
            SpeechKind::Apology => self.apology.clone(),
            SpeechKind::Closing => self.closing.clone(),
            SpeechKind::Reply => None,
        }
    }

    async fn prepare(
        pipeline: &PipelineOrchestrator,
        config: &SessionConfig,
        session_id: &str,
    ) -> Self {
        let started = Instant::now();
        let (greeting, filler, apology, closing) = tokio::join!(
            pipeline.speak_text(&config.greeting, config),
            pipeline.speak_text(&config.filler_phrase, config),
            pipeline.speak_text(&config.apology_phrase, config),
            pipeline.speak_text(&config.closing_phrase, config),
        );

        let keep = |name: &str, result: Result<Bytes, CallError>| match result {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!(session_id, phrase = name, error = %e, "Phrase pre-synthesis failed");
                None
            }
        };

        let cache = Self {
            greeting: keep("greeting", greeting),
            filler: keep("filler", filler),
            apology: keep("apology", apology),
            closing: keep("closing", closing),
        };
        debug!(
            session_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Phrases prepared"
        );
        cache
    }
}

struct InFlightTurn {
    turn: u64,
    handle: JoinHandle<Result<TurnOutcome, CallError>>,
    cancel: CancellationToken,
}

type TurnJoin = (u64, Result<Result<TurnOutcome, CallError>, JoinError>);

/// Resolves when the in-flight turn finishes; pending forever when idle.
async fn join_turn(in_flight: &mut Option<InFlightTurn>) -> TurnJoin {
    match in_flight {
        Some(turn) => (turn.turn, (&mut turn.handle).await),
        None => std::future::pending().await,
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

struct CallSession {
    session_id: String,
    /// Key for the call record (call id, or session id when unknown)
    record_key: String,
    started_at_ms: u64,
    services: SessionServices,
    config: Arc<SessionConfig>,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    token_tx: watch::Sender<Option<String>>,
    inbound_codec: FrameCodec,
    buffer: UtteranceBuffer,
    history: TurnHistory,
    speech: SpeechQueue,
    phrases: PhraseCache,
    turn_seq: u64,
    in_flight: Option<InFlightTurn>,
    /// Turn whose audio must finish before the next turn may start
    awaiting_drain: Option<u64>,
    /// Utterance completed while a turn was busy
    pending: Option<BytesMut>,
    consecutive_failures: u32,
    close_after_drain: Option<CloseReason>,
    last_sequence: Option<u64>,
    cancel: CancellationToken,
    out: mpsc::Sender<MediaRoute>,
}

impl CallSession {
    async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<InboundEvent>,
        mut streamer_events: mpsc::UnboundedReceiver<StreamerEvent>,
        early_events: Vec<InboundEvent>,
    ) -> CloseReason {
        if let ControlFlow::Break(reason) = self.start() {
            return reason;
        }

        for event in early_events {
            if let ControlFlow::Break(reason) = self.handle_event(event) {
                return reason;
            }
        }

        loop {
            let deadline = self.buffer.deadline();

            let flow = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => ControlFlow::Break(CloseReason::Cancelled),
                event = inbound.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => ControlFlow::Break(CloseReason::TransportClosed),
                },
                Some(event) = streamer_events.recv() => self.handle_streamer_event(event),
                (turn, result) = join_turn(&mut self.in_flight) => {
                    self.in_flight = None;
                    self.finish_turn(turn, result)
                }
                _ = sleep_until_opt(deadline) => self.on_silence(),
            };

            if let ControlFlow::Break(reason) = flow {
                return reason;
            }
        }
    }

    /// Leave `Connecting`: queue the greeting and start listening.
    fn start(&mut self) -> ControlFlow<CloseReason> {
        match self.phrases.greeting.clone() {
            Some(audio) => {
                if let Err(e) = self
                    .speech
                    .audio(SpeechKind::Greeting, 0, audio)
                    .and_then(|_| self.speech.end_of_turn(0, "greeting"))
                {
                    return self.fail_transport(e);
                }
                self.awaiting_drain = Some(0);
                self.history.push_greeting(&self.config.greeting);
            }
            None => {
                error!(session_id = %self.session_id, "Greeting unavailable, listening without it");
            }
        }

        self.set_state(SessionState::AwaitingSpeech);
        info!(
            session_id = %self.session_id,
            call_id = %self.record_key,
            stream_token = ?self.token_tx.borrow().as_deref(),
            "Session ready"
        );
        ControlFlow::Continue(())
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        debug!(session_id = %self.session_id, from = %self.state, to = %state, "State transition");
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn handle_event(&mut self, event: InboundEvent) -> ControlFlow<CloseReason> {
        match event {
            InboundEvent::Connected => {
                debug!(session_id = %self.session_id, "Transport connected");
            }
            InboundEvent::Start {
                stream_token,
                start,
            } => {
                let token = stream_token
                    .filter(|t| !t.is_empty())
                    .or_else(|| start.and_then(|s| s.stream_token));
                if let Some(token) = token {
                    self.observe_token(&token);
                }
                debug!(session_id = %self.session_id, "Stream start received");
            }
            InboundEvent::Media {
                stream_token,
                sequence,
                media,
            } => return self.handle_media(stream_token, sequence, media),
            InboundEvent::Mark { mark, .. } => {
                debug!(
                    session_id = %self.session_id,
                    mark = mark.as_ref().map(|m| m.name.as_str()).unwrap_or(""),
                    "Playback mark acknowledged"
                );
            }
            InboundEvent::Dtmf { dtmf, .. } => {
                info!(
                    session_id = %self.session_id,
                    digit = %dtmf.and_then(|d| d.digit).unwrap_or_default(),
                    "DTMF received"
                );
            }
            InboundEvent::Stop { .. } => {
                info!(session_id = %self.session_id, "Stop event received");
                return ControlFlow::Break(CloseReason::StopEvent);
            }
        }
        ControlFlow::Continue(())
    }

    /// Capture the token once; a different later value is logged and ignored.
    fn observe_token(&mut self, token: &str) {
        if token.is_empty() {
            return;
        }
        let current = self.token_tx.borrow().clone();
        match current {
            None => {
                info!(session_id = %self.session_id, stream_token = token, "Stream token captured");
                self.token_tx.send_replace(Some(token.to_string()));
            }
            Some(existing) if existing != token => {
                let conflict = CallError::Correlation {
                    expected: existing,
                    received: token.to_string(),
                };
                warn!(session_id = %self.session_id, error = %conflict, "Ignoring conflicting stream token");
            }
            Some(_) => {}
        }
    }

    fn handle_media(
        &mut self,
        stream_token: Option<String>,
        sequence: Option<u64>,
        media: MediaPayload,
    ) -> ControlFlow<CloseReason> {
        if media.is_outbound_track() {
            return ControlFlow::Continue(());
        }

        if let Some(token) = stream_token.as_deref() {
            self.observe_token(token);
        }

        if let Some(seq) = sequence {
            if let Some(last) = self.last_sequence
                && seq != last + 1
            {
                debug!(session_id = %self.session_id, expected = last + 1, received = seq, "Sequence gap");
            }
            self.last_sequence = Some(seq);
        }

        let raw = match media.decode() {
            Ok(raw) => raw,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "Dropping media frame with invalid base64");
                return ControlFlow::Continue(());
            }
        };

        let pcm = match self.inbound_codec.transform(&raw) {
            Ok(pcm) => pcm,
            Err(e) => {
                warn!(session_id = %self.session_id, error = %CallError::from(e), "Dropping corrupt media frame");
                return ControlFlow::Continue(());
            }
        };

        if self.state == SessionState::AwaitingSpeech {
            self.set_state(SessionState::Buffering);
        }

        match self.buffer.ingest(&pcm) {
            IngestOutcome::Full => {
                debug!(session_id = %self.session_id, "Utterance reached maximum length");
                self.on_silence()
            }
            IngestOutcome::Buffered | IngestOutcome::Skipped => ControlFlow::Continue(()),
        }
    }

    fn turn_busy(&self) -> bool {
        self.in_flight.is_some() || self.awaiting_drain.is_some()
    }

    fn on_silence(&mut self) -> ControlFlow<CloseReason> {
        let Some(utterance) = self.buffer.flush() else {
            return ControlFlow::Continue(());
        };

        if self.turn_busy() || self.close_after_drain.is_some() {
            let pending = self.pending.get_or_insert_with(BytesMut::new);
            let room = self.config.max_utterance_bytes().saturating_sub(pending.len());
            if room < utterance.len() {
                warn!(
                    session_id = %self.session_id,
                    dropped_bytes = utterance.len() - room,
                    "Pending utterance at maximum length, dropping overflow"
                );
            }
            pending.extend_from_slice(&utterance[..room.min(utterance.len())]);
            debug!(
                session_id = %self.session_id,
                bytes = utterance.len(),
                pending_bytes = pending.len(),
                "Turn busy, utterance queued"
            );
            return ControlFlow::Continue(());
        }

        self.start_turn(utterance)
    }

    fn start_turn(&mut self, utterance: Bytes) -> ControlFlow<CloseReason> {
        self.turn_seq += 1;
        let turn = self.turn_seq;
        self.set_state(SessionState::Processing);
        info!(session_id = %self.session_id, turn, bytes = utterance.len(), "Utterance complete, starting turn");

        // The filler goes out before the pipeline is even spawned.
        let filler_text = match self.phrases.filler.clone() {
            Some(audio) => {
                if let Err(e) = self.speech.audio(SpeechKind::Filler, turn, audio) {
                    return self.fail_transport(e);
                }
                None
            }
            None => Some(self.config.filler_phrase.clone()),
        };

        let pipeline = self.services.pipeline.clone();
        let config = self.config.clone();
        let speech = self.speech.clone();
        let history = self.history.as_messages();
        let cancel = self.cancel.child_token();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => Err(CallError::Cancelled),
                result = async {
                    if let Some(text) = filler_text {
                        match pipeline.speak_text(&text, &config).await {
                            Ok(audio) => {
                                if let Err(e) = speech.audio(SpeechKind::Filler, turn, audio) {
                                    return Err(e);
                                }
                            }
                            Err(e) => warn!(turn, error = %e, "Filler synthesis failed"),
                        }
                    }
                    pipeline.run_turn(turn, utterance, history, &config, &speech).await
                } => result,
            }
        });

        self.in_flight = Some(InFlightTurn {
            turn,
            handle,
            cancel,
        });
        ControlFlow::Continue(())
    }

    fn finish_turn(
        &mut self,
        turn: u64,
        result: Result<Result<TurnOutcome, CallError>, JoinError>,
    ) -> ControlFlow<CloseReason> {
        let result = result.unwrap_or_else(|e| {
            error!(session_id = %self.session_id, turn, error = %e, "Turn task aborted");
            Err(CallError::Transport(format!("turn task failed: {e}")))
        });

        let mut fallback = None;
        match result {
            Ok(TurnOutcome::Replied(reply)) => {
                self.consecutive_failures = 0;
                self.history
                    .push_exchange(&reply.transcript.text, &reply.reply_text);
                info!(
                    session_id = %self.session_id,
                    turn,
                    user = %reply.transcript.text,
                    reply = %reply.reply_text,
                    "Turn replied"
                );
                if let Some(phrase) = self.config.end_call_phrase_in(&reply.reply_text) {
                    info!(session_id = %self.session_id, turn, phrase, "End-call phrase in reply");
                    self.close_after_drain = Some(CloseReason::AgentEnded);
                }
            }
            Ok(TurnOutcome::NoSpeech) => {
                debug!(session_id = %self.session_id, turn, "Turn ended without speech");
            }
            Err(CallError::Cancelled) => return ControlFlow::Break(CloseReason::Cancelled),
            Err(e) if e.is_terminal() => return self.fail_transport(e),
            Err(e) => {
                self.consecutive_failures += 1;
                warn!(
                    session_id = %self.session_id,
                    turn,
                    stage = e.stage(),
                    error = %e,
                    failures = self.consecutive_failures,
                    "Turn failed"
                );

                let phrase = if self.consecutive_failures >= self.config.max_consecutive_failures {
                    self.close_after_drain = Some(CloseReason::TooManyFailures);
                    (SpeechKind::Closing, self.config.closing_phrase.clone())
                } else {
                    (SpeechKind::Apology, self.config.apology_phrase.clone())
                };
                fallback = Some(phrase);
            }
        }

        if let Err(e) = self.end_turn(turn, fallback) {
            return self.fail_transport(e);
        }
        self.awaiting_drain = Some(turn);
        ControlFlow::Continue(())
    }

    /// Queue the phrase that closes a failed turn, then the turn's mark. A
    /// phrase missing from the cache is synthesized on its own task, so the
    /// session keeps reading inbound events meanwhile; that task queues the
    /// mark once the phrase is in.
    fn end_turn(&self, turn: u64, phrase: Option<(SpeechKind, String)>) -> Result<(), CallError> {
        let mark = format!("turn-{turn}");
        let Some((kind, text)) = phrase else {
            return self.speech.end_of_turn(turn, mark);
        };

        if let Some(audio) = self.phrases.get(kind) {
            self.speech.audio(kind, turn, audio)?;
            return self.speech.end_of_turn(turn, mark);
        }

        let pipeline = self.services.pipeline.clone();
        let config = self.config.clone();
        let speech = self.speech.clone();
        let cancel = self.cancel.child_token();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            let synthesized = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                result = pipeline.speak_text(&text, &config) => result,
            };
            let queued = match synthesized {
                Ok(audio) => speech.audio(kind, turn, audio),
                Err(e) => {
                    error!(session_id = %session_id, turn, kind = ?kind, error = %e, "Fallback phrase synthesis failed");
                    Ok(())
                }
            }
            .and_then(|_| speech.end_of_turn(turn, mark));
            if let Err(e) = queued {
                debug!(session_id = %session_id, turn, error = %e, "Streamer gone before turn end");
            }
        });
        Ok(())
    }

    fn handle_streamer_event(&mut self, event: StreamerEvent) -> ControlFlow<CloseReason> {
        match event {
            StreamerEvent::Started { kind, turn } => {
                if kind.is_response()
                    && turn == self.turn_seq
                    && self.state == SessionState::Processing
                {
                    self.set_state(SessionState::Speaking);
                }
            }
            StreamerEvent::TurnDrained { turn } => {
                if self.awaiting_drain != Some(turn) {
                    return ControlFlow::Continue(());
                }
                self.awaiting_drain = None;
                debug!(session_id = %self.session_id, turn, "Turn audio drained");

                if let Some(reason) = self.close_after_drain.take() {
                    return ControlFlow::Break(reason);
                }
                if let Some(pending) = self.pending.take() {
                    return self.start_turn(pending.freeze());
                }
                if matches!(
                    self.state,
                    SessionState::Processing | SessionState::Speaking
                ) {
                    self.set_state(SessionState::Buffering);
                }
            }
            StreamerEvent::Failed(e) => return self.fail_transport(e),
        }
        ControlFlow::Continue(())
    }

    fn fail_transport(&self, e: CallError) -> ControlFlow<CloseReason> {
        if e == CallError::Cancelled {
            return ControlFlow::Break(CloseReason::Cancelled);
        }
        error!(session_id = %self.session_id, error = %e, "Transport failure, closing session");
        ControlFlow::Break(CloseReason::TransportError)
    }

    /// Cancel everything in flight, persist the transcript, then release the
    /// registry entry.
    async fn teardown(mut self, reason: CloseReason, guard: RegistrationGuard) -> SessionSummary {
        self.set_state(SessionState::Closed);
        self.cancel.cancel();
        if let Some(turn) = self.in_flight.take() {
            turn.cancel.cancel();
            turn.handle.abort();
            debug!(session_id = %self.session_id, turn = turn.turn, "In-flight turn cancelled");
        }
        let _ = self.out.try_send(MediaRoute::Close);

        let record = CallRecord {
            call_id: self.record_key.clone(),
            session_id: self.session_id.clone(),
            stream_token: self.token_tx.borrow().clone(),
            started_at_ms: self.started_at_ms,
            ended_at_ms: now_ms(),
            close_reason: reason,
            turns: self.history.turns().to_vec(),
        };
        persist(self.services.records.as_ref(), &record).await;
        drop(guard);

        info!(
            session_id = %self.session_id,
            reason = %reason,
            turns = self.turn_seq,
            history = self.history.len(),
            "Session closed"
        );

        SessionSummary {
            session_id: self.session_id,
            close_reason: reason,
            history: self.history,
            turns: self.turn_seq,
        }
    }
}
