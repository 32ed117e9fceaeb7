//! Outbound audio streaming.
//!
//! One task per session drains a FIFO of [`SpeechCommand`]s. Each audio item
//! is cut into fixed-size frames that are paced at real-time cadence and
//! tagged with the provider's stream token. Nothing is transmitted before the
//! token is known; items queue up until it is captured.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::CallError;
use super::messages::{MediaRoute, OutboundEvent};

/// What a queued piece of audio is, for state tracking and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeechKind {
    Greeting,
    Filler,
    Reply,
    Apology,
    Closing,
}

impl SpeechKind {
    /// Audio that answers the caller (moves the session to `Speaking`).
    pub fn is_response(&self) -> bool {
        matches!(
            self,
            SpeechKind::Reply | SpeechKind::Apology | SpeechKind::Closing
        )
    }
}

#[derive(Debug)]
pub enum SpeechCommand {
    /// Wire-encoded audio to transmit
    Audio {
        kind: SpeechKind,
        turn: u64,
        audio: Bytes,
    },
    /// Everything for `turn` has been queued; send a mark once it is out
    EndOfTurn { turn: u64, mark: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamerEvent {
    Started { kind: SpeechKind, turn: u64 },
    TurnDrained { turn: u64 },
    Failed(CallError),
}

/// Producer handle for the streamer queue.
#[derive(Debug, Clone)]
pub struct SpeechQueue {
    tx: mpsc::UnboundedSender<SpeechCommand>,
}

impl SpeechQueue {
    pub fn audio(&self, kind: SpeechKind, turn: u64, audio: Bytes) -> Result<(), CallError> {
        if audio.is_empty() {
            return Ok(());
        }
        self.send(SpeechCommand::Audio { kind, turn, audio })
    }

    pub fn end_of_turn(&self, turn: u64, mark: impl Into<String>) -> Result<(), CallError> {
        self.send(SpeechCommand::EndOfTurn {
            turn,
            mark: mark.into(),
        })
    }

    fn send(&self, command: SpeechCommand) -> Result<(), CallError> {
        self.tx
            .send(command)
            .map_err(|_| CallError::Transport("outbound streamer has stopped".to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamerSettings {
    /// Bytes per outbound frame in the wire format
    pub frame_bytes: usize,
    /// Playback duration of one full frame
    pub frame_duration: Duration,
}

/// Slice `audio` into frames and transmit them in order, one per
/// `frame_duration`. Returns the number of frames sent.
///
/// `next_frame_at` is the playback clock: the first frame waits for it and
/// every frame sent advances it by one frame duration, so consecutive calls
/// keep a single cadence.
///
/// Fails with [`CallError::Transport`] as soon as the sender side is gone;
/// frames already sent are not retried.
pub async fn transmit(
    out: &mpsc::Sender<MediaRoute>,
    audio: &[u8],
    stream_token: &str,
    settings: StreamerSettings,
    next_frame_at: &mut Instant,
    cancel: &CancellationToken,
) -> Result<usize, CallError> {
    let frame_bytes = settings.frame_bytes.max(1);
    let mut sent = 0;

    for frame in audio.chunks(frame_bytes) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            _ = sleep_until(*next_frame_at) => {}
        }

        let json = OutboundEvent::media(stream_token, frame)
            .to_json()
            .map_err(|e| CallError::Transport(format!("failed to encode media frame: {e}")))?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            result = out.send(MediaRoute::Outgoing(json)) => {
                result.map_err(|_| CallError::Transport("connection is closed".to_string()))?;
            }
        }

        sent += 1;
        *next_frame_at += settings.frame_duration;
    }

    Ok(sent)
}

pub struct OutboundStreamer {
    settings: StreamerSettings,
    out: mpsc::Sender<MediaRoute>,
    token: watch::Receiver<Option<String>>,
    events: mpsc::UnboundedSender<StreamerEvent>,
    cancel: CancellationToken,
    session_id: String,
    /// When the previously sent audio finishes playing
    next_frame_at: Instant,
}

impl OutboundStreamer {
    /// Start the streamer task for one session.
    pub fn spawn(
        session_id: String,
        settings: StreamerSettings,
        out: mpsc::Sender<MediaRoute>,
        token: watch::Receiver<Option<String>>,
        cancel: CancellationToken,
    ) -> (
        SpeechQueue,
        mpsc::UnboundedReceiver<StreamerEvent>,
        JoinHandle<()>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let streamer = OutboundStreamer {
            settings,
            out,
            token,
            events: events_tx,
            cancel,
            session_id,
            next_frame_at: Instant::now(),
        };
        let handle = tokio::spawn(streamer.run(rx));

        (SpeechQueue { tx }, events_rx, handle)
    }

    async fn run(mut self, mut queue: mpsc::UnboundedReceiver<SpeechCommand>) {
        loop {
            let command = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = queue.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
            };

            let Some(token) = self.wait_for_token().await else {
                break;
            };

            match command {
                SpeechCommand::Audio { kind, turn, audio } => {
                    let _ = self.events.send(StreamerEvent::Started { kind, turn });
                    self.next_frame_at = self.next_frame_at.max(Instant::now());
                    let mut next_frame_at = self.next_frame_at;
                    let result = transmit(
                        &self.out,
                        &audio,
                        &token,
                        self.settings,
                        &mut next_frame_at,
                        &self.cancel,
                    )
                    .await;
                    self.next_frame_at = next_frame_at;
                    match result {
                        Ok(frames) => {
                            debug!(
                                session_id = %self.session_id,
                                turn,
                                kind = ?kind,
                                frames,
                                bytes = audio.len(),
                                "Audio transmitted"
                            );
                        }
                        Err(CallError::Cancelled) => break,
                        Err(e) => {
                            warn!(session_id = %self.session_id, turn, error = %e, "Outbound streaming failed");
                            let _ = self.events.send(StreamerEvent::Failed(e));
                            break;
                        }
                    }
                }
                SpeechCommand::EndOfTurn { turn, mark } => {
                    // The turn is drained once its last frame has played out
                    let played = tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => false,
                        _ = sleep_until(self.next_frame_at) => true,
                    };
                    if !played {
                        break;
                    }
                    if let Err(e) = self.send_mark(&token, mark).await {
                        if e != CallError::Cancelled {
                            let _ = self.events.send(StreamerEvent::Failed(e));
                        }
                        break;
                    }
                    let _ = self.events.send(StreamerEvent::TurnDrained { turn });
                }
            }
        }

        debug!(session_id = %self.session_id, "Outbound streamer stopped");
    }

    /// Hold until the stream token exists. `None` on cancellation or when
    /// the session dropped the token channel.
    async fn wait_for_token(&mut self) -> Option<String> {
        let current = self.token.borrow().clone();
        if let Some(token) = current {
            return Some(token);
        }

        info!(session_id = %self.session_id, "Holding outbound audio until stream token is known");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            result = self.token.wait_for(|t| t.is_some()) => {
                result.ok().and_then(|t| t.clone())
            }
        }
    }

    async fn send_mark(&self, token: &str, mark: String) -> Result<(), CallError> {
        let json = OutboundEvent::mark(token, mark)
            .to_json()
            .map_err(|e| CallError::Transport(format!("failed to encode mark: {e}")))?;
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CallError::Cancelled),
            result = self.out.send(MediaRoute::Outgoing(json)) => {
                result.map_err(|_| CallError::Transport("connection is closed".to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> StreamerSettings {
        StreamerSettings {
            frame_bytes: 1600,
            frame_duration: Duration::from_millis(100),
        }
    }

    fn frame_payload_len(route: &MediaRoute) -> Option<usize> {
        use base64::Engine;
        let MediaRoute::Outgoing(json) = route else {
            return None;
        };
        let value: serde_json::Value = serde_json::from_str(json).ok()?;
        let payload = value["media"]["payload"].as_str()?;
        base64::engine::general_purpose::STANDARD
            .decode(payload)
            .ok()
            .map(|b| b.len())
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_slices_and_paces() {
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let audio = vec![0u8; 4000];

        let started = Instant::now();
        let mut next_frame_at = started;
        let frames = transmit(&tx, &audio, "S1", settings(), &mut next_frame_at, &cancel)
            .await
            .unwrap();
        assert_eq!(frames, 3);
        // three frames: sent at 0, 100 and 200 ms
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200) && elapsed < Duration::from_millis(300));
        assert_eq!(next_frame_at - started, Duration::from_millis(300));

        let mut lengths = Vec::new();
        while let Ok(route) = rx.try_recv() {
            lengths.push(frame_payload_len(&route).unwrap());
        }
        assert_eq!(lengths, vec![1600, 1600, 800]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transmit_reports_closed_transport() {
        let (tx, rx) = mpsc::channel(16);
        drop(rx);
        let mut next_frame_at = Instant::now();
        let result = transmit(
            &tx,
            &[0u8; 3200],
            "S1",
            settings(),
            &mut next_frame_at,
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(CallError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_streamer_holds_until_token() {
        let (out_tx, mut out_rx) = mpsc::channel(16);
        let (token_tx, token_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let (queue, mut events, _handle) =
            OutboundStreamer::spawn("s".into(), settings(), out_tx, token_rx, cancel.clone());

        queue
            .audio(SpeechKind::Greeting, 0, Bytes::from(vec![0u8; 1600]))
            .unwrap();
        queue.end_of_turn(0, "greeting").unwrap();

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(out_rx.try_recv().is_err());

        token_tx.send_replace(Some("MZ1".to_string()));
        assert_eq!(
            events.recv().await,
            Some(StreamerEvent::Started {
                kind: SpeechKind::Greeting,
                turn: 0
            })
        );
        assert_eq!(events.recv().await, Some(StreamerEvent::TurnDrained { turn: 0 }));

        let MediaRoute::Outgoing(media) = out_rx.recv().await.unwrap() else {
            panic!("expected media");
        };
        assert!(media.contains(r#""streamToken":"MZ1""#));
        let MediaRoute::Outgoing(mark) = out_rx.recv().await.unwrap() else {
            panic!("expected mark");
        };
        assert!(mark.contains(r#""name":"greeting""#));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_transmit_in_queue_order() {
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (_token_tx, token_rx) = watch::channel(Some("S1".to_string()));
        let cancel = CancellationToken::new();
        let (queue, mut events, _handle) =
            OutboundStreamer::spawn("s".into(), settings(), out_tx, token_rx, cancel.clone());

        for (i, len) in [3200usize, 1600, 4800].into_iter().enumerate() {
            queue
                .audio(SpeechKind::Reply, 1, Bytes::from(vec![i as u8; len]))
                .unwrap();
        }
        queue.end_of_turn(1, "turn-1").unwrap();

        loop {
            if let Some(StreamerEvent::TurnDrained { turn }) = events.recv().await {
                assert_eq!(turn, 1);
                break;
            }
        }

        let mut lengths = Vec::new();
        while let Ok(route) = out_rx.try_recv() {
            if let Some(len) = frame_payload_len(&route) {
                lengths.push(len);
            }
        }
        assert_eq!(lengths, vec![1600, 1600, 1600, 1600, 1600, 1600]);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_carries_across_items() {
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (_token_tx, token_rx) = watch::channel(Some("S1".to_string()));
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let (queue, mut events, _handle) =
            OutboundStreamer::spawn("s".into(), settings(), out_tx, token_rx, cancel.clone());

        queue
            .audio(SpeechKind::Filler, 1, Bytes::from(vec![1u8; 1600]))
            .unwrap();
        queue
            .audio(SpeechKind::Reply, 1, Bytes::from(vec![2u8; 1600]))
            .unwrap();
        queue
            .audio(SpeechKind::Reply, 1, Bytes::from(vec![3u8; 1600]))
            .unwrap();
        queue.end_of_turn(1, "turn-1").unwrap();

        let mut frame_times = Vec::new();
        let mark_at = loop {
            let route = out_rx.recv().await.unwrap();
            let at = (Instant::now() - started).as_millis() as u64;
            match frame_payload_len(&route) {
                Some(_) => frame_times.push(at),
                None => break at,
            }
        };
        assert_eq!(frame_times, vec![0, 100, 200]);
        assert_eq!(mark_at, 300);

        let mut drained_at = None;
        while let Ok(event) = events.try_recv() {
            if event == (StreamerEvent::TurnDrained { turn: 1 }) {
                drained_at = Some((Instant::now() - started).as_millis() as u64);
            }
        }
        assert_eq!(drained_at, Some(300));
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_restarts_clock() {
        let (out_tx, mut out_rx) = mpsc::channel(64);
        let (_token_tx, token_rx) = watch::channel(Some("S1".to_string()));
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let (queue, _events, _handle) =
            OutboundStreamer::spawn("s".into(), settings(), out_tx, token_rx, cancel.clone());

        queue
            .audio(SpeechKind::Reply, 1, Bytes::from(vec![0u8; 1600]))
            .unwrap();
        out_rx.recv().await.unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        queue
            .audio(SpeechKind::Reply, 2, Bytes::from(vec![0u8; 1600]))
            .unwrap();
        out_rx.recv().await.unwrap();
        // sent immediately, not scheduled in the past and not delayed
        assert_eq!((Instant::now() - started).as_millis(), 2000);
        cancel.cancel();
    }
}
