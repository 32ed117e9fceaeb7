//! Utterance accumulation with energy-gated silence detection.
//!
//! The buffer does not own a timer. It exposes the instant at which silence
//! will have lasted long enough ([`UtteranceBuffer::deadline`]) and the
//! session waits on that instant alongside its other inputs. A voiced frame
//! moves the deadline forward.
//!
//! Unvoiced frames after speech are held aside and only join the utterance
//! when more speech follows, so pauses inside an utterance are kept and the
//! silence that ends it is not.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::time::Instant;

use crate::core::codec::rms_energy;

/// Result of feeding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Leading silence, not kept
    Skipped,
    /// Voiced audio, or a pause that will be kept if speech resumes
    Buffered,
    /// Accumulator reached its cap and must be flushed now
    Full,
}

#[derive(Debug)]
pub struct UtteranceBuffer {
    accumulator: BytesMut,
    /// Unvoiced frames since the last voiced one
    trailing: BytesMut,
    silence_threshold: Duration,
    energy_threshold: f32,
    max_bytes: usize,
    deadline: Option<Instant>,
}

impl UtteranceBuffer {
    /// `frames` are 16-bit mono PCM; `max_bytes` caps one utterance.
    pub fn new(silence_threshold: Duration, energy_threshold: f32, max_bytes: usize) -> Self {
        Self {
            accumulator: BytesMut::with_capacity(32 * 1024),
            trailing: BytesMut::new(),
            silence_threshold,
            energy_threshold,
            max_bytes,
            deadline: None,
        }
    }

    pub fn is_voiced(&self, frame: &[u8]) -> bool {
        self.energy_threshold <= 0.0 || rms_energy(frame) >= self.energy_threshold
    }

    pub fn ingest(&mut self, frame: &[u8]) -> IngestOutcome {
        if frame.is_empty() {
            return IngestOutcome::Skipped;
        }

        if self.is_voiced(frame) {
            self.deadline = Some(Instant::now() + self.silence_threshold);
            self.accumulator.extend_from_slice(&self.trailing);
            self.trailing.clear();
            self.accumulator.extend_from_slice(frame);
        } else if self.deadline.is_none() {
            return IngestOutcome::Skipped;
        } else {
            self.trailing.extend_from_slice(frame);
        }

        if self.max_bytes > 0 && self.accumulator.len() + self.trailing.len() >= self.max_bytes {
            IngestOutcome::Full
        } else {
            IngestOutcome::Buffered
        }
    }

    /// When silence ends the current utterance, if one is in progress.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Take the accumulated utterance and reset. Trailing silence is
    /// dropped. `None` when nothing was buffered, so a spurious silence
    /// signal produces no turn.
    pub fn flush(&mut self) -> Option<Bytes> {
        self.deadline = None;
        self.trailing.clear();
        if self.accumulator.is_empty() {
            return None;
        }
        Some(self.accumulator.split().freeze())
    }

    /// Bytes that would be handed over by [`flush`](Self::flush).
    pub fn len(&self) -> usize {
        self.accumulator.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accumulator.is_empty()
    }
}
