//! Turn pipeline: transcribe, augment, reason, synthesize.
//!
//! Stages run strictly in sequence for one turn. Reply audio is handed to the
//! session's [`SpeechQueue`] sentence by sentence, in order, so the first
//! sentence can play while later ones are still being reasoned or
//! synthesized.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

use super::config::SessionConfig;
use super::error::CallError;
use super::streamer::{SpeechKind, SpeechQueue};
use crate::core::codec::transcode;
use crate::core::knowledge::KnowledgeAugmenter;
use crate::core::llm::{
    ChatMessage, LLMError, Reasoner, ReasoningRequest, SentenceBoundaryDetector, split_sentences,
};
use crate::core::stt::{STTError, Transcriber, Transcript};
use crate::core::tts::{Synthesizer, TTSError};

/// External services one turn depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub transcriber: Arc<dyn Transcriber>,
    /// Tried once when the primary errors, times out or hears nothing
    pub secondary_transcriber: Option<Arc<dyn Transcriber>>,
    pub reasoner: Arc<dyn Reasoner>,
    pub synthesizer: Arc<dyn Synthesizer>,
    pub knowledge: Option<Arc<KnowledgeAugmenter>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    pub transcription_timeout: Duration,
    pub augmentation_timeout: Duration,
    /// Whole reply when blocking; time between fragments when streaming
    pub reasoning_timeout: Duration,
    /// Per sentence
    pub synthesis_timeout: Duration,
    /// Use token streaming from the reasoner
    pub streaming: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            transcription_timeout: Duration::from_secs(10),
            augmentation_timeout: Duration::from_secs(3),
            reasoning_timeout: Duration::from_secs(15),
            synthesis_timeout: Duration::from_secs(10),
            streaming: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub transcript: Transcript,
    pub reply_text: String,
    /// Wire-encoded audio per sentence, in the order it was queued
    pub reply_audio: Vec<Bytes>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Replied(TurnReply),
    /// Every transcriber returned an empty transcript
    NoSpeech,
}

pub struct PipelineOrchestrator {
    collaborators: Collaborators,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings) -> Self {
        Self {
            collaborators,
            settings,
        }
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run one turn. `utterance` is 16-bit mono PCM at the wire sample rate;
    /// `history` is a snapshot of prior turns.
    pub async fn run_turn(
        &self,
        turn: u64,
        utterance: Bytes,
        history: Vec<ChatMessage>,
        config: &SessionConfig,
        speech: &SpeechQueue,
    ) -> Result<TurnOutcome, CallError> {
        let started = Instant::now();

        let Some(transcript) = self.transcribe(turn, utterance, config).await? else {
            info!(turn, "No speech recognized in utterance");
            return Ok(TurnOutcome::NoSpeech);
        };
        info!(
            turn,
            transcript = %transcript.text,
            confidence = transcript.confidence,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Transcription complete"
        );

        let context = self.augment(turn, &transcript.text, config).await;

        let request = ReasoningRequest {
            system_prompt: config.system_prompt.clone(),
            history,
            user_text: transcript.text.clone(),
            context,
            model: config.llm_model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };

        let (reply_text, reply_audio) = if self.settings.streaming {
            self.reason_streaming(turn, &request, config, speech).await?
        } else {
            self.reason_blocking(turn, &request, config, speech).await?
        };

        info!(
            turn,
            sentences = reply_audio.len(),
            total_ms = started.elapsed().as_millis() as u64,
            "Turn complete"
        );

        Ok(TurnOutcome::Replied(TurnReply {
            transcript,
            reply_text,
            reply_audio,
        }))
    }

    /// Synthesize `text` and convert it to the session's wire format.
    pub async fn speak_text(&self, text: &str, config: &SessionConfig) -> Result<Bytes, CallError> {
        let limit = self.settings.synthesis_timeout;
        let audio = timeout(
            limit,
            self.collaborators.synthesizer.synthesize(text, &config.voice),
        )
        .await
        .map_err(|_| TTSError::Timeout(limit.as_millis() as u64))??;

        Ok(transcode(&audio.data, audio.format, config.wire_format)?)
    }

    /// Primary first; the secondary gets one attempt after an error, timeout
    /// or empty result. `Ok(None)` when nothing was heard, `Err` only when
    /// every attempt failed.
    async fn transcribe(
        &self,
        turn: u64,
        utterance: Bytes,
        config: &SessionConfig,
    ) -> Result<Option<Transcript>, CallError> {
        let sample_rate = config.wire_format.sample_rate;
        let primary = self.collaborators.transcriber.as_ref();

        let mut heard_nothing = false;
        let mut last_error = None;

        match self.transcribe_with(primary, utterance.clone(), sample_rate).await {
            Ok(transcript) if !transcript.is_empty() => return Ok(Some(transcript)),
            Ok(_) => heard_nothing = true,
            Err(e) => {
                warn!(turn, provider = primary.name(), error = %e, "Primary transcription failed");
                last_error = Some(e);
            }
        }

        let Some(secondary) = self.collaborators.secondary_transcriber.as_deref() else {
            return match last_error {
                Some(e) => Err(e.into()),
                None => Ok(None),
            };
        };

        debug!(turn, provider = secondary.name(), "Retrying with secondary transcriber");
        match self.transcribe_with(secondary, utterance, sample_rate).await {
            Ok(transcript) if !transcript.is_empty() => Ok(Some(transcript)),
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(turn, provider = secondary.name(), error = %e, "Secondary transcription failed");
                if heard_nothing { Ok(None) } else { Err(e.into()) }
            }
        }
    }

    async fn transcribe_with(
        &self,
        transcriber: &dyn Transcriber,
        audio: Bytes,
        sample_rate: u32,
    ) -> Result<Transcript, STTError> {
        let limit = self.settings.transcription_timeout;
        timeout(limit, transcriber.transcribe(audio, sample_rate))
            .await
            .map_err(|_| STTError::Timeout(limit.as_millis() as u64))?
    }

    /// Failures here never fail the turn.
    async fn augment(&self, turn: u64, text: &str, config: &SessionConfig) -> Option<String> {
        let knowledge = self.collaborators.knowledge.as_ref()?;
        match timeout(
            self.settings.augmentation_timeout,
            knowledge.augment(text, &config.knowledge_filters),
        )
        .await
        {
            Ok(Ok(context)) => context,
            Ok(Err(e)) => {
                warn!(turn, error = %e, "Knowledge augmentation failed, continuing without context");
                None
            }
            Err(_) => {
                warn!(turn, "Knowledge augmentation timed out, continuing without context");
                None
            }
        }
    }

    async fn reason_blocking(
        &self,
        turn: u64,
        request: &ReasoningRequest,
        config: &SessionConfig,
        speech: &SpeechQueue,
    ) -> Result<(String, Vec<Bytes>), CallError> {
        let limit = self.settings.reasoning_timeout;
        let reply = timeout(limit, self.collaborators.reasoner.converse(request))
            .await
            .map_err(|_| LLMError::Timeout(limit.as_millis() as u64))??;

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(LLMError::EmptyReply.into());
        }

        let mut audio = Vec::new();
        for sentence in split_sentences(&reply) {
            let clip = self.speak_text(&sentence, config).await?;
            speech.audio(SpeechKind::Reply, turn, clip.clone())?;
            audio.push(clip);
        }
        Ok((reply, audio))
    }

    /// Producer: reasoner fragments through the sentence detector.
    /// Consumer: synthesize and queue each sentence as it completes.
    async fn reason_streaming(
        &self,
        turn: u64,
        request: &ReasoningRequest,
        config: &SessionConfig,
        speech: &SpeechQueue,
    ) -> Result<(String, Vec<Bytes>), CallError> {
        let limit = self.settings.reasoning_timeout;
        let reasoner = self.collaborators.reasoner.as_ref();
        let (sentence_tx, mut sentence_rx) = mpsc::unbounded_channel::<String>();

        let producer = async move {
            let mut fragments = timeout(limit, reasoner.converse_stream(request))
                .await
                .map_err(|_| LLMError::Timeout(limit.as_millis() as u64))??;

            let mut detector = SentenceBoundaryDetector::new();
            let mut full = String::new();

            loop {
                let next = timeout(limit, fragments.next())
                    .await
                    .map_err(|_| LLMError::Timeout(limit.as_millis() as u64))?;
                let Some(fragment) = next else { break };
                let fragment = fragment?;
                full.push_str(&fragment);

                for sentence in detector.push(&fragment) {
                    debug!(turn, sentence = %sentence, "Sentence ready");
                    if sentence_tx.send(sentence).is_err() {
                        // consumer gave up; its error wins
                        return Ok(full);
                    }
                }
            }

            if let Some(last) = detector.finish() {
                let _ = sentence_tx.send(last);
            }
            Ok::<String, CallError>(full)
        };

        let consumer = async move {
            let mut audio = Vec::new();
            while let Some(sentence) = sentence_rx.recv().await {
                let clip = self.speak_text(&sentence, config).await?;
                speech.audio(SpeechKind::Reply, turn, clip.clone())?;
                audio.push(clip);
            }
            Ok::<Vec<Bytes>, CallError>(audio)
        };

        let (produced, consumed) = tokio::join!(producer, consumer);
        let audio = consumed?;
        let reply = produced?.trim().to_string();

        if reply.is_empty() {
            return Err(LLMError::EmptyReply.into());
        }
        Ok((reply, audio))
    }
}
