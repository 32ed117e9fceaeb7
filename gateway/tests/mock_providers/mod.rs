//! Mock collaborators for session and server tests
//!
//! Deterministic stand-ins for the transcription, reasoning and synthesis
//! providers. Each mock records what it was asked to do so tests can assert
//! on call counts, payload sizes and concurrency.

// Not every test binary uses every helper
#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream;
use parking_lot::Mutex;

use callbridge_gateway::core::call::{
    CallRecordStore, Collaborators, PipelineOrchestrator, PipelineSettings, SessionConfig,
    SessionRegistry, SessionServices,
};
use callbridge_gateway::core::codec::AudioFormat;
use callbridge_gateway::core::knowledge::{
    Embedder, KnowledgeAugmenter, KnowledgeError, KnowledgeRetriever, Passage, RetrievalSettings,
    SearchFilters,
};
use callbridge_gateway::core::llm::{LLMError, Reasoner, ReasoningRequest, TextStream};
use callbridge_gateway::core::stt::{STTError, Transcriber, Transcript};
use callbridge_gateway::core::tts::{
    SynthesizedAudio, Synthesizer, TTSError, TTSResult, VoiceConfig,
};

use crate::fixtures::{SAMPLE_RATE, synthetic_speech};

// =============================================================================
// Transcription
// =============================================================================

pub struct MockTranscriber {
    name: String,
    text: Mutex<String>,
    delay: Duration,
    failure: Option<STTError>,
    calls: Mutex<Vec<usize>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    completed: AtomicUsize,
}

/// Keeps `active` accurate when a call is cancelled mid-flight.
struct ActiveCall<'a>(&'a AtomicUsize);

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockTranscriber {
    pub fn new(text: &str) -> Self {
        Self {
            name: "mock-stt".to_string(),
            text: Mutex::new(text.to_string()),
            delay: Duration::ZERO,
            failure: None,
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        }
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, error: STTError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn set_text(&self, text: &str) {
        *self.text.lock() = text.to_string();
    }

    /// Byte length of every utterance received, in call order.
    pub fn calls(&self) -> Vec<usize> {
        self.calls.lock().clone()
    }

    /// Calls that ran to completion (not cancelled).
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    fn name(&self) -> &str {
        &self.name
    }

    async fn transcribe(&self, audio: Bytes, _sample_rate: u32) -> Result<Transcript, STTError> {
        self.calls.lock().push(audio.len());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _active = ActiveCall(&self.active);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);

        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(Transcript::new(self.text.lock().clone(), 0.95)),
        }
    }
}

// =============================================================================
// Reasoning
// =============================================================================

pub struct MockReasoner {
    reply: String,
    fragments: Option<Vec<String>>,
    fragment_delay: Duration,
    failure: Option<LLMError>,
    /// Ends the fragment stream with this error
    stream_failure: Option<LLMError>,
    requests: Mutex<Vec<ReasoningRequest>>,
}

impl MockReasoner {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            fragments: None,
            fragment_delay: Duration::ZERO,
            failure: None,
            stream_failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Stream the reply as these fragments, `delay` apart.
    pub fn streaming(fragments: &[&str], delay: Duration) -> Self {
        let mut reasoner = Self::new(&fragments.concat());
        reasoner.fragments = Some(fragments.iter().map(|f| f.to_string()).collect());
        reasoner.fragment_delay = delay;
        reasoner
    }

    /// Stream `fragments`, then fail the stream with `error`.
    pub fn failing_after(fragments: &[&str], delay: Duration, error: LLMError) -> Self {
        let mut reasoner = Self::streaming(fragments, delay);
        reasoner.stream_failure = Some(error);
        reasoner
    }

    pub fn failing(error: LLMError) -> Self {
        let mut reasoner = Self::new("");
        reasoner.failure = Some(error);
        reasoner
    }

    pub fn requests(&self) -> Vec<ReasoningRequest> {
        self.requests.lock().clone()
    }

    fn record(&self, request: &ReasoningRequest) -> Result<(), LLMError> {
        self.requests.lock().push(request.clone());
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Reasoner for MockReasoner {
    fn name(&self) -> &str {
        "mock-llm"
    }

    async fn converse(&self, request: &ReasoningRequest) -> Result<String, LLMError> {
        self.record(request)?;
        Ok(self.reply.clone())
    }

    async fn converse_stream(&self, request: &ReasoningRequest) -> Result<TextStream, LLMError> {
        self.record(request)?;
        let mut items: Vec<Result<String, LLMError>> = self
            .fragments
            .clone()
            .unwrap_or_else(|| vec![self.reply.clone()])
            .into_iter()
            .map(Ok)
            .collect();
        if let Some(error) = &self.stream_failure {
            items.push(Err(error.clone()));
        }
        let delay = self.fragment_delay;
        Ok(stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}

// =============================================================================
// Synthesis
// =============================================================================

/// Produces [`synthetic_speech`] at the telephony rate, so clips pass through
/// the codec untouched and their length identifies the text.
pub struct MockSynthesizer {
    delay: Duration,
    texts: Mutex<Vec<String>>,
    /// Text whose first synthesis fails and later ones take the given time
    flaky: Option<(String, Duration)>,
    flaky_failed: Mutex<bool>,
}

impl MockSynthesizer {
    pub fn new() -> Self {
        Self {
            delay: Duration::ZERO,
            texts: Mutex::new(Vec::new()),
            flaky: None,
            flaky_failed: Mutex::new(false),
        }
    }

    /// Fail the first synthesis of `text`; answer later ones after `delay`.
    pub fn flaky(mut self, text: &str, delay: Duration) -> Self {
        self.flaky = Some((text.to_string(), delay));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().clone()
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    fn name(&self) -> &str {
        "mock-tts"
    }

    async fn synthesize(&self, text: &str, _voice: &VoiceConfig) -> TTSResult<SynthesizedAudio> {
        self.texts.lock().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some((flaky_text, delay)) = &self.flaky
            && flaky_text == text
        {
            let first = !std::mem::replace(&mut *self.flaky_failed.lock(), true);
            if first {
                return Err(TTSError::ProviderError("voice not loaded".to_string()));
            }
            tokio::time::sleep(*delay).await;
        }
        Ok(SynthesizedAudio {
            data: Bytes::from(synthetic_speech(text)),
            format: AudioFormat::linear16(SAMPLE_RATE),
        })
    }
}

// =============================================================================
// Knowledge
// =============================================================================

struct MockEmbedder;

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, KnowledgeError> {
        Ok(vec![0.1, 0.2, 0.3])
    }
}

pub struct MockRetriever {
    passages: Vec<Passage>,
    delay: Duration,
    failure: Option<KnowledgeError>,
    searches: AtomicUsize,
}

impl MockRetriever {
    pub fn new(passages: &[(&str, f32)]) -> Self {
        Self {
            passages: passages
                .iter()
                .map(|(text, score)| Passage {
                    text: text.to_string(),
                    score: *score,
                    source: "kb".to_string(),
                })
                .collect(),
            delay: Duration::ZERO,
            failure: None,
            searches: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing(mut self, error: KnowledgeError) -> Self {
        self.failure = Some(error);
        self
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeRetriever for MockRetriever {
    async fn search(
        &self,
        _query_embedding: &[f32],
        top_k: usize,
        _min_score: f32,
        _filters: &SearchFilters,
    ) -> Result<Vec<Passage>, KnowledgeError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(error) => Err(error.clone()),
            None => Ok(self.passages.iter().take(top_k).cloned().collect()),
        }
    }
}

// =============================================================================
// Wiring
// =============================================================================

/// One set of mocks plus the handles tests inspect.
pub struct MockStack {
    pub transcriber: Arc<MockTranscriber>,
    pub secondary: Option<Arc<MockTranscriber>>,
    pub reasoner: Arc<MockReasoner>,
    pub synthesizer: Arc<MockSynthesizer>,
    pub retriever: Option<Arc<MockRetriever>>,
}

impl MockStack {
    pub fn new(transcriber: MockTranscriber, reasoner: MockReasoner) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            secondary: None,
            reasoner: Arc::new(reasoner),
            synthesizer: Arc::new(MockSynthesizer::new()),
            retriever: None,
        }
    }

    pub fn with_synthesizer(mut self, synthesizer: MockSynthesizer) -> Self {
        self.synthesizer = Arc::new(synthesizer);
        self
    }

    pub fn with_retriever(mut self, retriever: MockRetriever) -> Self {
        self.retriever = Some(Arc::new(retriever));
        self
    }

    pub fn with_secondary(mut self, secondary: MockTranscriber) -> Self {
        self.secondary = Some(Arc::new(secondary));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            transcriber: self.transcriber.clone(),
            secondary_transcriber: self
                .secondary
                .clone()
                .map(|s| s as Arc<dyn Transcriber>),
            reasoner: self.reasoner.clone(),
            synthesizer: self.synthesizer.clone(),
            knowledge: self.retriever.clone().map(|retriever| {
                Arc::new(KnowledgeAugmenter::new(
                    Arc::new(MockEmbedder),
                    retriever,
                    RetrievalSettings::default(),
                ))
            }),
        }
    }
}

/// Short, distinct phrases so each clip is a single outbound frame whose
/// length identifies it.
pub fn test_session_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.greeting = "Hi there.".to_string();
    config.filler_phrase = "Hmm.".to_string();
    config.apology_phrase = "Sorry, say again?".to_string();
    config.closing_phrase = "We will call you back.".to_string();
    config
}

pub fn test_pipeline_settings() -> PipelineSettings {
    PipelineSettings {
        transcription_timeout: Duration::from_secs(5),
        augmentation_timeout: Duration::from_secs(1),
        reasoning_timeout: Duration::from_secs(5),
        synthesis_timeout: Duration::from_secs(5),
        streaming: true,
    }
}

pub fn build_services(
    stack: &MockStack,
    settings: PipelineSettings,
    defaults: SessionConfig,
    records: Arc<dyn CallRecordStore>,
) -> SessionServices {
    SessionServices {
        pipeline: Arc::new(PipelineOrchestrator::new(stack.collaborators(), settings)),
        records,
        registry: Arc::new(SessionRegistry::new()),
        defaults: Arc::new(defaults),
        handshake_timeout: Duration::from_secs(2),
    }
}
