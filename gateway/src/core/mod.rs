pub mod call;
pub mod codec;
pub mod knowledge;
pub mod llm;
pub mod stt;
pub mod tts;

// Re-export commonly used types for convenience
pub use call::{
    CallError, CloseReason, PipelineOrchestrator, SessionConfig, SessionRegistry, SessionState,
};
pub use codec::{AudioEncoding, AudioFormat, CodecError, FrameCodec};
pub use knowledge::{KnowledgeAugmenter, KnowledgeError};
pub use llm::{LLMConfig, LLMError, Reasoner, create_reasoner};
pub use stt::{STTConfig, STTError, Transcriber, create_transcriber, get_supported_stt_providers};
pub use tts::{Synthesizer, TTSConfig, TTSError, create_synthesizer, get_supported_tts_providers};
