//! Shared application state
//!
//! Built once at startup: provider collaborators, the session registry, the
//! call-record store and the connection counters used by the
//! connection-limit middleware.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::ServerConfig;
use crate::core::call::{
    CallRecordStore, Collaborators, HttpCallRecordStore, PipelineOrchestrator, RecordError,
    SessionRegistry, SessionServices, StaticCallRecordStore,
};
use crate::core::knowledge::{HttpRetriever, KnowledgeAugmenter, KnowledgeError, OpenAIEmbedder};
use crate::core::llm::{LLMError, create_reasoner};
use crate::core::stt::{STTError, create_transcriber};
use crate::core::tts::{TTSError, create_synthesizer};

/// Failure to assemble the application state at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Transcriber setup failed: {0}")]
    Transcription(#[from] STTError),
    #[error("Reasoner setup failed: {0}")]
    Reasoning(#[from] LLMError),
    #[error("Synthesizer setup failed: {0}")]
    Synthesis(#[from] TTSError),
    #[error("Knowledge setup failed: {0}")]
    Knowledge(#[from] KnowledgeError),
    #[error("Call record store setup failed: {0}")]
    Records(#[from] RecordError),
}

/// Why a new media-stream connection was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

pub struct AppState {
    pub config: ServerConfig,
    pub registry: Arc<SessionRegistry>,
    pub services: SessionServices,
    /// Cancelled on graceful shutdown; every session holds a child token
    pub shutdown: CancellationToken,
    active_connections: AtomicUsize,
    connections_per_ip: DashMap<IpAddr, u32>,
}

impl AppState {
    /// Build the state with provider collaborators created from `config`.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, StartupError> {
        let collaborators = build_collaborators(&config)?;

        let records: Arc<dyn CallRecordStore> = match &config.records.url {
            Some(url) => {
                info!(url = %url, "Using HTTP call record store");
                Arc::new(HttpCallRecordStore::new(url, config.records.api_key.clone())?)
            }
            None => {
                info!("No call record service configured, using in-memory store");
                Arc::new(StaticCallRecordStore::new())
            }
        };

        Ok(Self::with_collaborators(config, collaborators, records))
    }

    /// Build the state around already constructed collaborators.
    pub fn with_collaborators(
        config: ServerConfig,
        collaborators: Collaborators,
        records: Arc<dyn CallRecordStore>,
    ) -> Arc<Self> {
        let registry = Arc::new(SessionRegistry::new());
        let pipeline = Arc::new(PipelineOrchestrator::new(
            collaborators,
            config.pipeline_settings(),
        ));

        let services = SessionServices {
            pipeline,
            records,
            registry: registry.clone(),
            defaults: Arc::new(config.session.clone()),
            handshake_timeout: config.handshake_timeout(),
        };

        Arc::new(Self {
            config,
            registry,
            services,
            shutdown: CancellationToken::new(),
            active_connections: AtomicUsize::new(0),
            connections_per_ip: DashMap::new(),
        })
    }

    /// Reserve a connection slot for `ip`.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        let max_per_ip = self.config.max_calls_per_ip;

        // Per-IP slot first; the entry lock serializes racing upgrades from one address
        {
            let mut count = self.connections_per_ip.entry(ip).or_insert(0);
            if *count >= max_per_ip {
                return Err(ConnectionLimitError::PerIpLimitReached);
            }
            *count += 1;
        }

        if let Some(max) = self.config.max_concurrent_calls {
            let acquired = self
                .active_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                })
                .is_ok();
            if !acquired {
                self.release_ip(ip);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.active_connections.fetch_add(1, Ordering::AcqRel);
        }

        Ok(())
    }

    /// Return a slot taken by [`try_acquire_connection`](Self::try_acquire_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        self.release_ip(ip);
        let _ = self
            .active_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
    }

    fn release_ip(&self, ip: IpAddr) {
        self.connections_per_ip
            .remove_if_mut(&ip, |_, count| {
                *count = count.saturating_sub(1);
                *count == 0
            });
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn connections_for_ip(&self, ip: IpAddr) -> u32 {
        self.connections_per_ip.get(&ip).map(|c| *c).unwrap_or(0)
    }
}

fn build_collaborators(config: &ServerConfig) -> Result<Collaborators, StartupError> {
    let pipeline = &config.pipeline;

    let transcriber = create_transcriber(
        &pipeline.stt_provider,
        config
            .stt_config(&pipeline.stt_provider)
            .map_err(StartupError::Configuration)?,
    )?;

    let secondary_transcriber = match &pipeline.stt_secondary_provider {
        Some(provider) => Some(create_transcriber(
            provider,
            config
                .stt_config(provider)
                .map_err(StartupError::Configuration)?,
        )?),
        None => None,
    };

    let reasoner = create_reasoner(
        &pipeline.llm_provider,
        config.llm_config().map_err(StartupError::Configuration)?,
    )?;

    let synthesizer = create_synthesizer(
        &pipeline.tts_provider,
        config.tts_config().map_err(StartupError::Configuration)?,
    )?;

    let knowledge = match &config.knowledge.url {
        Some(url) => {
            let api_key = config
                .get_api_key("openai")
                .map_err(StartupError::Configuration)?;
            let embedder = OpenAIEmbedder::new(
                api_key,
                config.openai_base_url.as_deref(),
                config.knowledge.embedding_model.as_deref(),
            )?;
            let retriever = HttpRetriever::new(url, config.knowledge.api_key.clone())?;
            info!(url = %url, "Knowledge augmentation enabled");
            Some(Arc::new(KnowledgeAugmenter::new(
                Arc::new(embedder),
                Arc::new(retriever),
                config.retrieval_settings(),
            )))
        }
        None => None,
    };

    info!(
        stt = %pipeline.stt_provider,
        stt_secondary = ?pipeline.stt_secondary_provider,
        llm = %pipeline.llm_provider,
        tts = %pipeline.tts_provider,
        streaming = pipeline.streaming,
        "Pipeline collaborators ready"
    );

    Ok(Collaborators {
        transcriber,
        secondary_transcriber,
        reasoner,
        synthesizer,
        knowledge,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn test_config() -> ServerConfig {
        let mut config = ServerConfig::default();
        config.openai_api_key = Some("sk-test".to_string());
        config
    }

    #[test]
    fn test_new_builds_collaborators() {
        let state = AppState::new(test_config()).unwrap();
        assert!(state.registry.is_empty());
        assert_eq!(state.active_connections(), 0);
    }

    #[test]
    fn test_new_requires_provider_keys() {
        let result = AppState::new(ServerConfig::default());
        assert!(matches!(result, Err(StartupError::Configuration(_))));
    }

    #[test]
    fn test_per_ip_limit() {
        let mut config = test_config();
        config.max_calls_per_ip = 2;
        let state = AppState::new(config).unwrap();
        let ip = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(state.try_acquire_connection(ip).is_ok());
        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        assert!(state.try_acquire_connection(other).is_ok());

        state.release_connection(ip);
        assert_eq!(state.connections_for_ip(ip), 1);
        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(state.active_connections(), 3);
    }

    #[test]
    fn test_global_limit_rolls_back_ip_slot() {
        let mut config = test_config();
        config.max_concurrent_calls = Some(1);
        let state = AppState::new(config).unwrap();
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

        assert!(state.try_acquire_connection(a).is_ok());
        assert_eq!(
            state.try_acquire_connection(b),
            Err(ConnectionLimitError::GlobalLimitReached)
        );
        assert_eq!(state.connections_for_ip(b), 0);

        state.release_connection(a);
        assert_eq!(state.active_connections(), 0);
        assert_eq!(state.connections_for_ip(a), 0);
        assert!(state.try_acquire_connection(b).is_ok());
    }
}
