//! Process-wide map of live sessions keyed by connection id.
//!
//! Entries are inserted by [`SessionRegistry::register`] and removed only when
//! the returned [`RegistrationGuard`] is dropped, so an entry lives exactly as
//! long as the session that owns it. Lookups hand out read-only snapshots.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::state::SessionState;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Connection {0} already has a session")]
    DuplicateConnection(String),
}

/// Registry-side view of one session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub session_id: String,
    pub connection_id: String,
    pub started_at_ms: u64,
    pub state: watch::Receiver<SessionState>,
    pub stream_token: watch::Receiver<Option<String>>,
    /// Cancels the session (server shutdown)
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub connection_id: String,
    pub state: SessionState,
    pub stream_token: Option<String>,
    pub started_at_ms: u64,
}

impl SessionHandle {
    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            connection_id: self.connection_id.clone(),
            state: *self.state.borrow(),
            stream_token: self.stream_token.borrow().clone(),
            started_at_ms: self.started_at_ms,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        self: &Arc<Self>,
        handle: SessionHandle,
    ) -> Result<RegistrationGuard, RegistryError> {
        let connection_id = handle.connection_id.clone();
        match self.sessions.entry(connection_id.clone()) {
            Entry::Occupied(_) => Err(RegistryError::DuplicateConnection(connection_id)),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                debug!(connection_id = %connection_id, "Session registered");
                Ok(RegistrationGuard {
                    registry: Arc::clone(self),
                    connection_id,
                })
            }
        }
    }

    pub fn get(&self, connection_id: &str) -> Option<SessionSnapshot> {
        self.sessions.get(connection_id).map(|h| h.snapshot())
    }

    /// Follow the state of one session until it closes.
    pub fn watch_state(&self, connection_id: &str) -> Option<watch::Receiver<SessionState>> {
        self.sessions.get(connection_id).map(|h| h.state.clone())
    }

    pub fn list(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<SessionSnapshot> =
            self.sessions.iter().map(|h| h.snapshot()).collect();
        sessions.sort_by_key(|s| s.started_at_ms);
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Ask every live session to close.
    pub fn cancel_all(&self) {
        for entry in self.sessions.iter() {
            entry.cancel.cancel();
        }
    }
}

/// Owns one registry entry; dropping it removes the entry.
#[derive(Debug)]
pub struct RegistrationGuard {
    registry: Arc<SessionRegistry>,
    connection_id: String,
}

impl RegistrationGuard {
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl Drop for RegistrationGuard {
    fn drop(&mut self) {
        self.registry.sessions.remove(&self.connection_id);
        debug!(connection_id = %self.connection_id, "Session deregistered");
    }
}
