//! Session registry trait: the core abstraction for session backends
//!
//! All session backends (in-process map, NATS key-value, etc.) implement
//! `SessionRegistry` to provide a uniform API for lifecycle transitions,
//! lookup, heartbeats, and expiry sweeps. The registry is the only writer
//! of session state.

use crate::error::Result;
use crate::types::{Session, SessionIdentity};
use async_trait::async_trait;

pub mod memory;
pub mod nats;

/// Core trait for session backends
///
/// Every operation may suspend on I/O for shared backends; callers must not
/// hold other locks across these calls.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Store a new session
    ///
    /// Fails with `DuplicateSession` if the identity is already present.
    /// Exactly one of several concurrent registrations of the same identity
    /// succeeds.
    async fn register(&self, session: Session) -> Result<()>;

    /// Look up the current record; never creates one
    async fn find_by_id(&self, identity: &SessionIdentity) -> Result<Option<Session>>;

    /// Move the session to `Connected`, returning the updated record
    ///
    /// Fails with `SessionNotFound` if the identity is unknown.
    async fn connect(&self, identity: &SessionIdentity) -> Result<Session>;

    /// Move the session to `Disconnected`, returning the updated record
    ///
    /// Fails with `SessionNotFound` if the identity is unknown.
    async fn disconnect(&self, identity: &SessionIdentity) -> Result<Session>;

    /// Refresh the heartbeat timestamp; no-op if the identity is unknown
    async fn update_heartbeat(&self, identity: &SessionIdentity) -> Result<()>;

    /// Delete a session; no-op if absent
    async fn remove(&self, identity: &SessionIdentity) -> Result<()>;

    /// Delete every session whose heartbeat is older than `timeout_secs`
    ///
    /// Returns the number of sessions removed.
    async fn remove_expired(&self, timeout_secs: u64) -> Result<usize>;

    /// Point-in-time snapshot of all sessions
    async fn sessions(&self) -> Result<Vec<Session>>;

    /// Backend status information
    async fn info(&self) -> Result<RegistryInfo>;

    /// Backend name (e.g., "memory", "nats")
    fn name(&self) -> &str;

    /// Whether the session exists and is `Connected`
    async fn is_active(&self, identity: &SessionIdentity) -> Result<bool> {
        Ok(self
            .find_by_id(identity)
            .await?
            .map(|s| s.is_active())
            .unwrap_or(false))
    }

    /// Health check: returns true if the backend is reachable
    ///
    /// Default implementation delegates to `info()`.
    async fn health(&self) -> Result<bool> {
        self.info().await.map(|_| true)
    }
}

/// Registry status information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryInfo {
    /// Backend name
    pub backend: String,
    /// Total sessions stored
    pub sessions: usize,
    /// Sessions currently in `Connected` state
    pub connected: usize,
}

impl RegistryInfo {
    /// Summarize a snapshot of sessions
    pub fn from_sessions(backend: impl Into<String>, sessions: &[Session]) -> Self {
        Self {
            backend: backend.into(),
            sessions: sessions.len(),
            connected: sessions.iter().filter(|s| s.is_active()).count(),
        }
    }
}
