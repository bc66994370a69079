//! In-process session registry
//!
//! Backed by a sharded concurrent map: operations on different identities
//! contend only when they hash to the same shard, and there is no
//! registry-wide lock. Immediately consistent within the process.

use super::{RegistryInfo, SessionRegistry};
use crate::error::{RelayError, Result};
use crate::types::{expiry_threshold, Session, SessionIdentity};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Process-local session registry
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    sessions: DashMap<SessionIdentity, Session>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn update<F>(&self, identity: &SessionIdentity, apply: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut entry = self
            .sessions
            .get_mut(identity)
            .ok_or_else(|| RelayError::SessionNotFound(identity.to_string()))?;
        apply(entry.value_mut());
        Ok(entry.value().clone())
    }
}

#[async_trait]
impl SessionRegistry for MemoryRegistry {
    async fn register(&self, session: Session) -> Result<()> {
        let identity = session.identity().clone();
        match self.sessions.entry(identity.clone()) {
            Entry::Occupied(_) => Err(RelayError::DuplicateSession(identity.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(session);
                tracing::debug!(identity = %identity, "Session registered");
                Ok(())
            }
        }
    }

    async fn find_by_id(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
        Ok(self.sessions.get(identity).map(|entry| entry.value().clone()))
    }

    async fn connect(&self, identity: &SessionIdentity) -> Result<Session> {
        let session = self.update(identity, Session::connect)?;
        tracing::debug!(identity = %identity, "Session connected");
        Ok(session)
    }

    async fn disconnect(&self, identity: &SessionIdentity) -> Result<Session> {
        let session = self.update(identity, Session::disconnect)?;
        tracing::debug!(identity = %identity, "Session disconnected");
        Ok(session)
    }

    async fn update_heartbeat(&self, identity: &SessionIdentity) -> Result<()> {
        if let Some(mut entry) = self.sessions.get_mut(identity) {
            entry.value_mut().touch();
            tracing::debug!(identity = %identity, "Heartbeat updated");
        }
        Ok(())
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<()> {
        if self.sessions.remove(identity).is_some() {
            tracing::debug!(identity = %identity, "Session removed");
        }
        Ok(())
    }

    async fn remove_expired(&self, timeout_secs: u64) -> Result<usize> {
        let threshold = expiry_threshold(timeout_secs);

        // Snapshot keys first so the sweep never holds a shard lock while
        // walking the whole map; each removal re-checks under its own lock.
        let identities: Vec<SessionIdentity> = self
            .sessions
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for identity in identities {
            if self
                .sessions
                .remove_if(&identity, |_, session| session.is_stale(threshold))
                .is_some()
            {
                removed += 1;
                tracing::debug!(identity = %identity, "Expired session removed");
            }
        }

        if removed > 0 {
            tracing::info!(removed, timeout_secs, "Removed expired sessions");
        }

        Ok(removed)
    }

    async fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .sessions
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn info(&self) -> Result<RegistryInfo> {
        let sessions = self.sessions().await?;
        Ok(RegistryInfo::from_sessions(self.name(), &sessions))
    }

    fn name(&self) -> &str {
        "memory"
    }
}
