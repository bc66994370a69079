//! NATS JetStream key-value session registry
//!
//! Implements `SessionRegistry` on a JetStream key-value bucket so several
//! relay processes can share one view of session state. Records carry a
//! bucket-level max age, so orphaned sessions disappear on their own even
//! if no sweep ever runs. Registration relies on the server's atomic
//! create; updates are compare-and-set on the entry revision.

mod client;
mod config;

pub use client::{KvRecord, NatsKvClient, WriteOutcome};
pub use config::{NatsRegistryConfig, StorageType};

use crate::error::{RelayError, Result};
use crate::registry::{RegistryInfo, SessionRegistry};
use crate::types::{expiry_threshold, Session, SessionIdentity};
use async_trait::async_trait;
use bytes::Bytes;

/// NATS-backed session registry
///
/// Wraps `NatsKvClient` and implements the `SessionRegistry` trait.
pub struct NatsRegistry {
    client: NatsKvClient,
}

impl NatsRegistry {
    /// Connect to NATS and open the session bucket
    pub async fn connect(config: NatsRegistryConfig) -> Result<Self> {
        let client = NatsKvClient::connect(config).await?;
        Ok(Self { client })
    }

    /// Get the underlying key-value client for advanced usage
    pub fn client(&self) -> &NatsKvClient {
        &self.client
    }

    fn key(&self, identity: &SessionIdentity) -> String {
        self.client.config().key_for(identity)
    }

    /// Read-modify-write one session with optimistic concurrency
    ///
    /// Returns `None` if the session does not exist. Every successful write
    /// resets the entry age, which refreshes the record TTL.
    async fn modify<F>(&self, identity: &SessionIdentity, apply: F) -> Result<Option<Session>>
    where
        F: Fn(&mut Session) + Send + Sync,
    {
        let key = self.key(identity);
        let attempts = self.client.config().max_update_attempts;

        for attempt in 1..=attempts {
            let Some(record) = self.client.entry(&key).await? else {
                return Ok(None);
            };

            let mut session = decode(&record)?;
            apply(&mut session);

            match self.client.update(&key, encode(&session)?, record.revision).await? {
                WriteOutcome::Written(_) => return Ok(Some(session)),
                WriteOutcome::Conflict => {
                    tracing::debug!(identity = %identity, attempt, "Session changed concurrently, retrying");
                }
            }
        }

        Err(RelayError::RegistryUnavailable(format!(
            "Session '{}' still contended after {} update attempts",
            identity, attempts
        )))
    }

    async fn load_all(&self) -> Result<Vec<(KvRecord, Session)>> {
        let mut records = Vec::new();
        for key in self.client.keys().await? {
            if self.client.config().identity_from_key(&key).is_none() {
                continue;
            }
            // A key listed by the cursor may be gone by the time we read it
            let Some(record) = self.client.entry(&key).await? else {
                continue;
            };
            match decode(&record) {
                Ok(session) => records.push((record, session)),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Skipping undecodable session record");
                }
            }
        }
        Ok(records)
    }
}

fn encode(session: &Session) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(session)?))
}

fn decode(record: &KvRecord) -> Result<Session> {
    Ok(serde_json::from_slice(&record.value)?)
}

#[async_trait]
impl SessionRegistry for NatsRegistry {
    async fn register(&self, session: Session) -> Result<()> {
        let key = self.key(session.identity());
        match self.client.create(&key, encode(&session)?).await? {
            WriteOutcome::Written(revision) => {
                tracing::debug!(identity = %session.identity(), revision, "Session registered in NATS");
                Ok(())
            }
            WriteOutcome::Conflict => Err(RelayError::DuplicateSession(
                session.identity().to_string(),
            )),
        }
    }

    async fn find_by_id(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
        match self.client.entry(&self.key(identity)).await? {
            Some(record) => Ok(Some(decode(&record)?)),
            None => Ok(None),
        }
    }

    async fn connect(&self, identity: &SessionIdentity) -> Result<Session> {
        let session = self
            .modify(identity, Session::connect)
            .await?
            .ok_or_else(|| RelayError::SessionNotFound(identity.to_string()))?;
        tracing::debug!(identity = %identity, "Session connected in NATS");
        Ok(session)
    }

    async fn disconnect(&self, identity: &SessionIdentity) -> Result<Session> {
        let session = self
            .modify(identity, Session::disconnect)
            .await?
            .ok_or_else(|| RelayError::SessionNotFound(identity.to_string()))?;
        tracing::debug!(identity = %identity, "Session disconnected in NATS");
        Ok(session)
    }

    async fn update_heartbeat(&self, identity: &SessionIdentity) -> Result<()> {
        if self.modify(identity, Session::touch).await?.is_some() {
            tracing::debug!(identity = %identity, "Heartbeat updated in NATS");
        }
        Ok(())
    }

    async fn remove(&self, identity: &SessionIdentity) -> Result<()> {
        let key = self.key(identity);
        if self.client.entry(&key).await?.is_some() {
            self.client.delete(&key).await?;
            tracing::debug!(identity = %identity, "Session removed from NATS");
        }
        Ok(())
    }

    async fn remove_expired(&self, timeout_secs: u64) -> Result<usize> {
        let threshold = expiry_threshold(timeout_secs);
        let mut removed = 0;

        for (record, session) in self.load_all().await? {
            if !session.is_stale(threshold) {
                continue;
            }
            // Only delete the revision we judged stale; a heartbeat that
            // landed after the read wins and the record is kept.
            match self
                .client
                .delete_if_unchanged(&record.key, record.revision)
                .await?
            {
                WriteOutcome::Written(_) => {
                    removed += 1;
                    tracing::debug!(identity = %session.identity(), "Expired session removed from NATS");
                }
                WriteOutcome::Conflict => {
                    tracing::debug!(identity = %session.identity(), "Session refreshed during sweep, keeping");
                }
            }
        }

        if removed > 0 {
            tracing::info!(removed, timeout_secs, "Removed expired sessions from NATS");
        }

        Ok(removed)
    }

    async fn sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .load_all()
            .await?
            .into_iter()
            .map(|(_, session)| session)
            .collect())
    }

    async fn info(&self) -> Result<RegistryInfo> {
        let sessions = self.sessions().await?;
        Ok(RegistryInfo::from_sessions(self.name(), &sessions))
    }

    fn name(&self) -> &str {
        "nats"
    }
}
