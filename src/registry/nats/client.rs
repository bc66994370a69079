//! NATS JetStream key-value client: connect, create, compare-and-set, scan

use super::config::{NatsRegistryConfig, StorageType};
use crate::error::{RelayError, Result};
use async_nats::jetstream::{self, kv};
use bytes::Bytes;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// A live (non-tombstone) bucket entry
#[derive(Debug, Clone)]
pub struct KvRecord {
    pub key: String,
    pub value: Bytes,
    pub revision: u64,
}

/// Outcome of a conditional write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Write applied; carries the new revision
    Written(u64),
    /// Another writer got there first
    Conflict,
}

/// NATS key-value client
///
/// Low-level client for the session bucket. Every call is bounded by the
/// configured operation timeout; a timeout is reported as
/// `RegistryUnavailable`, never as a missing key.
pub struct NatsKvClient {
    /// NATS client connection
    client: async_nats::Client,

    /// Key-value bucket handle
    store: kv::Store,

    /// Configuration
    config: Arc<NatsRegistryConfig>,
}

impl NatsKvClient {
    /// Connect to NATS and open (or create) the session bucket
    pub async fn connect(config: NatsRegistryConfig) -> Result<Self> {
        config.validate()?;

        let connect_opts = build_connect_options(&config);
        let client = connect_opts
            .connect(&config.url)
            .await
            .map_err(|e| RelayError::Connection(format!("{}: {}", config.url, e)))?;

        tracing::info!(url = %config.url, "Connected to NATS");

        let jetstream = jetstream::new(client.clone());
        let store = ensure_bucket(&jetstream, &config).await?;

        Ok(Self {
            client,
            store,
            config: Arc::new(config),
        })
    }

    /// Create a key only if it does not exist yet
    ///
    /// Returns `Conflict` when a live entry already holds the key.
    pub async fn create(&self, key: &str, value: Bytes) -> Result<WriteOutcome> {
        match self.timed("create", self.store.create(key, value)).await? {
            Ok(revision) => Ok(WriteOutcome::Written(revision)),
            Err(e) if e.kind() == kv::CreateErrorKind::AlreadyExists => Ok(WriteOutcome::Conflict),
            Err(e) => Err(unavailable("create", key, e)),
        }
    }

    /// Read the live entry for a key
    pub async fn entry(&self, key: &str) -> Result<Option<KvRecord>> {
        let entry = self
            .timed("entry", self.store.entry(key))
            .await?
            .map_err(|e| unavailable("entry", key, e))?;

        Ok(entry.and_then(|entry| match entry.operation {
            kv::Operation::Put => Some(KvRecord {
                key: entry.key,
                value: entry.value,
                revision: entry.revision,
            }),
            _ => None,
        }))
    }

    /// Overwrite a key if its revision is still `revision`
    ///
    /// A successful write resets the entry age, refreshing its TTL.
    pub async fn update(&self, key: &str, value: Bytes, revision: u64) -> Result<WriteOutcome> {
        match self
            .timed("update", self.store.update(key, value, revision))
            .await?
        {
            Ok(revision) => Ok(WriteOutcome::Written(revision)),
            Err(e) => revision_conflict("update", key, revision, e),
        }
    }

    /// Delete a key unconditionally
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.timed("delete", self.store.delete(key))
            .await?
            .map_err(|e| unavailable("delete", key, e))
    }

    /// Delete a key only if its revision is still `revision`
    pub async fn delete_if_unchanged(&self, key: &str, revision: u64) -> Result<WriteOutcome> {
        match self
            .timed(
                "delete",
                self.store.delete_expect_revision(key, Some(revision)),
            )
            .await?
        {
            Ok(()) => Ok(WriteOutcome::Written(revision)),
            Err(e) => revision_conflict("delete", key, revision, e),
        }
    }

    /// List every live key in the bucket
    ///
    /// Walks the server-side key cursor; entries written while the scan is
    /// running may or may not be observed.
    pub async fn keys(&self) -> Result<Vec<String>> {
        let cursor = self
            .timed("keys", self.store.keys())
            .await?
            .map_err(|e| unavailable("keys", &self.config.bucket, e))?;
        let mut cursor = std::pin::pin!(cursor);

        let mut keys = Vec::new();
        while let Some(next) = self.timed("keys", cursor.next()).await? {
            match next {
                Ok(key) => keys.push(key),
                Err(e) => return Err(unavailable("keys", &self.config.bucket, e)),
            }
        }

        Ok(keys)
    }

    /// Get the underlying NATS client
    pub fn nats_client(&self) -> &async_nats::Client {
        &self.client
    }

    /// Get the key-value bucket handle
    pub fn store(&self) -> &kv::Store {
        &self.store
    }

    /// Get the configuration
    pub fn config(&self) -> &NatsRegistryConfig {
        &self.config
    }

    async fn timed<F, T>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        bounded(op, &self.config.bucket, self.config.operation_timeout(), fut).await
    }
}

async fn bounded<F, T>(op: &str, bucket: &str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await.map_err(|_| {
        RelayError::RegistryUnavailable(format!(
            "{} on bucket '{}' timed out after {}ms",
            op,
            bucket,
            limit.as_millis()
        ))
    })
}

fn unavailable(op: &str, key: &str, err: impl std::fmt::Display) -> RelayError {
    RelayError::RegistryUnavailable(format!("{} '{}' failed: {}", op, key, err))
}

/// Only a wrong-last-revision rejection is a lost race; any other failure
/// is reported as the backend being unavailable.
fn revision_conflict(
    op: &str,
    key: &str,
    revision: u64,
    err: kv::UpdateError,
) -> Result<WriteOutcome> {
    if is_conflict(err.kind()) {
        tracing::debug!(key, revision, op, "Conditional write rejected");
        Ok(WriteOutcome::Conflict)
    } else {
        Err(unavailable(op, key, err))
    }
}

fn is_conflict(kind: kv::UpdateErrorKind) -> bool {
    kind == kv::UpdateErrorKind::WrongLastRevision
}

/// Build NATS connect options from config
fn build_connect_options(config: &NatsRegistryConfig) -> async_nats::ConnectOptions {
    let mut opts = async_nats::ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .request_timeout(Some(Duration::from_secs(config.request_timeout_secs)));

    if let Some(ref token) = config.token {
        opts = opts.token(token.clone());
    }

    opts
}

/// Open the session bucket, creating it with the configured TTL if missing
async fn ensure_bucket(js: &jetstream::Context, config: &NatsRegistryConfig) -> Result<kv::Store> {
    if let Ok(store) = js.get_key_value(&config.bucket).await {
        tracing::info!(bucket = %config.bucket, "Session bucket ready");
        return Ok(store);
    }

    let storage = match config.storage {
        StorageType::File => jetstream::stream::StorageType::File,
        StorageType::Memory => jetstream::stream::StorageType::Memory,
    };

    let store = js
        .create_key_value(kv::Config {
            bucket: config.bucket.clone(),
            description: "a3s-relay session registry".to_string(),
            history: 1,
            max_age: config.record_ttl(),
            storage,
            num_replicas: config.replicas.max(1),
            ..Default::default()
        })
        .await
        .map_err(|e| {
            RelayError::Connection(format!(
                "Failed to create session bucket '{}': {}",
                config.bucket, e
            ))
        })?;

    tracing::info!(
        bucket = %config.bucket,
        ttl_secs = config.record_ttl_secs,
        "Session bucket created"
    );

    Ok(store)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_wrong_revision_is_a_conflict() {
        assert!(is_conflict(kv::UpdateErrorKind::WrongLastRevision));
        assert!(!is_conflict(kv::UpdateErrorKind::TimedOut));
        assert!(!is_conflict(kv::UpdateErrorKind::Other));
        assert!(!is_conflict(kv::UpdateErrorKind::InvalidKey));
    }

    #[test]
    fn test_backend_failure_is_unavailable() {
        let err = kv::UpdateError::from(kv::UpdateErrorKind::TimedOut);
        match revision_conflict("delete", "sessions.a", 3, err) {
            Err(RelayError::RegistryUnavailable(msg)) => {
                assert!(msg.contains("delete 'sessions.a' failed"));
            }
            other => panic!("expected RegistryUnavailable, got {:?}", other),
        }

        let err = kv::UpdateError::from(kv::UpdateErrorKind::WrongLastRevision);
        assert_eq!(
            revision_conflict("update", "sessions.a", 3, err).unwrap(),
            WriteOutcome::Conflict
        );
    }

    #[tokio::test]
    async fn test_stalled_operation_is_unavailable_not_absent() {
        let stalled = std::future::pending::<Option<KvRecord>>();
        let err = bounded("entry", "SESSIONS", Duration::from_millis(20), stalled)
            .await
            .unwrap_err();
        assert!(err.is_transient());
        match err {
            RelayError::RegistryUnavailable(msg) => {
                assert!(msg.contains("entry on bucket 'SESSIONS' timed out"));
            }
            other => panic!("expected RegistryUnavailable, got {:?}", other),
        }

        let ready = bounded("entry", "SESSIONS", Duration::from_millis(20), async { 7 }).await;
        assert_eq!(ready.unwrap(), 7);
    }
}
