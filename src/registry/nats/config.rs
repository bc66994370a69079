//! NATS key-value registry configuration

use crate::error::{RelayError, Result};
use crate::types::SessionIdentity;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as KEY_ENCODING;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Storage type for the key-value bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// Persisted to disk on the server
    #[default]
    File,
    /// Kept in server memory; lost on server restart
    Memory,
}

/// Configuration for the NATS-backed session registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NatsRegistryConfig {
    /// NATS server URL
    pub url: String,

    /// Key-value bucket holding session records
    pub bucket: String,

    /// Prefix for every session key in the bucket
    pub key_prefix: String,

    /// Maximum age of a record since its last write (seconds)
    ///
    /// Coarse safety net so orphaned records expire even if no sweep runs.
    /// Independent of the heartbeat timeout used by the sweep.
    pub record_ttl_secs: u64,

    /// Bucket storage backend
    pub storage: StorageType,

    /// Number of bucket replicas in a clustered deployment
    pub replicas: usize,

    /// Connection timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Server request timeout (seconds)
    pub request_timeout_secs: u64,

    /// Upper bound for a single registry operation (seconds)
    ///
    /// An operation that exceeds it fails with `RegistryUnavailable`.
    pub operation_timeout_secs: u64,

    /// Compare-and-set attempts before a contended update gives up
    pub max_update_attempts: u32,

    /// Optional authentication token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl Default for NatsRegistryConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            bucket: "A3S_SESSIONS".to_string(),
            key_prefix: "session".to_string(),
            record_ttl_secs: 24 * 60 * 60,
            storage: StorageType::File,
            replicas: 1,
            connect_timeout_secs: 10,
            request_timeout_secs: 5,
            operation_timeout_secs: 5,
            max_update_attempts: 5,
            token: None,
        }
    }
}

impl NatsRegistryConfig {
    /// Check the configuration for values the server would reject
    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(RelayError::Config("NATS url cannot be empty".to_string()));
        }
        if !is_valid_token(&self.bucket, false) {
            return Err(RelayError::Config(format!(
                "Invalid bucket name '{}': only letters, digits, '-' and '_' are allowed",
                self.bucket
            )));
        }
        if !is_valid_token(&self.key_prefix, true) {
            return Err(RelayError::Config(format!(
                "Invalid key prefix '{}'",
                self.key_prefix
            )));
        }
        // A zero max age means "keep forever" to the server
        if self.record_ttl_secs == 0 {
            return Err(RelayError::Config(
                "Record TTL must be at least 1 second".to_string(),
            ));
        }
        if self.operation_timeout_secs == 0 {
            return Err(RelayError::Config(
                "Operation timeout must be at least 1 second".to_string(),
            ));
        }
        if self.max_update_attempts == 0 {
            return Err(RelayError::Config(
                "Max update attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the bucket key for a session identity
    ///
    /// Identities are base64url-encoded because NATS keys only accept a
    /// restricted alphabet.
    pub fn key_for(&self, identity: &SessionIdentity) -> String {
        format!(
            "{}.{}",
            self.key_prefix,
            KEY_ENCODING.encode(identity.as_str())
        )
    }

    /// Recover the identity from a bucket key; `None` for foreign keys
    pub fn identity_from_key(&self, key: &str) -> Option<SessionIdentity> {
        let encoded = key
            .strip_prefix(self.key_prefix.as_str())?
            .strip_prefix('.')?;
        let raw = KEY_ENCODING.decode(encoded).ok()?;
        let value = String::from_utf8(raw).ok()?;
        SessionIdentity::of(value).ok()
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

fn is_valid_token(value: &str, allow_dots: bool) -> bool {
    !value.is_empty()
        && !value.starts_with('.')
        && !value.ends_with('.')
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_dots && c == '.'))
}
