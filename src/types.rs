//! Core session and routing types
//!
//! All serialized types use camelCase JSON for wire compatibility with
//! the shared registry backend and the file repository.

use crate::error::{RelayError, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Opaque, non-blank token that addresses a client session
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionIdentity(String);

impl SessionIdentity {
    /// Build an identity from an externally supplied value
    ///
    /// Fails with `InvalidIdentity` when the value is empty or whitespace only.
    pub fn of(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(RelayError::InvalidIdentity(
                "Session ID cannot be null or blank".to_string(),
            ));
        }
        Ok(Self(value))
    }

    /// Generate a fresh random identity (UUID v4)
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// The raw identity value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SessionIdentity {
    type Error = RelayError;

    fn try_from(value: String) -> Result<Self> {
        Self::of(value)
    }
}

impl From<SessionIdentity> for String {
    fn from(identity: SessionIdentity) -> Self {
        identity.0
    }
}

impl AsRef<str> for SessionIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Registered but no delivery connection yet
    Registered,
    /// Attached to a delivery connection; the only delivery-eligible state
    Connected,
    /// Connection dropped; may reconnect
    Disconnected,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Registered => "REGISTERED",
            SessionStatus::Connected => "CONNECTED",
            SessionStatus::Disconnected => "DISCONNECTED",
        };
        f.write_str(s)
    }
}

/// Routing state for one client
///
/// Mutators are crate-private: only registry backends change a session
/// after it has been registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    identity: SessionIdentity,
    status: SessionStatus,
    created_at: DateTime<Utc>,
    last_heartbeat_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    disconnected_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new session in the `Registered` state
    pub fn new(identity: SessionIdentity) -> Self {
        let now = Utc::now();
        Self {
            identity,
            status: SessionStatus::Registered,
            created_at: now,
            last_heartbeat_at: now,
            disconnected_at: None,
        }
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_heartbeat_at(&self) -> DateTime<Utc> {
        self.last_heartbeat_at
    }

    pub fn disconnected_at(&self) -> Option<DateTime<Utc>> {
        self.disconnected_at
    }

    /// Whether the session is delivery-eligible
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Connected
    }

    /// Whether the last heartbeat is strictly older than `threshold`
    pub fn is_stale(&self, threshold: DateTime<Utc>) -> bool {
        self.last_heartbeat_at < threshold
    }

    /// Whether the session has gone `timeout_secs` without a heartbeat
    pub fn is_expired(&self, timeout_secs: u64) -> bool {
        self.is_stale(expiry_threshold(timeout_secs))
    }

    /// Time elapsed since the last heartbeat
    pub fn idle_duration(&self) -> std::time::Duration {
        (Utc::now() - self.last_heartbeat_at)
            .to_std()
            .unwrap_or_default()
    }

    /// REGISTERED/DISCONNECTED → CONNECTED; no-op when already connected
    pub(crate) fn connect(&mut self) {
        match self.status {
            SessionStatus::Connected => {}
            SessionStatus::Registered => self.status = SessionStatus::Connected,
            SessionStatus::Disconnected => {
                self.status = SessionStatus::Connected;
                self.disconnected_at = None;
            }
        }
    }

    /// Any state → DISCONNECTED, stamping the disconnect time
    pub(crate) fn disconnect(&mut self) {
        self.status = SessionStatus::Disconnected;
        self.disconnected_at = Some(Utc::now());
    }

    /// Record a heartbeat
    pub(crate) fn touch(&mut self) {
        self.last_heartbeat_at = Utc::now();
    }
}

impl PartialEq for Session {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for Session {}

/// Cut-off instant for a heartbeat timeout: `now - timeout_secs`
///
/// Saturates to the earliest representable instant for huge timeouts.
pub fn expiry_threshold(timeout_secs: u64) -> DateTime<Utc> {
    let secs = i64::try_from(timeout_secs).unwrap_or(i64::MAX);
    chrono::Duration::try_seconds(secs)
        .and_then(|age| Utc::now().checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// An inbound unit of work addressed to one session
///
/// The payload is opaque to the router. Equality is by message id only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutedEvent {
    id: String,
    target: SessionIdentity,
    payload: Bytes,
    source: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    metadata: HashMap<String, String>,
}

impl RoutedEvent {
    /// Create a new event with an auto-generated id and timestamp
    pub fn new(target: SessionIdentity, payload: impl Into<Bytes>, source: impl Into<String>) -> Self {
        Self {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            target,
            payload: payload.into(),
            source: source.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> &SessionIdentity {
        &self.target
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Origin topic or channel name
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }
}

impl PartialEq for RoutedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RoutedEvent {}

impl Hash for RoutedEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Result of a registration attempt
///
/// `endpoint` is present only when `success` is true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationOutcome {
    pub identity: Option<SessionIdentity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    pub success: bool,
    pub message: String,
}

impl RegistrationOutcome {
    pub fn succeeded(identity: SessionIdentity, endpoint: impl Into<String>) -> Self {
        Self {
            identity: Some(identity),
            endpoint: Some(endpoint.into()),
            success: true,
            message: "Session registered successfully".to_string(),
        }
    }

    pub fn failed(identity: Option<SessionIdentity>, message: impl Into<String>) -> Self {
        Self {
            identity,
            endpoint: None,
            success: false,
            message: message.into(),
        }
    }
}
