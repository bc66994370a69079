//! Error types for a3s-relay

use thiserror::Error;

/// Errors that can occur while registering, tracking, or routing sessions
#[derive(Debug, Error)]
pub enum RelayError {
    /// Malformed identity, or a registration rejected during validation
    #[error("Invalid session: {0}")]
    InvalidIdentity(String),

    /// A record with the same identity is already registered
    #[error("Session already exists: {0}")]
    DuplicateSession(String),

    /// Routing target is not present in the registry
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// The delivery channel refused or failed to deliver an event
    #[error("Failed to deliver event to session '{identity}': {reason}")]
    DeliveryFailed {
        identity: String,
        reason: String,
    },

    /// Registry backend I/O failure or timeout (transient)
    #[error("Session registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// Backend connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Durable repository failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RelayError {
    /// Whether the failure is expected to clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::RegistryUnavailable(_) | RelayError::Connection(_)
        )
    }
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = RelayError::SessionNotFound("abc".to_string());
        assert_eq!(err.to_string(), "Session not found: abc");

        let err = RelayError::DeliveryFailed {
            identity: "abc".to_string(),
            reason: "channel closed".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to deliver event to session 'abc': channel closed"
        );
    }

    #[test]
    fn test_transient_errors() {
        assert!(RelayError::RegistryUnavailable("timeout".into()).is_transient());
        assert!(RelayError::Connection("refused".into()).is_transient());
        assert!(!RelayError::SessionNotFound("x".into()).is_transient());
        assert!(!RelayError::InvalidIdentity("x".into()).is_transient());
    }

    #[test]
    fn test_serialization_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: RelayError = parse.unwrap_err().into();
        assert!(matches!(err, RelayError::Serialization(_)));
    }
}
