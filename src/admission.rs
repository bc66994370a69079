//! Session admission: validate, register, and hand out an endpoint
//!
//! Admission never returns `Err`: every failure is folded into a
//! `RegistrationOutcome` so callers can answer the client directly.

use crate::error::{RelayError, Result};
use crate::registry::SessionRegistry;
use crate::repository::SessionRepository;
use crate::types::{RegistrationOutcome, Session, SessionIdentity};
use std::sync::Arc;

/// Admits new sessions into the registry
#[derive(Clone)]
pub struct SessionAdmission {
    registry: Arc<dyn SessionRegistry>,
    repository: Arc<dyn SessionRepository>,
    endpoint_base_url: String,
}

impl SessionAdmission {
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        repository: Arc<dyn SessionRepository>,
        endpoint_base_url: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            repository,
            endpoint_base_url: endpoint_base_url.into(),
        }
    }

    /// Register a session for a client-supplied raw key
    pub async fn register_key(&self, key: Option<&str>) -> RegistrationOutcome {
        match key.map(SessionIdentity::of) {
            Some(Ok(identity)) => self.register(Some(identity)).await,
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Rejected registration with blank key");
                RegistrationOutcome::failed(None, e.to_string())
            }
            None => self.register(None).await,
        }
    }

    /// Register a new session
    ///
    /// The registry is the source of truth; a failed repository write after
    /// a successful registration is logged and does not fail the outcome.
    pub async fn register(&self, identity: Option<SessionIdentity>) -> RegistrationOutcome {
        let Some(identity) = identity else {
            let err = RelayError::InvalidIdentity("Session ID cannot be null or blank".to_string());
            return RegistrationOutcome::failed(None, err.to_string());
        };

        match self.try_register(&identity).await {
            Ok(endpoint) => {
                tracing::info!(identity = %identity, endpoint = %endpoint, "Session registered");
                RegistrationOutcome::succeeded(identity, endpoint)
            }
            Err(RelayError::DuplicateSession(_)) => {
                let err = RelayError::InvalidIdentity(format!(
                    "Session ID already registered: {}",
                    identity
                ));
                tracing::warn!(identity = %identity, "Duplicate registration rejected");
                RegistrationOutcome::failed(Some(identity), err.to_string())
            }
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Registration failed");
                RegistrationOutcome::failed(Some(identity), format!("Registration failed: {}", e))
            }
        }
    }

    async fn try_register(&self, identity: &SessionIdentity) -> Result<String> {
        if self.registry.find_by_id(identity).await?.is_some() {
            return Err(RelayError::DuplicateSession(identity.to_string()));
        }

        let session = Session::new(identity.clone());
        // Losing a concurrent race surfaces here as DuplicateSession
        self.registry.register(session.clone()).await?;

        if let Err(e) = self.repository.save(&session) {
            tracing::warn!(identity = %identity, error = %e, "Repository write failed, cache is stale");
        }

        Ok(self.endpoint_for(identity))
    }

    /// Delivery endpoint for a session: `{base}/{identity}`
    pub fn endpoint_for(&self, identity: &SessionIdentity) -> String {
        format!(
            "{}/{}",
            self.endpoint_base_url.trim_end_matches('/'),
            identity
        )
    }

    /// Re-derive the repository from the registry
    ///
    /// Saves every live record and deletes cached records the registry no
    /// longer has. Returns the number of records saved.
    pub async fn rebuild_repository(&self) -> Result<usize> {
        let sessions = self.registry.sessions().await?;
        self.repository.replace_all(&sessions)?;

        tracing::info!(sessions = sessions.len(), "Session repository rebuilt");
        Ok(sessions.len())
    }

    pub fn endpoint_base_url(&self) -> &str {
        &self.endpoint_base_url
    }

    pub fn repository(&self) -> &Arc<dyn SessionRepository> {
        &self.repository
    }
}
