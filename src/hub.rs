//! High-level session hub built on a pluggable registry
//!
//! `SessionHub` wires a registry, a delivery channel and a repository into
//! one API for session lifecycle and event routing. The registry is the
//! source of truth; repository writes made here are best-effort.

use crate::admission::SessionAdmission;
use crate::channel::DeliveryChannel;
use crate::config::RelayConfig;
use crate::dlq::DeadLetterHandler;
use crate::error::Result;
use crate::ingest::EventIngestor;
use crate::payload::FeedMessage;
use crate::registry::{RegistryInfo, SessionRegistry};
use crate::repository::SessionRepository;
use crate::router::{DeliveryOutcome, MessageRouter};
use crate::sweep::ExpirySweeper;
use crate::types::{RegistrationOutcome, Session, SessionIdentity};
use std::sync::Arc;

/// Session lifecycle and routing facade
pub struct SessionHub {
    registry: Arc<dyn SessionRegistry>,
    repository: Arc<dyn SessionRepository>,
    router: MessageRouter,
    admission: SessionAdmission,
    ingestor: EventIngestor,
    sweeper: ExpirySweeper,
    config: RelayConfig,
}

impl SessionHub {
    /// Create a hub from already-built components
    pub fn new(
        registry: Arc<dyn SessionRegistry>,
        channel: Arc<dyn DeliveryChannel>,
        repository: Arc<dyn SessionRepository>,
        config: RelayConfig,
    ) -> Self {
        let router = MessageRouter::new(registry.clone(), channel);
        let admission = SessionAdmission::new(
            registry.clone(),
            repository.clone(),
            config.endpoint_base_url.clone(),
        );
        let ingestor = EventIngestor::new(router.clone());
        let sweeper = ExpirySweeper::new(
            registry.clone(),
            config.expiry_timeout_secs,
            config.sweep_interval(),
        )
        .with_repository_rebuild(admission.clone());

        Self {
            registry,
            repository,
            router,
            admission,
            ingestor,
            sweeper,
            config,
        }
    }

    /// Create a hub whose registry backend is selected by configuration
    pub async fn from_config(
        config: RelayConfig,
        channel: Arc<dyn DeliveryChannel>,
        repository: Arc<dyn SessionRepository>,
    ) -> Result<Self> {
        let registry = config.build_registry().await?;
        Ok(Self::new(registry, channel, repository, config))
    }

    /// Record undeliverable events in the given sink
    pub fn with_dead_letters(mut self, handler: Arc<dyn DeadLetterHandler>) -> Self {
        self.ingestor = self.ingestor.with_dead_letters(handler);
        self
    }

    /// Get the registry backend name
    pub fn backend_name(&self) -> &str {
        self.registry.name()
    }

    /// Register a session for a client-supplied key
    pub async fn register(&self, key: Option<&str>) -> RegistrationOutcome {
        self.admission.register_key(key).await
    }

    /// Mark a session connected
    pub async fn connect(&self, identity: &SessionIdentity) -> Result<Session> {
        let session = self.registry.connect(identity).await?;
        self.cache(&session);
        tracing::info!(identity = %identity, "Session connected");
        Ok(session)
    }

    /// Mark a session disconnected
    pub async fn disconnect(&self, identity: &SessionIdentity) -> Result<Session> {
        let session = self.registry.disconnect(identity).await?;
        self.cache(&session);
        tracing::info!(identity = %identity, "Session disconnected");
        Ok(session)
    }

    /// Refresh a session's heartbeat
    ///
    /// Also refreshes the cached copy so its heartbeat time tracks the
    /// registry. A no-op for unknown sessions.
    pub async fn heartbeat(&self, identity: &SessionIdentity) -> Result<()> {
        self.registry.update_heartbeat(identity).await?;
        if let Some(session) = self.registry.find_by_id(identity).await? {
            self.cache(&session);
        }
        Ok(())
    }

    /// Remove a session from the registry and the repository
    pub async fn remove(&self, identity: &SessionIdentity) -> Result<()> {
        self.registry.remove(identity).await?;
        if let Err(e) = self.repository.delete_by_id(identity) {
            tracing::warn!(identity = %identity, error = %e, "Repository delete failed");
        }
        tracing::info!(identity = %identity, "Session removed");
        Ok(())
    }

    pub async fn find(&self, identity: &SessionIdentity) -> Result<Option<Session>> {
        self.registry.find_by_id(identity).await
    }

    pub async fn is_active(&self, identity: &SessionIdentity) -> Result<bool> {
        self.registry.is_active(identity).await
    }

    /// Route one feed record to its session
    pub async fn handle(
        &self,
        message: FeedMessage,
        source: &str,
        explicit_key: Option<&str>,
    ) -> Result<DeliveryOutcome> {
        self.ingestor.handle(message, source, explicit_key).await
    }

    /// Fan a feed record out to every reachable session
    pub async fn broadcast(&self, message: FeedMessage, source: &str) -> Result<usize> {
        self.ingestor.broadcast(message, source).await
    }

    /// Run one expiry pass with the configured timeout
    ///
    /// When sessions were removed the repository is rebuilt so it drops
    /// them too. The background sweeper does the same on every pass.
    pub async fn sweep(&self) -> Result<usize> {
        self.sweeper.sweep_once().await
    }

    pub async fn start_sweeper(&self) {
        self.sweeper.start().await;
    }

    pub async fn stop_sweeper(&self) {
        self.sweeper.stop().await;
    }

    pub async fn is_sweeper_running(&self) -> bool {
        self.sweeper.is_running().await
    }

    /// Get registry backend info
    pub async fn info(&self) -> Result<RegistryInfo> {
        self.registry.info().await
    }

    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn admission(&self) -> &SessionAdmission {
        &self.admission
    }

    pub fn ingestor(&self) -> &EventIngestor {
        &self.ingestor
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn cache(&self, session: &Session) {
        if let Err(e) = self.repository.save(session) {
            tracing::warn!(identity = %session.identity(), error = %e, "Repository write failed, cache is stale");
        }
    }
}
