//! Relay configuration and backend selection
//!
//! Loading the file is the host's job; this module only defines the shape
//! and turns it into a registry backend.

use crate::error::{RelayError, Result};
use crate::registry::memory::MemoryRegistry;
use crate::registry::nats::{NatsRegistry, NatsRegistryConfig};
use crate::registry::SessionRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Top-level relay configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelayConfig {
    /// Base URL clients connect to; the session identity is appended
    pub endpoint_base_url: String,

    /// Seconds without a heartbeat before a session is swept
    pub expiry_timeout_secs: u64,

    /// Seconds between background sweep passes
    pub sweep_interval_secs: u64,

    /// Registry backend
    pub storage: StorageConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            endpoint_base_url: "ws://localhost:8080/ws".to_string(),
            expiry_timeout_secs: 300,
            sweep_interval_secs: 60,
            storage: StorageConfig::default(),
        }
    }
}

impl RelayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_base_url.trim().is_empty() {
            return Err(RelayError::Config(
                "Endpoint base URL cannot be empty".to_string(),
            ));
        }
        if self.sweep_interval_secs == 0 {
            return Err(RelayError::Config(
                "Sweep interval must be at least 1 second".to_string(),
            ));
        }
        if let StorageConfig::Nats(nats) = &self.storage {
            nats.validate()?;
        }
        Ok(())
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Build the configured registry backend
    ///
    /// For NATS this connects and opens the bucket.
    pub async fn build_registry(&self) -> Result<Arc<dyn SessionRegistry>> {
        self.validate()?;
        let registry: Arc<dyn SessionRegistry> = match &self.storage {
            StorageConfig::Memory => Arc::new(MemoryRegistry::new()),
            StorageConfig::Nats(nats) => Arc::new(NatsRegistry::connect(nats.clone()).await?),
        };
        tracing::info!(backend = registry.name(), "Session registry ready");
        Ok(registry)
    }
}

/// Registry backend selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Process-local map; sessions are lost on restart
    #[default]
    Memory,
    /// Shared NATS JetStream key-value bucket
    Nats(NatsRegistryConfig),
}
