//! # a3s-relay
//!
//! Session lifecycle, registry, and event routing for the A3S ecosystem.
//!
//! ## Overview
//!
//! `a3s-relay` keeps track of client sessions and routes inbound feed
//! records to the delivery connection of the session they are addressed
//! to. Swap registry backends (in-memory, NATS key-value) without changing
//! application code.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use a3s_relay::{MemoryChannel, MemorySessionRepository, RelayConfig, SessionHub, SessionIdentity};
//! use a3s_relay::payload::{FeedMessage, FeedPayload, LoginPayload};
//!
//! # async fn example() -> a3s_relay::Result<()> {
//! let channel = Arc::new(MemoryChannel::new());
//! let hub = SessionHub::from_config(
//!     RelayConfig::default(),
//!     channel.clone(),
//!     Arc::new(MemorySessionRepository::new()),
//! )
//! .await?;
//!
//! // Register and connect a session
//! let outcome = hub.register(Some("42")).await;
//! let identity = SessionIdentity::of("42")?;
//! hub.connect(&identity).await?;
//! let mut connection = channel.attach(identity);
//!
//! // Route a feed record by its account id
//! let login = FeedMessage::new(
//!     "LOGIN",
//!     FeedPayload::Login(LoginPayload { account_id: Some(42), ..Default::default() }),
//! );
//! hub.handle(login, "feed.login", None).await?;
//!
//! println!("{:?} -> {:?}", outcome.endpoint, connection.recv().await);
//! # Ok(())
//! # }
//! ```
//!
//! ## Registry backends
//!
//! - **memory**: Process-local concurrent map for single-process use and tests
//! - **nats**: NATS JetStream key-value bucket shared across relay instances
//!
//! ## Architecture
//!
//! - **SessionRegistry** trait: core abstraction all backends implement
//! - **MessageRouter**: delivery eligibility and unicast/broadcast dispatch
//! - **SessionAdmission**: validates and registers new sessions
//! - **EventIngestor**: resolves the target session for a feed record
//! - **SessionHub**: high-level API wiring all of the above

pub mod admission;
pub mod channel;
pub mod config;
pub mod dlq;
pub mod error;
pub mod hub;
pub mod ingest;
pub mod payload;
pub mod registry;
pub mod repository;
pub mod resolver;
pub mod router;
pub mod sweep;
pub mod types;

// Re-export core types
pub use admission::SessionAdmission;
pub use channel::{Connection, DeliveryChannel, MemoryChannel};
pub use config::{RelayConfig, StorageConfig};
pub use dlq::{DeadLetterEvent, DeadLetterHandler, MemoryDeadLetterHandler};
pub use error::{RelayError, Result};
pub use hub::SessionHub;
pub use ingest::EventIngestor;
pub use registry::{RegistryInfo, SessionRegistry};
pub use repository::{FileSessionRepository, MemorySessionRepository, SessionRepository};
pub use resolver::SessionIdResolver;
pub use router::{DeliveryOutcome, MessageRouter};
pub use sweep::ExpirySweeper;
pub use types::{RegistrationOutcome, RoutedEvent, Session, SessionIdentity, SessionStatus};

// Re-export backends for convenience
pub use registry::memory::MemoryRegistry;
pub use registry::nats::{NatsKvClient, NatsRegistry, NatsRegistryConfig, StorageType};
