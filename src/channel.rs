//! Delivery channels: the outbound side of routing
//!
//! A `DeliveryChannel` knows how to push an event to one session's
//! connection and how to fan out to every connection. The router decides
//! *whether* to deliver; the channel only decides *how*.

use crate::error::Result;
use crate::types::{RoutedEvent, SessionIdentity};
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Outbound transport abstraction
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    /// Send an event to one session
    ///
    /// Returns `Ok(false)` when the session has no reachable connection.
    async fn send_to_session(&self, identity: &SessionIdentity, event: &RoutedEvent) -> Result<bool>;

    /// Send an event to every reachable session, returning how many were reached
    async fn broadcast_to_all(&self, event: &RoutedEvent) -> Result<usize>;

    /// Whether the session currently has a reachable connection
    async fn is_connected(&self, identity: &SessionIdentity) -> bool;

    /// Channel name (e.g., "memory", "websocket")
    fn name(&self) -> &str;
}

/// Receiving half of an attached session connection
#[derive(Debug)]
pub struct Connection {
    identity: SessionIdentity,
    rx: mpsc::UnboundedReceiver<RoutedEvent>,
}

impl Connection {
    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Wait for the next event; `None` once the connection is detached
    pub async fn recv(&mut self) -> Option<RoutedEvent> {
        self.rx.recv().await
    }

    /// Take an already-queued event without waiting
    pub fn try_recv(&mut self) -> Option<RoutedEvent> {
        self.rx.try_recv().ok()
    }

    /// Consume the connection as an async stream of events
    pub fn into_stream(self) -> UnboundedReceiverStream<RoutedEvent> {
        UnboundedReceiverStream::new(self.rx)
    }
}

/// In-process delivery channel
///
/// Each attached session gets an unbounded queue; a transport adapter
/// (websocket writer, SSE stream, test harness) drains the `Connection`.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    connections: DashMap<SessionIdentity, mpsc::UnboundedSender<RoutedEvent>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a connection for a session, replacing any previous one
    pub fn attach(&self, identity: SessionIdentity) -> Connection {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.connections.insert(identity.clone(), tx).is_some() {
            tracing::debug!(identity = %identity, "Replaced existing connection");
        } else {
            tracing::debug!(identity = %identity, "Connection attached");
        }
        Connection { identity, rx }
    }

    /// Detach a session's connection; its receiver sees end-of-stream
    pub fn detach(&self, identity: &SessionIdentity) -> bool {
        let removed = self.connections.remove(identity).is_some();
        if removed {
            tracing::debug!(identity = %identity, "Connection detached");
        }
        removed
    }

    /// Number of attached connections
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[async_trait]
impl DeliveryChannel for MemoryChannel {
    async fn send_to_session(&self, identity: &SessionIdentity, event: &RoutedEvent) -> Result<bool> {
        let sent = match self.connections.get(identity) {
            Some(tx) => tx.send(event.clone()).is_ok(),
            None => {
                tracing::warn!(identity = %identity, "No connection for session");
                return Ok(false);
            }
        };

        if sent {
            tracing::debug!(identity = %identity, event_id = %event.id(), "Event sent to session");
        } else {
            // Receiver dropped without detaching; prune the stale sender
            self.connections
                .remove_if(identity, |_, tx| tx.is_closed());
            tracing::warn!(identity = %identity, "Connection closed by receiver");
        }

        Ok(sent)
    }

    async fn broadcast_to_all(&self, event: &RoutedEvent) -> Result<usize> {
        let targets: Vec<SessionIdentity> = self
            .connections
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        tracing::debug!(event_id = %event.id(), sessions = targets.len(), "Broadcasting event");

        let mut reached = 0;
        for identity in &targets {
            if self.send_to_session(identity, event).await? {
                reached += 1;
            }
        }
        Ok(reached)
    }

    async fn is_connected(&self, identity: &SessionIdentity) -> bool {
        self.connections
            .get(identity)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    fn name(&self) -> &str {
        "memory"
    }
}
