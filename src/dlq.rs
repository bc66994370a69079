//! Dead-letter queue: keep events the router could not place
//!
//! Routing never retries. An ingestion boundary that wants a record of
//! undeliverable events plugs in a `DeadLetterHandler`; the event is
//! recorded before the error is returned to the caller.

use crate::error::{RelayError, Result};
use crate::types::RoutedEvent;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// An undeliverable event with the reason it was set aside
#[derive(Debug, Clone)]
pub struct DeadLetterEvent {
    pub event: RoutedEvent,

    /// Rendered error that stopped delivery
    pub reason: String,

    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterEvent {
    pub fn new(event: RoutedEvent, reason: impl Into<String>) -> Self {
        Self {
            event,
            reason: reason.into(),
            dead_lettered_at: Utc::now(),
        }
    }
}

/// Trait for dead-letter sinks
#[async_trait]
pub trait DeadLetterHandler: Send + Sync {
    /// Record an undeliverable event
    async fn handle(&self, event: DeadLetterEvent) -> Result<()>;

    /// Number of events currently held
    async fn count(&self) -> Result<usize>;

    /// Most recent events first
    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>>;
}

/// Bounded in-memory dead-letter sink
///
/// When full, the oldest events are dropped first. A capacity of zero
/// means unbounded.
pub struct MemoryDeadLetterHandler {
    events: RwLock<VecDeque<DeadLetterEvent>>,
    max_events: usize,
}

impl MemoryDeadLetterHandler {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            max_events,
        }
    }
}

impl Default for MemoryDeadLetterHandler {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DeadLetterHandler for MemoryDeadLetterHandler {
    async fn handle(&self, event: DeadLetterEvent) -> Result<()> {
        tracing::warn!(
            event_id = %event.event.id(),
            target = %event.event.target(),
            source = %event.event.source(),
            reason = %event.reason,
            "Event dead-lettered"
        );

        let mut events = self.events.write().await;
        events.push_back(event);

        if self.max_events > 0 {
            while events.len() > self.max_events {
                events.pop_front();
            }
        }

        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.events.read().await.len())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DeadLetterEvent>> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }
}

/// Whether a routing error means the event itself was undeliverable
///
/// Transient backend failures are not dead-lettered; the caller may retry.
pub fn should_dead_letter(err: &RelayError) -> bool {
    matches!(
        err,
        RelayError::SessionNotFound(_) | RelayError::DeliveryFailed { .. }
    )
}
