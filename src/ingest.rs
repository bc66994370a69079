//! Event ingestion: the entry point for inbound feed records
//!
//! Transport adapters (topic consumers, HTTP handlers) hand each decoded
//! record to `EventIngestor::handle`. The ingestor resolves the target
//! session, wraps the record as an opaque `RoutedEvent`, and routes it.

use crate::dlq::{should_dead_letter, DeadLetterEvent, DeadLetterHandler};
use crate::error::{RelayError, Result};
use crate::payload::FeedMessage;
use crate::resolver::{self, SessionIdResolver};
use crate::router::{DeliveryOutcome, MessageRouter};
use crate::types::{RoutedEvent, SessionIdentity};
use std::sync::Arc;

/// Turns feed records into routed events
#[derive(Clone)]
pub struct EventIngestor {
    router: MessageRouter,
    resolver: SessionIdResolver,
    dead_letters: Option<Arc<dyn DeadLetterHandler>>,
}

impl EventIngestor {
    pub fn new(router: MessageRouter) -> Self {
        Self {
            router,
            resolver: SessionIdResolver,
            dead_letters: None,
        }
    }

    /// Record undeliverable events in the given sink before failing
    pub fn with_dead_letters(mut self, handler: Arc<dyn DeadLetterHandler>) -> Self {
        self.dead_letters = Some(handler);
        self
    }

    /// Route one feed record to its session
    ///
    /// `explicit_key` is the transport-level routing key (e.g. a record
    /// key); when absent or blank the key is derived from the payload.
    pub async fn handle(
        &self,
        message: FeedMessage,
        source: &str,
        explicit_key: Option<&str>,
    ) -> Result<DeliveryOutcome> {
        let identity = self.resolver.resolve(explicit_key, &message);
        let event = build_event(identity, &message, source)?;

        tracing::debug!(
            identity = %event.target(),
            event_id = %event.id(),
            source,
            payload = message.payload_case(),
            "Routing feed record"
        );

        match self.router.deliver(&event).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                self.dead_letter(event, &e).await;
                Err(e)
            }
        }
    }

    /// Decode a raw JSON record and route it
    pub async fn handle_bytes(
        &self,
        data: &[u8],
        source: &str,
        explicit_key: Option<&str>,
    ) -> Result<DeliveryOutcome> {
        let message = FeedMessage::from_slice(data)?;
        self.handle(message, source, explicit_key).await
    }

    /// Fan a feed record out to every reachable session
    pub async fn broadcast(&self, message: FeedMessage, source: &str) -> Result<usize> {
        let identity =
            resolver::account_identity(&message).unwrap_or_else(SessionIdentity::generate);
        let event = build_event(identity, &message, source)?;
        self.router.broadcast(&event).await
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn dead_letters(&self) -> Option<&Arc<dyn DeadLetterHandler>> {
        self.dead_letters.as_ref()
    }

    async fn dead_letter(&self, event: RoutedEvent, err: &RelayError) {
        let Some(handler) = &self.dead_letters else {
            return;
        };
        if !should_dead_letter(err) {
            return;
        }
        if let Err(dlq_err) = handler
            .handle(DeadLetterEvent::new(event, err.to_string()))
            .await
        {
            tracing::error!(error = %dlq_err, "Failed to dead-letter event");
        }
    }
}

fn build_event(identity: SessionIdentity, message: &FeedMessage, source: &str) -> Result<RoutedEvent> {
    let mut event = RoutedEvent::new(identity, message.to_bytes()?, source)
        .with_metadata("messageType", message.header.message_type.clone())
        .with_metadata("payloadCase", message.payload_case());
    if let Some(correlation_id) = &message.header.correlation_id {
        event = event.with_metadata("correlationId", correlation_id.clone());
    }
    Ok(event)
}
