//! Message router: delivery eligibility and unicast/broadcast dispatch
//!
//! The router reads session state from the registry and never mutates it.
//! Only `Connected` sessions receive unicast events; everything else is
//! skipped without touching the channel.

use crate::channel::DeliveryChannel;
use crate::error::{RelayError, Result};
use crate::registry::SessionRegistry;
use crate::types::{RoutedEvent, SessionStatus};
use std::sync::Arc;

/// What happened to a unicast event that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The channel accepted the event
    Delivered,
    /// The target exists but is not delivery-eligible
    Skipped { status: SessionStatus },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered)
    }
}

/// Routes events from the ingestion side to a delivery channel
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<dyn SessionRegistry>,
    channel: Arc<dyn DeliveryChannel>,
}

impl MessageRouter {
    pub fn new(registry: Arc<dyn SessionRegistry>, channel: Arc<dyn DeliveryChannel>) -> Self {
        Self { registry, channel }
    }

    /// Deliver an event to its target session
    ///
    /// Fails with `SessionNotFound` when the target is unknown and with
    /// `DeliveryFailed` when the channel refuses or errors. Registry errors
    /// propagate unchanged. No retries.
    pub async fn deliver(&self, event: &RoutedEvent) -> Result<DeliveryOutcome> {
        let identity = event.target();

        let session = self
            .registry
            .find_by_id(identity)
            .await?
            .ok_or_else(|| RelayError::SessionNotFound(identity.to_string()))?;

        if !session.is_active() {
            tracing::warn!(
                identity = %identity,
                status = %session.status(),
                event_id = %event.id(),
                "Session not connected, skipping delivery"
            );
            return Ok(DeliveryOutcome::Skipped {
                status: session.status(),
            });
        }

        match self.channel.send_to_session(identity, event).await {
            Ok(true) => {
                tracing::debug!(
                    identity = %identity,
                    event_id = %event.id(),
                    channel = self.channel.name(),
                    "Event delivered"
                );
                Ok(DeliveryOutcome::Delivered)
            }
            Ok(false) => Err(RelayError::DeliveryFailed {
                identity: identity.to_string(),
                reason: "channel rejected the event".to_string(),
            }),
            Err(e) => Err(RelayError::DeliveryFailed {
                identity: identity.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    /// Fan an event out to every reachable session
    ///
    /// The registry is not consulted; the channel decides who is reachable.
    pub async fn broadcast(&self, event: &RoutedEvent) -> Result<usize> {
        let reached = self
            .channel
            .broadcast_to_all(event)
            .await
            .map_err(|e| RelayError::DeliveryFailed {
                identity: "*".to_string(),
                reason: e.to_string(),
            })?;

        tracing::debug!(event_id = %event.id(), reached, "Event broadcast");
        Ok(reached)
    }

    pub fn registry(&self) -> &Arc<dyn SessionRegistry> {
        &self.registry
    }

    pub fn channel(&self) -> &Arc<dyn DeliveryChannel> {
        &self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::memory::MemoryRegistry;
    use crate::types::{Session, SessionIdentity};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingChannel {
        sends: AtomicUsize,
        broadcasts: AtomicUsize,
        accept: bool,
        fail: bool,
    }

    impl CountingChannel {
        fn accepting() -> Self {
            Self {
                accept: true,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl DeliveryChannel for CountingChannel {
        async fn send_to_session(&self, _identity: &SessionIdentity, _event: &RoutedEvent) -> Result<bool> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RelayError::Connection("socket closed".to_string()));
            }
            Ok(self.accept)
        }

        async fn broadcast_to_all(&self, _event: &RoutedEvent) -> Result<usize> {
            self.broadcasts.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RelayError::Connection("socket closed".to_string()));
            }
            Ok(3)
        }

        async fn is_connected(&self, _identity: &SessionIdentity) -> bool {
            self.accept
        }

        fn name(&self) -> &str {
            "counting"
        }
    }

    fn id(value: &str) -> SessionIdentity {
        SessionIdentity::of(value).unwrap()
    }

    fn event(target: &str) -> RoutedEvent {
        RoutedEvent::new(id(target), &b"{}"[..], "test")
    }

    async fn setup(channel: CountingChannel) -> (MessageRouter, Arc<MemoryRegistry>, Arc<CountingChannel>) {
        let registry = Arc::new(MemoryRegistry::new());
        let channel = Arc::new(channel);
        let router = MessageRouter::new(registry.clone(), channel.clone());
        (router, registry, channel)
    }

    #[tokio::test]
    async fn test_deliver_to_connected_session() {
        let (router, registry, channel) = setup(CountingChannel::accepting()).await;
        registry.register(Session::new(id("k1"))).await.unwrap();
        registry.connect(&id("k1")).await.unwrap();

        let outcome = router.deliver(&event("k1")).await.unwrap();
        assert!(outcome.is_delivered());
        assert_eq!(channel.sends.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_deliver_skips_inactive_session() {
        let (router, registry, channel) = setup(CountingChannel::accepting()).await;
        registry.register(Session::new(id("k1"))).await.unwrap();

        let outcome = router.deliver(&event("k1")).await.unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Skipped {
                status: SessionStatus::Registered
            }
        );

        registry.connect(&id("k1")).await.unwrap();
        registry.disconnect(&id("k1")).await.unwrap();
        let outcome = router.deliver(&event("k1")).await.unwrap();
        assert_eq!(
            outcome,
            DeliveryOutcome::Skipped {
                status: SessionStatus::Disconnected
            }
        );

        assert_eq!(channel.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deliver_unknown_session() {
        let (router, _registry, channel) = setup(CountingChannel::accepting()).await;

        let err = router.deliver(&event("ghost")).await.unwrap_err();
        assert!(matches!(err, RelayError::SessionNotFound(ref k) if k == "ghost"));
        assert_eq!(channel.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_deliver_channel_rejects() {
        let (router, registry, channel) = setup(CountingChannel::default()).await;
        registry.register(Session::new(id("k1"))).await.unwrap();
        registry.connect(&id("k1")).await.unwrap();

        let err = router.deliver(&event("k1")).await.unwrap_err();
        assert!(matches!(err, RelayError::DeliveryFailed { .. }));
        assert_eq!(channel.sends.load(Ordering::SeqCst), 1);

        // No registry mutation on failure
        assert!(registry.is_active(&id("k1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_deliver_channel_error() {
        let (router, registry, _channel) = setup(CountingChannel {
            fail: true,
            ..Default::default()
        })
        .await;
        registry.register(Session::new(id("k1"))).await.unwrap();
        registry.connect(&id("k1")).await.unwrap();

        let err = router.deliver(&event("k1")).await.unwrap_err();
        match err {
            RelayError::DeliveryFailed { identity, reason } => {
                assert_eq!(identity, "k1");
                assert!(reason.contains("socket closed"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_calls_channel_once() {
        let (router, _registry, channel) = setup(CountingChannel::accepting()).await;

        let reached = router.broadcast(&event("anyone")).await.unwrap();
        assert_eq!(reached, 3);
        assert_eq!(channel.broadcasts.load(Ordering::SeqCst), 1);
        assert_eq!(channel.sends.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_failure() {
        let (router, _registry, channel) = setup(CountingChannel {
            fail: true,
            ..Default::default()
        })
        .await;

        let err = router.broadcast(&event("anyone")).await.unwrap_err();
        assert!(matches!(err, RelayError::DeliveryFailed { .. }));
        assert_eq!(channel.broadcasts.load(Ordering::SeqCst), 1);
    }
}
