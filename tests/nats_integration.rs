//! NATS JetStream key-value integration tests
//!
//! These tests require a running NATS server with JetStream enabled:
//!   nats-server -js
//!
//! Tests are skipped automatically if NATS is not available.

use a3s_relay::registry::nats::{NatsRegistry, NatsRegistryConfig, StorageType};
use a3s_relay::{
    MemoryChannel, MemorySessionRepository, RelayConfig, RelayError, Session, SessionHub,
    SessionIdentity, SessionRegistry, SessionStatus, StorageConfig,
};
use std::sync::Arc;
use std::time::Duration;

fn test_config(bucket_suffix: &str) -> NatsRegistryConfig {
    NatsRegistryConfig {
        url: "nats://127.0.0.1:4222".to_string(),
        bucket: format!("TEST_SESSIONS_{}", bucket_suffix),
        storage: StorageType::Memory,
        record_ttl_secs: 60,
        connect_timeout_secs: 2,
        ..Default::default()
    }
}

/// Try to connect to NATS. Returns None if server is unavailable.
async fn try_nats_registry(bucket_suffix: &str) -> Option<NatsRegistry> {
    try_nats_registry_with(test_config(bucket_suffix)).await
}

async fn try_nats_registry_with(config: NatsRegistryConfig) -> Option<NatsRegistry> {
    match NatsRegistry::connect(config).await {
        Ok(registry) => {
            // Start from an empty bucket; earlier runs may have left records
            for session in registry.sessions().await.ok()? {
                registry.remove(session.identity()).await.ok()?;
            }
            Some(registry)
        }
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            None
        }
    }
}

/// Helper to connect a NATS registry, or skip the test
macro_rules! nats_registry {
    ($suffix:expr) => {
        match try_nats_registry($suffix).await {
            Some(r) => r,
            None => return,
        }
    };
}

fn id(value: &str) -> SessionIdentity {
    SessionIdentity::of(value).unwrap()
}

#[tokio::test]
async fn test_nats_register_and_find() {
    let registry = nats_registry!("reg_find");

    registry.register(Session::new(id("user:42"))).await.unwrap();

    let found = registry.find_by_id(&id("user:42")).await.unwrap().unwrap();
    assert_eq!(found.status(), SessionStatus::Registered);
    assert!(registry.find_by_id(&id("nobody")).await.unwrap().is_none());
}

#[tokio::test]
async fn test_nats_duplicate_registration() {
    let registry = nats_registry!("dup");

    registry.register(Session::new(id("k1"))).await.unwrap();
    let err = registry.register(Session::new(id("k1"))).await.unwrap_err();
    assert!(matches!(err, RelayError::DuplicateSession(_)));
    assert_eq!(registry.sessions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_nats_connect_disconnect() {
    let registry = nats_registry!("lifecycle");
    registry.register(Session::new(id("k1"))).await.unwrap();

    let session = registry.connect(&id("k1")).await.unwrap();
    assert!(session.is_active());
    assert!(registry.is_active(&id("k1")).await.unwrap());

    let session = registry.disconnect(&id("k1")).await.unwrap();
    assert_eq!(session.status(), SessionStatus::Disconnected);
    assert!(session.disconnected_at().is_some());
    assert!(!registry.is_active(&id("k1")).await.unwrap());

    let err = registry.connect(&id("ghost")).await.unwrap_err();
    assert!(matches!(err, RelayError::SessionNotFound(_)));
}

#[tokio::test]
async fn test_nats_heartbeat_and_expiry() {
    let registry = nats_registry!("expiry");
    registry.register(Session::new(id("stale"))).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1100)).await;
    registry.register(Session::new(id("fresh"))).await.unwrap();

    registry.update_heartbeat(&id("ghost")).await.unwrap();
    assert_eq!(registry.remove_expired(3600).await.unwrap(), 0);
    assert_eq!(registry.remove_expired(1).await.unwrap(), 1);

    assert!(registry.find_by_id(&id("stale")).await.unwrap().is_none());
    assert!(registry.find_by_id(&id("fresh")).await.unwrap().is_some());
}

#[tokio::test]
async fn test_nats_remove_is_idempotent() {
    let registry = nats_registry!("remove");
    registry.register(Session::new(id("k1"))).await.unwrap();

    registry.remove(&id("k1")).await.unwrap();
    registry.remove(&id("k1")).await.unwrap();
    assert!(registry.find_by_id(&id("k1")).await.unwrap().is_none());

    // The identity can be registered again after removal
    registry.register(Session::new(id("k1"))).await.unwrap();
}

#[tokio::test]
async fn test_nats_concurrent_registration_single_winner() {
    let registry = Arc::new(nats_registry!("race"));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.register(Session::new(id("contended"))).await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => wins += 1,
            Err(RelayError::DuplicateSession(_)) => {}
            Err(e) => panic!("loser saw {:?} instead of a duplicate", e),
        }
    }
    assert_eq!(wins, 1);
}

#[tokio::test]
async fn test_nats_concurrent_reregistration_after_remove() {
    let registry = Arc::new(nats_registry!("rereg"));
    registry.register(Session::new(id("again"))).await.unwrap();
    registry.remove(&id("again")).await.unwrap();

    // The key now holds a delete marker; every racer revives it at the same revision
    let mut handles = Vec::new();
    for _ in 0..10 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.register(Session::new(id("again"))).await
        }));
    }

    let mut wins = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(()) => wins += 1,
            Err(RelayError::DuplicateSession(_)) => {}
            Err(e) => panic!("loser saw {:?} instead of a duplicate", e),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(registry.sessions().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_nats_heartbeat_refreshes_record_ttl() {
    let config = NatsRegistryConfig {
        record_ttl_secs: 2,
        ..test_config("ttl")
    };
    let registry = match try_nats_registry_with(config).await {
        Some(r) => r,
        None => return,
    };

    registry.register(Session::new(id("kept"))).await.unwrap();
    registry.register(Session::new(id("dropped"))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    registry.update_heartbeat(&id("kept")).await.unwrap();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(
        registry.find_by_id(&id("kept")).await.unwrap().is_some(),
        "heartbeat did not refresh the record age"
    );

    // The server expires aged records on its own timer; allow it some slack
    let mut dropped = false;
    for _ in 0..30 {
        if registry.find_by_id(&id("dropped")).await.unwrap().is_none() {
            dropped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(dropped, "record without heartbeats outlived its TTL");
}

#[tokio::test]
async fn test_nats_sweep_races_heartbeats() {
    let registry = Arc::new(nats_registry!("sweep_race"));
    for i in 0..20 {
        registry
            .register(Session::new(id(&format!("s{}", i))))
            .await
            .unwrap();
    }

    let sweeper = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.remove_expired(0).await })
    };
    let mut beats = Vec::new();
    for i in 0..20 {
        let registry = registry.clone();
        beats.push(tokio::spawn(async move {
            registry.update_heartbeat(&id(&format!("s{}", i))).await
        }));
    }

    let removed = sweeper.await.unwrap().unwrap();
    for beat in beats {
        beat.await.unwrap().unwrap();
    }
    let survivors = registry.sessions().await.unwrap().len();
    assert_eq!(survivors + removed, 20);
}

#[tokio::test]
async fn test_nats_concurrent_heartbeats_keep_record() {
    let registry = Arc::new(nats_registry!("cas"));
    registry.register(Session::new(id("k1"))).await.unwrap();
    registry.connect(&id("k1")).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            registry.update_heartbeat(&id("k1")).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Heartbeats never clobber the connected status
    assert!(registry.is_active(&id("k1")).await.unwrap());
}

#[tokio::test]
async fn test_nats_hub_from_config() {
    let config = RelayConfig {
        storage: StorageConfig::Nats(test_config("hub")),
        ..Default::default()
    };
    let channel = Arc::new(MemoryChannel::new());
    let hub = match SessionHub::from_config(
        config,
        channel.clone(),
        Arc::new(MemorySessionRepository::new()),
    )
    .await
    {
        Ok(hub) => hub,
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            return;
        }
    };
    assert_eq!(hub.backend_name(), "nats");

    let key = format!("hub-{}", uuid::Uuid::new_v4());
    let outcome = hub.register(Some(key.as_str())).await;
    assert!(outcome.success);

    hub.connect(&id(&key)).await.unwrap();
    assert!(hub.info().await.unwrap().connected >= 1);
    hub.remove(&id(&key)).await.unwrap();
}

#[tokio::test]
async fn test_nats_unreachable_server() {
    let config = NatsRegistryConfig {
        url: "nats://127.0.0.1:1".to_string(),
        connect_timeout_secs: 1,
        ..Default::default()
    };

    let err = match NatsRegistry::connect(config).await {
        Ok(_) => panic!("connected to a closed port"),
        Err(e) => e,
    };
    assert!(err.is_transient());
}
