//! Gateway Integration Tests
//!
//! Real WebSocket shards against the in-process mock gateway.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use integration_tests::{fleet_config, Handshake, MockGateway, ADMISSION_INTERVAL, TEST_TIMEOUT};
use shard_gateway::{ConnectionPool, FleetEvent, GatewayError, LifecycleEvent, ShardStatus};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

async fn wait_until(
    events: &mut UnboundedReceiver<FleetEvent>,
    mut matches: impl FnMut(&FleetEvent) -> bool,
) -> FleetEvent {
    let wait = async {
        while let Some(event) = events.recv().await {
            if matches(&event) {
                return event;
            }
        }
        panic!("fleet event stream ended");
    };
    timeout(TEST_TIMEOUT, wait)
        .await
        .expect("timed out waiting for a fleet event")
}

// ============================================================================
// Startup
// ============================================================================

#[tokio::test]
async fn test_fleet_comes_up_in_order() {
    let gateway = MockGateway::start(45_000).await.unwrap();
    let (pool, mut events) = ConnectionPool::builder(fleet_config(&gateway.url(), 2))
        .build()
        .unwrap();
    pool.connect_all().unwrap();

    wait_until(&mut events, |e| *e == FleetEvent::Ready).await;
    assert!(pool.is_ready());

    let handshakes = gateway.handshakes();
    let order: Vec<u32> = handshakes.iter().map(|h| h.shard_id).collect();
    assert_eq!(order, vec![0, 1]);
    assert!(handshakes.iter().all(|h| h.kind == Handshake::Identify));
    assert!(handshakes[1].at - handshakes[0].at >= ADMISSION_INTERVAL);

    for id in [0, 1] {
        let snapshot = pool.shard(id).unwrap().snapshot();
        assert!(snapshot.ready);
        assert_eq!(snapshot.session_id, Some(format!("session-{id}")));
    }

    pool.shutdown().await;
    assert!(pool.is_empty());
}

// ============================================================================
// Reconnects
// ============================================================================

#[tokio::test]
async fn test_dropped_shard_resumes() {
    let gateway = MockGateway::start(45_000).await.unwrap();
    let (pool, mut events) = ConnectionPool::builder(fleet_config(&gateway.url(), 2))
        .build()
        .unwrap();
    pool.connect_all().unwrap();
    wait_until(&mut events, |e| *e == FleetEvent::Ready).await;

    gateway.close_shard(1, 1001).unwrap();
    wait_until(&mut events, |e| *e == FleetEvent::NotReady).await;
    wait_until(&mut events, |e| *e == FleetEvent::Ready).await;

    let last = gateway.handshakes().pop().unwrap();
    assert_eq!(last.shard_id, 1);
    assert_eq!(last.kind, Handshake::Resume);
    assert_eq!(pool.shard(1).unwrap().snapshot().session_id.as_deref(), Some("session-1"));

    pool.shutdown().await;
    wait_until(&mut events, |e| *e == FleetEvent::Disconnected).await;
}

#[tokio::test]
async fn test_invalidated_session_identifies_again() {
    let gateway = MockGateway::start(45_000).await.unwrap();
    let (pool, mut events) = ConnectionPool::builder(fleet_config(&gateway.url(), 1))
        .build()
        .unwrap();
    pool.connect_all().unwrap();
    wait_until(&mut events, |e| *e == FleetEvent::Ready).await;

    gateway.close_shard(0, 4006).unwrap();
    let disconnected = wait_until(&mut events, |e| {
        matches!(e, FleetEvent::Shard { event: LifecycleEvent::Disconnected(_), .. })
    })
    .await;
    assert_eq!(
        disconnected,
        FleetEvent::Shard {
            shard_id: 0,
            event: LifecycleEvent::Disconnected(Some(GatewayError::SessionInvalidated)),
        }
    );
    wait_until(&mut events, |e| *e == FleetEvent::Ready).await;

    let kinds: Vec<Handshake> = gateway.handshakes().iter().map(|h| h.kind).collect();
    assert_eq!(kinds, vec![Handshake::Identify, Handshake::Identify]);

    pool.shutdown().await;
}

#[tokio::test]
async fn test_fatal_close_stays_down() {
    let gateway = MockGateway::start(45_000).await.unwrap();
    let (pool, mut events) = ConnectionPool::builder(fleet_config(&gateway.url(), 1))
        .build()
        .unwrap();
    pool.connect_all().unwrap();
    wait_until(&mut events, |e| *e == FleetEvent::Ready).await;

    gateway.close_shard(0, 4004).unwrap();
    wait_until(&mut events, |e| *e == FleetEvent::Disconnected).await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(gateway.handshakes().len(), 1);

    let snapshot = pool.shard(0).unwrap().snapshot();
    assert_eq!(snapshot.status, ShardStatus::Disconnected);
    assert!(matches!(
        snapshot.last_error,
        Some(GatewayError::FatalClose { code: 4004, .. })
    ));

    pool.shutdown().await;
}
