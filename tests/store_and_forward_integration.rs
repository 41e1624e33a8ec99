//! Store-and-forward Integration Tests
//!
//! Drives the durable outbound queue, the publish coordinator and the
//! connection watchdog together against the in-memory transport: bounded
//! eviction, persistence across restarts, ordered backlog delivery and
//! partial drains.

use rotor_telemetry::background::{ConnectionWatchdog, WatchdogOutcome};
use rotor_telemetry::pipeline::SensorRegistry;
use rotor_telemetry::publish::{
    status_channel, ConnectionTracker, MemoryTransport, PublishCoordinator, PublishOutcome, QoS,
};
use rotor_telemetry::storage::DurableOutboundQueue;
use rotor_telemetry::types::{
    ConnectionState, SensorKind, SensorReading, SensorState, TelemetrySnapshot,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

fn coordinator(
    queue: Arc<DurableOutboundQueue>,
    transport: Arc<MemoryTransport>,
) -> Arc<PublishCoordinator> {
    Arc::new(PublishCoordinator::new(
        transport,
        queue,
        Arc::new(ConnectionTracker::new(status_channel())),
        "sensors/data",
        QoS::AtLeastOnce,
    ))
}

fn registry_with_temperature(celsius: f64) -> SensorRegistry {
    let registry = SensorRegistry::new();
    registry.reset_kind(
        SensorKind::Temperature,
        [(
            "engine".to_string(),
            SensorState::Active(SensorReading::Temperature(celsius)),
        )],
    );
    registry
}

#[test]
fn test_queue_keeps_newest_thousand_across_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("outbound");

    {
        let queue = DurableOutboundQueue::open(&path, 1000).unwrap();
        for i in 0..1050u32 {
            queue.enqueue(format!("message-{i}").as_bytes()).unwrap();
        }
        assert_eq!(queue.len(), 1000);
    }

    let queue = DurableOutboundQueue::open(&path, 1000).unwrap();
    let pending = queue.peek_all().unwrap();
    let ids: Vec<u64> = pending.iter().map(|m| m.sequence_id).collect();
    assert_eq!(ids, (51..=1050).collect::<Vec<u64>>());
    assert_eq!(pending[0].payload, b"message-50".to_vec());

    // Ids keep increasing after a restart
    assert_eq!(queue.enqueue(b"after-restart").unwrap(), 1051);
}

#[tokio::test]
async fn test_offline_cycles_delivered_in_order_after_reconnect() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = Arc::new(DurableOutboundQueue::open(tmp.path().join("q"), 1000).unwrap());
    let transport = Arc::new(MemoryTransport::new());
    let coordinator = coordinator(Arc::clone(&queue), Arc::clone(&transport));

    let live = CancellationToken::new();

    transport.set_connected(false);
    transport.set_reconnect_succeeds(false);
    for celsius in [40.0, 41.0, 42.0] {
        let snapshot = registry_with_temperature(celsius).snapshot("station_1");
        let outcome = coordinator.publish_cycle(&snapshot, &live).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Buffered { .. }));
    }
    assert_eq!(queue.len(), 3);
    assert!(transport.delivered().is_empty());

    let mut watchdog = ConnectionWatchdog::new(
        Arc::clone(&coordinator),
        Duration::from_secs(10),
        Duration::from_secs(60),
    );
    assert_eq!(watchdog.tick(&live).await, WatchdogOutcome::Unreachable);
    assert_eq!(queue.len(), 3);

    transport.set_reconnect_succeeds(true);
    assert_eq!(
        watchdog.tick(&live).await,
        WatchdogOutcome::Healthy { drained: 3, remaining: 0 }
    );
    assert!(queue.is_empty());
    assert_eq!(coordinator.connection().state(), ConnectionState::Connected);

    let temperatures: Vec<serde_json::Value> = transport
        .delivered()
        .iter()
        .map(|m| {
            let snapshot: TelemetrySnapshot = serde_json::from_slice(&m.payload).unwrap();
            snapshot.temperature["engine"].clone()
        })
        .collect();
    assert_eq!(
        temperatures,
        vec![serde_json::json!(40.0), serde_json::json!(41.0), serde_json::json!(42.0)]
    );
}

#[tokio::test]
async fn test_partial_drain_resumes_after_restart() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("q");

    {
        let queue = Arc::new(DurableOutboundQueue::open(&path, 100).unwrap());
        for i in 0..20u32 {
            queue.enqueue(format!("m{i}").as_bytes()).unwrap();
        }
        let transport = Arc::new(MemoryTransport::new());
        transport.fail_after(5);
        let report = coordinator(Arc::clone(&queue), transport)
            .drain(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.delivered, 5);
        assert_eq!(report.remaining, 15);
        assert!(report.halted);
    }

    // Undelivered messages survive the restart, oldest first
    let queue = Arc::new(DurableOutboundQueue::open(&path, 100).unwrap());
    assert_eq!(queue.len(), 15);
    assert_eq!(queue.peek_oldest().unwrap().unwrap().sequence_id, 6);

    let transport = Arc::new(MemoryTransport::new());
    let report = coordinator(Arc::clone(&queue), Arc::clone(&transport))
        .drain(&CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.delivered, 15);
    assert!(queue.is_empty());
    assert_eq!(transport.delivered()[0].payload, b"m5".to_vec());
    assert_eq!(transport.delivered()[14].payload, b"m19".to_vec());
}

#[tokio::test]
async fn test_live_snapshot_follows_backlog() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = Arc::new(DurableOutboundQueue::open(tmp.path().join("q"), 10).unwrap());
    queue.enqueue(b"stale-1").unwrap();
    queue.enqueue(b"stale-2").unwrap();

    let transport = Arc::new(MemoryTransport::new());
    let coordinator = coordinator(Arc::clone(&queue), Arc::clone(&transport));
    let outcome = coordinator
        .publish_cycle(
            &registry_with_temperature(39.5).snapshot("station_1"),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(outcome, PublishOutcome::Delivered { flushed: 2 });
    let delivered = transport.delivered();
    assert_eq!(delivered.len(), 3);
    assert_eq!(delivered[0].payload, b"stale-1".to_vec());
    assert_eq!(delivered[1].payload, b"stale-2".to_vec());
    assert!(delivered.iter().all(|m| m.topic == "sensors/data" && m.qos == QoS::AtLeastOnce));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_not_held_by_full_backlog() {
    let tmp = tempfile::tempdir().unwrap();
    let queue = Arc::new(DurableOutboundQueue::open(tmp.path().join("q"), 1000).unwrap());
    for i in 0..1000u32 {
        queue.enqueue(format!("m{i}").as_bytes()).unwrap();
    }
    let transport = Arc::new(MemoryTransport::new());
    transport.set_latency(Duration::from_millis(20));

    let watchdog = ConnectionWatchdog::new(
        coordinator(Arc::clone(&queue), Arc::clone(&transport)),
        Duration::from_secs(10),
        Duration::from_secs(60),
    );
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(watchdog.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let cancelled_at = Instant::now();
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("watchdog still draining after shutdown")
        .unwrap();
    assert!(cancelled_at.elapsed() < Duration::from_secs(1));

    // Nothing delivered is re-queued and nothing undelivered is lost
    let delivered = transport.delivered().len();
    assert!(delivered < 1000);
    assert_eq!(queue.len(), 1000 - delivered);
    assert_eq!(
        queue.peek_oldest().unwrap().unwrap().payload,
        format!("m{delivered}").into_bytes()
    );
}
