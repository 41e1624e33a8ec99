//! Publish Coordinator: live delivery with durable fallback
//!
//! Each cycle, under one process-wide lock:
//! 1. Broker disconnected: buffer the snapshot.
//! 2. Otherwise drain the outbound queue oldest-first, stopping at the first
//!    failure.
//! 3. Drain complete: send the snapshot live (buffer it if that fails).
//!    Drain halted: buffer the snapshot behind the backlog.
//!
//! Delivery is at-least-once: a message accepted by the broker is removed
//! from the queue only afterwards, so a crash in between re-sends it.
//!
//! Cancellation is checked before every send and races each in-flight send.
//! An abandoned send leaves its message queued and the snapshot of an
//! interrupted cycle is buffered, so shutdown never waits on the backlog.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{emit, ConnectionTracker, QoS, Transport};
use crate::storage::{DurableOutboundQueue, QueueError};
use crate::types::{ConnectionState, StatusEvent, TelemetrySnapshot};

/// Errors that stop a publish cycle (transport failures never do)
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("outbound queue error: {0}")]
    Queue(#[from] QueueError),
    #[error("snapshot encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Result of one publish cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Snapshot delivered live after `flushed` backlog messages
    Delivered { flushed: usize },
    /// Snapshot persisted for later delivery
    Buffered { sequence_id: u64, pending: usize },
}

/// Result of draining the outbound queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub remaining: usize,
    /// The drain stopped early (delivery failure or cancellation)
    pub halted: bool,
    /// Cancellation stopped the drain
    pub interrupted: bool,
}

/// Serializes publishing and owns the fallback to the durable queue
pub struct PublishCoordinator {
    transport: Arc<dyn Transport>,
    queue: Arc<DurableOutboundQueue>,
    connection: Arc<ConnectionTracker>,
    topic: String,
    qos: QoS,
    publish_lock: tokio::sync::Mutex<()>,
    last_delivery: Mutex<Instant>,
}

impl std::fmt::Debug for PublishCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublishCoordinator")
            .field("transport", &self.transport.name())
            .field("topic", &self.topic)
            .field("qos", &self.qos)
            .finish_non_exhaustive()
    }
}

impl PublishCoordinator {
    pub fn new(
        transport: Arc<dyn Transport>,
        queue: Arc<DurableOutboundQueue>,
        connection: Arc<ConnectionTracker>,
        topic: impl Into<String>,
        qos: QoS,
    ) -> Self {
        Self {
            transport,
            queue,
            connection,
            topic: topic.into(),
            qos,
            publish_lock: tokio::sync::Mutex::new(()),
            last_delivery: Mutex::new(Instant::now()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn queue(&self) -> &Arc<DurableOutboundQueue> {
        &self.queue
    }

    pub fn connection(&self) -> &Arc<ConnectionTracker> {
        &self.connection
    }

    fn events(&self) -> &broadcast::Sender<StatusEvent> {
        self.connection.events()
    }

    /// Time since the last confirmed delivery (or since startup)
    pub fn silent_for(&self) -> Duration {
        self.last_delivery
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_else(|poisoned| poisoned.into_inner().elapsed())
    }

    fn record_delivery(&self) {
        let mut last = self
            .last_delivery
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *last = Instant::now();
    }

    /// Run one publish cycle for a snapshot
    pub async fn publish_cycle(
        &self,
        snapshot: &TelemetrySnapshot,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, PublishError> {
        let _guard = self.publish_lock.lock().await;
        let payload = snapshot.to_payload()?;

        if !self.transport.is_connected() {
            self.connection.set(ConnectionState::Disconnected);
            return self.buffer(&payload);
        }

        let drain = self.drain_locked(cancel).await?;
        if drain.halted {
            return self.buffer(&payload);
        }

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(topic = %self.topic, "Live publish abandoned on shutdown");
                return self.buffer(&payload);
            }
            sent = self.transport.publish(&self.topic, &payload, self.qos) => sent,
        };

        match sent {
            Ok(()) => {
                self.record_delivery();
                self.connection.set(ConnectionState::Connected);
                emit(
                    self.events(),
                    StatusEvent::PublishSucceeded {
                        flushed: drain.delivered,
                    },
                );
                debug!(
                    topic = %self.topic,
                    size_bytes = payload.len(),
                    flushed = drain.delivered,
                    "Snapshot published"
                );
                Ok(PublishOutcome::Delivered {
                    flushed: drain.delivered,
                })
            }
            Err(e) => {
                warn!(topic = %self.topic, error = %e, "Live publish failed, buffering snapshot");
                emit(
                    self.events(),
                    StatusEvent::PublishFailed {
                        detail: e.to_string(),
                    },
                );
                self.buffer(&payload)
            }
        }
    }

    /// Deliver the outbound backlog oldest-first, stopping at the first
    /// failure or when `cancel` fires
    pub async fn drain(&self, cancel: &CancellationToken) -> Result<DrainReport, PublishError> {
        let _guard = self.publish_lock.lock().await;
        let report = self.drain_locked(cancel).await?;
        if report.delivered > 0 {
            emit(
                self.events(),
                StatusEvent::PublishSucceeded {
                    flushed: report.delivered,
                },
            );
        }
        Ok(report)
    }

    async fn drain_locked(&self, cancel: &CancellationToken) -> Result<DrainReport, PublishError> {
        let mut delivered = 0;

        while let Some(message) = self.queue.peek_oldest()? {
            let sent = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let remaining = self.queue.len();
                    info!(delivered, remaining, "Drain interrupted by shutdown");
                    return Ok(DrainReport {
                        delivered,
                        remaining,
                        halted: true,
                        interrupted: true,
                    });
                }
                sent = self.transport.publish(&self.topic, &message.payload, self.qos) => sent,
            };

            match sent {
                Ok(()) => {
                    self.queue.remove_by_ids(&[message.sequence_id])?;
                    self.record_delivery();
                    delivered += 1;
                }
                Err(e) => {
                    let remaining = self.queue.len();
                    warn!(
                        sequence_id = message.sequence_id,
                        delivered,
                        remaining,
                        error = %e,
                        "Drain halted on delivery failure, will retry"
                    );
                    emit(
                        self.events(),
                        StatusEvent::PublishFailed {
                            detail: e.to_string(),
                        },
                    );
                    return Ok(DrainReport {
                        delivered,
                        remaining,
                        halted: true,
                        interrupted: false,
                    });
                }
            }
        }

        if delivered > 0 {
            info!(delivered, "Flushed buffered messages");
        }
        Ok(DrainReport {
            delivered,
            remaining: 0,
            halted: false,
            interrupted: false,
        })
    }

    fn buffer(&self, payload: &[u8]) -> Result<PublishOutcome, PublishError> {
        let sequence_id = self.queue.enqueue(payload)?;
        let pending = self.queue.len();
        emit(self.events(), StatusEvent::MessageBuffered { pending });
        debug!(sequence_id, pending, "Snapshot buffered");
        Ok(PublishOutcome::Buffered {
            sequence_id,
            pending,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{status_channel, MemoryTransport};

    struct Fixture {
        _tmp: tempfile::TempDir,
        transport: Arc<MemoryTransport>,
        queue: Arc<DurableOutboundQueue>,
        coordinator: PublishCoordinator,
        cancel: CancellationToken,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let queue = Arc::new(DurableOutboundQueue::open(tmp.path().join("q"), 100).unwrap());
        let transport = Arc::new(MemoryTransport::new());
        let connection = Arc::new(ConnectionTracker::new(status_channel()));
        let coordinator = PublishCoordinator::new(
            transport.clone(),
            queue.clone(),
            connection,
            "sensors/data",
            QoS::AtLeastOnce,
        );
        Fixture {
            _tmp: tmp,
            transport,
            queue,
            coordinator,
            cancel: CancellationToken::new(),
        }
    }

    fn snapshot() -> TelemetrySnapshot {
        TelemetrySnapshot::new("station_1")
    }

    #[tokio::test]
    async fn test_live_publish_when_connected() {
        let f = fixture();
        let outcome = f.coordinator.publish_cycle(&snapshot(), &f.cancel).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Delivered { flushed: 0 });
        assert_eq!(f.transport.delivered().len(), 1);
        assert_eq!(f.transport.delivered()[0].topic, "sensors/data");
        assert!(f.queue.is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_buffers() {
        let f = fixture();
        f.transport.set_connected(false);

        let outcome = f.coordinator.publish_cycle(&snapshot(), &f.cancel).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Buffered { pending: 1, .. }));
        assert_eq!(f.transport.attempts(), 0);
    }

    #[tokio::test]
    async fn test_backlog_flushed_before_live_snapshot() {
        let f = fixture();
        f.queue.enqueue(b"old-1").unwrap();
        f.queue.enqueue(b"old-2").unwrap();

        let outcome = f.coordinator.publish_cycle(&snapshot(), &f.cancel).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Delivered { flushed: 2 });

        let delivered = f.transport.delivered();
        assert_eq!(delivered[0].payload, b"old-1");
        assert_eq!(delivered[1].payload, b"old-2");
        assert_eq!(delivered.len(), 3);
    }

    #[tokio::test]
    async fn test_drain_stops_at_first_failure() {
        let f = fixture();
        for i in 1..=5u8 {
            f.queue.enqueue(&[i]).unwrap();
        }
        f.transport.fail_after(3);

        let report = f.coordinator.drain(&f.cancel).await.unwrap();
        assert_eq!(
            report,
            DrainReport {
                delivered: 3,
                remaining: 2,
                halted: true,
                interrupted: false,
            }
        );

        let left: Vec<Vec<u8>> =
            f.queue.peek_all().unwrap().into_iter().map(|m| m.payload).collect();
        assert_eq!(left, vec![vec![4u8], vec![5u8]]);
    }

    #[tokio::test]
    async fn test_halted_drain_buffers_snapshot_behind_backlog() {
        let f = fixture();
        f.queue.enqueue(b"old").unwrap();
        f.transport.fail_after(0);

        let outcome = f.coordinator.publish_cycle(&snapshot(), &f.cancel).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Buffered { pending: 2, .. }));

        let pending = f.queue.peek_all().unwrap();
        assert_eq!(pending[0].payload, b"old");
        assert!(pending[1].payload.starts_with(b"{"));
    }

    #[tokio::test]
    async fn test_failed_live_publish_is_buffered() {
        let f = fixture();
        f.queue.enqueue(b"old").unwrap();
        // Backlog goes through, the live send fails
        f.transport.fail_after(1);

        let outcome = f.coordinator.publish_cycle(&snapshot(), &f.cancel).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Buffered { pending: 1, .. }));
        assert_eq!(f.transport.delivered()[0].payload, b"old");
    }

    #[tokio::test]
    async fn test_cancelled_drain_leaves_backlog_queued() {
        let f = fixture();
        for i in 0..50u8 {
            f.queue.enqueue(&[i]).unwrap();
        }
        f.transport.set_latency(Duration::from_millis(20));

        let cancel = f.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(110)).await;
            cancel.cancel();
        });

        let started = Instant::now();
        let report = f.coordinator.drain(&f.cancel).await.unwrap();
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(report.halted && report.interrupted);
        assert!(report.delivered < 10);

        // The abandoned send is still queued, oldest first
        assert_eq!(f.queue.len(), 50 - report.delivered);
        assert_eq!(report.remaining, f.queue.len());
        let oldest = f.queue.peek_oldest().unwrap().unwrap();
        assert_eq!(oldest.payload, vec![report.delivered as u8]);
    }

    #[tokio::test]
    async fn test_cancelled_cycle_buffers_snapshot() {
        let f = fixture();
        f.queue.enqueue(b"old").unwrap();
        f.cancel.cancel();

        let outcome = f.coordinator.publish_cycle(&snapshot(), &f.cancel).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Buffered { pending: 2, .. }));
        assert_eq!(f.transport.attempts(), 0);
    }
}
