//! Connection Watchdog: periodic broker liveness check
//!
//! Every tick:
//! - Connected transport: mark `Connected` and drain the outbound queue
//! - Otherwise: mark `Connecting`, ask the transport to reconnect, then
//!   either drain or report the error and fall back to `Disconnected`
//!
//! Heartbeat supervision runs on the same tick: no confirmed delivery for
//! `heartbeat_timeout` raises one `HeartbeatTimeout` per silent period.
//!
//! The reconnect attempt and the drain both race the cancellation token, so
//! a tick in progress stops as soon as shutdown is requested.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::publish::{emit, PublishCoordinator};
use crate::types::{ConnectionState, StatusEvent};

/// What one watchdog tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// Connected; `drained` backlog messages were delivered
    Healthy { drained: usize, remaining: usize },
    /// Reconnect failed
    Unreachable,
    /// Cancellation stopped the tick; undelivered messages stay queued
    Interrupted { drained: usize, remaining: usize },
}

#[derive(Debug)]
pub struct ConnectionWatchdog {
    coordinator: Arc<PublishCoordinator>,
    interval: Duration,
    heartbeat_timeout: Duration,
    heartbeat_lost: bool,
    checks: u64,
}

impl ConnectionWatchdog {
    pub fn new(
        coordinator: Arc<PublishCoordinator>,
        interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            interval,
            heartbeat_timeout,
            heartbeat_lost: false,
            checks: 0,
        }
    }

    /// Run until cancelled (call from tokio::spawn)
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            heartbeat_timeout_secs = self.heartbeat_timeout.as_secs(),
            "[ConnectionWatchdog] Started"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(checks = self.checks, "[ConnectionWatchdog] Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    if let WatchdogOutcome::Interrupted { drained, remaining } =
                        self.tick(&cancel).await
                    {
                        info!(drained, remaining, "[ConnectionWatchdog] Drain interrupted");
                    }
                }
            }
        }
    }

    /// One liveness check, cut short when `cancel` fires
    pub async fn tick(&mut self, cancel: &CancellationToken) -> WatchdogOutcome {
        self.checks += 1;
        let transport = self.coordinator.transport();
        let connection = self.coordinator.connection();

        let reachable = if transport.is_connected() {
            true
        } else {
            connection.set(ConnectionState::Connecting);
            let attempt = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    connection.set(ConnectionState::Disconnected);
                    return WatchdogOutcome::Interrupted {
                        drained: 0,
                        remaining: self.coordinator.queue().len(),
                    };
                }
                attempt = transport.reconnect() => attempt,
            };
            match attempt {
                Ok(()) => {
                    info!(
                        transport = transport.name(),
                        "[ConnectionWatchdog] Reconnected to broker"
                    );
                    true
                }
                Err(e) => {
                    warn!(
                        transport = transport.name(),
                        error = %e,
                        "[ConnectionWatchdog] Reconnect failed"
                    );
                    connection.report_error(e.to_string());
                    connection.set(ConnectionState::Disconnected);
                    false
                }
            }
        };

        let outcome = if reachable {
            connection.set(ConnectionState::Connected);
            match self.coordinator.drain(cancel).await {
                Ok(report) if report.interrupted => {
                    return WatchdogOutcome::Interrupted {
                        drained: report.delivered,
                        remaining: report.remaining,
                    };
                }
                Ok(report) => {
                    if report.delivered > 0 || report.halted {
                        debug!(?report, "[ConnectionWatchdog] Drain finished");
                    }
                    WatchdogOutcome::Healthy {
                        drained: report.delivered,
                        remaining: report.remaining,
                    }
                }
                Err(e) => {
                    error!(error = %e, "[ConnectionWatchdog] Outbound queue unreadable");
                    WatchdogOutcome::Healthy {
                        drained: 0,
                        remaining: self.coordinator.queue().len(),
                    }
                }
            }
        } else {
            WatchdogOutcome::Unreachable
        };

        self.check_heartbeat();
        outcome
    }

    fn check_heartbeat(&mut self) {
        let silent_for = self.coordinator.silent_for();
        let events = self.coordinator.connection().events();

        if silent_for >= self.heartbeat_timeout {
            if !self.heartbeat_lost {
                self.heartbeat_lost = true;
                warn!(
                    silent_for_secs = silent_for.as_secs(),
                    pending = self.coordinator.queue().len(),
                    "[ConnectionWatchdog] No delivery confirmed within heartbeat timeout"
                );
                emit(
                    events,
                    StatusEvent::HeartbeatTimeout {
                        silent_for_secs: silent_for.as_secs(),
                    },
                );
            }
        } else if self.heartbeat_lost {
            self.heartbeat_lost = false;
            info!("[ConnectionWatchdog] Deliveries resumed");
            emit(events, StatusEvent::HeartbeatRestored);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::{status_channel, ConnectionTracker, MemoryTransport, QoS};
    use crate::storage::DurableOutboundQueue;

    struct Fixture {
        _tmp: tempfile::TempDir,
        transport: Arc<MemoryTransport>,
        coordinator: Arc<PublishCoordinator>,
        events: tokio::sync::broadcast::Receiver<StatusEvent>,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let queue = Arc::new(DurableOutboundQueue::open(tmp.path().join("q"), 50).unwrap());
        let transport = Arc::new(MemoryTransport::new());
        let events = status_channel();
        let rx = events.subscribe();
        let coordinator = Arc::new(PublishCoordinator::new(
            transport.clone(),
            queue,
            Arc::new(ConnectionTracker::new(events)),
            "sensors/data",
            QoS::AtLeastOnce,
        ));
        Fixture {
            _tmp: tmp,
            transport,
            coordinator,
            events: rx,
        }
    }

    fn watchdog(f: &Fixture, heartbeat_timeout: Duration) -> ConnectionWatchdog {
        ConnectionWatchdog::new(f.coordinator.clone(), Duration::from_secs(10), heartbeat_timeout)
    }

    fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<StatusEvent>) -> Vec<StatusEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[tokio::test]
    async fn test_connected_tick_drains_backlog() {
        let f = fixture();
        f.coordinator.queue().enqueue(b"a").unwrap();
        f.coordinator.queue().enqueue(b"b").unwrap();

        let live = CancellationToken::new();
        let mut watchdog = watchdog(&f, Duration::from_secs(60));
        let outcome = watchdog.tick(&live).await;

        assert_eq!(outcome, WatchdogOutcome::Healthy { drained: 2, remaining: 0 });
        assert!(f.coordinator.queue().is_empty());
        // Idempotent when empty
        assert_eq!(
            watchdog.tick(&live).await,
            WatchdogOutcome::Healthy { drained: 0, remaining: 0 }
        );
    }

    #[tokio::test]
    async fn test_failed_reconnect_reports_error() {
        let mut f = fixture();
        f.transport.set_connected(false);
        f.transport.set_reconnect_succeeds(false);

        let live = CancellationToken::new();
        let mut watchdog = watchdog(&f, Duration::from_secs(60));
        assert_eq!(watchdog.tick(&live).await, WatchdogOutcome::Unreachable);

        let events = drain_events(&mut f.events);
        assert_eq!(
            events[0],
            StatusEvent::ConnectionChanged { state: ConnectionState::Connecting }
        );
        assert!(matches!(events[1], StatusEvent::ConnectionError { .. }));
        assert_eq!(
            events[2],
            StatusEvent::ConnectionChanged { state: ConnectionState::Disconnected }
        );
        assert_eq!(f.coordinator.connection().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_heartbeat_timeout_once_then_restored() {
        let mut f = fixture();
        f.transport.set_connected(false);
        f.transport.set_reconnect_succeeds(false);

        let live = CancellationToken::new();
        let mut watchdog = watchdog(&f, Duration::ZERO);
        watchdog.tick(&live).await;
        watchdog.tick(&live).await;

        let timeouts = drain_events(&mut f.events)
            .into_iter()
            .filter(|e| matches!(e, StatusEvent::HeartbeatTimeout { .. }))
            .count();
        assert_eq!(timeouts, 1);

        // A delivery resets the silence; a generous timeout makes it count
        f.transport.set_reconnect_succeeds(true);
        watchdog.heartbeat_timeout = Duration::from_secs(60);
        f.coordinator.queue().enqueue(b"late").unwrap();
        watchdog.tick(&live).await;

        assert!(drain_events(&mut f.events).contains(&StatusEvent::HeartbeatRestored));
    }

    #[tokio::test]
    async fn test_run_stops_promptly_behind_slow_backlog() {
        let f = fixture();
        for i in 0..50u8 {
            f.coordinator.queue().enqueue(&[i]).unwrap();
        }
        f.transport.set_latency(Duration::from_millis(20));

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(watchdog(&f, Duration::from_secs(60)).run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let cancelled_at = std::time::Instant::now();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("watchdog kept draining after cancellation")
            .unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));

        // Part of the backlog went out, the rest waits for the next run
        let pending = f.coordinator.queue().len();
        assert!(pending > 0 && pending < 50);
        assert_eq!(f.transport.delivered().len(), 50 - pending);
    }
}
