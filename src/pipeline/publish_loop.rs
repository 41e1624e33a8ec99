//! Publish loop: snapshot the registry and hand it to the coordinator

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::SensorRegistry;
use crate::publish::PublishCoordinator;

/// Publish one snapshot per `period` until cancelled.
///
/// Queue errors are logged and the loop carries on; the next cycle retries.
/// A cycle in progress when `cancel` fires buffers its snapshot and returns.
pub async fn run_publish_loop(
    device_id: String,
    period: Duration,
    registry: Arc<SensorRegistry>,
    coordinator: Arc<PublishCoordinator>,
    cancel: CancellationToken,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    info!(device = %device_id, period_ms = period.as_millis() as u64, "[PublishLoop] Started");

    let mut cycles = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(cycles, "[PublishLoop] Shutdown signal received");
                break;
            }
            _ = ticker.tick() => {
                cycles += 1;
                let snapshot = registry.snapshot(&device_id);
                if let Err(e) = coordinator.publish_cycle(&snapshot, &cancel).await {
                    error!(error = %e, "[PublishLoop] Publish cycle failed, snapshot dropped");
                }
            }
        }
    }
}
