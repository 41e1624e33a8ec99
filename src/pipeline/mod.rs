//! Acquisition-to-publish pipeline
//!
//! One task per sensor type polls its devices and writes the latest state
//! into the shared [`SensorRegistry`]; the publish loop snapshots the
//! registry on its own cadence. The [`Pipeline`] supervisor owns every task
//! and rebuilds pollers on reconfiguration.

mod current_poller;
mod publish_loop;
mod state;
mod supervisor;
mod temperature_poller;
mod vibration_poller;

pub use current_poller::CurrentPoller;
pub use publish_loop::run_publish_loop;
pub use state::SensorRegistry;
pub use supervisor::{Pipeline, PipelineCommand};
pub use temperature_poller::TemperaturePoller;
pub use vibration_poller::VibrationPoller;

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::acquisition::SensorPorts;
use crate::config::NodeConfig;
use crate::types::{SensorKind, SensorState};

/// Everything a poller task needs, cloned per spawn
#[derive(Clone)]
pub struct PollerContext {
    /// Config snapshot the poller was built from
    pub config: Arc<NodeConfig>,
    pub registry: Arc<SensorRegistry>,
    pub ports: Arc<dyn SensorPorts>,
    pub cancel: CancellationToken,
}

impl std::fmt::Debug for PollerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerContext")
            .field("device_id", &self.config.device_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// Registry entries for one sensor type before its poller starts.
///
/// Entries missing what the driver needs are `config_incomplete` from the
/// outset; everything else starts `Uninitialized`.
pub fn initial_states(config: &NodeConfig, kind: SensorKind) -> Vec<(String, SensorState)> {
    match kind {
        SensorKind::Vibration => config
            .sensors
            .vibration
            .iter()
            .map(|s| (s.name.clone(), vibration_poller::config_state(s)))
            .collect(),
        SensorKind::Temperature => config
            .sensors
            .temperature
            .iter()
            .map(|s| (s.name.clone(), temperature_poller::config_state(s)))
            .collect(),
        SensorKind::Current => config
            .sensors
            .current
            .channels
            .iter()
            .map(|c| (c.name.clone(), current_poller::config_state(c)))
            .collect(),
    }
}

/// Run a blocking hardware burst off the async workers.
///
/// Returns `None` when cancelled first; the burst itself still runs to
/// completion on the blocking pool, bounded by its sample count.
async fn run_blocking<T, F>(cancel: &CancellationToken, work: F) -> Option<Result<T, String>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let handle = tokio::task::spawn_blocking(work);
    tokio::select! {
        _ = cancel.cancelled() => None,
        joined = handle => Some(joined.map_err(|e| format!("blocking task failed: {e}"))),
    }
}
