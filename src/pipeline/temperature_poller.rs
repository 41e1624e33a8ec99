//! Temperature poller: 1-Wire probes read every few seconds

use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{run_blocking, PollerContext};
use crate::acquisition::{AcquisitionError, TemperatureProbe};
use crate::config::TemperatureSensorConfig;
use crate::types::{round_to, SensorErrorKind, SensorKind, SensorReading, SensorState};

const KIND: SensorKind = SensorKind::Temperature;

pub(super) fn config_state(sensor: &TemperatureSensorConfig) -> SensorState {
    match sensor.device_id.as_deref().map(str::trim) {
        None | Some("") => {
            SensorState::error(SensorErrorKind::ConfigIncomplete, "device_id not configured")
        }
        Some(_) => SensorState::Uninitialized,
    }
}

struct ProbeChannel {
    name: String,
    probe: Box<dyn TemperatureProbe>,
    failing: bool,
}

/// Polls every configured temperature probe
#[derive(Debug)]
pub struct TemperaturePoller {
    ctx: PollerContext,
}

impl TemperaturePoller {
    pub fn new(ctx: PollerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) {
        let mut channels = self.initialize();
        if channels.is_empty() {
            info!("[TemperaturePoller] No temperature probes available, poller idle");
            return;
        }

        let period = self.ctx.config.intervals.temperature();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            probes = channels.len(),
            interval_secs = period.as_secs_f64(),
            "[TemperaturePoller] Polling started"
        );

        loop {
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    info!("[TemperaturePoller] Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    // sysfs reads block for the conversion time
                    let burst = run_blocking(&self.ctx.cancel, move || {
                        let results: Vec<Result<f64, AcquisitionError>> =
                            channels.iter_mut().map(|ch| ch.probe.read_celsius()).collect();
                        (channels, results)
                    })
                    .await;

                    match burst {
                        None => {
                            info!("[TemperaturePoller] Shutdown signal received");
                            break;
                        }
                        Some(Ok((returned, results))) => {
                            channels = returned;
                            self.record(&mut channels, results);
                        }
                        Some(Err(detail)) => {
                            warn!(error = %detail, "[TemperaturePoller] Read burst lost, stopping");
                            for sensor in &self.ctx.config.sensors.temperature {
                                let registry = &self.ctx.registry;
                                let healthy = registry
                                    .get(KIND, &sensor.name)
                                    .is_some_and(|s| s.error_kind().is_none());
                                if healthy {
                                    registry.mark_failed(
                                        KIND,
                                        &sensor.name,
                                        SensorErrorKind::ReadFailed,
                                        detail.clone(),
                                    );
                                }
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    fn initialize(&self) -> Vec<ProbeChannel> {
        let mut channels = Vec::new();
        for sensor in &self.ctx.config.sensors.temperature {
            let Some(device_id) = sensor
                .device_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
            else {
                continue;
            };
            self.ctx.registry.set(KIND, &sensor.name, SensorState::Initializing);

            match self.ctx.ports.open_probe(device_id) {
                Ok(probe) => {
                    debug!(sensor = %sensor.name, device_id, "[TemperaturePoller] Probe opened");
                    channels.push(ProbeChannel {
                        name: sensor.name.clone(),
                        probe,
                        failing: false,
                    });
                }
                Err(e) => {
                    warn!(
                        sensor = %sensor.name,
                        device_id,
                        error = %e,
                        "[TemperaturePoller] Probe initialization failed"
                    );
                    self.ctx.registry.mark_failed(
                        KIND,
                        &sensor.name,
                        SensorErrorKind::InitializationFailed,
                        e.to_string(),
                    );
                }
            }
        }
        channels
    }

    fn record(&self, channels: &mut [ProbeChannel], results: Vec<Result<f64, AcquisitionError>>) {
        for (ch, result) in channels.iter_mut().zip(results) {
            match result {
                Ok(celsius) => {
                    if ch.failing {
                        info!(sensor = %ch.name, "[TemperaturePoller] Probe recovered");
                        ch.failing = false;
                    }
                    self.ctx.registry.set_active(
                        KIND,
                        &ch.name,
                        SensorReading::Temperature(round_to(celsius, 3)),
                    );
                }
                Err(e) => {
                    if !ch.failing {
                        warn!(sensor = %ch.name, error = %e, "[TemperaturePoller] Read failed");
                    }
                    ch.failing = true;
                    self.ctx
                        .registry
                        .mark_failed(KIND, &ch.name, SensorErrorKind::ReadFailed, e.to_string());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::SimulatedBench;
    use crate::config::NodeConfig;
    use crate::pipeline::{initial_states, SensorRegistry};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn probe(name: &str, id: Option<&str>) -> TemperatureSensorConfig {
        TemperatureSensorConfig {
            name: name.to_string(),
            device_id: id.map(str::to_string),
        }
    }

    #[test]
    fn test_config_state() {
        assert_eq!(config_state(&probe("oil", Some("28-01"))), SensorState::Uninitialized);
        assert_eq!(
            config_state(&probe("oil", Some("  "))).error_kind(),
            Some(SensorErrorKind::ConfigIncomplete)
        );
        assert_eq!(
            config_state(&probe("oil", None)).error_kind(),
            Some(SensorErrorKind::ConfigIncomplete)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_probes_polled_independently() {
        let mut config = NodeConfig::default();
        config.intervals.temperature_secs = 0.05;
        config.sensors.temperature = vec![
            probe("engine", Some("28-00000a1b2c3d")),
            probe("gearbox", Some("28-00000d4e5f60")),
            probe("legacy", Some("10-000000000001")),
        ];
        let config = Arc::new(config);
        let registry = Arc::new(SensorRegistry::new());
        registry.reset_kind(KIND, initial_states(&config, KIND));

        let bench = SimulatedBench::new().with_seed(11);
        bench.set_probe_fault("28-00000d4e5f60", true);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            TemperaturePoller::new(PollerContext {
                config,
                registry: Arc::clone(&registry),
                ports: Arc::new(bench),
                cancel: cancel.clone(),
            })
            .run(),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;

        let engine = registry.get(KIND, "engine").unwrap();
        assert!(matches!(engine, SensorState::Active(SensorReading::Temperature(c)) if c > 30.0));
        assert_eq!(
            registry.get(KIND, "gearbox").unwrap().error_kind(),
            Some(SensorErrorKind::ReadFailed)
        );
        assert_eq!(
            registry.get(KIND, "legacy").unwrap().error_kind(),
            Some(SensorErrorKind::InitializationFailed)
        );

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }
}
