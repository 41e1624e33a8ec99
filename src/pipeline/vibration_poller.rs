//! Vibration poller: accelerometer buffer fill and periodic metrics
//!
//! Two ticks share one task. The fast fill tick records a sample for every
//! accelerometer whose next sample slot is due; the slower metrics tick
//! computes RMS/peak/spectrum from each window and publishes it.
//!
//! A window holds at most one sample per fill tick. When the accelerometer
//! runs faster than the tick, the window (and the spectrum's frequency axis)
//! uses the tick rate instead.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{run_blocking, PollerContext};
use crate::acquisition::{AcquisitionError, Accelerometer};
use crate::config::{parse_address, VibrationSensorConfig};
use crate::processing::{calibrate_stationary, CalibrationError, VibrationAnalyzer};
use crate::types::{SensorErrorKind, SensorKind, SensorReading, SensorState};

const KIND: SensorKind = SensorKind::Vibration;

/// Registry state for a sensor entry before initialization
pub(super) fn config_state(sensor: &VibrationSensorConfig) -> SensorState {
    match sensor.address.as_deref() {
        None => SensorState::error(SensorErrorKind::ConfigIncomplete, "address not configured"),
        Some(text) if parse_address(text).is_none() => SensorState::error(
            SensorErrorKind::ConfigIncomplete,
            format!("invalid address '{text}'"),
        ),
        Some(_) => SensorState::Uninitialized,
    }
}

/// Rate a window actually fills at
fn effective_sample_rate(sensor_hz: f64, fill: Duration) -> f64 {
    sensor_hz.min(1.0 / fill.as_secs_f64())
}

/// Spacing between recorded samples; zero records on every fill tick
fn sample_period(sensor_hz: f64, fill: Duration) -> Duration {
    if sensor_hz >= 1.0 / fill.as_secs_f64() {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / sensor_hz)
    }
}

struct VibrationChannel {
    name: String,
    accel: Accelerometer,
    analyzer: VibrationAnalyzer,
    period: Duration,
    next_due: Instant,
    fill_failing: bool,
    metrics_failing: bool,
}

/// Polls every configured accelerometer
#[derive(Debug)]
pub struct VibrationPoller {
    ctx: PollerContext,
}

impl VibrationPoller {
    pub fn new(ctx: PollerContext) -> Self {
        Self { ctx }
    }

    /// Initialize, calibrate, then poll until cancelled
    pub async fn run(self) {
        let Some(mut channels) = self.initialize().await else {
            info!("[VibrationPoller] Cancelled during initialization");
            return;
        };
        if channels.is_empty() {
            info!("[VibrationPoller] No vibration sensors available, poller idle");
            return;
        }

        let intervals = &self.ctx.config.intervals;
        let mut fill = interval(intervals.buffer_fill());
        fill.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut metrics = interval(intervals.metrics());
        metrics.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            sensors = channels.len(),
            fill_ms = intervals.buffer_fill_ms,
            metrics_ms = intervals.metrics_ms,
            "[VibrationPoller] Polling started"
        );

        loop {
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    info!("[VibrationPoller] Shutdown signal received");
                    break;
                }
                _ = fill.tick() => self.fill(&mut channels),
                _ = metrics.tick() => self.publish_metrics(&mut channels),
            }
        }
    }

    async fn initialize(&self) -> Option<Vec<VibrationChannel>> {
        let config = &self.ctx.config;
        let mut channels = Vec::new();

        for sensor in &config.sensors.vibration {
            // Incomplete entries were registered as config_incomplete
            let Some(address) = sensor.address.as_deref().and_then(parse_address) else {
                continue;
            };
            let name = sensor.name.as_str();
            self.ctx.registry.set(KIND, name, SensorState::Initializing);

            let ports = Arc::clone(&self.ctx.ports);
            let (bus, rate, dlpf) = (sensor.bus, sensor.sample_rate_hz, sensor.dlpf);
            let opened = run_blocking(
                &self.ctx.cancel,
                move || -> Result<Accelerometer, AcquisitionError> {
                    let port = ports.open_bus(bus, address)?;
                    Accelerometer::initialize(port, address, rate, dlpf)
                },
            )
            .await?;

            let accel = match opened.and_then(|r| r.map_err(|e| e.to_string())) {
                Ok(accel) => accel,
                Err(detail) => {
                    warn!(
                        sensor = %name,
                        address = %format!("0x{address:02x}"),
                        error = %detail,
                        "[VibrationPoller] Initialization failed"
                    );
                    self.fail(name, SensorErrorKind::InitializationFailed, detail);
                    continue;
                }
            };

            let fill = config.intervals.buffer_fill();
            let sensor_hz = accel.sample_rate_hz();
            let window_hz = effective_sample_rate(sensor_hz, fill);
            if window_hz < sensor_hz {
                info!(
                    sensor = %name,
                    sensor_hz,
                    window_hz,
                    "[VibrationPoller] Fill tick slower than the sensor, window uses the tick rate"
                );
            }

            let mut analyzer = match VibrationAnalyzer::new(sensor.buffer_size, window_hz) {
                Ok(analyzer) => analyzer,
                Err(e) => {
                    self.fail(name, SensorErrorKind::InitializationFailed, e.to_string());
                    continue;
                }
            };

            let accel = if config.calibration.vibration {
                self.ctx.registry.set(KIND, name, SensorState::Calibrating);
                let count = config.calibration.vibration_samples;
                let outcome = run_blocking(&self.ctx.cancel, move || {
                    let mut accel = accel;
                    let result = accel
                        .collect_stationary(count)
                        .map_err(|e| CalibrationError::Collection(e.to_string()))
                        .and_then(|samples| calibrate_stationary(&samples));
                    (accel, result)
                })
                .await?;

                match outcome {
                    Ok((accel, Ok(offset))) => {
                        info!(
                            sensor = %name,
                            samples = offset.sample_count,
                            x = offset.value.x,
                            y = offset.value.y,
                            z = offset.value.z,
                            "[VibrationPoller] Calibration complete"
                        );
                        analyzer.set_offset(offset.value);
                        accel
                    }
                    Ok((_, Err(e))) => {
                        warn!(
                            sensor = %name,
                            error = %e,
                            "[VibrationPoller] Calibration failed, sensor excluded"
                        );
                        self.fail(name, SensorErrorKind::CalibrationFailed, e.to_string());
                        continue;
                    }
                    Err(detail) => {
                        self.fail(name, SensorErrorKind::CalibrationFailed, detail);
                        continue;
                    }
                }
            } else {
                accel
            };

            // Waiting for the first metrics tick
            self.ctx.registry.set(KIND, name, SensorState::Initializing);
            channels.push(VibrationChannel {
                name: name.to_string(),
                period: sample_period(sensor_hz, fill),
                accel,
                analyzer,
                next_due: Instant::now(),
                fill_failing: false,
                metrics_failing: false,
            });
        }

        Some(channels)
    }

    fn fail(&self, name: &str, kind: SensorErrorKind, detail: impl Into<String>) {
        self.ctx.registry.mark_failed(KIND, name, kind, detail);
    }

    /// Record one sample for every channel whose sample slot is due
    fn fill(&self, channels: &mut [VibrationChannel]) {
        let now = Instant::now();
        for ch in channels.iter_mut().filter(|ch| now >= ch.next_due) {
            ch.next_due += ch.period;
            // Fell behind by more than a slot: resynchronize instead of bursting
            if ch.next_due + ch.period < now {
                ch.next_due = now + ch.period;
            }

            match ch.accel.read_acceleration() {
                Ok(sample) => {
                    ch.analyzer.record(sample);
                    if ch.fill_failing {
                        ch.fill_failing = false;
                        info!(
                            sensor = %ch.name,
                            "[VibrationPoller] Accelerometer reads recovered"
                        );
                    }
                }
                Err(e) => {
                    if !ch.fill_failing {
                        warn!(
                            sensor = %ch.name,
                            error = %e,
                            "[VibrationPoller] Buffer update failed"
                        );
                        self.fail(&ch.name, SensorErrorKind::BufferUpdateFailed, e.to_string());
                        ch.fill_failing = true;
                    }
                }
            }
        }
    }

    fn publish_metrics(&self, channels: &mut [VibrationChannel]) {
        let spectrum = &self.ctx.config.spectrum;
        for ch in channels.iter_mut() {
            if ch.fill_failing || ch.analyzer.window().written() == 0 {
                continue;
            }
            if spectrum.suppress_until_full && !ch.analyzer.window().is_full() {
                self.ctx.registry.set(KIND, &ch.name, SensorState::Initializing);
                continue;
            }

            match ch.analyzer.compute_metrics(spectrum.peaks) {
                Ok(metrics) => {
                    debug!(
                        sensor = %ch.name,
                        total_rms = metrics.total_rms,
                        "[VibrationPoller] Metrics updated"
                    );
                    ch.metrics_failing = false;
                    self.ctx.registry.set_active(
                        KIND,
                        &ch.name,
                        SensorReading::Vibration(metrics.rounded()),
                    );
                }
                Err(e) => {
                    if !ch.metrics_failing {
                        warn!(
                            sensor = %ch.name,
                            error = %e,
                            "[VibrationPoller] Metrics computation failed"
                        );
                    }
                    ch.metrics_failing = true;
                    self.fail(&ch.name, SensorErrorKind::MetricsFailed, e.to_string());
                }
            }
        }
    }
}
