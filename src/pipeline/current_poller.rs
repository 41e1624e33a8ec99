//! Current poller: RMS current per ADC channel
//!
//! All channels share one ADC. Each tick runs a blocking burst that samples
//! every channel in turn and converts the voltages to amperes.

use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{run_blocking, PollerContext};
use crate::acquisition::{AcquisitionError, AdcGain, Ads1115, ADC_CHANNELS};
use crate::config::{parse_address, CurrentChannelConfig};
use crate::processing::{calibrate_stationary, rms_current, CalibrationError, CurrentConversion};
use crate::types::{SensorErrorKind, SensorKind, SensorReading, SensorState};

const KIND: SensorKind = SensorKind::Current;

pub(super) fn config_state(channel: &CurrentChannelConfig) -> SensorState {
    match channel.adc_channel {
        None => SensorState::error(SensorErrorKind::ConfigIncomplete, "adc_channel not configured"),
        Some(ch) if ch >= ADC_CHANNELS => SensorState::error(
            SensorErrorKind::ConfigIncomplete,
            format!("adc_channel {ch} outside 0..=3"),
        ),
        Some(_) => SensorState::Uninitialized,
    }
}

struct CurrentChannel {
    name: String,
    input: u8,
    conversion: CurrentConversion,
    failing: bool,
}

/// Shared ADC plus the channels it serves, moved into each blocking burst
struct AdcBank {
    adc: Ads1115,
    channels: Vec<CurrentChannel>,
}

/// Polls every configured current channel
#[derive(Debug)]
pub struct CurrentPoller {
    ctx: PollerContext,
}

impl CurrentPoller {
    pub fn new(ctx: PollerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) {
        let Some(bank) = self.initialize().await else {
            info!("[CurrentPoller] Cancelled during initialization");
            return;
        };
        let Some(mut bank) = bank else {
            info!("[CurrentPoller] No current channels available, poller idle");
            return;
        };

        let cfg = &self.ctx.config;
        let samples = cfg.sensors.current.samples_per_reading;
        let mut ticker = interval(cfg.intervals.current());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            channels = bank.channels.len(),
            samples_per_reading = samples,
            interval_ms = cfg.intervals.current_ms,
            "[CurrentPoller] Polling started"
        );

        loop {
            tokio::select! {
                _ = self.ctx.cancel.cancelled() => {
                    info!("[CurrentPoller] Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    let burst = run_blocking(&self.ctx.cancel, move || {
                        let mut bank = bank;
                        let results: Vec<Result<f64, AcquisitionError>> = bank
                            .channels
                            .iter()
                            .map(|ch| {
                                bank.adc
                                    .sample_channel(ch.input, samples)
                                    .map(|volts| rms_current(&volts, &ch.conversion))
                            })
                            .collect();
                        (bank, results)
                    })
                    .await;

                    match burst {
                        None => {
                            info!("[CurrentPoller] Shutdown signal received");
                            break;
                        }
                        Some(Ok((returned, results))) => {
                            bank = returned;
                            self.record(&mut bank.channels, results);
                        }
                        Some(Err(detail)) => {
                            warn!(error = %detail, "[CurrentPoller] Sampling burst lost, stopping");
                            for ch in &cfg.sensors.current.channels {
                                let healthy = self
                                    .ctx
                                    .registry
                                    .get(KIND, &ch.name)
                                    .is_some_and(|s| s.error_kind().is_none());
                                if healthy {
                                    let kind = SensorErrorKind::ReadFailed;
                                    self.fail(&ch.name, kind, detail.clone());
                                }
                            }
                            break;
                        }
                    }
                }
            }
        }
    }

    /// `None` when cancelled; `Some(None)` when no channel is usable
    async fn initialize(&self) -> Option<Option<AdcBank>> {
        let cfg = &self.ctx.config;
        let current = &cfg.sensors.current;
        let configured: Vec<&CurrentChannelConfig> = current
            .channels
            .iter()
            .filter(|c| config_state(c) == SensorState::Uninitialized)
            .collect();
        if configured.is_empty() {
            return Some(None);
        }
        for ch in &configured {
            self.ctx.registry.set(KIND, &ch.name, SensorState::Initializing);
        }

        let adc = match self.open_adc().await? {
            Ok(adc) => adc,
            Err(detail) => {
                warn!(
                    address = %current.adc.address,
                    error = %detail,
                    "[CurrentPoller] ADC initialization failed"
                );
                for ch in &configured {
                    self.fail(&ch.name, SensorErrorKind::InitializationFailed, detail.clone());
                }
                return Some(None);
            }
        };

        let mut bank = AdcBank {
            adc,
            channels: Vec::with_capacity(configured.len()),
        };

        for ch in configured {
            let input = ch.adc_channel.unwrap_or_default();
            let offset_volts = if cfg.calibration.current {
                self.ctx.registry.set(KIND, &ch.name, SensorState::Calibrating);
                let count = cfg.calibration.current_samples;
                let (returned, result) = match run_blocking(&self.ctx.cancel, move || {
                    let mut bank = bank;
                    let result = bank
                        .adc
                        .sample_channel(input, count)
                        .map_err(|e| CalibrationError::Collection(e.to_string()))
                        .and_then(|volts| calibrate_stationary(&volts));
                    (bank, result)
                })
                .await?
                {
                    Ok(pair) => pair,
                    Err(detail) => {
                        // The ADC handle went down with the blocking task
                        for rest in &current.channels {
                            let healthy = self
                                .ctx
                                .registry
                                .get(KIND, &rest.name)
                                .is_some_and(|s| s.error_kind().is_none());
                            if healthy {
                                let kind = SensorErrorKind::CalibrationFailed;
                                self.fail(&rest.name, kind, detail.clone());
                            }
                        }
                        return Some(None);
                    }
                };
                bank = returned;

                match result {
                    Ok(offset) => {
                        info!(
                            sensor = %ch.name,
                            offset_volts = offset.value,
                            samples = offset.sample_count,
                            "[CurrentPoller] Calibration complete"
                        );
                        offset.value
                    }
                    Err(e) => {
                        warn!(
                            sensor = %ch.name,
                            error = %e,
                            "[CurrentPoller] Calibration failed, channel excluded"
                        );
                        self.fail(&ch.name, SensorErrorKind::CalibrationFailed, e.to_string());
                        continue;
                    }
                }
            } else {
                ch.offset
            };

            self.ctx.registry.set(KIND, &ch.name, SensorState::Initializing);
            bank.channels.push(CurrentChannel {
                name: ch.name.clone(),
                input,
                conversion: CurrentConversion {
                    offset_volts,
                    volts_to_amps: current.volts_to_amps,
                    scale: ch.scale,
                    threshold_amps: current.threshold_amps,
                },
                failing: false,
            });
        }

        if bank.channels.is_empty() {
            return Some(None);
        }
        Some(Some(bank))
    }

    async fn open_adc(&self) -> Option<Result<Ads1115, String>> {
        let adc_cfg = &self.ctx.config.sensors.current.adc;
        let Some(address) = parse_address(&adc_cfg.address) else {
            return Some(Err(format!("invalid ADC address '{}'", adc_cfg.address)));
        };
        let Some(gain) = AdcGain::from_value(adc_cfg.gain) else {
            return Some(Err(format!("unsupported ADC gain {}", adc_cfg.gain)));
        };

        let ports = Arc::clone(&self.ctx.ports);
        let bus = adc_cfg.bus;
        let opened = run_blocking(&self.ctx.cancel, move || -> Result<Ads1115, AcquisitionError> {
            let port = ports.open_bus(bus, address)?;
            Ads1115::initialize(port, address, gain)
        })
        .await?;
        Some(opened.and_then(|r| r.map_err(|e| e.to_string())))
    }

    fn fail(&self, name: &str, kind: SensorErrorKind, detail: impl Into<String>) {
        self.ctx.registry.mark_failed(KIND, name, kind, detail);
    }

    fn record(&self, channels: &mut [CurrentChannel], results: Vec<Result<f64, AcquisitionError>>) {
        for (ch, result) in channels.iter_mut().zip(results) {
            match result {
                Ok(amps) => {
                    if ch.failing {
                        info!(sensor = %ch.name, "[CurrentPoller] Channel recovered");
                        ch.failing = false;
                    }
                    debug!(sensor = %ch.name, amps, "[CurrentPoller] Reading");
                    self.ctx.registry.set_active(KIND, &ch.name, SensorReading::Current(amps));
                }
                Err(e) => {
                    if !ch.failing {
                        warn!(sensor = %ch.name, error = %e, "[CurrentPoller] Read failed");
                    }
                    ch.failing = true;
                    self.fail(&ch.name, SensorErrorKind::ReadFailed, e.to_string());
                }
            }
        }
    }
}
