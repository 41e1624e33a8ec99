//! Rotor Telemetry - edge node for rotating machinery
//!
//! Polls vibration, temperature and motor-current sensors and publishes a
//! JSON snapshot to the broker every cycle, buffering to disk while offline.
//!
//! # Usage
//!
//! ```bash
//! # Run against real hardware with ./node_config.toml
//! cargo run --release
//!
//! # Simulated sensor bench (no I2C or 1-Wire hardware needed)
//! cargo run --release -- --simulate
//!
//! # Explicit config, skip calibration
//! ./rotor-telemetry --config /etc/rotor/node_config.toml --no-calibrate
//! ```
//!
//! # Environment Variables
//!
//! - `ROTOR_CONFIG`: Path to the node configuration file
//! - `RUST_LOG`: Logging level (default: info)
//! - `RESET_QUEUE`: Set to "true" to discard buffered messages on startup
//!
//! Send `SIGHUP` to reload the configuration file without restarting.
//! `SIGINT` (Ctrl+C) and `SIGTERM` both stop the node gracefully.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use rotor_telemetry::acquisition::{HardwarePorts, SensorPorts, SimulatedBench};
use rotor_telemetry::config::{ConfigSource, NodeConfig};
use rotor_telemetry::publish::HttpTransport;
use rotor_telemetry::storage::DurableOutboundQueue;
use rotor_telemetry::types::StatusEvent;
use rotor_telemetry::{Pipeline, PipelineCommand};

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "rotor-telemetry")]
#[command(about = "Edge telemetry node for rotating machinery")]
#[command(version)]
struct CliArgs {
    /// Path to node_config.toml (overrides ROTOR_CONFIG and ./node_config.toml)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Force zero-offset calibration of accelerometers and current channels
    #[arg(long, conflicts_with = "no_calibrate")]
    calibrate: bool,

    /// Skip calibration and use configured offsets
    #[arg(long)]
    no_calibrate: bool,

    /// Use the simulated sensor bench instead of real hardware.
    /// Without configured sensors, a demo set of sensors is used.
    #[arg(long)]
    simulate: bool,

    /// Discard all buffered outbound messages on startup.
    /// Can also be set via RESET_QUEUE=true environment variable.
    #[arg(long)]
    reset_queue: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

impl CliArgs {
    fn calibration_override(&self) -> Option<bool> {
        match (self.calibrate, self.no_calibrate) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        }
    }
}

/// Check if a queue reset is requested via CLI flag or environment variable.
fn should_reset_queue(cli_flag: bool) -> bool {
    if cli_flag {
        return true;
    }
    if let Ok(val) = std::env::var("RESET_QUEUE") {
        let val_lower = val.to_lowercase();
        return val_lower == "true" || val_lower == "1" || val_lower == "yes";
    }
    false
}

/// Load the node configuration with CLI overrides applied
fn load_config(args: &CliArgs) -> Result<(NodeConfig, ConfigSource)> {
    let (config, source) =
        NodeConfig::load(args.config.as_deref()).context("Failed to load node configuration")?;
    let mut config = config.with_calibration_override(args.calibration_override());
    if args.simulate && config.sensor_count() == 0 {
        info!("No sensors configured, using the simulated demo set");
        config.sensors = NodeConfig::simulation_sensors();
    }
    Ok((config, source))
}

fn init_logging(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Log every status event until the channel closes
fn spawn_status_logger(mut events: broadcast::Receiver<StatusEvent>, cancel: CancellationToken) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(StatusEvent::ConnectionChanged { state }) => {
                    info!("📡 Broker connection: {}", state);
                }
                Ok(StatusEvent::ConnectionError { detail }) => warn!("📡 Broker error: {}", detail),
                Ok(StatusEvent::PublishSucceeded { flushed }) if flushed > 0 => {
                    info!("📤 Delivered {} buffered messages", flushed);
                }
                Ok(StatusEvent::PublishSucceeded { .. }) => {}
                Ok(StatusEvent::PublishFailed { detail }) => warn!("📤 Publish failed: {}", detail),
                Ok(StatusEvent::MessageBuffered { pending }) => {
                    info!("💾 Snapshot buffered ({} pending)", pending);
                }
                Ok(StatusEvent::HeartbeatTimeout { silent_for_secs }) => {
                    warn!("💔 No delivery for {}s", silent_for_secs);
                }
                Ok(StatusEvent::HeartbeatRestored) => info!("💚 Deliveries resumed"),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Status logger lagged, {} events skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Cancel the pipeline on SIGINT or SIGTERM (the service manager's stop)
#[cfg(unix)]
fn spawn_shutdown_handler(cancel: CancellationToken) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt =
        signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    tokio::spawn(async move {
        let received = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
        };
        info!("🛑 Received {}, initiating shutdown...", received);
        cancel.cancel();
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_shutdown_handler(cancel: CancellationToken) -> Result<()> {
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("🛑 Received Ctrl+C, initiating shutdown...");
        cancel.cancel();
    });
    Ok(())
}

/// Reload the configuration file on SIGHUP and hand it to the supervisor
#[cfg(unix)]
fn spawn_reload_handler(
    args: Arc<CliArgs>,
    commands: mpsc::Sender<PipelineCommand>,
    cancel: CancellationToken,
) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                received = hangup.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("🔄 SIGHUP received, reloading configuration");
                    match load_config(&args) {
                        Ok((config, source)) => {
                            info!("Configuration reloaded from {}", source);
                            let command = PipelineCommand::Reconfigure(config);
                            if commands.send(command).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            error!("Reload rejected, keeping current configuration: {:#}", e);
                        }
                    }
                }
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_handler(
    _args: Arc<CliArgs>,
    _commands: mpsc::Sender<PipelineCommand>,
    _cancel: CancellationToken,
) -> Result<()> {
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Arc::new(CliArgs::parse());
    init_logging(args.log_json);

    let (config, source) = load_config(&args)?;
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  Rotor Telemetry - edge node for rotating machinery");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("Device: {} | Config: {}", config.device_id, source);
    info!(
        "Broker: {} (topic {}, QoS {})",
        config.broker.url, config.broker.topic, config.broker.qos
    );

    let queue = DurableOutboundQueue::open(&config.queue.path, config.queue.max_messages)
        .with_context(|| {
            format!("Failed to open outbound queue at {}", config.queue.path.display())
        })?;
    if should_reset_queue(args.reset_queue) {
        let removed = queue.clear()?;
        warn!("RESET_QUEUE: discarded {} buffered messages", removed);
    } else if !queue.is_empty() {
        info!("💾 {} buffered messages waiting from a previous run", queue.len());
    }

    let transport = HttpTransport::new(&config.broker.url, config.broker.timeout())
        .context("Failed to build broker transport")?;

    let ports: Arc<dyn SensorPorts> = if args.simulate {
        info!("📥 Input: simulated sensor bench");
        Arc::new(SimulatedBench::new())
    } else {
        info!("📥 Input: I2C and 1-Wire hardware");
        Arc::new(HardwarePorts::new())
    };

    let pipeline = Pipeline::start(config, ports, Arc::new(transport), Arc::new(queue))?;
    let cancel_token = pipeline.cancel_token();
    spawn_status_logger(pipeline.subscribe(), cancel_token.clone());

    spawn_shutdown_handler(cancel_token.clone())?;

    let (command_tx, command_rx) = mpsc::channel(8);
    spawn_reload_handler(Arc::clone(&args), command_tx, cancel_token)?;

    pipeline.run(command_rx).await;

    info!("✓ Rotor Telemetry shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_override_flags() {
        let args = CliArgs::parse_from(["rotor-telemetry"]);
        assert_eq!(args.calibration_override(), None);
        let args = CliArgs::parse_from(["rotor-telemetry", "--calibrate"]);
        assert_eq!(args.calibration_override(), Some(true));
        let args = CliArgs::parse_from(["rotor-telemetry", "--no-calibrate"]);
        assert_eq!(args.calibration_override(), Some(false));
        assert!(
            CliArgs::try_parse_from(["rotor-telemetry", "--calibrate", "--no-calibrate"]).is_err()
        );
    }

    #[test]
    fn test_reset_flag_wins_over_environment() {
        assert!(should_reset_queue(true));
    }

    #[cfg(unix)]
    #[tokio::test]
    #[allow(unsafe_code)]
    async fn test_sigterm_cancels_pipeline() {
        let cancel = CancellationToken::new();
        spawn_shutdown_handler(cancel.clone()).unwrap();

        // The handler is installed, so SIGTERM no longer kills the process
        let rc = unsafe { libc::kill(libc::getpid(), libc::SIGTERM) };
        assert_eq!(rc, 0);
        tokio::time::timeout(std::time::Duration::from_secs(2), cancel.cancelled())
            .await
            .expect("SIGTERM did not cancel the pipeline");
    }
}
