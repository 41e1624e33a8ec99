//! Rotor Telemetry: edge node for rotating machinery
//!
//! Polls vibration, temperature and motor-current sensors, turns raw
//! samples into engineering values and publishes a periodic JSON snapshot
//! to a broker, buffering to disk while the broker is unreachable.
//!
//! ## Architecture
//!
//! - **Acquisition**: I2C accelerometers, ADS1115 ADC, 1-Wire probes, simulated bench
//! - **Processing**: sliding windows, RMS/peak, FFT peaks, calibration
//! - **Pipeline**: one poller task per sensor type, publish loop, supervisor
//! - **Publish**: transport trait, store-and-forward coordinator
//! - **Storage**: sled-backed bounded outbound queue
//! - **Background**: connection watchdog and heartbeat supervision

pub mod acquisition;
pub mod background;
pub mod config;
pub mod pipeline;
pub mod processing;
pub mod publish;
pub mod storage;
pub mod types;

pub use config::{NodeConfig, SharedConfig};
pub use pipeline::{Pipeline, PipelineCommand, SensorRegistry};
pub use publish::{PublishCoordinator, Transport};
pub use storage::DurableOutboundQueue;
pub use types::{SensorKind, SensorReading, SensorState, StatusEvent, TelemetrySnapshot};
