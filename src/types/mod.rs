//! Shared data structures for the rotor telemetry node
//!
//! This module defines the value types that flow through the pipeline:
//! - Readings: ThreeAxisReading (raw accelerometer samples), FftPeak, VibrationMetrics
//! - State: SensorKind, SensorState, SensorErrorKind (per-sensor lifecycle)
//! - Snapshot: TelemetrySnapshot (the JSON document published to the broker)
//! - Status: ConnectionState, StatusEvent (connectivity and delivery signals)

mod readings;
mod snapshot;
mod state;
mod status;

pub use readings::*;
pub use snapshot::*;
pub use state::*;
pub use status::*;
