//! Per-sensor lifecycle state: SensorKind, SensorState, SensorErrorKind

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::VibrationMetrics;

// ============================================================================
// Sensor Kind
// ============================================================================

/// The three sensor families the node polls
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SensorKind {
    Vibration,
    Temperature,
    Current,
}

impl SensorKind {
    pub const ALL: [SensorKind; 3] = [
        SensorKind::Vibration,
        SensorKind::Temperature,
        SensorKind::Current,
    ];

    /// Key used for this kind in the published snapshot
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Vibration => "vibration",
            SensorKind::Temperature => "temperature",
            SensorKind::Current => "current",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Error Kinds
// ============================================================================

/// Why a sensor is not reporting a fresh reading
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SensorErrorKind {
    NotInitialized,
    ConfigIncomplete,
    InitializationFailed,
    CalibrationFailed,
    ReadFailed,
    BufferUpdateFailed,
    MetricsFailed,
}

impl SensorErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorErrorKind::NotInitialized => "not_initialized",
            SensorErrorKind::ConfigIncomplete => "config_incomplete",
            SensorErrorKind::InitializationFailed => "initialization_failed",
            SensorErrorKind::CalibrationFailed => "calibration_failed",
            SensorErrorKind::ReadFailed => "read_failed",
            SensorErrorKind::BufferUpdateFailed => "buffer_update_failed",
            SensorErrorKind::MetricsFailed => "metrics_failed",
        }
    }

    /// Permanent errors exclude the sensor from polling until it is rebuilt
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SensorErrorKind::ConfigIncomplete
                | SensorErrorKind::InitializationFailed
                | SensorErrorKind::CalibrationFailed
        )
    }
}

impl std::fmt::Display for SensorErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Sensor State
// ============================================================================

/// Latest good value produced by a sensor
#[derive(Debug, Clone, PartialEq)]
pub enum SensorReading {
    Vibration(VibrationMetrics),
    /// Degrees Celsius
    Temperature(f64),
    /// RMS amperes
    Current(f64),
}

impl SensorReading {
    /// Wire representation: metrics object or bare number
    pub fn to_value(&self) -> Value {
        match self {
            SensorReading::Vibration(metrics) => {
                serde_json::to_value(metrics.rounded()).unwrap_or(Value::Null)
            }
            SensorReading::Temperature(celsius) => json!(celsius),
            SensorReading::Current(amps) => json!(amps),
        }
    }
}

/// Lifecycle of one configured sensor
///
/// `Uninitialized → Initializing → Calibrating → Active`, with any failure
/// moving to `Error`. Transient read errors keep the last good reading and
/// are cleared by the next successful read.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SensorState {
    #[default]
    Uninitialized,
    Initializing,
    Calibrating,
    Active(SensorReading),
    Error {
        kind: SensorErrorKind,
        detail: String,
        last_reading: Option<SensorReading>,
    },
}

impl SensorState {
    pub fn error(kind: SensorErrorKind, detail: impl Into<String>) -> Self {
        SensorState::Error {
            kind,
            detail: detail.into(),
            last_reading: None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, SensorState::Active(_))
    }

    pub fn error_kind(&self) -> Option<SensorErrorKind> {
        match self {
            SensorState::Error { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Most recent good reading, whether active or held through an error
    pub fn last_reading(&self) -> Option<&SensorReading> {
        match self {
            SensorState::Active(reading) => Some(reading),
            SensorState::Error { last_reading, .. } => last_reading.as_ref(),
            _ => None,
        }
    }

    /// Move to `Error`, carrying forward the last good reading
    pub fn into_failed(self, kind: SensorErrorKind, detail: impl Into<String>) -> Self {
        let last_reading = match self {
            SensorState::Active(reading) => Some(reading),
            SensorState::Error { last_reading, .. } => last_reading,
            _ => None,
        };
        SensorState::Error {
            kind,
            detail: detail.into(),
            last_reading,
        }
    }

    /// Entry for this sensor in the published snapshot
    pub fn to_report(&self) -> Value {
        match self {
            SensorState::Uninitialized => json!({ "error": SensorErrorKind::NotInitialized }),
            SensorState::Initializing => json!({ "status": "initializing" }),
            SensorState::Calibrating => json!({ "status": "calibrating" }),
            SensorState::Active(reading) => reading.to_value(),
            SensorState::Error { kind, detail, .. } => {
                json!({ "error": kind, "details": detail })
            }
        }
    }
}
