//! Telemetry snapshot published to the broker

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::SensorKind;

/// Name used when a sensor family has no configured sensors
pub const UNCONFIGURED_ENTRY: &str = "general";

/// One publish cycle's view of every configured sensor
///
/// Serialized as
/// `{"device_id", "timestamp", "vibration": {..}, "temperature": {..}, "current": {..}}`
/// where each map is keyed by sensor name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub device_id: String,
    /// Unix seconds with sub-second precision
    pub timestamp: f64,
    pub vibration: BTreeMap<String, Value>,
    pub temperature: BTreeMap<String, Value>,
    pub current: BTreeMap<String, Value>,
}

impl TelemetrySnapshot {
    /// Empty snapshot stamped with the current time
    pub fn new(device_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            device_id: device_id.into(),
            timestamp: now.timestamp_micros() as f64 / 1_000_000.0,
            vibration: BTreeMap::new(),
            temperature: BTreeMap::new(),
            current: BTreeMap::new(),
        }
    }

    pub fn section(&self, kind: SensorKind) -> &BTreeMap<String, Value> {
        match kind {
            SensorKind::Vibration => &self.vibration,
            SensorKind::Temperature => &self.temperature,
            SensorKind::Current => &self.current,
        }
    }

    pub fn section_mut(&mut self, kind: SensorKind) -> &mut BTreeMap<String, Value> {
        match kind {
            SensorKind::Vibration => &mut self.vibration,
            SensorKind::Temperature => &mut self.temperature,
            SensorKind::Current => &mut self.current,
        }
    }

    /// Encode as the JSON payload sent over the transport
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
