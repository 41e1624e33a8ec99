//! Shared latest-state registry
//!
//! One `RwLock` per sensor-type map. Each entry is written only by the
//! poller that owns the sensor and read by the publish loop.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::warn;

use crate::types::{
    SensorErrorKind, SensorKind, SensorReading, SensorState, TelemetrySnapshot, UNCONFIGURED_ENTRY,
};

type StateMap = BTreeMap<String, SensorState>;

/// Latest state of every configured sensor, keyed by type then name
#[derive(Debug, Default)]
pub struct SensorRegistry {
    vibration: RwLock<StateMap>,
    temperature: RwLock<StateMap>,
    current: RwLock<StateMap>,
}

impl SensorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn map(&self, kind: SensorKind) -> &RwLock<StateMap> {
        match kind {
            SensorKind::Vibration => &self.vibration,
            SensorKind::Temperature => &self.temperature,
            SensorKind::Current => &self.current,
        }
    }

    fn read(&self, kind: SensorKind) -> RwLockReadGuard<'_, StateMap> {
        self.map(kind).read().unwrap_or_else(|poisoned| {
            warn!(kind = %kind, "Sensor registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self, kind: SensorKind) -> RwLockWriteGuard<'_, StateMap> {
        self.map(kind).write().unwrap_or_else(|poisoned| {
            warn!(kind = %kind, "Sensor registry lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Replace every entry of one sensor type
    pub fn reset_kind(
        &self,
        kind: SensorKind,
        entries: impl IntoIterator<Item = (String, SensorState)>,
    ) {
        let mut map = self.write(kind);
        map.clear();
        map.extend(entries);
    }

    pub fn set(&self, kind: SensorKind, name: &str, state: SensorState) {
        self.write(kind).insert(name.to_string(), state);
    }

    pub fn set_active(&self, kind: SensorKind, name: &str, reading: SensorReading) {
        self.set(kind, name, SensorState::Active(reading));
    }

    /// Move a sensor to `Error`, keeping its last good reading
    pub fn mark_failed(
        &self,
        kind: SensorKind,
        name: &str,
        error: SensorErrorKind,
        detail: impl Into<String>,
    ) {
        let mut map = self.write(kind);
        let previous = map.remove(name).unwrap_or_default();
        map.insert(name.to_string(), previous.into_failed(error, detail));
    }

    pub fn get(&self, kind: SensorKind, name: &str) -> Option<SensorState> {
        self.read(kind).get(name).cloned()
    }

    pub fn states(&self, kind: SensorKind) -> BTreeMap<String, SensorState> {
        self.read(kind).clone()
    }

    pub fn names(&self, kind: SensorKind) -> Vec<String> {
        self.read(kind).keys().cloned().collect()
    }

    /// Snapshot for publishing; empty types carry a `not_configured_type` entry
    pub fn snapshot(&self, device_id: &str) -> TelemetrySnapshot {
        let mut snapshot = TelemetrySnapshot::new(device_id);
        for kind in SensorKind::ALL {
            let map = self.read(kind);
            let section = snapshot.section_mut(kind);
            if map.is_empty() {
                section.insert(
                    UNCONFIGURED_ENTRY.to_string(),
                    serde_json::json!({ "error": "not_configured_type" }),
                );
                continue;
            }
            for (name, state) in map.iter() {
                section.insert(name.clone(), state.to_report());
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snapshot_lists_every_sensor() {
        let registry = SensorRegistry::new();
        registry.reset_kind(
            SensorKind::Temperature,
            vec![
                ("engine".to_string(), SensorState::Active(SensorReading::Temperature(70.5))),
                ("gearbox".to_string(), SensorState::Uninitialized),
                (
                    "bearing".to_string(),
                    SensorState::error(SensorErrorKind::InitializationFailed, "probe missing"),
                ),
            ],
        );

        let snapshot = registry.snapshot("station_1");
        assert_eq!(snapshot.temperature.len(), 3);
        assert_eq!(snapshot.temperature["engine"], json!(70.5));
        assert_eq!(snapshot.temperature["gearbox"], json!({ "error": "not_initialized" }));
        assert_eq!(snapshot.temperature["bearing"]["error"], "initialization_failed");
        assert_eq!(
            snapshot.vibration[UNCONFIGURED_ENTRY],
            json!({ "error": "not_configured_type" })
        );
    }

    #[test]
    fn test_mark_failed_then_recover() {
        let registry = SensorRegistry::new();
        registry.set_active(SensorKind::Current, "motor", SensorReading::Current(12.0));
        registry.mark_failed(SensorKind::Current, "motor", SensorErrorKind::ReadFailed, "i/o");

        let state = registry.get(SensorKind::Current, "motor").unwrap();
        assert_eq!(state.error_kind(), Some(SensorErrorKind::ReadFailed));
        assert_eq!(state.last_reading(), Some(&SensorReading::Current(12.0)));

        registry.set_active(SensorKind::Current, "motor", SensorReading::Current(11.0));
        assert!(registry.get(SensorKind::Current, "motor").unwrap().is_active());
    }

    #[test]
    fn test_reset_kind_replaces_entries() {
        let registry = SensorRegistry::new();
        registry.set(SensorKind::Vibration, "old", SensorState::Initializing);
        registry.reset_kind(
            SensorKind::Vibration,
            vec![("new".to_string(), SensorState::Uninitialized)],
        );
        assert_eq!(registry.names(SensorKind::Vibration), vec!["new".to_string()]);
    }
}
