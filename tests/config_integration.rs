//! Config Integration Tests
//!
//! Loads configuration files from disk the way the binary does and checks
//! that the shipped example file stays in sync with the config schema.

use rotor_telemetry::config::{validation, ConfigError, ConfigSource, NodeConfig};
use rotor_telemetry::types::{SensorKind, SensorState};
use std::path::PathBuf;

fn example_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("node_config.example.toml")
}

#[test]
fn test_example_config_loads_cleanly() {
    let path = example_path();
    let (config, source) = NodeConfig::load(Some(&path)).unwrap();
    assert_eq!(source, ConfigSource::Cli(path.clone()));
    assert_eq!(config.sensor_count(), 7);
    assert_eq!(config.sensors.names(SensorKind::Current), vec!["phase_a", "phase_b", "phase_c"]);

    // No typos, no suspicious values
    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(validation::validate_unknown_keys(&raw).is_empty());
    assert!(validation::validate_suspicious_values(&config).is_empty());

    // The example documents the built-in defaults
    let defaults = NodeConfig::default();
    assert_eq!(config.broker, defaults.broker);
    assert_eq!(config.intervals, defaults.intervals);
    assert_eq!(config.queue, defaults.queue);
    assert_eq!(config.sensors, NodeConfig::simulation_sensors());
}

#[test]
fn test_explicit_missing_file_is_an_error() {
    let tmp = tempfile::tempdir().unwrap();
    let missing = tmp.path().join("absent.toml");
    assert!(matches!(
        NodeConfig::load(Some(&missing)),
        Err(ConfigError::Io(path, _)) if path == missing
    ));
}

#[test]
fn test_unknown_keys_warn_but_load() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("node_config.toml");
    std::fs::write(
        &path,
        r#"
        device_id = "mill_3"
        devce_id = "typo"

        [[sensors.temperature]]
        name = "bearing"
        device_id = "28-0000aa"
        "#,
    )
    .unwrap();

    let config = NodeConfig::load_from_file(&path).unwrap();
    assert_eq!(config.device_id, "mill_3");

    let warnings = validation::validate_unknown_keys(&std::fs::read_to_string(&path).unwrap());
    assert_eq!(warnings.len(), 1);
    assert_eq!(warnings[0].field, "devce_id");
    assert_eq!(warnings[0].suggestion.as_deref(), Some("device_id"));
}

#[test]
fn test_invalid_file_reports_every_problem() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("node_config.toml");
    std::fs::write(
        &path,
        r#"
        [broker]
        url = "mqtt://broker:1883"

        [intervals]
        publish_ms = 0
        "#,
    )
    .unwrap();

    match NodeConfig::load_from_file(&path) {
        Err(ConfigError::Validation(errors)) => {
            assert!(errors.iter().any(|e| e.contains("broker.url")));
            assert!(errors.iter().any(|e| e.contains("publish_ms")));
        }
        other => panic!("expected validation failure, got {other:?}"),
    }
}

#[test]
fn test_incomplete_sensor_entries_become_error_states() {
    let config = NodeConfig::from_toml_str(
        r#"
        [[sensors.vibration]]
        name = "pump"

        [[sensors.temperature]]
        name = "bearing"

        [[sensors.current.channels]]
        name = "phase_a"
        adc_channel = 9
        "#,
    )
    .unwrap();
    assert_eq!(config.sensor_count(), 3);

    for kind in SensorKind::ALL {
        let states = rotor_telemetry::pipeline::initial_states(&config, kind);
        assert_eq!(states.len(), 1);
        assert!(matches!(
            &states[0].1,
            SensorState::Error { kind, .. } if kind.as_str() == "config_incomplete"
        ));
    }
}
