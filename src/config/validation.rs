//! Config validation: unknown-key detection with Levenshtein suggestions
//! and suspicious-value warnings.
//!
//! Two-pass parse approach: first deserialize raw TOML into `toml::Value`,
//! walk the key tree, compare against known field names, and emit warnings
//! with "did you mean?" suggestions. Then proceed with normal serde
//! deserialization. Warnings never break existing configs.

use std::collections::HashSet;

use super::NodeConfig;

/// A non-fatal config warning (typo, suspicious value).
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
    pub suggestion: Option<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(ref s) = self.suggestion {
            write!(f, ", did you mean '{s}'?")?;
        }
        Ok(())
    }
}

// ============================================================================
// Known Config Keys
// ============================================================================

/// Returns the complete set of valid dotted key paths for NodeConfig.
///
/// Keys inside arrays of tables share one path (`sensors.vibration.name`).
/// Any new field added to NodeConfig must be added here too.
pub fn known_config_keys() -> HashSet<&'static str> {
    let keys: &[&str] = &[
        "device_id",
        // [broker]
        "broker",
        "broker.url",
        "broker.topic",
        "broker.qos",
        "broker.timeout_secs",
        // [intervals]
        "intervals",
        "intervals.buffer_fill_ms",
        "intervals.metrics_ms",
        "intervals.publish_ms",
        "intervals.temperature_secs",
        "intervals.current_ms",
        "intervals.watchdog_secs",
        "intervals.heartbeat_timeout_secs",
        // [queue]
        "queue",
        "queue.path",
        "queue.max_messages",
        // [calibration]
        "calibration",
        "calibration.vibration",
        "calibration.current",
        "calibration.vibration_samples",
        "calibration.current_samples",
        // [spectrum]
        "spectrum",
        "spectrum.peaks",
        "spectrum.suppress_until_full",
        // [[sensors.vibration]]
        "sensors",
        "sensors.vibration",
        "sensors.vibration.name",
        "sensors.vibration.bus",
        "sensors.vibration.address",
        "sensors.vibration.sample_rate_hz",
        "sensors.vibration.buffer_size",
        "sensors.vibration.dlpf",
        // [[sensors.temperature]]
        "sensors.temperature",
        "sensors.temperature.name",
        "sensors.temperature.device_id",
        // [sensors.current]
        "sensors.current",
        "sensors.current.samples_per_reading",
        "sensors.current.volts_to_amps",
        "sensors.current.threshold_amps",
        "sensors.current.adc",
        "sensors.current.adc.bus",
        "sensors.current.adc.address",
        "sensors.current.adc.gain",
        "sensors.current.channels",
        "sensors.current.channels.name",
        "sensors.current.channels.adc_channel",
        "sensors.current.channels.offset",
        "sensors.current.channels.scale",
    ];
    keys.iter().copied().collect()
}

// ============================================================================
// TOML Key Walking
// ============================================================================

/// Recursively walks a `toml::Value` tree and collects all dotted key paths.
///
/// For example, a table `{ a = { b = 1, c = 2 } }` yields:
/// `["a", "a.b", "a.c"]`. Tables inside arrays contribute their keys
/// under the array's path, deduplicated.
pub fn walk_toml_keys(value: &toml::Value, prefix: &str) -> Vec<String> {
    let mut keys = Vec::new();
    if let Some(table) = value.as_table() {
        for (k, v) in table {
            let path = if prefix.is_empty() {
                k.clone()
            } else {
                format!("{prefix}.{k}")
            };
            keys.push(path.clone());
            match v {
                toml::Value::Table(_) => keys.extend(walk_toml_keys(v, &path)),
                toml::Value::Array(items) => {
                    for item in items.iter().filter(|i| i.is_table()) {
                        for key in walk_toml_keys(item, &path) {
                            if !keys.contains(&key) {
                                keys.push(key);
                            }
                        }
                    }
                }
                _ => {}
            }
        }
    }
    keys
}

// ============================================================================
// Levenshtein Distance
// ============================================================================

/// Compute the Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

/// Suggest the closest known key for an unknown key, if within edit distance 3.
pub fn suggest_correction(unknown: &str, known: &HashSet<&str>) -> Option<String> {
    known
        .iter()
        .map(|k| (*k, levenshtein(unknown, k)))
        .filter(|(_, dist)| *dist <= 3)
        // Tie-break on the key so suggestions don't depend on hash order
        .min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(b.0)))
        .map(|(k, _)| k.to_string())
}

// ============================================================================
// Unknown Key Validation (entry point)
// ============================================================================

/// Parse a raw TOML string and return warnings for any unknown config keys.
///
/// This does NOT fail on unknown keys, it only warns.
pub fn validate_unknown_keys(raw_toml: &str) -> Vec<ValidationWarning> {
    let value: toml::Value = match raw_toml.parse() {
        Ok(v) => v,
        Err(_) => return Vec::new(), // parse errors are handled by serde later
    };

    let known = known_config_keys();
    walk_toml_keys(&value, "")
        .into_iter()
        .filter(|key| !known.contains(key.as_str()))
        .map(|key| ValidationWarning {
            suggestion: suggest_correction(&key, &known),
            message: format!("Unknown config key '{key}'"),
            field: key,
        })
        .collect()
}

// ============================================================================
// Suspicious Values
// ============================================================================

/// Highest output data rate of the MPU-6050 accelerometer path (Hz)
const MAX_ACCEL_RATE_HZ: f64 = 1000.0;

/// Values that work but are probably not what the operator meant.
pub fn validate_suspicious_values(config: &NodeConfig) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for s in &config.sensors.vibration {
        if s.sample_rate_hz > MAX_ACCEL_RATE_HZ {
            warnings.push(ValidationWarning {
                field: format!("sensors.vibration[{}].sample_rate_hz", s.name),
                message: format!(
                    "sample_rate_hz = {} exceeds the accelerometer maximum \
                     ({MAX_ACCEL_RATE_HZ} Hz) and will be clamped",
                    s.sample_rate_hz
                ),
                suggestion: None,
            });
        }
        let period_ms = 1000.0 / s.sample_rate_hz;
        if s.sample_rate_hz > 0.0 && (config.intervals.buffer_fill_ms as f64) > period_ms {
            warnings.push(ValidationWarning {
                field: "intervals.buffer_fill_ms".to_string(),
                message: format!(
                    "buffer_fill_ms = {} is slower than the {:.1} ms sample period of '{}'; \
                     its window fills at {:.0} Hz instead",
                    config.intervals.buffer_fill_ms,
                    period_ms,
                    s.name,
                    1000.0 / config.intervals.buffer_fill_ms as f64
                ),
                suggestion: None,
            });
        }
    }

    if config.intervals.heartbeat_timeout_secs < config.intervals.watchdog_secs {
        warnings.push(ValidationWarning {
            field: "intervals.heartbeat_timeout_secs".to_string(),
            message: format!(
                "heartbeat_timeout_secs = {} is shorter than watchdog_secs = {}",
                config.intervals.heartbeat_timeout_secs, config.intervals.watchdog_secs
            ),
            suggestion: None,
        });
    }

    warnings
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein_identical() {
        assert_eq!(levenshtein("hello", "hello"), 0);
    }

    #[test]
    fn test_levenshtein_one_edit() {
        assert_eq!(levenshtein("adres", "adress"), 1);
    }

    #[test]
    fn test_levenshtein_empty() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("abc", ""), 3);
    }

    #[test]
    fn test_walk_toml_keys_nested() {
        let toml: toml::Value = r#"
            [broker]
            [broker.extra]
            depth = 1
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert!(keys.contains(&"broker".to_string()));
        assert!(keys.contains(&"broker.extra".to_string()));
        assert!(keys.contains(&"broker.extra.depth".to_string()));
    }

    #[test]
    fn test_walk_toml_keys_array_of_tables() {
        let toml: toml::Value = r#"
            [[sensors.vibration]]
            name = "engine"
            [[sensors.vibration]]
            name = "gearbox"
            address = "0x69"
        "#
        .parse()
        .unwrap();
        let keys = walk_toml_keys(&toml, "");
        assert_eq!(
            keys.iter().filter(|k| *k == "sensors.vibration.name").count(),
            1
        );
        assert!(keys.contains(&"sensors.vibration.address".to_string()));
    }

    #[test]
    fn test_typo_key_produces_warning_with_suggestion() {
        let toml_str = r#"
[[sensors.temperature]]
name = "oil"
device_di = "28-000001111111"
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field, "sensors.temperature.device_di");
        assert_eq!(
            warnings[0].suggestion.as_deref(),
            Some("sensors.temperature.device_id")
        );
    }

    #[test]
    fn test_all_valid_keys_produce_zero_warnings() {
        let toml_str = r#"
device_id = "station_9"

[broker]
url = "http://broker:8080"

[[sensors.current.channels]]
name = "phase_a"
adc_channel = 0

[sensors.current.adc]
gain = 2.0
"#;
        let warnings = validate_unknown_keys(toml_str);
        assert!(warnings.is_empty(), "Expected 0 warnings, got: {warnings:?}");
    }

    #[test]
    fn test_suggest_correction_no_match_for_garbage() {
        let known = known_config_keys();
        assert!(suggest_correction("completely_unrelated_garbage_key_xyz", &known).is_none());
    }

    #[test]
    fn test_suspicious_rate_and_fill_interval() {
        let mut config = NodeConfig::default();
        config.sensors.vibration =
            vec![super::super::VibrationSensorConfig::at("engine", "0x68")];
        config.sensors.vibration[0].sample_rate_hz = 2000.0;

        let warnings = validate_suspicious_values(&config);
        assert!(warnings.iter().any(|w| w.field.ends_with("sample_rate_hz")));
        let fill = warnings
            .iter()
            .find(|w| w.field == "intervals.buffer_fill_ms")
            .unwrap();
        assert!(fill.message.contains("fills at 250 Hz"));
    }

    #[test]
    fn test_defaults_have_no_suspicious_values() {
        let config = NodeConfig {
            sensors: NodeConfig::simulation_sensors(),
            ..NodeConfig::default()
        };
        assert!(validate_suspicious_values(&config).is_empty());
    }
}
