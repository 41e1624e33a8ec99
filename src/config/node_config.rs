//! Node Configuration - sensors, intervals, broker and queue settings as TOML
//!
//! Each struct implements `Default` from `defaults.rs`, so an empty file (or
//! no file at all) yields a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use super::defaults;
use crate::types::SensorKind;

/// Environment variable naming a config file
pub const CONFIG_ENV_VAR: &str = "ROTOR_CONFIG";

/// Config file looked up in the working directory
pub const LOCAL_CONFIG_FILE: &str = "node_config.toml";

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for one telemetry node.
///
/// Load with `NodeConfig::load()` which searches:
/// 1. An explicit path (the `--config` flag)
/// 2. `$ROTOR_CONFIG`
/// 3. `./node_config.toml`
/// 4. Built-in defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identifier stamped on every snapshot
    #[serde(default = "default_device_id")]
    pub device_id: String,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub intervals: IntervalConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default)]
    pub spectrum: SpectrumConfig,

    #[serde(default)]
    pub sensors: SensorsConfig,
}

fn default_device_id() -> String {
    defaults::DEVICE_ID.to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            device_id: default_device_id(),
            broker: BrokerConfig::default(),
            intervals: IntervalConfig::default(),
            queue: QueueConfig::default(),
            calibration: CalibrationConfig::default(),
            spectrum: SpectrumConfig::default(),
            sensors: SensorsConfig::default(),
        }
    }
}

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Cli(PathBuf),
    Env(PathBuf),
    Local(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Cli(p) => write!(f, "--config {}", p.display()),
            ConfigSource::Env(p) => write!(f, "${CONFIG_ENV_VAR} ({})", p.display()),
            ConfigSource::Local(p) => write!(f, "{}", p.display()),
            ConfigSource::Defaults => write!(f, "built-in defaults"),
        }
    }
}

impl NodeConfig {
    /// Load configuration using the standard search order.
    ///
    /// An explicit path must load; the env var and local file fall back
    /// with a warning, as a missing optional file should not stop the node.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource), ConfigError> {
        // 1. Explicit path
        if let Some(path) = explicit {
            let config = Self::load_from_file(path)?;
            info!(
                path = %path.display(),
                device = %config.device_id,
                "Loaded node config from --config"
            );
            return Ok((config, ConfigSource::Cli(path.to_path_buf())));
        }

        // 2. Env var
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(
                            path = %p.display(),
                            device = %config.device_id,
                            "Loaded node config from {}",
                            CONFIG_ENV_VAR
                        );
                        return Ok((config, ConfigSource::Env(p)));
                    }
                    Err(e) => {
                        warn!(
                            path = %p.display(),
                            error = %e,
                            "Failed to load config from {}, falling back",
                            CONFIG_ENV_VAR
                        );
                    }
                }
            } else {
                warn!(path = %path, "{} points to non-existent file, falling back", CONFIG_ENV_VAR);
            }
        }

        // 3. ./node_config.toml
        let local = PathBuf::from(LOCAL_CONFIG_FILE);
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(
                        device = %config.device_id,
                        "Loaded node config from ./{}",
                        LOCAL_CONFIG_FILE
                    );
                    return Ok((config, ConfigSource::Local(local)));
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./{}, using defaults", LOCAL_CONFIG_FILE);
                }
            }
        }

        // 4. Defaults
        info!("No {} found, using built-in defaults", LOCAL_CONFIG_FILE);
        Ok((Self::default(), ConfigSource::Defaults))
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::parse(&contents, path)
    }

    /// Parse TOML text that did not come from a file (tests, inline configs)
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Self::parse(contents, Path::new("<inline>"))
    }

    fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        // Two-pass: check for unknown keys first (warnings only)
        for w in super::validation::validate_unknown_keys(contents) {
            warn!("{}", w);
        }

        let config: Self =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(origin.to_path_buf(), e))?;
        config.validate()?;
        for w in super::validation::validate_suspicious_values(&config) {
            warn!(field = %w.field, "{}", w);
        }
        Ok(config)
    }

    /// Serialize the current config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Reject values that cannot work at all.
    ///
    /// Incomplete sensor entries (missing address, probe id or channel) are
    /// not errors here; those sensors report `config_incomplete` at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.device_id.trim().is_empty() {
            errors.push("device_id must not be empty".to_string());
        }

        let b = &self.broker;
        if !(b.url.starts_with("http://") || b.url.starts_with("https://")) {
            errors.push(format!("broker.url '{}' must start with http:// or https://", b.url));
        }
        if b.qos > 2 {
            errors.push(format!("broker.qos = {} must be 0, 1 or 2", b.qos));
        }
        if b.topic.trim().is_empty() {
            errors.push("broker.topic must not be empty".to_string());
        }
        if b.timeout_secs == 0 {
            errors.push("broker.timeout_secs must be > 0".to_string());
        }

        let i = &self.intervals;
        for (name, value) in [
            ("intervals.buffer_fill_ms", i.buffer_fill_ms),
            ("intervals.metrics_ms", i.metrics_ms),
            ("intervals.publish_ms", i.publish_ms),
            ("intervals.current_ms", i.current_ms),
            ("intervals.watchdog_secs", i.watchdog_secs),
            ("intervals.heartbeat_timeout_secs", i.heartbeat_timeout_secs),
        ] {
            if value == 0 {
                errors.push(format!("{name} must be > 0"));
            }
        }
        check_positive(i.temperature_secs, "intervals.temperature_secs", &mut errors);

        if self.queue.max_messages == 0 {
            errors.push("queue.max_messages must be > 0".to_string());
        }

        let c = &self.calibration;
        if c.vibration && c.vibration_samples == 0 {
            errors.push(
                "calibration.vibration_samples must be > 0 when calibration is on".to_string(),
            );
        }
        if c.current && c.current_samples == 0 {
            errors
                .push("calibration.current_samples must be > 0 when calibration is on".to_string());
        }

        let mut names = std::collections::HashSet::new();
        for s in &self.sensors.vibration {
            check_name(&s.name, "sensors.vibration", &mut names, &mut errors);
            check_positive(
                s.sample_rate_hz,
                &format!("sensors.vibration[{}].sample_rate_hz", s.name),
                &mut errors,
            );
            if s.buffer_size < 2 {
                errors.push(format!(
                    "sensors.vibration[{}].buffer_size = {} must be >= 2",
                    s.name, s.buffer_size
                ));
            }
            if s.dlpf > 6 {
                errors.push(format!(
                    "sensors.vibration[{}].dlpf = {} must be 0..=6",
                    s.name, s.dlpf
                ));
            }
        }

        names.clear();
        for s in &self.sensors.temperature {
            check_name(&s.name, "sensors.temperature", &mut names, &mut errors);
        }

        names.clear();
        let cur = &self.sensors.current;
        if crate::acquisition::AdcGain::from_value(cur.adc.gain).is_none() {
            errors.push(format!(
                "sensors.current.adc.gain = {} must be one of 2/3, 1, 2, 4, 8, 16",
                cur.adc.gain
            ));
        }
        if cur.samples_per_reading == 0 {
            errors.push("sensors.current.samples_per_reading must be > 0".to_string());
        }
        check_positive(cur.volts_to_amps, "sensors.current.volts_to_amps", &mut errors);
        if !cur.threshold_amps.is_finite() || cur.threshold_amps < 0.0 {
            errors.push(format!(
                "sensors.current.threshold_amps = {} must be >= 0",
                cur.threshold_amps
            ));
        }
        for ch in &cur.channels {
            check_name(&ch.name, "sensors.current.channels", &mut names, &mut errors);
            if !ch.offset.is_finite() || !ch.scale.is_finite() {
                errors.push(format!(
                    "sensors.current.channels[{}]: offset and scale must be finite",
                    ch.name
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// Number of configured sensors across all types
    pub fn sensor_count(&self) -> usize {
        self.sensors.vibration.len()
            + self.sensors.temperature.len()
            + self.sensors.current.channels.len()
    }

    /// Override both calibration switches (the `--calibrate` / `--no-calibrate` flags)
    pub fn with_calibration_override(mut self, calibrate: Option<bool>) -> Self {
        if let Some(on) = calibrate {
            self.calibration.vibration = on;
            self.calibration.current = on;
        }
        self
    }

    /// Sensor types whose poller settings differ from `other`
    pub fn changed_pollers(&self, other: &NodeConfig) -> Vec<SensorKind> {
        let mut changed = Vec::new();
        if self.sensors.vibration != other.sensors.vibration
            || self.calibration.vibration != other.calibration.vibration
            || self.calibration.vibration_samples != other.calibration.vibration_samples
            || self.spectrum != other.spectrum
            || self.intervals.buffer_fill_ms != other.intervals.buffer_fill_ms
            || self.intervals.metrics_ms != other.intervals.metrics_ms
        {
            changed.push(SensorKind::Vibration);
        }
        if self.sensors.temperature != other.sensors.temperature
            || self.intervals.temperature_secs != other.intervals.temperature_secs
        {
            changed.push(SensorKind::Temperature);
        }
        if self.sensors.current != other.sensors.current
            || self.calibration.current != other.calibration.current
            || self.calibration.current_samples != other.calibration.current_samples
            || self.intervals.current_ms != other.intervals.current_ms
        {
            changed.push(SensorKind::Current);
        }
        changed
    }

    /// Demo sensor set matching the simulated bench
    pub fn simulation_sensors() -> SensorsConfig {
        SensorsConfig {
            vibration: vec![
                VibrationSensorConfig::at("engine", "0x68"),
                VibrationSensorConfig::at("gearbox", "0x69"),
            ],
            temperature: vec![
                TemperatureSensorConfig {
                    name: "engine".to_string(),
                    device_id: Some("28-00000a1b2c3d".to_string()),
                },
                TemperatureSensorConfig {
                    name: "gearbox".to_string(),
                    device_id: Some("28-00000d4e5f60".to_string()),
                },
            ],
            current: CurrentSensorsConfig {
                channels: ["phase_a", "phase_b", "phase_c"]
                    .iter()
                    .zip(0u8..)
                    .map(|(name, ch)| CurrentChannelConfig {
                        name: (*name).to_string(),
                        adc_channel: Some(ch),
                        ..CurrentChannelConfig::default()
                    })
                    .collect(),
                ..CurrentSensorsConfig::default()
            },
        }
    }
}

fn check_positive(value: f64, name: &str, errors: &mut Vec<String>) {
    // NaN compares false against everything
    if !value.is_finite() || value <= 0.0 {
        errors.push(format!("{name} = {value} must be a finite value > 0"));
    }
}

fn check_name(
    name: &str,
    section: &str,
    seen: &mut std::collections::HashSet<String>,
    errors: &mut Vec<String>,
) {
    if name.trim().is_empty() {
        errors.push(format!("{section}: sensor name must not be empty"));
    } else if !seen.insert(name.to_string()) {
        errors.push(format!("{section}: duplicate sensor name '{name}'"));
    }
}

/// Parse an address written as hex (`0x68`) or decimal (`104`)
pub fn parse_address(text: &str) -> Option<u16> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config I/O error ({}): {1}", .0.display())]
    Io(PathBuf, std::io::Error),
    #[error("Config parse error ({}): {1}", .0.display())]
    Parse(PathBuf, toml::de::Error),
    #[error("Config serialization error: {0}")]
    Serialize(toml::ser::Error),
    #[error("Config validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),
    #[error("No sensors configured")]
    NoSensors,
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base URL of the broker's HTTP bridge
    pub url: String,
    pub topic: String,
    pub qos: u8,
    pub timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: defaults::BROKER_URL.to_string(),
            topic: defaults::BROKER_TOPIC.to_string(),
            qos: defaults::BROKER_QOS,
            timeout_secs: defaults::BROKER_TIMEOUT_SECS,
        }
    }
}

impl BrokerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalConfig {
    pub buffer_fill_ms: u64,
    pub metrics_ms: u64,
    pub publish_ms: u64,
    pub temperature_secs: f64,
    pub current_ms: u64,
    pub watchdog_secs: u64,
    pub heartbeat_timeout_secs: u64,
}

impl Default for IntervalConfig {
    fn default() -> Self {
        Self {
            buffer_fill_ms: defaults::BUFFER_FILL_INTERVAL_MS,
            metrics_ms: defaults::METRICS_INTERVAL_MS,
            publish_ms: defaults::PUBLISH_INTERVAL_MS,
            temperature_secs: defaults::TEMPERATURE_INTERVAL_SECS,
            current_ms: defaults::CURRENT_INTERVAL_MS,
            watchdog_secs: defaults::WATCHDOG_INTERVAL_SECS,
            heartbeat_timeout_secs: defaults::HEARTBEAT_TIMEOUT_SECS,
        }
    }
}

impl IntervalConfig {
    pub fn buffer_fill(&self) -> Duration {
        Duration::from_millis(self.buffer_fill_ms)
    }

    pub fn metrics(&self) -> Duration {
        Duration::from_millis(self.metrics_ms)
    }

    pub fn publish(&self) -> Duration {
        Duration::from_millis(self.publish_ms)
    }

    /// Falls back to the default for values `validate()` would reject
    pub fn temperature(&self) -> Duration {
        Duration::try_from_secs_f64(self.temperature_secs)
            .unwrap_or_else(|_| Duration::from_secs_f64(defaults::TEMPERATURE_INTERVAL_SECS))
    }

    pub fn current(&self) -> Duration {
        Duration::from_millis(self.current_ms)
    }

    pub fn watchdog(&self) -> Duration {
        Duration::from_secs(self.watchdog_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Directory of the embedded store
    pub path: PathBuf,
    pub max_messages: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(defaults::QUEUE_PATH),
            max_messages: defaults::QUEUE_MAX_MESSAGES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub vibration: bool,
    pub current: bool,
    pub vibration_samples: usize,
    pub current_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            vibration: true,
            current: true,
            vibration_samples: defaults::VIBRATION_CALIBRATION_SAMPLES,
            current_samples: defaults::CURRENT_CALIBRATION_SAMPLES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectrumConfig {
    /// Peaks reported per vibration sensor
    pub peaks: usize,
    /// Hold vibration sensors in `initializing` until their window is full
    pub suppress_until_full: bool,
}

impl Default for SpectrumConfig {
    fn default() -> Self {
        Self {
            peaks: defaults::SPECTRUM_PEAKS,
            suppress_until_full: false,
        }
    }
}

// ============================================================================
// Sensors
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorsConfig {
    pub vibration: Vec<VibrationSensorConfig>,
    pub temperature: Vec<TemperatureSensorConfig>,
    pub current: CurrentSensorsConfig,
}

impl SensorsConfig {
    /// Configured names for one sensor type, in config order
    pub fn names(&self, kind: SensorKind) -> Vec<String> {
        match kind {
            SensorKind::Vibration => self.vibration.iter().map(|s| s.name.clone()).collect(),
            SensorKind::Temperature => self.temperature.iter().map(|s| s.name.clone()).collect(),
            SensorKind::Current => self.current.channels.iter().map(|s| s.name.clone()).collect(),
        }
    }
}

/// One accelerometer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VibrationSensorConfig {
    pub name: String,
    #[serde(default = "default_bus")]
    pub bus: u8,
    /// Device address, `"0x68"` style
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate_hz: f64,
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_dlpf")]
    pub dlpf: u8,
}

impl VibrationSensorConfig {
    pub fn at(name: &str, address: &str) -> Self {
        Self {
            name: name.to_string(),
            bus: default_bus(),
            address: Some(address.to_string()),
            sample_rate_hz: default_sample_rate(),
            buffer_size: default_buffer_size(),
            dlpf: default_dlpf(),
        }
    }
}

fn default_bus() -> u8 {
    defaults::I2C_BUS
}

fn default_sample_rate() -> f64 {
    defaults::ACCEL_SAMPLE_RATE_HZ
}

fn default_buffer_size() -> usize {
    defaults::ACCEL_BUFFER_SIZE
}

fn default_dlpf() -> u8 {
    defaults::ACCEL_DLPF
}

/// One 1-Wire probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSensorConfig {
    pub name: String,
    /// sysfs id, e.g. `28-000001111111`
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentSensorsConfig {
    pub adc: AdcConfig,
    pub samples_per_reading: usize,
    pub volts_to_amps: f64,
    pub threshold_amps: f64,
    pub channels: Vec<CurrentChannelConfig>,
}

impl Default for CurrentSensorsConfig {
    fn default() -> Self {
        Self {
            adc: AdcConfig::default(),
            samples_per_reading: defaults::CURRENT_SAMPLES_PER_READING,
            volts_to_amps: defaults::CURRENT_VOLTS_TO_AMPS,
            threshold_amps: defaults::CURRENT_THRESHOLD_AMPS,
            channels: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdcConfig {
    pub bus: u8,
    pub address: String,
    /// PGA gain: 2/3, 1, 2, 4, 8 or 16
    pub gain: f64,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            bus: defaults::I2C_BUS,
            address: defaults::ADC_ADDRESS.to_string(),
            gain: defaults::ADC_GAIN,
        }
    }
}

/// One current transformer on an ADC input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CurrentChannelConfig {
    pub name: String,
    /// ADC input 0..=3
    pub adc_channel: Option<u8>,
    /// Bias voltage used when calibration is off (V)
    pub offset: f64,
    pub scale: f64,
}

impl Default for CurrentChannelConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            adc_channel: None,
            offset: 0.0,
            scale: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        device_id = "press_7"

        [broker]
        url = "http://broker.local:8080"
        qos = 2

        [intervals]
        temperature_secs = 2.5

        [[sensors.vibration]]
        name = "engine"
        address = "0x68"
        sample_rate_hz = 200.0
        buffer_size = 256

        [[sensors.temperature]]
        name = "oil"
        device_id = "28-000001111111"

        [sensors.current.adc]
        address = "0x49"
        gain = 2.0

        [[sensors.current.channels]]
        name = "phase_a"
        adc_channel = 0
        scale = 1.05
    "#;

    #[test]
    fn test_defaults_are_valid() {
        let config = NodeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.device_id, "station_1");
        assert_eq!(config.broker.topic, "sensors/data");
        assert_eq!(config.queue.max_messages, 1000);
        assert_eq!(config.intervals.buffer_fill_ms, 4);
        assert_eq!(config.sensor_count(), 0);
    }

    #[test]
    fn test_parse_full_config() {
        let config = NodeConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.device_id, "press_7");
        assert_eq!(config.broker.qos, 2);
        assert_eq!(config.broker.topic, "sensors/data");
        assert_eq!(config.intervals.temperature(), Duration::from_millis(2500));
        assert_eq!(config.sensors.vibration[0].buffer_size, 256);
        assert_eq!(config.sensors.vibration[0].bus, 1);
        assert_eq!(config.sensors.vibration[0].dlpf, 1);
        assert_eq!(config.sensors.current.adc.address, "0x49");
        assert_eq!(config.sensors.current.samples_per_reading, 500);
        assert_eq!(config.sensors.current.channels[0].scale, 1.05);
        assert_eq!(config.sensor_count(), 3);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config, NodeConfig::default());
    }

    #[test]
    fn test_validation_rejects_impossible_values() {
        let err = NodeConfig::from_toml_str(
            r#"
            [broker]
            qos = 3

            [queue]
            max_messages = 0

            [[sensors.vibration]]
            name = "engine"
            address = "0x68"
            buffer_size = 0
            sample_rate_hz = -5.0
            "#,
        )
        .unwrap_err();

        match err {
            ConfigError::Validation(errors) => {
                assert!(errors.iter().any(|e| e.contains("broker.qos")));
                assert!(errors.iter().any(|e| e.contains("queue.max_messages")));
                assert!(errors.iter().any(|e| e.contains("buffer_size")));
                assert!(errors.iter().any(|e| e.contains("sample_rate_hz")));
            }
            other => panic!("expected validation error, got {other}"),
        }
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut config = NodeConfig::default();
        config.sensors.temperature = vec![
            TemperatureSensorConfig { name: "oil".into(), device_id: None },
            TemperatureSensorConfig { name: "oil".into(), device_id: None },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_incomplete_entries_still_valid() {
        let mut config = NodeConfig::default();
        config.sensors.temperature = vec![TemperatureSensorConfig {
            name: "oil".into(),
            device_id: None,
        }];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("0x68"), Some(0x68));
        assert_eq!(parse_address("0X4b"), Some(0x4B));
        assert_eq!(parse_address("72"), Some(72));
        assert_eq!(parse_address("zz"), None);
    }

    #[test]
    fn test_changed_pollers() {
        let base = NodeConfig::from_toml_str(SAMPLE).unwrap();
        let mut next = base.clone();
        assert!(base.changed_pollers(&next).is_empty());

        next.sensors.temperature[0].device_id = Some("28-000002222222".into());
        next.calibration.current = false;
        assert_eq!(
            base.changed_pollers(&next),
            vec![SensorKind::Temperature, SensorKind::Current]
        );
    }

    #[test]
    fn test_calibration_override() {
        let config = NodeConfig::default().with_calibration_override(Some(false));
        assert!(!config.calibration.vibration);
        assert!(!config.calibration.current);

        let untouched = NodeConfig::default().with_calibration_override(None);
        assert!(untouched.calibration.vibration);
    }

    #[test]
    fn test_toml_round_trip_of_simulation_set() {
        let config = NodeConfig {
            sensors: NodeConfig::simulation_sensors(),
            ..NodeConfig::default()
        };
        let text = config.to_toml().unwrap();
        assert_eq!(NodeConfig::from_toml_str(&text).unwrap(), config);
    }
}
