//! System-wide default constants.
//!
//! Grouped by subsystem. Every `Default` impl in `node_config.rs` reads from
//! here so a config file only needs to name what it changes.

// ============================================================================
// Identity & Broker
// ============================================================================

pub const DEVICE_ID: &str = "station_1";

pub const BROKER_URL: &str = "http://127.0.0.1:8080";

pub const BROKER_TOPIC: &str = "sensors/data";

/// 0 = at most once, 1 = at least once, 2 = exactly once
pub const BROKER_QOS: u8 = 1;

/// HTTP request timeout for publish and health probes (seconds).
pub const BROKER_TIMEOUT_SECS: u64 = 5;

// ============================================================================
// Intervals
// ============================================================================

/// Accelerometer buffer-fill tick (ms). At most one sample per tick, so this
/// also caps the rate a vibration window fills at (250 Hz).
pub const BUFFER_FILL_INTERVAL_MS: u64 = 4;

/// Vibration metrics tick (ms).
pub const METRICS_INTERVAL_MS: u64 = 300;

/// Publish cycle (ms).
pub const PUBLISH_INTERVAL_MS: u64 = 333;

/// Temperature poll (seconds).
pub const TEMPERATURE_INTERVAL_SECS: f64 = 5.0;

/// Current poll (ms).
pub const CURRENT_INTERVAL_MS: u64 = 333;

/// Connection watchdog tick (seconds).
pub const WATCHDOG_INTERVAL_SECS: u64 = 10;

/// Silence after which a heartbeat timeout is reported (seconds).
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 60;

// ============================================================================
// Outbound Queue
// ============================================================================

pub const QUEUE_PATH: &str = "./data/outbound_queue";

pub const QUEUE_MAX_MESSAGES: usize = 1000;

// ============================================================================
// Calibration & Spectrum
// ============================================================================

/// Stationary accelerometer samples averaged for the offset.
pub const VIBRATION_CALIBRATION_SAMPLES: usize = 200;

/// Stationary ADC samples averaged for a channel's bias voltage.
pub const CURRENT_CALIBRATION_SAMPLES: usize = 500;

/// Spectral peaks reported per vibration sensor.
pub const SPECTRUM_PEAKS: usize = 5;

// ============================================================================
// Sensors
// ============================================================================

pub const I2C_BUS: u8 = 1;

pub const ACCEL_SAMPLE_RATE_HZ: f64 = 100.0;

pub const ACCEL_BUFFER_SIZE: usize = 100;

/// MPU-6050 CONFIG register value (digital low-pass filter).
pub const ACCEL_DLPF: u8 = 1;

pub const ADC_ADDRESS: &str = "0x48";

pub const ADC_GAIN: f64 = 1.0;

/// ADC conversions per current reading.
pub const CURRENT_SAMPLES_PER_READING: usize = 500;

/// Current transformer ratio (A per V RMS).
pub const CURRENT_VOLTS_TO_AMPS: f64 = 30.0;

/// Readings below this are reported as zero (A).
pub const CURRENT_THRESHOLD_AMPS: f64 = 0.5;
