//! Sensor data acquisition module
//!
//! Register-level bus access and the device drivers built on it:
//! - `RawBusPort`: read/write of register bytes for one device on a bus
//! - `SensorPorts`: opens bus ports and temperature probes (hardware or simulated)
//! - Drivers: MPU-6050 class accelerometer, ADS1115 class ADC, 1-Wire thermometer

mod accelerometer;
mod adc;
mod i2c;
mod simulated;
mod thermometer;

pub use accelerometer::*;
pub use adc::*;
pub use i2c::*;
pub use simulated::*;
pub use thermometer::*;

use std::path::PathBuf;
use thiserror::Error;

/// Acquisition errors
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Bus {bus} unavailable: {reason}")]
    BusUnavailable { bus: u8, reason: String },

    #[error("No device at 0x{address:02x}: {reason}")]
    DeviceNotFound { address: u16, reason: String },

    #[error("Unexpected device identity 0x{found:02x} at 0x{address:02x}")]
    UnexpectedDevice { address: u16, found: u8 },

    #[error("Register I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Temperature probe {0} not found")]
    ProbeNotFound(String),

    #[error("Probe {probe} returned malformed data: {reason}")]
    MalformedReading { probe: String, reason: String },

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Narrow register primitive for one device at a fixed address
///
/// 16-bit registers are big-endian (high byte first) on every device the
/// node talks to.
pub trait RawBusPort: Send {
    fn read_register(&mut self, reg: u8) -> Result<u8, AcquisitionError>;

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), AcquisitionError>;

    /// Signed 16-bit value from `reg` (high) and `reg + 1` (low)
    fn read_register_pair(&mut self, reg: u8) -> Result<i16, AcquisitionError>;

    fn write_register_pair(&mut self, reg: u8, value: u16) -> Result<(), AcquisitionError>;
}

/// A temperature probe returning degrees Celsius
pub trait TemperatureProbe: Send {
    fn read_celsius(&mut self) -> Result<f64, AcquisitionError>;
}

/// Opens device handles for the pollers
pub trait SensorPorts: Send + Sync {
    fn open_bus(&self, bus: u8, address: u16) -> Result<Box<dyn RawBusPort>, AcquisitionError>;

    fn open_probe(&self, device_id: &str) -> Result<Box<dyn TemperatureProbe>, AcquisitionError>;
}

/// Default sysfs root for 1-Wire devices
pub const W1_DEVICES_ROOT: &str = "/sys/bus/w1/devices";

/// Real hardware: Linux i2c-dev buses and 1-Wire sysfs probes
#[derive(Debug, Clone)]
pub struct HardwarePorts {
    w1_root: PathBuf,
}

impl HardwarePorts {
    pub fn new() -> Self {
        Self::with_w1_root(W1_DEVICES_ROOT)
    }

    pub fn with_w1_root(root: impl Into<PathBuf>) -> Self {
        Self {
            w1_root: root.into(),
        }
    }
}

impl Default for HardwarePorts {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorPorts for HardwarePorts {
    fn open_bus(&self, bus: u8, address: u16) -> Result<Box<dyn RawBusPort>, AcquisitionError> {
        Ok(Box::new(LinuxI2cBus::open(bus, address)?))
    }

    fn open_probe(&self, device_id: &str) -> Result<Box<dyn TemperatureProbe>, AcquisitionError> {
        Ok(Box::new(W1Thermometer::open(&self.w1_root, device_id)?))
    }
}
