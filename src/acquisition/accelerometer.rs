//! MPU-6050 class three-axis accelerometer driver

use std::thread;
use std::time::Duration;
use tracing::{debug, info};

use super::{AcquisitionError, RawBusPort};
use crate::types::ThreeAxisReading;

/// MPU-6050 register map (subset used by the node)
pub mod mpu6050_registers {
    pub const SMPLRT_DIV: u8 = 0x19;
    pub const CONFIG: u8 = 0x1A;
    pub const ACCEL_XOUT_H: u8 = 0x3B;
    pub const ACCEL_YOUT_H: u8 = 0x3D;
    pub const ACCEL_ZOUT_H: u8 = 0x3F;
    pub const PWR_MGMT_1: u8 = 0x6B;
    pub const WHO_AM_I: u8 = 0x75;
}

use mpu6050_registers as reg;

/// Counts per g at the default ±2 g range
pub const ACCEL_LSB_PER_G: f64 = 16384.0;

/// Internal sample clock with the low-pass filter enabled
const GYRO_OUTPUT_RATE_HZ: f64 = 1000.0;

/// Identity values reported by compatible parts
const KNOWN_IDENTITIES: [u8; 3] = [0x68, 0x70, 0x72];

/// Divider for a requested rate: floor(1000 / fs - 1), clamped to 0..=255
pub fn sample_rate_divider(requested_hz: f64) -> u8 {
    if !requested_hz.is_finite() || requested_hz <= 0.0 {
        return u8::MAX;
    }
    let div = (GYRO_OUTPUT_RATE_HZ / requested_hz - 1.0).floor();
    div.clamp(0.0, 255.0) as u8
}

/// Rate the device actually samples at for a given divider
pub fn actual_sample_rate(divider: u8) -> f64 {
    GYRO_OUTPUT_RATE_HZ / (1.0 + f64::from(divider))
}

/// Initialized accelerometer
pub struct Accelerometer {
    bus: Box<dyn RawBusPort>,
    address: u16,
    sample_rate_hz: f64,
}

impl std::fmt::Debug for Accelerometer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accelerometer")
            .field("address", &self.address)
            .field("sample_rate_hz", &self.sample_rate_hz)
            .finish_non_exhaustive()
    }
}

impl Accelerometer {
    /// Wake the device, program filter and rate, and verify its identity
    pub fn initialize(
        mut bus: Box<dyn RawBusPort>,
        address: u16,
        requested_rate_hz: f64,
        dlpf: u8,
    ) -> Result<Self, AcquisitionError> {
        if dlpf > 6 {
            return Err(AcquisitionError::InvalidParameter(format!(
                "DLPF setting {dlpf} outside 0..=6"
            )));
        }

        bus.write_register(reg::PWR_MGMT_1, 0x00)?;
        thread::sleep(Duration::from_millis(100));
        bus.write_register(reg::CONFIG, dlpf)?;

        let divider = sample_rate_divider(requested_rate_hz);
        bus.write_register(reg::SMPLRT_DIV, divider)?;
        let sample_rate_hz = actual_sample_rate(divider);

        let identity = bus.read_register(reg::WHO_AM_I)?;
        let own_address = u8::try_from(address).unwrap_or(0);
        if !KNOWN_IDENTITIES.contains(&identity) && identity != own_address {
            return Err(AcquisitionError::UnexpectedDevice {
                address,
                found: identity,
            });
        }

        info!(
            address = %format!("0x{address:02x}"),
            requested_hz = requested_rate_hz,
            actual_hz = sample_rate_hz,
            divider,
            "Accelerometer initialized"
        );
        Ok(Self {
            bus,
            address,
            sample_rate_hz,
        })
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    /// Sample rate after divider rounding
    pub fn sample_rate_hz(&self) -> f64 {
        self.sample_rate_hz
    }

    /// One raw sample in g, before calibration
    pub fn read_acceleration(&mut self) -> Result<ThreeAxisReading, AcquisitionError> {
        let x = self.bus.read_register_pair(reg::ACCEL_XOUT_H)?;
        let y = self.bus.read_register_pair(reg::ACCEL_YOUT_H)?;
        let z = self.bus.read_register_pair(reg::ACCEL_ZOUT_H)?;
        Ok(ThreeAxisReading::new(
            f64::from(x) / ACCEL_LSB_PER_G,
            f64::from(y) / ACCEL_LSB_PER_G,
            f64::from(z) / ACCEL_LSB_PER_G,
        ))
    }

    /// Collect `count` raw samples spaced at 1.1x the sample period
    pub fn collect_stationary(
        &mut self,
        count: usize,
    ) -> Result<Vec<ThreeAxisReading>, AcquisitionError> {
        let spacing = Duration::from_secs_f64(1.1 / self.sample_rate_hz);
        let mut samples = Vec::with_capacity(count);
        for _ in 0..count {
            samples.push(self.read_acceleration()?);
            thread::sleep(spacing);
        }
        debug!(count, address = self.address, "Collected stationary samples");
        Ok(samples)
    }
}
