//! Simulated sensor bench
//!
//! Stands in for real hardware when the node runs with `--simulate` and in
//! tests. Devices are chosen by address the way a real bus would answer:
//! 0x68/0x69 are accelerometers, 0x48..=0x4B are ADCs, and probe ids starting
//! with `28-` are DS18B20 thermometers. Signals are synthetic machine
//! vibration (shaft fundamental plus harmonic over gravity), mains-frequency
//! CT voltages and slowly drifting temperatures, each with Gaussian noise.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use super::{
    ads1115_registers, mpu6050_registers, AcquisitionError, RawBusPort, SensorPorts,
    TemperatureProbe, ACCEL_LSB_PER_G,
};
use crate::types::round_to;

/// Shape of the synthetic machine signals
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationProfile {
    /// Shaft rotation frequency (Hz)
    pub shaft_hz: f64,
    /// Vibration amplitude at the shaft frequency (g)
    pub vibration_g: f64,
    /// Accelerometer noise (g, one sigma)
    pub vibration_noise_g: f64,
    /// Mains frequency seen by the current transformers (Hz)
    pub mains_hz: f64,
    /// RMS current per ADC channel (A)
    pub channel_amps: [f64; 4],
    /// Transformer ratio used to turn amps back into volts (A/V)
    pub volts_to_amps: f64,
    /// Base probe temperature (°C)
    pub base_celsius: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            shaft_hz: 24.5,
            vibration_g: 0.08,
            vibration_noise_g: 0.004,
            mains_hz: 50.0,
            channel_amps: [12.0, 8.5, 0.0, 3.2],
            volts_to_amps: 30.0,
            base_celsius: 42.0,
        }
    }
}

type FaultSet = Arc<Mutex<HashSet<String>>>;

/// Simulated bus and probe provider with fault injection
#[derive(Debug, Clone)]
pub struct SimulatedBench {
    profile: SimulationProfile,
    start: Instant,
    seed: Option<u64>,
    faults: FaultSet,
}

impl SimulatedBench {
    pub fn new() -> Self {
        Self::with_profile(SimulationProfile::default())
    }

    pub fn with_profile(profile: SimulationProfile) -> Self {
        Self {
            profile,
            start: Instant::now(),
            seed: None,
            faults: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Deterministic noise for reproducible runs
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn profile(&self) -> &SimulationProfile {
        &self.profile
    }

    /// Make every read from the device at `address` fail until cleared
    pub fn set_bus_fault(&self, address: u16, faulted: bool) {
        self.set_fault(bus_fault_key(address), faulted);
    }

    /// Make every read from the probe fail until cleared
    pub fn set_probe_fault(&self, device_id: &str, faulted: bool) {
        self.set_fault(probe_fault_key(device_id), faulted);
    }

    fn set_fault(&self, key: String, faulted: bool) {
        let mut faults = self
            .faults
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if faulted {
            faults.insert(key);
        } else {
            faults.remove(&key);
        }
    }

    fn rng(&self, salt: u64) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ salt),
            None => StdRng::from_entropy(),
        }
    }

    fn device_context(&self, key: String, salt: u64) -> DeviceContext {
        DeviceContext {
            profile: self.profile.clone(),
            start: self.start,
            rng: self.rng(salt),
            faults: Arc::clone(&self.faults),
            fault_key: key,
        }
    }
}

impl Default for SimulatedBench {
    fn default() -> Self {
        Self::new()
    }
}

impl SensorPorts for SimulatedBench {
    fn open_bus(&self, bus: u8, address: u16) -> Result<Box<dyn RawBusPort>, AcquisitionError> {
        let salt = (u64::from(bus) << 16) | u64::from(address);
        let ctx = self.device_context(bus_fault_key(address), salt);
        match address {
            0x68 | 0x69 => Ok(Box::new(SimulatedAccelerometer {
                ctx,
                registers: HashMap::new(),
            })),
            0x48..=0x4B => Ok(Box::new(SimulatedAdc {
                ctx,
                config: 0,
                clock: 0.0,
            })),
            _ => Err(AcquisitionError::DeviceNotFound {
                address,
                reason: format!("no simulated device on bus {bus}"),
            }),
        }
    }

    fn open_probe(&self, device_id: &str) -> Result<Box<dyn TemperatureProbe>, AcquisitionError> {
        if !device_id.starts_with("28-") {
            return Err(AcquisitionError::ProbeNotFound(device_id.to_string()));
        }
        // Spread probes a few degrees apart
        let spread = device_id.bytes().map(u64::from).sum::<u64>() % 8;
        Ok(Box::new(SimulatedProbe {
            ctx: self.device_context(probe_fault_key(device_id), spread),
            device_id: device_id.to_string(),
            offset_celsius: spread as f64,
        }))
    }
}

fn bus_fault_key(address: u16) -> String {
    format!("bus:{address:#04x}")
}

fn probe_fault_key(device_id: &str) -> String {
    format!("probe:{device_id}")
}

struct DeviceContext {
    profile: SimulationProfile,
    start: Instant,
    rng: StdRng,
    faults: FaultSet,
    fault_key: String,
}

impl DeviceContext {
    fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    fn noise(&mut self, sigma: f64) -> f64 {
        let n: f64 = self.rng.sample(StandardNormal);
        n * sigma
    }

    fn check_fault(&self) -> Result<(), AcquisitionError> {
        let faulted = self
            .faults
            .lock()
            .map(|f| f.contains(&self.fault_key))
            .unwrap_or(false);
        if faulted {
            return Err(AcquisitionError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("simulated fault on {}", self.fault_key),
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Accelerometer
// ============================================================================

struct SimulatedAccelerometer {
    ctx: DeviceContext,
    registers: HashMap<u8, u8>,
}

impl SimulatedAccelerometer {
    fn acceleration_g(&mut self, reg: u8) -> f64 {
        let t = self.ctx.elapsed();
        let p = &self.ctx.profile;
        let phase = 2.0 * PI * p.shaft_hz * t;
        let (signal, sigma) = match reg {
            mpu6050_registers::ACCEL_XOUT_H => (p.vibration_g * phase.sin(), p.vibration_noise_g),
            mpu6050_registers::ACCEL_YOUT_H => {
                (0.5 * p.vibration_g * (2.0 * phase).sin(), p.vibration_noise_g)
            }
            _ => (
                1.0 + 0.3 * p.vibration_g * (phase + PI / 4.0).sin(),
                p.vibration_noise_g,
            ),
        };
        signal + self.ctx.noise(sigma)
    }
}

impl RawBusPort for SimulatedAccelerometer {
    fn read_register(&mut self, reg: u8) -> Result<u8, AcquisitionError> {
        self.ctx.check_fault()?;
        if reg == mpu6050_registers::WHO_AM_I {
            return Ok(0x68);
        }
        Ok(self.registers.get(&reg).copied().unwrap_or(0))
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), AcquisitionError> {
        self.registers.insert(reg, value);
        Ok(())
    }

    fn read_register_pair(&mut self, reg: u8) -> Result<i16, AcquisitionError> {
        self.ctx.check_fault()?;
        match reg {
            mpu6050_registers::ACCEL_XOUT_H
            | mpu6050_registers::ACCEL_YOUT_H
            | mpu6050_registers::ACCEL_ZOUT_H => {
                let counts = (self.acceleration_g(reg) * ACCEL_LSB_PER_G).round();
                Ok(counts.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16)
            }
            _ => Ok(0),
        }
    }

    fn write_register_pair(&mut self, reg: u8, value: u16) -> Result<(), AcquisitionError> {
        let [high, low] = value.to_be_bytes();
        self.registers.insert(reg, high);
        self.registers.insert(reg.wrapping_add(1), low);
        Ok(())
    }
}

// ============================================================================
// ADC
// ============================================================================

/// Conversion time at 860 samples per second
const ADC_CONVERSION_SECS: f64 = 1.0 / 860.0;

struct SimulatedAdc {
    ctx: DeviceContext,
    config: u16,
    /// Signal time of the last conversion; conversions never overlap even
    /// though the simulated device answers instantly
    clock: f64,
}

impl SimulatedAdc {
    fn selected_channel(&self) -> usize {
        usize::from((self.config >> 12) & 0x3)
    }

    fn full_scale_volts(&self) -> f64 {
        match (self.config >> 9) & 0x7 {
            0 => 6.144,
            1 => 4.096,
            2 => 2.048,
            3 => 1.024,
            4 => 0.512,
            _ => 0.256,
        }
    }

    fn channel_volts(&mut self) -> f64 {
        let t = self.ctx.elapsed().max(self.clock + ADC_CONVERSION_SECS);
        self.clock = t;
        let p = &self.ctx.profile;
        let amps = p.channel_amps[self.selected_channel()];
        let peak_volts = amps / p.volts_to_amps * std::f64::consts::SQRT_2;
        let signal = peak_volts * (2.0 * PI * p.mains_hz * t).sin();
        signal + self.ctx.noise(0.002)
    }
}

impl RawBusPort for SimulatedAdc {
    fn read_register(&mut self, _reg: u8) -> Result<u8, AcquisitionError> {
        self.ctx.check_fault()?;
        Ok(0)
    }

    fn write_register(&mut self, _reg: u8, _value: u8) -> Result<(), AcquisitionError> {
        Ok(())
    }

    fn read_register_pair(&mut self, reg: u8) -> Result<i16, AcquisitionError> {
        self.ctx.check_fault()?;
        match reg {
            ads1115_registers::CONFIG => {
                // Conversions complete instantly
                Ok((self.config | ads1115_registers::OS_SINGLE) as i16)
            }
            ads1115_registers::CONVERSION => {
                let fsr = self.full_scale_volts();
                let raw = (self.channel_volts() / fsr * 32768.0).round();
                Ok(raw.clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16)
            }
            _ => Ok(0),
        }
    }

    fn write_register_pair(&mut self, reg: u8, value: u16) -> Result<(), AcquisitionError> {
        if reg == ads1115_registers::CONFIG {
            self.config = value;
        }
        Ok(())
    }
}

// ============================================================================
// Thermometer
// ============================================================================

struct SimulatedProbe {
    ctx: DeviceContext,
    device_id: String,
    offset_celsius: f64,
}

impl TemperatureProbe for SimulatedProbe {
    fn read_celsius(&mut self) -> Result<f64, AcquisitionError> {
        self.ctx
            .check_fault()
            .map_err(|e| AcquisitionError::MalformedReading {
                probe: self.device_id.clone(),
                reason: e.to_string(),
            })?;
        let t = self.ctx.elapsed();
        let drift = 1.5 * (2.0 * PI * t / 600.0).sin();
        let value =
            self.ctx.profile.base_celsius + self.offset_celsius + drift + self.ctx.noise(0.05);
        Ok(round_to(value, 3))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_address() {
        let bench = SimulatedBench::new();
        assert!(matches!(
            bench.open_bus(1, 0x10),
            Err(AcquisitionError::DeviceNotFound { address: 0x10, .. })
        ));
    }

    #[test]
    fn test_probe_ids() {
        let bench = SimulatedBench::new().with_seed(7);
        let mut probe = bench.open_probe("28-00000a1b2c3d").unwrap();
        let celsius = probe.read_celsius().unwrap();
        assert!((30.0..60.0).contains(&celsius));

        assert!(matches!(
            bench.open_probe("10-legacy"),
            Err(AcquisitionError::ProbeNotFound(_))
        ));
    }

    #[test]
    fn test_fault_injection() {
        let bench = SimulatedBench::new();
        let mut bus = bench.open_bus(1, 0x68).unwrap();
        assert!(bus.read_register_pair(mpu6050_registers::ACCEL_XOUT_H).is_ok());

        bench.set_bus_fault(0x68, true);
        assert!(bus.read_register_pair(mpu6050_registers::ACCEL_XOUT_H).is_err());

        bench.set_bus_fault(0x68, false);
        assert!(bus.read_register_pair(mpu6050_registers::ACCEL_XOUT_H).is_ok());
    }

    #[test]
    fn test_probe_fault() {
        let bench = SimulatedBench::new();
        let mut probe = bench.open_probe("28-a").unwrap();
        bench.set_probe_fault("28-a", true);
        assert!(probe.read_celsius().is_err());
    }
}
