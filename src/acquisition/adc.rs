//! ADS1115 class 16-bit ADC driver (single-shot, single-ended)

use std::thread;
use std::time::Duration;
use tracing::info;

use super::{AcquisitionError, RawBusPort};

/// ADS1115 register map and config fields
pub mod ads1115_registers {
    pub const CONVERSION: u8 = 0x00;
    pub const CONFIG: u8 = 0x01;

    /// Start a conversion (write) / conversion idle (read)
    pub const OS_SINGLE: u16 = 0x8000;
    /// AIN0 against GND; channels 1..=3 follow consecutively
    pub const MUX_SINGLE_0: u16 = 0x4000;
    pub const MODE_SINGLE: u16 = 0x0100;
    pub const DR_860SPS: u16 = 0x00E0;
    pub const COMP_DISABLE: u16 = 0x0003;
}

use ads1115_registers as reg;

const CONVERSION_POLL_INTERVAL: Duration = Duration::from_micros(200);
const CONVERSION_POLL_LIMIT: usize = 50;

/// Number of single-ended inputs
pub const ADC_CHANNELS: u8 = 4;

/// Programmable gain amplifier setting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdcGain {
    TwoThirds,
    One,
    Two,
    Four,
    Eight,
    Sixteen,
}

impl AdcGain {
    /// Parse a configured gain value (2/3, 1, 2, 4, 8 or 16)
    pub fn from_value(gain: f64) -> Option<Self> {
        const CANDIDATES: [(f64, AdcGain); 6] = [
            (2.0 / 3.0, AdcGain::TwoThirds),
            (1.0, AdcGain::One),
            (2.0, AdcGain::Two),
            (4.0, AdcGain::Four),
            (8.0, AdcGain::Eight),
            (16.0, AdcGain::Sixteen),
        ];
        CANDIDATES
            .iter()
            .find(|(value, _)| (gain - value).abs() < 0.01)
            .map(|(_, g)| *g)
    }

    /// Full-scale range in volts
    pub fn full_scale_volts(&self) -> f64 {
        match self {
            AdcGain::TwoThirds => 6.144,
            AdcGain::One => 4.096,
            AdcGain::Two => 2.048,
            AdcGain::Four => 1.024,
            AdcGain::Eight => 0.512,
            AdcGain::Sixteen => 0.256,
        }
    }

    fn pga_bits(&self) -> u16 {
        let code: u16 = match self {
            AdcGain::TwoThirds => 0,
            AdcGain::One => 1,
            AdcGain::Two => 2,
            AdcGain::Four => 3,
            AdcGain::Eight => 4,
            AdcGain::Sixteen => 5,
        };
        code << 9
    }
}

/// Config word for a single-shot conversion on `channel`
pub fn single_shot_config(channel: u8, gain: AdcGain) -> u16 {
    reg::OS_SINGLE
        | (reg::MUX_SINGLE_0 + (u16::from(channel) << 12))
        | gain.pga_bits()
        | reg::MODE_SINGLE
        | reg::DR_860SPS
        | reg::COMP_DISABLE
}

/// Initialized ADC
pub struct Ads1115 {
    bus: Box<dyn RawBusPort>,
    address: u16,
    gain: AdcGain,
}

impl std::fmt::Debug for Ads1115 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ads1115")
            .field("address", &self.address)
            .field("gain", &self.gain)
            .finish_non_exhaustive()
    }
}

impl Ads1115 {
    /// Verify the device answers by reading its config register
    pub fn initialize(
        mut bus: Box<dyn RawBusPort>,
        address: u16,
        gain: AdcGain,
    ) -> Result<Self, AcquisitionError> {
        bus.read_register_pair(reg::CONFIG)
            .map_err(|e| AcquisitionError::DeviceNotFound {
                address,
                reason: e.to_string(),
            })?;

        info!(
            address = %format!("0x{address:02x}"),
            full_scale_volts = gain.full_scale_volts(),
            "ADC initialized"
        );
        Ok(Self { bus, address, gain })
    }

    pub fn gain(&self) -> AdcGain {
        self.gain
    }

    /// One single-shot conversion on a single-ended input, in volts
    pub fn read_voltage(&mut self, channel: u8) -> Result<f64, AcquisitionError> {
        if channel >= ADC_CHANNELS {
            return Err(AcquisitionError::InvalidParameter(format!(
                "ADC channel {channel} outside 0..=3"
            )));
        }

        self.bus
            .write_register_pair(reg::CONFIG, single_shot_config(channel, self.gain))?;
        self.wait_for_conversion()?;

        let raw = self.bus.read_register_pair(reg::CONVERSION)?;
        Ok(f64::from(raw) * self.gain.full_scale_volts() / 32768.0)
    }

    /// `count` consecutive conversions on one channel
    pub fn sample_channel(
        &mut self,
        channel: u8,
        count: usize,
    ) -> Result<Vec<f64>, AcquisitionError> {
        (0..count).map(|_| self.read_voltage(channel)).collect()
    }

    fn wait_for_conversion(&mut self) -> Result<(), AcquisitionError> {
        for _ in 0..CONVERSION_POLL_LIMIT {
            let config = self.bus.read_register_pair(reg::CONFIG)? as u16;
            if config & reg::OS_SINGLE != 0 {
                return Ok(());
            }
            thread::sleep(CONVERSION_POLL_INTERVAL);
        }
        Err(AcquisitionError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "ADC conversion did not complete",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::{SensorPorts, SimulatedBench};

    #[test]
    fn test_gain_parsing() {
        assert_eq!(AdcGain::from_value(1.0), Some(AdcGain::One));
        assert_eq!(AdcGain::from_value(0.6667), Some(AdcGain::TwoThirds));
        assert_eq!(AdcGain::from_value(16.0), Some(AdcGain::Sixteen));
        assert_eq!(AdcGain::from_value(3.0), None);
        assert_eq!(AdcGain::Four.full_scale_volts(), 1.024);
    }

    #[test]
    fn test_config_word() {
        // AIN2, gain 1: OS | MUX=110 | PGA=001 | MODE | DR=111 | COMP=11
        assert_eq!(single_shot_config(2, AdcGain::One), 0xE3E3);
        assert_eq!(single_shot_config(0, AdcGain::TwoThirds), 0xC1E3);
    }

    #[test]
    fn test_rejects_out_of_range_channel() {
        let bench = SimulatedBench::new();
        let bus = bench.open_bus(1, 0x48).unwrap();
        let mut adc = Ads1115::initialize(bus, 0x48, AdcGain::One).unwrap();
        assert!(matches!(
            adc.read_voltage(4),
            Err(AcquisitionError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_reads_simulated_voltage() {
        let bench = SimulatedBench::new();
        let bus = bench.open_bus(1, 0x48).unwrap();
        let mut adc = Ads1115::initialize(bus, 0x48, AdcGain::One).unwrap();

        let samples = adc.sample_channel(0, 20).unwrap();
        assert_eq!(samples.len(), 20);
        assert!(samples.iter().all(|v| v.abs() <= 4.096));
    }
}
