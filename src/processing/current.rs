//! RMS current from current-transformer voltage samples

use crate::types::round_to;

/// Conversion parameters for one current channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentConversion {
    /// Bias voltage removed from every sample
    pub offset_volts: f64,
    /// Transformer ratio, amperes per volt RMS
    pub volts_to_amps: f64,
    /// Per-channel correction factor
    pub scale: f64,
    /// Readings below this are reported as zero
    pub threshold_amps: f64,
}

/// Irms = sqrt(mean((v - offset)²)) × volts_to_amps × scale
///
/// Values below the threshold report 0; the result is rounded to 3 decimals.
pub fn rms_current(voltages: &[f64], conversion: &CurrentConversion) -> f64 {
    if voltages.is_empty() {
        return 0.0;
    }

    let mean_square = voltages
        .iter()
        .map(|v| (v - conversion.offset_volts).powi(2))
        .sum::<f64>()
        / voltages.len() as f64;
    let amps = mean_square.sqrt() * conversion.volts_to_amps * conversion.scale;

    if amps < conversion.threshold_amps {
        0.0
    } else {
        round_to(amps, 3)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn conversion(offset: f64) -> CurrentConversion {
        CurrentConversion {
            offset_volts: offset,
            volts_to_amps: 30.0,
            scale: 1.0,
            threshold_amps: 0.5,
        }
    }

    #[test]
    fn test_sine_current() {
        // 0.2 V peak around a 1.65 V bias: Vrms = 0.1414, 4.243 A
        let voltages: Vec<f64> = (0..500)
            .map(|i| 1.65 + 0.2 * (2.0 * PI * i as f64 / 50.0).sin())
            .collect();

        let amps = rms_current(&voltages, &conversion(1.65));
        assert!((amps - 4.243).abs() < 0.002);
    }

    #[test]
    fn test_below_threshold_reports_zero() {
        let voltages = vec![0.01, -0.01, 0.01, -0.01];
        assert_eq!(rms_current(&voltages, &conversion(0.0)), 0.0);
    }

    #[test]
    fn test_scale_applied() {
        let voltages = vec![1.0, -1.0];
        let mut conv = conversion(0.0);
        conv.scale = 0.5;
        assert_eq!(rms_current(&voltages, &conv), 15.0);
    }

    #[test]
    fn test_empty() {
        assert_eq!(rms_current(&[], &conversion(0.0)), 0.0);
    }
}
