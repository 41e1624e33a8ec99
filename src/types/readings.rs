//! Sensor readings and derived vibration metrics

use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Sub};

// ============================================================================
// Raw Accelerometer Sample
// ============================================================================

/// One accelerometer sample, in g
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreeAxisReading {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl ThreeAxisReading {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// True when no component is NaN or infinite
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Component for the given axis
    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
        }
    }
}

impl Add for ThreeAxisReading {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for ThreeAxisReading {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Div<f64> for ThreeAxisReading {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self::new(self.x / rhs, self.y / rhs, self.z / rhs)
    }
}

/// Accelerometer axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::X => write!(f, "x"),
            Axis::Y => write!(f, "y"),
            Axis::Z => write!(f, "z"),
        }
    }
}

// ============================================================================
// Vibration Metrics
// ============================================================================

/// A spectral peak: frequency in Hz, single-sided amplitude in g
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FftPeak {
    pub freq: f64,
    pub amp: f64,
}

/// Time-domain and spectral summary of one vibration window
///
/// Derived from a window snapshot, never mutated afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VibrationMetrics {
    /// sqrt(rms_x² + rms_y² + rms_z²)
    pub total_rms: f64,
    pub rms_x: f64,
    pub rms_y: f64,
    pub rms_z: f64,
    pub peak_x: f64,
    pub peak_y: f64,
    pub peak_z: f64,
    pub peak_to_peak_x: f64,
    pub peak_to_peak_y: f64,
    pub peak_to_peak_z: f64,
    /// Peaks of the dominant axis, highest amplitude first
    pub fft_peaks: Vec<FftPeak>,
}

impl VibrationMetrics {
    /// Copy rounded for the wire: 4 decimals for time-domain values,
    /// 2 for peak frequency and 5 for peak amplitude.
    pub fn rounded(&self) -> Self {
        Self {
            total_rms: round_to(self.total_rms, 4),
            rms_x: round_to(self.rms_x, 4),
            rms_y: round_to(self.rms_y, 4),
            rms_z: round_to(self.rms_z, 4),
            peak_x: round_to(self.peak_x, 4),
            peak_y: round_to(self.peak_y, 4),
            peak_z: round_to(self.peak_z, 4),
            peak_to_peak_x: round_to(self.peak_to_peak_x, 4),
            peak_to_peak_y: round_to(self.peak_to_peak_y, 4),
            peak_to_peak_z: round_to(self.peak_to_peak_z, 4),
            fft_peaks: self
                .fft_peaks
                .iter()
                .map(|p| FftPeak {
                    freq: round_to(p.freq, 2),
                    amp: round_to(p.amp, 5),
                })
                .collect(),
        }
    }
}

/// Round half away from zero to `decimals` places
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reading_arithmetic() {
        let a = ThreeAxisReading::new(1.0, 2.0, 3.0);
        let b = ThreeAxisReading::new(0.5, 0.5, 0.5);
        assert_eq!(a + b, ThreeAxisReading::new(1.5, 2.5, 3.5));
        assert_eq!(a - b, ThreeAxisReading::new(0.5, 1.5, 2.5));
        assert_eq!(a / 2.0, ThreeAxisReading::new(0.5, 1.0, 1.5));
    }

    #[test]
    fn test_reading_finite() {
        assert!(ThreeAxisReading::ZERO.is_finite());
        assert!(!ThreeAxisReading::new(f64::NAN, 0.0, 0.0).is_finite());
        assert!(!ThreeAxisReading::new(0.0, f64::INFINITY, 0.0).is_finite());
    }

    #[test]
    fn test_metrics_rounding() {
        let metrics = VibrationMetrics {
            total_rms: 0.123_456,
            peak_x: 1.000_06,
            fft_peaks: vec![FftPeak {
                freq: 24.999,
                amp: 0.012_345_67,
            }],
            ..Default::default()
        };

        let rounded = metrics.rounded();
        assert_eq!(rounded.total_rms, 0.1235);
        assert_eq!(rounded.peak_x, 1.0001);
        assert_eq!(rounded.fft_peaks[0].freq, 25.0);
        assert_eq!(rounded.fft_peaks[0].amp, 0.01235);
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(21.5626, 3), 21.563);
        assert_eq!(round_to(-0.00049, 3), -0.0);
    }
}
