//! Vibration analysis: time-domain metrics and dominant-axis spectral peaks

use super::{FftProcessor, ProcessingError, SampleWindow};
use crate::types::{Axis, ThreeAxisReading, VibrationMetrics};

/// Owns one sensor's cyclic window, its calibration offset and FFT plan
#[derive(Debug)]
pub struct VibrationAnalyzer {
    window: SampleWindow,
    offset: ThreeAxisReading,
    fft: FftProcessor,
}

impl VibrationAnalyzer {
    pub fn new(capacity: usize, sample_rate_hz: f64) -> Result<Self, ProcessingError> {
        let fft = FftProcessor::new(capacity, sample_rate_hz)?;
        Ok(Self {
            window: SampleWindow::new(capacity),
            offset: ThreeAxisReading::ZERO,
            fft,
        })
    }

    /// Subtract the calibration offset and store the sample
    pub fn record(&mut self, raw: ThreeAxisReading) {
        self.window.push(raw - self.offset);
    }

    /// Install a new offset and clear the window so no stale bias remains
    pub fn set_offset(&mut self, offset: ThreeAxisReading) {
        self.offset = offset;
        self.window.clear();
    }

    pub fn offset(&self) -> ThreeAxisReading {
        self.offset
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn sample_rate_hz(&self) -> f64 {
        self.fft.sampling_rate()
    }

    /// RMS, peak and peak-to-peak per axis, plus spectral peaks of the
    /// axis with the highest RMS once the window is at least half written.
    pub fn compute_metrics(&self, peak_count: usize) -> Result<VibrationMetrics, ProcessingError> {
        let xs = self.window.axis_snapshot(Axis::X);
        let ys = self.window.axis_snapshot(Axis::Y);
        let zs = self.window.axis_snapshot(Axis::Z);

        let x = AxisStats::from_samples(&xs);
        let y = AxisStats::from_samples(&ys);
        let z = AxisStats::from_samples(&zs);

        let fft_peaks = if self.window.has_spectral_fill() && peak_count > 0 {
            let signal = match dominant_axis(x.rms, y.rms, z.rms) {
                Axis::X => &xs,
                Axis::Y => &ys,
                Axis::Z => &zs,
            };
            self.fft.peaks(signal, peak_count)?
        } else {
            Vec::new()
        };

        let metrics = VibrationMetrics {
            total_rms: (x.rms.powi(2) + y.rms.powi(2) + z.rms.powi(2)).sqrt(),
            rms_x: x.rms,
            rms_y: y.rms,
            rms_z: z.rms,
            peak_x: x.peak,
            peak_y: y.peak,
            peak_z: z.peak,
            peak_to_peak_x: x.peak_to_peak,
            peak_to_peak_y: y.peak_to_peak,
            peak_to_peak_z: z.peak_to_peak,
            fft_peaks,
        };

        if !metrics.total_rms.is_finite() {
            return Err(ProcessingError::FftError(
                "non-finite RMS in vibration window".to_string(),
            ));
        }
        Ok(metrics)
    }
}

#[derive(Debug, Clone, Copy)]
struct AxisStats {
    rms: f64,
    peak: f64,
    peak_to_peak: f64,
}

impl AxisStats {
    fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                rms: 0.0,
                peak: 0.0,
                peak_to_peak: 0.0,
            };
        }

        let mean_square = samples.iter().map(|v| v * v).sum::<f64>() / samples.len() as f64;
        let peak = samples.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);

        Self {
            rms: mean_square.sqrt(),
            peak,
            peak_to_peak: max - min,
        }
    }
}

/// Axis with the highest RMS; z wins ties, then x, then y
pub fn dominant_axis(rms_x: f64, rms_y: f64, rms_z: f64) -> Axis {
    let mut axis = Axis::Z;
    let mut best = rms_z;
    if rms_x > best {
        axis = Axis::X;
        best = rms_x;
    }
    if rms_y > best {
        axis = Axis::Y;
    }
    axis
}
