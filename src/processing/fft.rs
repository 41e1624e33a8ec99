//! FFT computation using rustfft
//!
//! Spectral peak extraction for vibration windows. The transform length is
//! the window capacity itself (no power-of-two padding), so bin `k` sits at
//! `k * fs / N`.

use num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::f64::consts::PI;
use std::sync::Arc;

use super::ProcessingError;
use crate::types::FftPeak;

/// Symmetric Hann window of length `n`
pub fn hann_window(n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![1.0],
        _ => {
            let denom = (n - 1) as f64;
            (0..n)
                .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f64 / denom).cos())
                .collect()
        }
    }
}

// ============================================================================
// FFT Processor (Pre-planned for repeated use)
// ============================================================================

/// FFT processor with a pre-planned transform and precomputed Hann window.
///
/// One instance per vibration sensor; the plan is reused on every metrics tick.
pub struct FftProcessor {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    size: usize,
    sampling_rate: f64,
}

impl std::fmt::Debug for FftProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftProcessor")
            .field("size", &self.size)
            .field("sampling_rate", &self.sampling_rate)
            .finish_non_exhaustive()
    }
}

impl FftProcessor {
    /// Create a new FFT processor
    ///
    /// # Arguments
    /// * `size` - FFT size, equal to the window capacity
    /// * `sampling_rate` - Sampling rate in Hz
    pub fn new(size: usize, sampling_rate: f64) -> Result<Self, ProcessingError> {
        if !sampling_rate.is_finite() || sampling_rate <= 0.0 {
            return Err(ProcessingError::InvalidSamplingRate(sampling_rate));
        }
        if size < 2 {
            return Err(ProcessingError::InsufficientData {
                needed: 2,
                available: size,
            });
        }

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(size);

        Ok(Self {
            fft,
            window: hann_window(size),
            size,
            sampling_rate,
        })
    }

    /// Single-sided amplitude spectrum of a Hann-windowed real signal
    ///
    /// Returns `(frequency, amplitude)` for bins `0..=N/2`. Amplitudes are
    /// scaled by 2/N except DC and, for even N, the Nyquist bin (1/N).
    pub fn amplitude_spectrum(&self, signal: &[f64]) -> Result<Vec<(f64, f64)>, ProcessingError> {
        if signal.len() != self.size {
            return Err(ProcessingError::InsufficientData {
                needed: self.size,
                available: signal.len(),
            });
        }

        let mut buffer: Vec<Complex<f64>> = signal
            .iter()
            .zip(&self.window)
            .map(|(&x, &w)| Complex::new(x * w, 0.0))
            .collect();

        self.fft.process(&mut buffer);

        let n = self.size as f64;
        let half = self.size / 2;
        let resolution = self.frequency_resolution();

        Ok(buffer
            .iter()
            .take(half + 1)
            .enumerate()
            .map(|(k, c)| {
                let nyquist = self.size % 2 == 0 && k == half;
                let scale = if k == 0 || nyquist { 1.0 / n } else { 2.0 / n };
                (k as f64 * resolution, c.norm() * scale)
            })
            .collect())
    }

    /// Top `count` bins by amplitude, DC excluded, highest first
    pub fn peaks(&self, signal: &[f64], count: usize) -> Result<Vec<FftPeak>, ProcessingError> {
        let spectrum = self.amplitude_spectrum(signal)?;
        if spectrum.iter().any(|(_, amp)| !amp.is_finite()) {
            return Err(ProcessingError::FftError(
                "non-finite amplitude in spectrum".to_string(),
            ));
        }

        let mut bins: Vec<FftPeak> = spectrum
            .into_iter()
            .skip(1)
            .map(|(freq, amp)| FftPeak { freq, amp })
            .collect();
        bins.sort_by(|a, b| b.amp.total_cmp(&a.amp));
        bins.truncate(count);
        Ok(bins)
    }

    /// Get the FFT size
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn sampling_rate(&self) -> f64 {
        self.sampling_rate
    }

    /// Get the frequency resolution (Hz per bin)
    pub fn frequency_resolution(&self) -> f64 {
        self.sampling_rate / self.size as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f64, amplitude: f64, rate: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| amplitude * (2.0 * PI * freq * i as f64 / rate).sin())
            .collect()
    }

    #[test]
    fn test_fft_processor_creation() {
        let processor = FftProcessor::new(100, 100.0).unwrap();
        assert_eq!(processor.size(), 100);
        assert!((processor.frequency_resolution() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(
            FftProcessor::new(100, 0.0),
            Err(ProcessingError::InvalidSamplingRate(_))
        ));
        assert!(matches!(
            FftProcessor::new(0, 100.0),
            Err(ProcessingError::InsufficientData { .. })
        ));
    }

    #[test]
    fn test_hann_window_symmetric() {
        let w = hann_window(5);
        assert_eq!(w.len(), 5);
        assert!(w[0].abs() < 1e-12);
        assert!(w[4].abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert!((w[1] - w[3]).abs() < 1e-12);
    }

    #[test]
    fn test_fft_sine_wave_peak() {
        let processor = FftProcessor::new(128, 128.0).unwrap();
        let signal = sine(20.0, 1.0, 128.0, 128);

        let peaks = processor.peaks(&signal, 3).unwrap();
        assert_eq!(peaks.len(), 3);
        assert!((peaks[0].freq - 20.0).abs() <= processor.frequency_resolution());
        assert!(peaks[0].amp >= peaks[1].amp);
        assert!(peaks[1].amp >= peaks[2].amp);
    }

    #[test]
    fn test_dc_excluded() {
        let processor = FftProcessor::new(64, 64.0).unwrap();
        let signal: Vec<f64> = sine(8.0, 0.1, 64.0, 64).iter().map(|v| v + 1.0).collect();

        let peaks = processor.peaks(&signal, 5).unwrap();
        assert!(peaks.iter().all(|p| p.freq > 0.0));
    }

    #[test]
    fn test_length_mismatch() {
        let processor = FftProcessor::new(64, 64.0).unwrap();
        assert!(processor.peaks(&[0.0; 10], 5).is_err());
    }
}
