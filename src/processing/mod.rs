//! Signal processing module - vibration windows, spectral peaks, calibration
//! and current RMS

mod calibration;
mod current;
mod fft;
mod vibration;
mod window;

pub use calibration::*;
pub use current::*;
pub use fft::*;
pub use vibration::*;
pub use window::*;

use thiserror::Error;

/// Errors in signal processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessingError {
    #[error("Insufficient data: need {needed}, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("FFT error: {0}")]
    FftError(String),

    #[error("Invalid sampling rate: {0}")]
    InvalidSamplingRate(f64),
}
