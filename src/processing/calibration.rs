//! Static-offset calibration from stationary samples

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div};
use thiserror::Error;

use crate::types::ThreeAxisReading;

/// Errors raised while computing a calibration offset
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Insufficient samples for calibration: need at least 1, have {0}")]
    InsufficientSamples(usize),

    #[error("Non-finite sample at index {0}")]
    NonFiniteSample(usize),

    #[error("Sample collection failed: {0}")]
    Collection(String),
}

/// A value that can be averaged into a calibration offset
pub trait StationarySample: Copy + Default + Add<Output = Self> + Div<f64, Output = Self> {
    fn is_finite(&self) -> bool;
}

impl StationarySample for f64 {
    fn is_finite(&self) -> bool {
        f64::is_finite(*self)
    }
}

impl StationarySample for ThreeAxisReading {
    fn is_finite(&self) -> bool {
        ThreeAxisReading::is_finite(self)
    }
}

/// Bias subtracted from every subsequent raw reading
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOffset<T> {
    pub value: T,
    pub sample_count: usize,
    pub computed_at: DateTime<Utc>,
}

/// Arithmetic mean of stationary raw samples, no outlier rejection
pub fn calibrate_stationary<T: StationarySample>(
    samples: &[T],
) -> Result<CalibrationOffset<T>, CalibrationError> {
    if samples.is_empty() {
        return Err(CalibrationError::InsufficientSamples(0));
    }
    if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
        return Err(CalibrationError::NonFiniteSample(index));
    }

    let sum = samples.iter().fold(T::default(), |acc, &s| acc + s);
    Ok(CalibrationOffset {
        value: sum / samples.len() as f64,
        sample_count: samples.len(),
        computed_at: Utc::now(),
    })
}
