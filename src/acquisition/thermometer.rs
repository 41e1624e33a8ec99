//! DS18B20 1-Wire thermometer via the kernel's sysfs `w1_slave` file

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::warn;

use super::{AcquisitionError, TemperatureProbe};
use crate::types::round_to;

/// CRC retries before a read is reported as failed
pub const W1_CRC_RETRIES: usize = 3;

const W1_RETRY_DELAY: Duration = Duration::from_millis(200);

/// Probe backed by `/sys/bus/w1/devices/<id>/w1_slave`
#[derive(Debug, Clone)]
pub struct W1Thermometer {
    device_id: String,
    path: PathBuf,
}

impl W1Thermometer {
    pub fn open(root: &Path, device_id: &str) -> Result<Self, AcquisitionError> {
        let path = root.join(device_id).join("w1_slave");
        if !path.exists() {
            return Err(AcquisitionError::ProbeNotFound(device_id.to_string()));
        }
        Ok(Self {
            device_id: device_id.to_string(),
            path,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

impl TemperatureProbe for W1Thermometer {
    fn read_celsius(&mut self) -> Result<f64, AcquisitionError> {
        for attempt in 1..=W1_CRC_RETRIES {
            let contents = fs::read_to_string(&self.path)?;
            match parse_w1_slave(&contents) {
                Ok(Some(celsius)) => return Ok(celsius),
                Ok(None) => {
                    warn!(probe = %self.device_id, attempt, "1-Wire CRC check failed, retrying");
                    thread::sleep(W1_RETRY_DELAY);
                }
                Err(reason) => {
                    return Err(AcquisitionError::MalformedReading {
                        probe: self.device_id.clone(),
                        reason,
                    })
                }
            }
        }
        Err(AcquisitionError::MalformedReading {
            probe: self.device_id.clone(),
            reason: format!("CRC check failed {W1_CRC_RETRIES} times"),
        })
    }
}

/// Parse `w1_slave` contents
///
/// `Ok(None)` when the CRC line does not end in `YES` (retryable);
/// otherwise the `t=` value converted from milli-degrees and rounded to 3 decimals.
pub fn parse_w1_slave(contents: &str) -> Result<Option<f64>, String> {
    let mut lines = contents.lines();
    let crc_line = lines.next().ok_or("empty w1_slave file")?;
    if !crc_line.trim_end().ends_with("YES") {
        return Ok(None);
    }

    let data_line = lines.next().ok_or("missing temperature line")?;
    let (_, raw) = data_line
        .split_once("t=")
        .ok_or("temperature marker t= not found")?;
    let milli: f64 = raw
        .trim()
        .parse()
        .map_err(|e| format!("invalid temperature value '{}': {e}", raw.trim()))?;

    Ok(Some(round_to(milli / 1000.0, 3)))
}
