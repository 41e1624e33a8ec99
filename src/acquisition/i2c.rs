//! Linux i2c-dev bus access (`/dev/i2c-N` with the `I2C_SLAVE` ioctl)

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use tracing::debug;

use super::{AcquisitionError, RawBusPort};

/// ioctl request selecting the target device address
const I2C_SLAVE: u32 = 0x0703;

/// Register port for one device on an i2c-dev bus
#[derive(Debug)]
pub struct LinuxI2cBus {
    file: File,
    bus: u8,
    address: u16,
}

impl LinuxI2cBus {
    pub fn open(bus: u8, address: u16) -> Result<Self, AcquisitionError> {
        let path = format!("/dev/i2c-{bus}");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| AcquisitionError::BusUnavailable {
                bus,
                reason: format!("{path}: {e}"),
            })?;

        select_device(&file, address).map_err(|e| AcquisitionError::DeviceNotFound {
            address,
            reason: e.to_string(),
        })?;

        debug!(bus, address = %format!("0x{address:02x}"), "Opened i2c device");
        Ok(Self { file, bus, address })
    }

    pub fn bus(&self) -> u8 {
        self.bus
    }

    pub fn address(&self) -> u16 {
        self.address
    }

    fn read_block(&mut self, reg: u8, buf: &mut [u8]) -> Result<(), AcquisitionError> {
        self.file.write_all(&[reg])?;
        self.file.read_exact(buf)?;
        Ok(())
    }
}

impl RawBusPort for LinuxI2cBus {
    fn read_register(&mut self, reg: u8) -> Result<u8, AcquisitionError> {
        let mut buf = [0u8; 1];
        self.read_block(reg, &mut buf)?;
        Ok(buf[0])
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), AcquisitionError> {
        self.file.write_all(&[reg, value])?;
        Ok(())
    }

    fn read_register_pair(&mut self, reg: u8) -> Result<i16, AcquisitionError> {
        let mut buf = [0u8; 2];
        self.read_block(reg, &mut buf)?;
        Ok(i16::from_be_bytes(buf))
    }

    fn write_register_pair(&mut self, reg: u8, value: u16) -> Result<(), AcquisitionError> {
        let [high, low] = value.to_be_bytes();
        self.file.write_all(&[reg, high, low])?;
        Ok(())
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn select_device(file: &File, address: u16) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let result = unsafe {
        libc::ioctl(
            file.as_raw_fd(),
            I2C_SLAVE as _,
            libc::c_ulong::from(address),
        )
    };
    if result < 0 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
fn select_device(_file: &File, _address: u16) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        format!("i2c-dev ioctl 0x{I2C_SLAVE:04x} requires Linux"),
    ))
}
