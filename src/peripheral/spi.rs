//! SPI devices.

use std::{fmt, path::Path};

use serde::Serialize;

use super::{Kind, Peripheral, Resource};
use crate::{
    error::{Error, ErrorKind, Result},
    hw_trait::spi::{BitOrder, SpiConfig, SpiDevice, SpiFlags, SpiMode},
    linux::spi::SpidevDevice,
    tracing::prelude::*,
};

/// Diagnostic snapshot of an SPI handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpiInfo {
    pub device: String,
    pub config: SpiConfig,
    pub open: bool,
}

impl fmt::Display for SpiInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SPI (device={}, mode={}, max_speed={}, bit_order={}, bits_per_word={}, extra_flags=0x{:02x})",
            self.device,
            self.config.mode,
            self.config.max_speed_hz,
            self.config.bit_order,
            self.config.bits_per_word,
            self.config.extra_flags.bits(),
        )
    }
}

/// An SPI device with its bus configuration applied.
pub struct Spi {
    device_name: String,
    config: SpiConfig,
    device: Resource<Box<dyn SpiDevice>>,
}

impl fmt::Debug for Spi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spi")
            .field("device", &self.device_name)
            .field("config", &self.config)
            .field("open", &self.device.is_open())
            .finish()
    }
}

impl Spi {
    /// Open the spidev node at `path` and apply `config`.
    ///
    /// If the kernel rejects any part of the configuration the node is
    /// closed again.
    pub fn open(path: impl AsRef<Path>, config: SpiConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate().map_err(Error::invalid_argument)?;

        let device = SpidevDevice::open(path).map_err(|e| {
            Error::from_io(
                ErrorKind::OpenFailed,
                &e,
                format!("Opening SPI device \"{}\"", path.display()),
            )
        })?;
        Self::attach(path.display().to_string(), Box::new(device), config)
    }

    /// Apply `config` to an already-opened SPI backend.
    pub fn with_device(device: Box<dyn SpiDevice>, config: SpiConfig) -> Result<Self> {
        Self::attach("custom".to_string(), device, config)
    }

    fn attach(device_name: String, mut device: Box<dyn SpiDevice>, config: SpiConfig) -> Result<Self> {
        config.validate().map_err(Error::invalid_argument)?;

        // On error `device` is dropped here, closing the node.
        device.configure(&config).map_err(|e| {
            Error::from_io(
                ErrorKind::ConfigureFailed,
                &e,
                format!("Configuring SPI device \"{device_name}\""),
            )
        })?;

        debug!(
            device = %device_name,
            mode = %config.mode,
            max_speed_hz = config.max_speed_hz,
            bits_per_word = config.bits_per_word,
            "SPI device opened"
        );
        Ok(Self {
            device_name,
            config,
            device: Resource::Open(device),
        })
    }

    pub fn config(&self) -> &SpiConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.device.is_open()
    }

    /// Full-duplex transfer: clocks out `data` and returns the bytes clocked
    /// in, one for one.
    pub fn transfer(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let what = self.describe();
        let device = self.device.get_mut(&what)?;
        if data.is_empty() {
            return Ok(Vec::new());
        }

        let mut rx = vec![0u8; data.len()];
        device
            .transfer(data, &mut rx)
            .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Transferring on {what}")))?;
        trace!(device = %self.device_name, len = data.len(), "SPI transfer");
        Ok(rx)
    }

    /// Send `data`, discarding what is clocked in.
    pub fn write(&mut self, data: &[u8]) -> Result<()> {
        self.transfer(data).map(|_| ())
    }

    /// Clock in `len` bytes while sending zeros.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>> {
        self.transfer(&vec![0u8; len])
    }

    /// Apply a new configuration. On failure the previous configuration is
    /// re-applied and stays in effect.
    pub fn reconfigure(&mut self, config: SpiConfig) -> Result<()> {
        let what = self.describe();
        let device = self.device.get_mut(&what)?;
        config.validate().map_err(Error::invalid_argument)?;

        if let Err(e) = device.configure(&config) {
            let err = Error::from_io(ErrorKind::ConfigureFailed, &e, format!("Configuring {what}"));
            if let Err(rollback) = device.configure(&self.config) {
                warn!(device = %self.device_name, error = %rollback, "SPI rollback failed, closing device");
                self.device.lose();
            }
            return Err(err);
        }

        debug!(
            device = %self.device_name,
            mode = %config.mode,
            max_speed_hz = config.max_speed_hz,
            "SPI device reconfigured"
        );
        self.config = config;
        Ok(())
    }

    pub fn set_mode(&mut self, mode: SpiMode) -> Result<()> {
        let config = SpiConfig {
            mode,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_max_speed(&mut self, max_speed_hz: u32) -> Result<()> {
        let config = SpiConfig {
            max_speed_hz,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_bit_order(&mut self, bit_order: BitOrder) -> Result<()> {
        let config = SpiConfig {
            bit_order,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_bits_per_word(&mut self, bits_per_word: u8) -> Result<()> {
        let config = SpiConfig {
            bits_per_word,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_extra_flags(&mut self, extra_flags: SpiFlags) -> Result<()> {
        let config = SpiConfig {
            extra_flags,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    /// Close the device. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.device.close().is_some() {
            debug!(device = %self.device_name, "SPI device closed");
        }
        Ok(())
    }

    pub fn info(&self) -> SpiInfo {
        SpiInfo {
            device: self.device_name.clone(),
            config: self.config.clone(),
            open: self.device.is_open(),
        }
    }

    fn describe(&self) -> String {
        format!("SPI device \"{}\"", self.device_name)
    }
}

impl Peripheral for Spi {
    const KIND: Kind = Kind::Spi;
    type Config = SpiConfig;
    type Info = SpiInfo;

    fn is_open(&self) -> bool {
        Spi::is_open(self)
    }

    fn close(&mut self) -> Result<()> {
        Spi::close(self)
    }

    fn configure(&mut self, config: SpiConfig) -> Result<()> {
        self.reconfigure(config)
    }

    fn info(&self) -> SpiInfo {
        Spi::info(self)
    }
}

impl Drop for Spi {
    fn drop(&mut self) {
        if self.device.is_open() {
            warn!(device = %self.device_name, "SPI handle dropped while open, closing device");
            let _ = self.close();
        }
    }
}
