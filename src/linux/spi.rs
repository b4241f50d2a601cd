//! spidev backend (`/dev/spidevB.C`).

use std::{io, path::Path};

use spidev::{SpiModeFlags, Spidev, SpidevOptions, SpidevTransfer};

use crate::{
    hw_trait::spi::{BitOrder, SpiConfig, SpiDevice, SpiFlags, SpiMode},
    tracing::prelude::*,
};

/// An opened spidev node.
pub struct SpidevDevice {
    dev: Spidev,
}

impl SpidevDevice {
    /// Open the device node. No configuration is applied.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let dev = Spidev::open(path)?;
        Ok(Self { dev })
    }
}

fn mode_flags(config: &SpiConfig) -> SpiModeFlags {
    let mut flags = match config.mode {
        SpiMode::Mode0 => SpiModeFlags::SPI_MODE_0,
        SpiMode::Mode1 => SpiModeFlags::SPI_MODE_1,
        SpiMode::Mode2 => SpiModeFlags::SPI_MODE_2,
        SpiMode::Mode3 => SpiModeFlags::SPI_MODE_3,
    };
    let extra = config.extra_flags;
    if extra.contains(SpiFlags::CS_HIGH) {
        flags |= SpiModeFlags::SPI_CS_HIGH;
    }
    if extra.contains(SpiFlags::THREE_WIRE) {
        flags |= SpiModeFlags::SPI_3WIRE;
    }
    if extra.contains(SpiFlags::LOOPBACK) {
        flags |= SpiModeFlags::SPI_LOOP;
    }
    if extra.contains(SpiFlags::NO_CS) {
        flags |= SpiModeFlags::SPI_NO_CS;
    }
    flags
}

impl SpiDevice for SpidevDevice {
    fn configure(&mut self, config: &SpiConfig) -> io::Result<()> {
        let options = SpidevOptions::new()
            .mode(mode_flags(config))
            .max_speed_hz(config.max_speed_hz)
            .bits_per_word(config.bits_per_word)
            .lsb_first(config.bit_order == BitOrder::Lsb)
            .build();
        self.dev.configure(&options)
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        let mut transfer = SpidevTransfer::read_write(tx, rx);
        self.dev.transfer(&mut transfer)?;
        trace!(len = tx.len(), "spidev transfer");
        Ok(())
    }
}
