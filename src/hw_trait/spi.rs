//! SPI backend trait and bus configuration.

use std::{fmt, io};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// SPI mode (clock polarity and phase).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SpiMode {
    /// CPOL=0, CPHA=0
    #[default]
    Mode0,
    /// CPOL=0, CPHA=1
    Mode1,
    /// CPOL=1, CPHA=0
    Mode2,
    /// CPOL=1, CPHA=1
    Mode3,
}

impl TryFrom<u8> for SpiMode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SpiMode::Mode0),
            1 => Ok(SpiMode::Mode1),
            2 => Ok(SpiMode::Mode2),
            3 => Ok(SpiMode::Mode3),
            _ => Err(Error::invalid_argument(format!(
                "Invalid SPI mode {value} (expected 0, 1, 2 or 3)"
            ))),
        }
    }
}

impl From<SpiMode> for u8 {
    fn from(mode: SpiMode) -> Self {
        mode as u8
    }
}

impl fmt::Display for SpiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

/// Bit order on the wire.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum BitOrder {
    #[default]
    Msb,
    Lsb,
}

bitflags! {
    /// Additional mode bits beyond CPOL/CPHA and bit order.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct SpiFlags: u8 {
        /// Chip select is active high.
        const CS_HIGH = 0x01;
        /// Shared SI/SO signal.
        const THREE_WIRE = 0x02;
        /// Internal loopback in the controller.
        const LOOPBACK = 0x04;
        /// No chip select at all.
        const NO_CS = 0x08;
    }
}

/// SPI bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpiConfig {
    pub mode: SpiMode,
    pub max_speed_hz: u32,
    pub bit_order: BitOrder,
    pub bits_per_word: u8,
    pub extra_flags: SpiFlags,
}

impl Default for SpiConfig {
    fn default() -> Self {
        Self {
            mode: SpiMode::Mode0,
            max_speed_hz: 1_000_000, // 1 MHz
            bit_order: BitOrder::Msb,
            bits_per_word: 8,
            extra_flags: SpiFlags::empty(),
        }
    }
}

impl SpiConfig {
    pub fn new(mode: SpiMode, max_speed_hz: u32) -> Self {
        Self {
            mode,
            max_speed_hz,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.max_speed_hz == 0 {
            return Err("Invalid SPI max speed 0 Hz".to_string());
        }
        if !(1..=32).contains(&self.bits_per_word) {
            return Err(format!(
                "Invalid SPI bits per word {} (expected 1 to 32)",
                self.bits_per_word
            ));
        }
        Ok(())
    }
}

/// An opened SPI device (one chip select on one bus).
pub trait SpiDevice: Send {
    /// Apply all fields of `config`.
    ///
    /// On error the device may be partially configured; callers that need
    /// atomicity re-apply their previous configuration.
    fn configure(&mut self, config: &SpiConfig) -> io::Result<()>;

    /// Full-duplex exchange. `tx` and `rx` have equal length.
    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;
}
