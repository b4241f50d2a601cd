//! Userspace access to Linux peripherals: memory-mapped registers, GPIO
//! lines, SPI devices, I2C buses and serial ports.
//!
//! Each peripheral is an exclusively owned handle ([`Mmio`], [`Gpio`],
//! [`Spi`], [`I2c`], [`Serial`]) that holds one open kernel resource and
//! reports every failure as an [`Error`] carrying a kind, the originating
//! errno and a message. Handles are written against the backend traits in
//! [`hw_trait`]; [`linux`] implements them on the kernel interfaces and
//! [`sim`] in memory.
//!
//! ```no_run
//! use periphery::{Direction, Gpio, Spi, SpiConfig, SpiMode};
//!
//! # fn main() -> periphery::Result<()> {
//! let mut led = Gpio::open("/dev/gpiochip0", 17, Direction::Out.into())?;
//! led.write(true)?;
//!
//! let mut spi = Spi::open("/dev/spidev0.0", SpiConfig::new(SpiMode::Mode0, 1_000_000))?;
//! let reply = spi.transfer(&[0x9f, 0, 0])?;
//! assert_eq!(reply.len(), 3);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod hw_trait;
pub mod linux;
pub mod peripheral;
pub mod sim;
pub mod tracing;

pub use config::Settings;
pub use error::{Error, ErrorKind, Result};
pub use hw_trait::{
    gpio::{Bias, Direction, Drive, Edge, EventEdge, GpioConfig, GpioEvent, LineId},
    i2c::{Functionality, I2cMessage, MessageFlags},
    serial::{DataBits, FlowControl, Parity, SerialConfig, StopBits},
    spi::{BitOrder, SpiConfig, SpiFlags, SpiMode},
};
pub use peripheral::{
    gpio::{Gpio, GpioInfo},
    i2c::{I2c, I2cInfo},
    mmio::{Mmio, MmioInfo, Width},
    serial::{Serial, SerialInfo},
    spi::{Spi, SpiInfo},
    Kind, Peripheral,
};
