//! Hardware backend traits.
//!
//! This module defines the interface each peripheral handle is written
//! against (memory regions, GPIO chips and lines, SPI devices, I2C buses,
//! serial ports), so the same handle works with direct Linux kernel access
//! or with the in-process simulations in [`crate::sim`].
//!
//! Backends speak `std::io::Result`. Choosing the [`crate::ErrorKind`] for a
//! failure is the handle's job, since only the handle knows whether the
//! failing call was an open, a configure or a transfer.

pub mod gpio;
pub mod i2c;
pub mod mmio;
pub mod serial;
pub mod spi;

// Re-export traits
pub use gpio::{GpioChip, GpioLine};
pub use i2c::I2cBus;
pub use mmio::MemoryRegion;
pub use serial::SerialDevice;
pub use spi::SpiDevice;

use std::time::Duration;

/// Convert a wait timeout to poll(2) milliseconds: `None` waits forever,
/// sub-millisecond remainders round up so a short timeout never busy-polls.
pub(crate) fn timeout_millis(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(timeout) => {
            let mut millis = timeout.as_millis();
            if Duration::from_millis(millis as u64) < timeout {
                millis += 1;
            }
            i32::try_from(millis).unwrap_or(i32::MAX)
        }
    }
}
