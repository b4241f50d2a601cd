//! Simulated backends.
//!
//! In-process implementations of the [`crate::hw_trait`] traits for tests
//! and for hosts without the hardware. They behave like the kernel
//! interfaces they stand in for: claims are exclusive, bad configuration is
//! rejected with the errno the kernel would use, and blocking calls honor
//! their timeouts.
//!
//! Handles returned by the simulations share state with the object that
//! created them, so a test can drive inputs and observe outputs while a
//! peripheral handle owns the backend.

pub mod gpio;
pub mod i2c;
pub mod mmio;
pub mod serial;
pub mod spi;

pub use gpio::SimChip;
pub use i2c::{SimI2cBus, SimI2cDevice};
pub use mmio::RamRegion;
pub use serial::SimPort;
pub use spi::LoopbackSpi;
