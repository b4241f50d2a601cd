//! Linux kernel backends.
//!
//! Each submodule implements one [`crate::hw_trait`] trait on top of the
//! kernel's userspace interface for that peripheral: `/dev/mem` mappings,
//! the GPIO character device, spidev, i2c-dev and TTYs.

pub mod gpio;
pub mod i2c;
pub mod mmio;
pub mod serial;
pub mod spi;

pub use gpio::CdevChip;
pub use i2c::I2cDev;
pub use mmio::PhysicalMapping;
pub use serial::TtyPort;
pub use spi::SpidevDevice;

use std::{io, os::fd::BorrowedFd, time::Duration};

use nix::{
    errno::Errno,
    poll::{poll, PollFd, PollFlags, PollTimeout},
};

use crate::hw_trait::timeout_millis;

/// Wait until `fd` is readable. `None` waits forever.
///
/// Returns `false` when the timeout expires first.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Option<Duration>) -> io::Result<bool> {
    let timeout = match timeout {
        None => PollTimeout::NONE,
        Some(_) => PollTimeout::try_from(timeout_millis(timeout)).unwrap_or(PollTimeout::MAX),
    };

    loop {
        let mut fds = [PollFd::new(fd, PollFlags::POLLIN | PollFlags::POLLPRI)];
        match poll(&mut fds, timeout) {
            Ok(0) => return Ok(false),
            Ok(_) => {
                let revents = fds[0].revents().unwrap_or(PollFlags::empty());
                if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                    return Err(Errno::EIO.into());
                }
                return Ok(true);
            }
            // A signal cut the wait short; a timed wait simply restarts,
            // which can only lengthen it.
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}
