//! i2c-dev backend (`/dev/i2c-N`).

use std::{
    fs::{File, OpenOptions},
    io,
    os::fd::AsRawFd,
    path::Path,
};

use nix::libc::c_ulong;

use crate::{
    hw_trait::i2c::{Functionality, I2cBus, Segment},
    tracing::prelude::*,
};

#[allow(non_camel_case_types)]
mod ioctl {
    use nix::libc::c_ulong;

    #[repr(C)]
    pub struct i2c_msg {
        pub addr: u16,
        pub flags: u16,
        pub len: u16,
        pub buf: *mut u8,
    }

    #[repr(C)]
    pub struct i2c_rdwr_ioctl_data {
        pub msgs: *mut i2c_msg,
        pub nmsgs: u32,
    }

    nix::ioctl_read_bad!(i2c_funcs, 0x0705, c_ulong);
    nix::ioctl_write_ptr_bad!(i2c_rdwr, 0x0707, i2c_rdwr_ioctl_data);
}

use ioctl::{i2c_funcs, i2c_msg, i2c_rdwr, i2c_rdwr_ioctl_data};

/// An opened i2c-dev adapter.
#[derive(Debug)]
pub struct I2cDev {
    file: File,
}

impl I2cDev {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self { file })
    }
}

impl I2cBus for I2cDev {
    fn functionality(&mut self) -> io::Result<Functionality> {
        let mut funcs: c_ulong = 0;
        // SAFETY: `funcs` is a valid, writable unsigned long.
        unsafe { i2c_funcs(self.file.as_raw_fd(), &mut funcs) }?;
        Ok(Functionality::from_bits_retain(funcs as u32))
    }

    fn transfer(&mut self, address: u16, segments: &mut [Segment<'_>]) -> io::Result<()> {
        let mut msgs = segments
            .iter_mut()
            .map(|segment| {
                let len = u16::try_from(segment.buf.len())
                    .map_err(|_| io::Error::from_raw_os_error(nix::libc::EINVAL))?;
                Ok(i2c_msg {
                    addr: address,
                    flags: segment.flags.bits(),
                    len,
                    buf: segment.buf.as_mut_ptr(),
                })
            })
            .collect::<io::Result<Vec<_>>>()?;

        let data = i2c_rdwr_ioctl_data {
            msgs: msgs.as_mut_ptr(),
            nmsgs: msgs.len() as u32,
        };
        // SAFETY: every message points into a live, exclusively borrowed
        // buffer of `len` bytes, and `msgs` outlives the call.
        unsafe { i2c_rdwr(self.file.as_raw_fd(), &data) }?;
        trace!(address = %format!("{address:#04x}"), segments = msgs.len(), "I2C_RDWR");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_funcs_on_regular_file_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut bus = I2cDev::open(file.path()).unwrap();
        let err = bus.functionality().unwrap_err();
        assert_eq!(err.raw_os_error(), Some(nix::libc::ENOTTY));
    }
}
