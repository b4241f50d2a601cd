//! I2C buses.
//!
//! An [`I2c`] handle owns one adapter. Target addresses are chosen per
//! transfer; a transfer is a single combined session with a repeated start
//! between segments.

use std::{fmt, path::Path};

use serde::Serialize;

use super::{Kind, Peripheral, Resource};
use crate::{
    error::{Error, ErrorKind, Result},
    hw_trait::i2c::{Functionality, I2cBus, I2cMessage, MessageFlags, Payload, Segment},
    linux::i2c::I2cDev,
    tracing::prelude::*,
};

const MAX_SEVEN_BIT_ADDRESS: u16 = 0x7f;
const MAX_TEN_BIT_ADDRESS: u16 = 0x3ff;
const MAX_SEGMENT_LEN: usize = u16::MAX as usize;
/// `I2C_RDWR_IOCTL_MAX_MSGS` in the kernel.
const MAX_SEGMENTS: usize = 42;

/// Diagnostic snapshot of an I2C handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct I2cInfo {
    pub bus: String,
    pub functionality: Functionality,
    pub open: bool,
}

impl fmt::Display for I2cInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "I2C (bus={}, functionality={:#010x})",
            self.bus,
            self.functionality.bits()
        )
    }
}

/// An opened I2C adapter.
pub struct I2c {
    bus_name: String,
    functionality: Functionality,
    bus: Resource<Box<dyn I2cBus>>,
}

impl fmt::Debug for I2c {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("I2c")
            .field("bus", &self.bus_name)
            .field("functionality", &self.functionality)
            .field("open", &self.bus.is_open())
            .finish()
    }
}

impl I2c {
    /// Open the i2c-dev node at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bus = I2cDev::open(path).map_err(|e| {
            Error::from_io(
                ErrorKind::OpenFailed,
                &e,
                format!("Opening I2C bus \"{}\"", path.display()),
            )
        })?;
        Self::attach(path.display().to_string(), Box::new(bus))
    }

    /// Wrap an already-opened I2C backend.
    pub fn with_bus(bus: Box<dyn I2cBus>) -> Result<Self> {
        Self::attach("custom".to_string(), bus)
    }

    fn attach(bus_name: String, mut bus: Box<dyn I2cBus>) -> Result<Self> {
        let functionality = bus.functionality().map_err(|e| {
            Error::from_io(
                ErrorKind::OpenFailed,
                &e,
                format!("Querying functionality of I2C bus \"{bus_name}\""),
            )
        })?;

        debug!(
            bus = %bus_name,
            functionality = %format!("{:#x}", functionality.bits()),
            "I2C bus opened"
        );
        Ok(Self {
            bus_name,
            functionality,
            bus: Resource::Open(bus),
        })
    }

    /// Adapter capabilities reported when the bus was opened.
    pub fn functionality(&self) -> Functionality {
        self.functionality
    }

    pub fn is_open(&self) -> bool {
        self.bus.is_open()
    }

    /// Run `messages` against the target at `address` as one session and
    /// return the data of each read segment, in order.
    pub fn transfer(&mut self, address: u16, messages: &[I2cMessage]) -> Result<Vec<Vec<u8>>> {
        let what = self.describe();
        let bus = self.bus.get_mut(&what)?;
        check_transfer(self.functionality, address, messages)?;

        let mut buffers: Vec<Vec<u8>> = messages
            .iter()
            .map(|message| match &message.payload {
                Payload::Write(data) => data.clone(),
                Payload::Read(len) => vec![0; *len],
            })
            .collect();
        let mut segments: Vec<Segment<'_>> = buffers
            .iter_mut()
            .zip(messages)
            .map(|(buf, message)| Segment {
                flags: message.flags,
                buf,
            })
            .collect();

        bus.transfer(address, &mut segments).map_err(|e| {
            Error::from_io(
                ErrorKind::IoFailed,
                &e,
                format!("Transferring with {address:#04x} on {what}"),
            )
        })?;
        drop(segments);
        trace!(bus = %self.bus_name, address, segments = messages.len(), "I2C transfer");

        Ok(buffers
            .into_iter()
            .zip(messages)
            .filter(|(_, message)| message.is_read())
            .map(|(buf, _)| buf)
            .collect())
    }

    /// Write `data` to the target.
    pub fn write(&mut self, address: u16, data: &[u8]) -> Result<()> {
        self.transfer(address, &[I2cMessage::write(data)])
            .map(|_| ())
    }

    /// Read `len` bytes from the target.
    pub fn read(&mut self, address: u16, len: usize) -> Result<Vec<u8>> {
        let reads = self.transfer(address, &[I2cMessage::read(len)])?;
        Ok(reads.into_iter().next().unwrap_or_default())
    }

    /// Write `data`, then read `len` bytes after a repeated start.
    pub fn write_read(&mut self, address: u16, data: &[u8], len: usize) -> Result<Vec<u8>> {
        let reads = self.transfer(
            address,
            &[I2cMessage::write(data), I2cMessage::read(len)],
        )?;
        Ok(reads.into_iter().next().unwrap_or_default())
    }

    /// Read one byte register of a register-addressed target.
    pub fn read_register(&mut self, address: u16, register: u8) -> Result<u8> {
        let data = self.write_read(address, &[register], 1)?;
        Ok(data.first().copied().unwrap_or_default())
    }

    pub fn write_register(&mut self, address: u16, register: u8, value: u8) -> Result<()> {
        self.write(address, &[register, value])
    }

    /// Close the bus. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.bus.close().is_some() {
            debug!(bus = %self.bus_name, "I2C bus closed");
        }
        Ok(())
    }

    pub fn info(&self) -> I2cInfo {
        I2cInfo {
            bus: self.bus_name.clone(),
            functionality: self.functionality,
            open: self.bus.is_open(),
        }
    }

    fn describe(&self) -> String {
        format!("I2C bus \"{}\"", self.bus_name)
    }
}

/// Validate a transfer before anything reaches the bus.
fn check_transfer(
    functionality: Functionality,
    address: u16,
    messages: &[I2cMessage],
) -> Result<()> {
    if messages.is_empty() {
        return Err(Error::invalid_argument(
            "I2C transfer needs at least one message",
        ));
    }
    if messages.len() > MAX_SEGMENTS {
        return Err(Error::invalid_argument(format!(
            "I2C transfer has {} messages (max {MAX_SEGMENTS})",
            messages.len()
        )));
    }

    let mut ten_bit = false;
    let mut nostart = false;
    for (index, message) in messages.iter().enumerate() {
        let len = message.len();
        if len == 0 || len > MAX_SEGMENT_LEN {
            return Err(Error::invalid_argument(format!(
                "I2C message {index} has invalid length {len} (expected 1 to {MAX_SEGMENT_LEN})"
            )));
        }
        ten_bit |= message.flags.contains(MessageFlags::TEN_BIT);
        nostart |= message.flags.contains(MessageFlags::NOSTART);
    }

    let max_address = if ten_bit {
        MAX_TEN_BIT_ADDRESS
    } else {
        MAX_SEVEN_BIT_ADDRESS
    };
    if address > max_address {
        return Err(Error::invalid_argument(format!(
            "I2C address {address:#x} out of range (max {max_address:#x})"
        )));
    }

    if !functionality.contains(Functionality::I2C) {
        return Err(Error::unsupported(
            "I2C adapter does not support combined transfers",
        ));
    }
    if ten_bit && !functionality.contains(Functionality::TEN_BIT_ADDR) {
        return Err(Error::unsupported(
            "I2C adapter does not support ten-bit addresses",
        ));
    }
    if nostart && !functionality.contains(Functionality::NOSTART) {
        return Err(Error::unsupported(
            "I2C adapter does not support segments without start",
        ));
    }
    Ok(())
}

impl Peripheral for I2c {
    const KIND: Kind = Kind::I2c;
    /// Addressing is per transfer; there is nothing to configure.
    type Config = ();
    type Info = I2cInfo;

    fn is_open(&self) -> bool {
        I2c::is_open(self)
    }

    fn close(&mut self) -> Result<()> {
        I2c::close(self)
    }

    fn configure(&mut self, _config: ()) -> Result<()> {
        let what = self.describe();
        self.bus.get_mut(&what).map(|_| ())
    }

    fn info(&self) -> I2cInfo {
        I2c::info(self)
    }
}

impl Drop for I2c {
    fn drop(&mut self) {
        if self.bus.is_open() {
            warn!(bus = %self.bus_name, "I2C handle dropped while open, closing bus");
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimI2cBus, SimI2cDevice};

    const EEPROM: u16 = 0x50;

    fn bus_with_eeprom() -> (I2c, SimI2cBus) {
        let sim = SimI2cBus::new();
        sim.attach(EEPROM, SimI2cDevice::new(256));
        let i2c = I2c::with_bus(Box::new(sim.clone())).unwrap();
        (i2c, sim)
    }

    #[test]
    fn test_register_helpers() {
        let (mut i2c, sim) = bus_with_eeprom();
        i2c.write_register(EEPROM, 0x20, 0x5a).unwrap();
        assert_eq!(sim.register(EEPROM, 0x20), Some(0x5a));
        assert_eq!(i2c.read_register(EEPROM, 0x20).unwrap(), 0x5a);

        i2c.write(EEPROM, &[0x00, 1, 2, 3]).unwrap();
        assert_eq!(i2c.write_read(EEPROM, &[0x00], 3).unwrap(), vec![1, 2, 3]);
        // The register pointer now sits after the bytes just read.
        assert_eq!(i2c.read(EEPROM, 1).unwrap(), vec![0]);
    }

    #[test]
    fn test_transfer_returns_reads_in_order() {
        let (mut i2c, sim) = bus_with_eeprom();
        sim.set_register(EEPROM, 0, 0x11);
        sim.set_register(EEPROM, 1, 0x22);

        let reads = i2c
            .transfer(
                EEPROM,
                &[
                    I2cMessage::write([0x00]),
                    I2cMessage::read(1),
                    I2cMessage::read(1),
                ],
            )
            .unwrap();
        assert_eq!(reads, vec![vec![0x11], vec![0x22]]);
    }

    #[test]
    fn test_empty_transfer_is_invalid() {
        let (mut i2c, sim) = bus_with_eeprom();
        let err = i2c.transfer(EEPROM, &[]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(sim.transfer_count(), 0);
    }

    #[test]
    fn test_segment_lengths() {
        let (mut i2c, sim) = bus_with_eeprom();
        for message in [I2cMessage::read(0), I2cMessage::read(65_536)] {
            let err = i2c.transfer(EEPROM, &[message]).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        assert_eq!(sim.transfer_count(), 0);
    }

    #[test]
    fn test_segment_count() {
        let (mut i2c, sim) = bus_with_eeprom();
        let messages = vec![I2cMessage::read(1); 43];
        let err = i2c.transfer(EEPROM, &messages).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert_eq!(sim.transfer_count(), 0);

        let reads = i2c.transfer(EEPROM, &messages[..42]).unwrap();
        assert_eq!(reads.len(), 42);
    }

    #[test]
    fn test_address_range() {
        let (mut i2c, _sim) = bus_with_eeprom();
        let err = i2c.read(0x80, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        let ten_bit = I2cMessage::read(1).with_flags(MessageFlags::TEN_BIT);
        let err = i2c.transfer(0x400, &[ten_bit.clone()]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);

        // In range, but the simulated adapter lacks ten-bit support.
        let err = i2c.transfer(0x150, &[ten_bit]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
    }

    #[test]
    fn test_adapter_without_i2c() {
        let sim = SimI2cBus::new();
        sim.set_functionality(Functionality::SMBUS_QUICK);
        let mut i2c = I2c::with_bus(Box::new(sim.clone())).unwrap();
        let err = i2c.read(0x10, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        assert_eq!(sim.transfer_count(), 0);
    }

    #[test]
    fn test_nack() {
        let (mut i2c, _sim) = bus_with_eeprom();
        let err = i2c.read(0x51, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IoFailed);
        assert_eq!(err.os_code(), nix::libc::ENXIO);
    }

    #[test]
    fn test_close_twice() {
        let (mut i2c, _sim) = bus_with_eeprom();
        i2c.close().unwrap();
        i2c.close().unwrap();
        assert_eq!(i2c.read(EEPROM, 1).unwrap_err().kind(), ErrorKind::Closed);
        assert!(!i2c.info().open);
    }
}
