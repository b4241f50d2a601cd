//! I2C backend trait and message types.

use std::io;

use bitflags::bitflags;
use serde::Serialize;

bitflags! {
    /// Adapter functionality, as reported by the `I2C_FUNCS` ioctl.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct Functionality: u32 {
        /// Plain I2C transfers, i.e. combined messages with repeated start.
        const I2C = 0x0000_0001;
        const TEN_BIT_ADDR = 0x0000_0002;
        const PROTOCOL_MANGLING = 0x0000_0004;
        const SMBUS_PEC = 0x0000_0008;
        const NOSTART = 0x0000_0010;
        const SLAVE = 0x0000_0020;
        const SMBUS_QUICK = 0x0001_0000;
        const SMBUS_READ_BYTE = 0x0002_0000;
        const SMBUS_WRITE_BYTE = 0x0004_0000;
        const SMBUS_READ_BYTE_DATA = 0x0008_0000;
        const SMBUS_WRITE_BYTE_DATA = 0x0010_0000;
        const SMBUS_READ_WORD_DATA = 0x0020_0000;
        const SMBUS_WRITE_WORD_DATA = 0x0040_0000;

        const _ = !0;
    }
}

bitflags! {
    /// Per-segment flags, laid out as the kernel's `i2c_msg.flags`.
    #[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
    #[serde(transparent)]
    pub struct MessageFlags: u16 {
        /// Read segment (set by [`I2cMessage::read`]).
        const READ = 0x0001;
        /// Address is ten bits wide.
        const TEN_BIT = 0x0010;
        /// Generate a stop after this segment.
        const STOP = 0x8000;
        /// Do not generate a (repeated) start before this segment.
        const NOSTART = 0x4000;
        const REV_DIR_ADDR = 0x2000;
        const IGNORE_NAK = 0x1000;
        const NO_RD_ACK = 0x0800;
    }
}

/// Direction and payload of one segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Write(Vec<u8>),
    Read(usize),
}

/// One segment of an addressed transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct I2cMessage {
    pub payload: Payload,
    pub flags: MessageFlags,
}

impl I2cMessage {
    pub fn write(data: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: Payload::Write(data.into()),
            flags: MessageFlags::empty(),
        }
    }

    pub fn read(len: usize) -> Self {
        Self {
            payload: Payload::Read(len),
            flags: MessageFlags::READ,
        }
    }

    /// Add flags to the segment. The read bit follows the payload.
    pub fn with_flags(mut self, flags: MessageFlags) -> Self {
        self.flags |= flags - MessageFlags::READ;
        self
    }

    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Write(data) => data.len(),
            Payload::Read(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_read(&self) -> bool {
        matches!(self.payload, Payload::Read(_))
    }
}

/// A segment as handed to the backend: the buffer is the data to send for
/// writes and the destination for reads.
#[derive(Debug)]
pub struct Segment<'a> {
    pub flags: MessageFlags,
    pub buf: &'a mut [u8],
}

impl Segment<'_> {
    pub fn is_read(&self) -> bool {
        self.flags.contains(MessageFlags::READ)
    }
}

/// An opened I2C bus adapter.
pub trait I2cBus: Send {
    fn functionality(&mut self) -> io::Result<Functionality>;

    /// Run all segments as one addressed session (repeated start between
    /// segments, stop at the end).
    fn transfer(&mut self, address: u16, segments: &mut [Segment<'_>]) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        let write = I2cMessage::write(vec![0x10, 0x20]);
        assert!(!write.is_read());
        assert_eq!(write.len(), 2);

        let read = I2cMessage::read(4).with_flags(MessageFlags::STOP);
        assert!(read.is_read());
        assert_eq!(read.flags, MessageFlags::READ | MessageFlags::STOP);

        // with_flags cannot turn a write into a read
        let write = I2cMessage::write([1]).with_flags(MessageFlags::READ);
        assert_eq!(write.flags, MessageFlags::empty());
    }
}
