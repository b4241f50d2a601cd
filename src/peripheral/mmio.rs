//! Memory-mapped I/O.
//!
//! An [`Mmio`] handle maps a physical address range and provides
//! bounds-checked, width-aligned volatile register access at byte offsets
//! from the range's base. Accesses are neither buffered nor reordered by
//! this layer; ordering against hardware side effects is the caller's
//! concern.

use std::{fmt, path::Path};

use serde::Serialize;

use super::{Kind, Peripheral, Resource};
use crate::{
    config::Settings,
    error::{Error, ErrorKind, Result},
    hw_trait::MemoryRegion,
    linux::mmio::PhysicalMapping,
    tracing::prelude::*,
};

/// Register access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Width {
    W8,
    W16,
    W32,
    W64,
}

impl Width {
    pub fn bits(self) -> u32 {
        self.bytes() as u32 * 8
    }

    pub fn bytes(self) -> usize {
        match self {
            Width::W8 => 1,
            Width::W16 => 2,
            Width::W32 => 4,
            Width::W64 => 8,
        }
    }

    fn max_value(self) -> u64 {
        match self {
            Width::W64 => u64::MAX,
            _ => (1u64 << self.bits()) - 1,
        }
    }
}

impl TryFrom<u32> for Width {
    type Error = Error;

    /// Parse a width given in bits.
    fn try_from(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(Width::W8),
            16 => Ok(Width::W16),
            32 => Ok(Width::W32),
            64 => Ok(Width::W64),
            _ => Err(Error::invalid_argument(format!(
                "Invalid MMIO access width {bits} (expected 8, 16, 32 or 64 bits)"
            ))),
        }
    }
}

/// Diagnostic snapshot of an MMIO handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MmioInfo {
    pub base: u64,
    pub len: usize,
    /// Device the range is mapped from, or `"memory"` for a caller-supplied
    /// region.
    pub source: String,
    pub open: bool,
}

impl fmt::Display for MmioInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MMIO {:#010x} (source={}, size={})",
            self.base, self.source, self.len
        )
    }
}

/// A mapped physical address range.
pub struct Mmio {
    base: u64,
    len: usize,
    source: String,
    region: Resource<Box<dyn MemoryRegion>>,
}

impl fmt::Debug for Mmio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mmio")
            .field("base", &format_args!("{:#x}", self.base))
            .field("len", &self.len)
            .field("source", &self.source)
            .field("open", &self.region.is_open())
            .finish()
    }
}

impl Mmio {
    /// Map `len` bytes at physical address `base` from the configured memory
    /// device (`/dev/mem` unless `PERIPHERY_MEM_DEVICE` says otherwise).
    pub fn open(base: u64, len: usize) -> Result<Self> {
        let settings = Settings::from_env();
        Self::open_path(&settings.mem_device, base, len)
    }

    /// Map `len` bytes at offset `base` of the file at `path`.
    pub fn open_path(path: impl AsRef<Path>, base: u64, len: usize) -> Result<Self> {
        let path = path.as_ref();
        validate_range(base, len)?;

        let mapping = PhysicalMapping::map(path, base, len).map_err(|e| {
            Error::from_io(
                ErrorKind::OpenFailed,
                &e,
                format!("Mapping {:#x}+{:#x} from \"{}\"", base, len, path.display()),
            )
        })?;

        debug!(base = %format!("{base:#x}"), len, path = %path.display(), "MMIO mapped");
        Ok(Self {
            base,
            len,
            source: path.display().to_string(),
            region: Resource::Open(Box::new(mapping)),
        })
    }

    /// Wrap an already-acquired region that represents physical address
    /// `base`.
    pub fn with_region(base: u64, region: Box<dyn MemoryRegion>) -> Result<Self> {
        let len = region.len();
        validate_range(base, len)?;

        debug!(base = %format!("{base:#x}"), len, "MMIO region attached");
        Ok(Self {
            base,
            len,
            source: "memory".to_string(),
            region: Resource::Open(region),
        })
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_open(&self) -> bool {
        self.region.is_open()
    }

    /// Read a register of `width` at byte `offset`.
    pub fn read(&mut self, offset: usize, width: Width) -> Result<u64> {
        let ptr = self.register(offset, width)?;
        // SAFETY: `register` checked the access lies inside the live region
        // and that the pointer is aligned for `width`.
        let value = unsafe {
            match width {
                Width::W8 => u64::from(ptr.read_volatile()),
                Width::W16 => u64::from(ptr.cast::<u16>().read_volatile()),
                Width::W32 => u64::from(ptr.cast::<u32>().read_volatile()),
                Width::W64 => ptr.cast::<u64>().read_volatile(),
            }
        };
        trace!(offset, bits = width.bits(), value, "MMIO read");
        Ok(value)
    }

    /// Write `value` to a register of `width` at byte `offset`.
    pub fn write(&mut self, offset: usize, width: Width, value: u64) -> Result<()> {
        let ptr = self.register(offset, width)?;
        if value > width.max_value() {
            return Err(Error::invalid_argument(format!(
                "Value {value:#x} does not fit in {} bits",
                width.bits()
            )));
        }
        // SAFETY: as in `read`; the value was range-checked for the width.
        unsafe {
            match width {
                Width::W8 => ptr.write_volatile(value as u8),
                Width::W16 => ptr.cast::<u16>().write_volatile(value as u16),
                Width::W32 => ptr.cast::<u32>().write_volatile(value as u32),
                Width::W64 => ptr.cast::<u64>().write_volatile(value),
            }
        }
        trace!(offset, bits = width.bits(), value, "MMIO write");
        Ok(())
    }

    pub fn read8(&mut self, offset: usize) -> Result<u8> {
        self.read(offset, Width::W8).map(|v| v as u8)
    }

    pub fn read16(&mut self, offset: usize) -> Result<u16> {
        self.read(offset, Width::W16).map(|v| v as u16)
    }

    pub fn read32(&mut self, offset: usize) -> Result<u32> {
        self.read(offset, Width::W32).map(|v| v as u32)
    }

    pub fn read64(&mut self, offset: usize) -> Result<u64> {
        self.read(offset, Width::W64)
    }

    pub fn write8(&mut self, offset: usize, value: u8) -> Result<()> {
        self.write(offset, Width::W8, value.into())
    }

    pub fn write16(&mut self, offset: usize, value: u16) -> Result<()> {
        self.write(offset, Width::W16, value.into())
    }

    pub fn write32(&mut self, offset: usize, value: u32) -> Result<()> {
        self.write(offset, Width::W32, value.into())
    }

    pub fn write64(&mut self, offset: usize, value: u64) -> Result<()> {
        self.write(offset, Width::W64, value)
    }

    /// Copy `len` bytes starting at `offset` out of the region, one volatile
    /// byte access at a time.
    pub fn read_bytes(&mut self, offset: usize, len: usize) -> Result<Vec<u8>> {
        let start = self.span(offset, len)?;
        // SAFETY: `span` checked `offset..offset + len` lies in the region.
        let bytes = (0..len)
            .map(|i| unsafe { start.add(i).read_volatile() })
            .collect();
        Ok(bytes)
    }

    /// Copy `data` into the region at `offset`, one volatile byte access at
    /// a time.
    pub fn write_bytes(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        let start = self.span(offset, data.len())?;
        for (i, byte) in data.iter().enumerate() {
            // SAFETY: `span` checked `offset..offset + data.len()`.
            unsafe { start.add(i).write_volatile(*byte) };
        }
        Ok(())
    }

    /// Unmap the range. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if let Some(region) = self.region.close() {
            drop(region);
            debug!(base = %format!("{:#x}", self.base), "MMIO unmapped");
        }
        Ok(())
    }

    pub fn info(&self) -> MmioInfo {
        MmioInfo {
            base: self.base,
            len: self.len,
            source: self.source.clone(),
            open: self.region.is_open(),
        }
    }

    fn describe(&self) -> String {
        format!("MMIO mapping {:#x}", self.base)
    }

    fn span(&mut self, offset: usize, size: usize) -> Result<*mut u8> {
        let what = self.describe();
        self.region.get_mut(&what)?;
        let in_bounds = offset
            .checked_add(size)
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(Error::invalid_argument(format!(
                "Access of {size} bytes at offset {offset:#x} exceeds mapped length {:#x}",
                self.len
            )));
        }
        let region = self.region.get_mut(&what)?;
        // SAFETY: offset <= len, so the result is within or one past the
        // region.
        Ok(unsafe { region.as_mut_ptr().add(offset) })
    }

    fn register(&mut self, offset: usize, width: Width) -> Result<*mut u8> {
        let what = self.describe();
        self.region.get_mut(&what)?;
        let size = width.bytes();
        let physical = self.base.checked_add(offset as u64);
        if physical.map_or(true, |address| address % size as u64 != 0) {
            return Err(Error::invalid_argument(format!(
                "Offset {offset:#x} is not aligned to {}-bit access",
                width.bits()
            )));
        }
        let ptr = self.span(offset, size)?;
        if ptr as usize % size != 0 {
            return Err(Error::invalid_argument(format!(
                "Region address for offset {offset:#x} is not aligned to {}-bit access",
                width.bits()
            )));
        }
        Ok(ptr)
    }
}

fn validate_range(base: u64, len: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::invalid_argument("MMIO length must be nonzero"));
    }
    if base.checked_add(len as u64).is_none() {
        return Err(Error::invalid_argument(format!(
            "MMIO range {base:#x}+{len:#x} overflows the address space"
        )));
    }
    Ok(())
}

impl Peripheral for Mmio {
    const KIND: Kind = Kind::Mmio;
    type Config = ();
    type Info = MmioInfo;

    fn is_open(&self) -> bool {
        Mmio::is_open(self)
    }

    fn close(&mut self) -> Result<()> {
        Mmio::close(self)
    }

    /// A mapping has no configuration; this only checks the handle is open.
    fn configure(&mut self, _config: ()) -> Result<()> {
        let what = self.describe();
        self.region.get_mut(&what).map(|_| ())
    }

    fn info(&self) -> MmioInfo {
        Mmio::info(self)
    }
}

impl Drop for Mmio {
    fn drop(&mut self) {
        if self.region.is_open() {
            warn!(base = %format!("{:#x}", self.base), "MMIO handle dropped while open, unmapping");
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::RamRegion;

    fn ram(len: usize) -> Mmio {
        Mmio::with_region(0x4000_0000, Box::new(RamRegion::new(len))).unwrap()
    }

    #[test]
    fn test_width_parsing() {
        assert_eq!(Width::try_from(32).unwrap(), Width::W32);
        let err = Width::try_from(24).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_register_round_trip() {
        let mut mmio = ram(64);
        mmio.write32(0x10, 0xdead_beef).unwrap();
        assert_eq!(mmio.read32(0x10).unwrap(), 0xdead_beef);
        assert_eq!(mmio.read16(0x10).unwrap(), 0xbeef);
        assert_eq!(mmio.read8(0x13).unwrap(), 0xde);

        mmio.write64(0x20, 0x0123_4567_89ab_cdef).unwrap();
        assert_eq!(mmio.read(0x20, Width::W64).unwrap(), 0x0123_4567_89ab_cdef);
    }

    #[test]
    fn test_out_of_bounds_every_width() {
        let mut mmio = ram(16);
        for width in [Width::W8, Width::W16, Width::W32, Width::W64] {
            let offset = 16;
            let err = mmio.read(offset, width).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{width:?}");
            let err = mmio.write(offset, width, 0).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument, "{width:?}");
        }
        // The last register of each width is still reachable.
        assert!(mmio.read(8, Width::W64).is_ok());
        assert!(mmio.read(15, Width::W8).is_ok());
        assert!(mmio.read(usize::MAX, Width::W8).is_err());
    }

    #[test]
    fn test_closed_before_argument_checks() {
        let mut mmio = Mmio::with_region(0x1000, Box::new(RamRegion::new(16))).unwrap();
        mmio.close().unwrap();
        for width in [Width::W8, Width::W16, Width::W32, Width::W64] {
            assert_eq!(mmio.read(64, width).unwrap_err().kind(), ErrorKind::Closed);
            assert_eq!(mmio.read(1, width).unwrap_err().kind(), ErrorKind::Closed);
        }
        let err = mmio.write(64, Width::W8, 0x1ff).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Closed);
        assert_eq!(mmio.read_bytes(8, 64).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(mmio.write_bytes(32, &[0; 4]).unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn test_misaligned_access() {
        let mut mmio = ram(16);
        let err = mmio.read(2, Width::W32).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(mmio.read(2, Width::W16).is_ok());
    }

    #[test]
    fn test_value_must_fit_width() {
        let mut mmio = ram(16);
        let err = mmio.write(0, Width::W8, 0x100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_byte_copies() {
        let mut mmio = ram(32);
        mmio.write_bytes(3, b"hello").unwrap();
        assert_eq!(mmio.read_bytes(3, 5).unwrap(), b"hello");
        assert!(mmio.read_bytes(30, 5).is_err());
    }

    #[test]
    fn test_zero_length_rejected() {
        let err = Mmio::with_region(0, Box::new(RamRegion::new(0))).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut mmio = ram(16);
        mmio.close().unwrap();
        mmio.close().unwrap();
        assert!(!mmio.is_open());
        assert_eq!(mmio.read32(0).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(mmio.write8(0, 1).unwrap_err().kind(), ErrorKind::Closed);
    }
}
