//! GPIO character device backend (`/dev/gpiochipN`, uAPI v2).
//!
//! A line is claimed with `GPIO_V2_GET_LINE_IOCTL`, which hands back a
//! request file descriptor. Values, reconfiguration and edge events all go
//! through that descriptor; closing it releases the claim.

use std::{
    fs::{File, OpenOptions},
    io::{self, Read},
    os::fd::{AsFd, AsRawFd, FromRawFd, OwnedFd},
    path::{Path, PathBuf},
    time::Duration,
};

use bitflags::bitflags;

use crate::{
    hw_trait::gpio::{
        Bias, ChipInfo, Direction, Drive, Edge, EventEdge, GpioChip, GpioConfig, GpioEvent,
        GpioLine,
    },
    tracing::prelude::*,
};

#[allow(non_camel_case_types, dead_code)]
mod uapi {
    pub const MAX_NAME_SIZE: usize = 32;
    pub const LINES_MAX: usize = 64;
    pub const LINE_NUM_ATTRS_MAX: usize = 10;

    pub const LINE_ATTR_ID_FLAGS: u32 = 1;
    pub const LINE_ATTR_ID_OUTPUT_VALUES: u32 = 2;
    pub const LINE_ATTR_ID_DEBOUNCE: u32 = 3;

    pub const LINE_EVENT_RISING_EDGE: u32 = 1;
    pub const LINE_EVENT_FALLING_EDGE: u32 = 2;

    #[repr(C)]
    pub struct gpiochip_info {
        pub name: [u8; MAX_NAME_SIZE],
        pub label: [u8; MAX_NAME_SIZE],
        pub lines: u32,
    }

    /// The kernel's attribute is a union of flags, output values and a
    /// debounce period; all three fit the 64-bit slot.
    #[repr(C)]
    pub struct gpio_v2_line_attribute {
        pub id: u32,
        pub padding: u32,
        pub value: u64,
    }

    #[repr(C)]
    pub struct gpio_v2_line_config_attribute {
        pub attr: gpio_v2_line_attribute,
        pub mask: u64,
    }

    #[repr(C)]
    pub struct gpio_v2_line_config {
        pub flags: u64,
        pub num_attrs: u32,
        pub padding: [u32; 5],
        pub attrs: [gpio_v2_line_config_attribute; LINE_NUM_ATTRS_MAX],
    }

    #[repr(C)]
    pub struct gpio_v2_line_request {
        pub offsets: [u32; LINES_MAX],
        pub consumer: [u8; MAX_NAME_SIZE],
        pub config: gpio_v2_line_config,
        pub num_lines: u32,
        pub event_buffer_size: u32,
        pub padding: [u32; 5],
        pub fd: i32,
    }

    #[repr(C)]
    pub struct gpio_v2_line_info {
        pub name: [u8; MAX_NAME_SIZE],
        pub consumer: [u8; MAX_NAME_SIZE],
        pub offset: u32,
        pub num_attrs: u32,
        pub flags: u64,
        pub attrs: [gpio_v2_line_attribute; LINE_NUM_ATTRS_MAX],
        pub padding: [u32; 4],
    }

    #[repr(C)]
    pub struct gpio_v2_line_values {
        pub bits: u64,
        pub mask: u64,
    }

    /// Size of `struct gpio_v2_line_event` as read from a request fd.
    pub const LINE_EVENT_SIZE: usize = 48;

    const _: () = assert!(std::mem::size_of::<gpiochip_info>() == 68);
    const _: () = assert!(std::mem::size_of::<gpio_v2_line_config>() == 272);
    const _: () = assert!(std::mem::size_of::<gpio_v2_line_request>() == 592);
    const _: () = assert!(std::mem::size_of::<gpio_v2_line_info>() == 256);
    const _: () = assert!(std::mem::size_of::<gpio_v2_line_values>() == 16);

    /// Zero-initialize one of the structs above.
    ///
    /// # Safety
    ///
    /// `T` must be a plain integer aggregate, for which all-zero is valid.
    pub unsafe fn zeroed<T>() -> T {
        std::mem::zeroed()
    }

    nix::ioctl_read!(get_chipinfo, 0xB4, 0x01, gpiochip_info);
    nix::ioctl_readwrite!(get_lineinfo, 0xB4, 0x05, gpio_v2_line_info);
    nix::ioctl_readwrite!(get_line, 0xB4, 0x07, gpio_v2_line_request);
    nix::ioctl_readwrite!(set_config, 0xB4, 0x0D, gpio_v2_line_config);
    nix::ioctl_readwrite!(get_values, 0xB4, 0x0E, gpio_v2_line_values);
    nix::ioctl_readwrite!(set_values, 0xB4, 0x0F, gpio_v2_line_values);
}

bitflags! {
    /// `GPIO_V2_LINE_FLAG_*`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct LineFlags: u64 {
        const USED = 1 << 0;
        const ACTIVE_LOW = 1 << 1;
        const INPUT = 1 << 2;
        const OUTPUT = 1 << 3;
        const EDGE_RISING = 1 << 4;
        const EDGE_FALLING = 1 << 5;
        const OPEN_DRAIN = 1 << 6;
        const OPEN_SOURCE = 1 << 7;
        const BIAS_PULL_UP = 1 << 8;
        const BIAS_PULL_DOWN = 1 << 9;
        const BIAS_DISABLED = 1 << 10;
    }
}

fn line_flags(config: &GpioConfig) -> LineFlags {
    let mut flags = if config.direction.is_output() {
        LineFlags::OUTPUT
    } else {
        LineFlags::INPUT
    };
    flags |= match config.edge {
        Edge::None => LineFlags::empty(),
        Edge::Rising => LineFlags::EDGE_RISING,
        Edge::Falling => LineFlags::EDGE_FALLING,
        Edge::Both => LineFlags::EDGE_RISING | LineFlags::EDGE_FALLING,
    };
    flags |= match config.bias {
        Bias::Default => LineFlags::empty(),
        Bias::PullUp => LineFlags::BIAS_PULL_UP,
        Bias::PullDown => LineFlags::BIAS_PULL_DOWN,
        Bias::Disable => LineFlags::BIAS_DISABLED,
    };
    flags |= match config.drive {
        Drive::PushPull => LineFlags::empty(),
        Drive::OpenDrain => LineFlags::OPEN_DRAIN,
        Drive::OpenSource => LineFlags::OPEN_SOURCE,
    };
    if config.inverted {
        flags |= LineFlags::ACTIVE_LOW;
    }
    flags
}

/// Build the kernel line configuration for a single-line request. Output
/// values are logical; the kernel applies `ACTIVE_LOW`.
fn line_config(config: &GpioConfig, output_value: bool) -> uapi::gpio_v2_line_config {
    // SAFETY: integer-only struct.
    let mut raw: uapi::gpio_v2_line_config = unsafe { uapi::zeroed() };
    raw.flags = line_flags(config).bits();
    if config.direction.is_output() {
        raw.num_attrs = 1;
        raw.attrs[0].attr.id = uapi::LINE_ATTR_ID_OUTPUT_VALUES;
        raw.attrs[0].attr.value = u64::from(output_value);
        raw.attrs[0].mask = 1;
    }
    raw
}

fn c_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// An opened GPIO chip.
#[derive(Debug)]
pub struct CdevChip {
    file: File,
    path: PathBuf,
    info: ChipInfo,
}

impl CdevChip {
    /// Open the chip device and read its identification.
    ///
    /// Fails with `ENOTTY` if `path` is not a GPIO chip.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        // SAFETY: integer-only struct.
        let mut raw: uapi::gpiochip_info = unsafe { uapi::zeroed() };
        // SAFETY: `raw` is a valid, writable gpiochip_info.
        unsafe { uapi::get_chipinfo(file.as_raw_fd(), &mut raw) }?;

        let info = ChipInfo {
            name: c_string(&raw.name),
            label: c_string(&raw.label),
            lines: raw.lines,
        };
        debug!(path = %path.display(), name = %info.name, lines = info.lines, "GPIO chip opened");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            info,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl GpioChip for CdevChip {
    fn chip_info(&self) -> ChipInfo {
        self.info.clone()
    }

    fn line_name(&self, offset: u32) -> io::Result<Option<String>> {
        // SAFETY: integer-only struct.
        let mut raw: uapi::gpio_v2_line_info = unsafe { uapi::zeroed() };
        raw.offset = offset;
        // SAFETY: `raw` is a valid, writable gpio_v2_line_info.
        unsafe { uapi::get_lineinfo(self.file.as_raw_fd(), &mut raw) }?;
        let name = c_string(&raw.name);
        Ok((!name.is_empty()).then_some(name))
    }

    fn request_line(&self, offset: u32, config: &GpioConfig) -> io::Result<Box<dyn GpioLine>> {
        // SAFETY: integer-only struct.
        let mut request: uapi::gpio_v2_line_request = unsafe { uapi::zeroed() };
        request.offsets[0] = offset;
        request.num_lines = 1;
        let label = config.label.as_bytes();
        let n = label.len().min(uapi::MAX_NAME_SIZE - 1);
        request.consumer[..n].copy_from_slice(&label[..n]);
        request.config = line_config(config, config.direction.initial_level());

        // SAFETY: `request` is a valid, writable gpio_v2_line_request.
        unsafe { uapi::get_line(self.file.as_raw_fd(), &mut request) }?;
        // SAFETY: on success the kernel stored a fresh descriptor we now own.
        let fd = unsafe { OwnedFd::from_raw_fd(request.fd) };

        Ok(Box::new(CdevLine {
            file: File::from(fd),
            config: config.clone(),
        }))
    }
}

/// A line claimed through a v2 line request.
#[derive(Debug)]
struct CdevLine {
    file: File,
    config: GpioConfig,
}

impl GpioLine for CdevLine {
    fn get_value(&mut self) -> io::Result<bool> {
        let mut values = uapi::gpio_v2_line_values { bits: 0, mask: 1 };
        // SAFETY: `values` is a valid, writable gpio_v2_line_values.
        unsafe { uapi::get_values(self.file.as_raw_fd(), &mut values) }?;
        Ok(values.bits & 1 != 0)
    }

    fn set_value(&mut self, value: bool) -> io::Result<()> {
        let mut values = uapi::gpio_v2_line_values {
            bits: u64::from(value),
            mask: 1,
        };
        // SAFETY: as in `get_value`.
        unsafe { uapi::set_values(self.file.as_raw_fd(), &mut values) }?;
        Ok(())
    }

    fn reconfigure(&mut self, config: &GpioConfig) -> io::Result<()> {
        // A plain `Out` keeps the level an output line already has.
        let output_value = if config.direction == Direction::Out && self.config.direction.is_output()
        {
            self.get_value()?
        } else {
            config.direction.initial_level()
        };

        let mut raw = line_config(config, output_value);
        // SAFETY: `raw` is a valid, writable gpio_v2_line_config.
        unsafe { uapi::set_config(self.file.as_raw_fd(), &mut raw) }?;
        self.config = config.clone();
        Ok(())
    }

    fn wait_event(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        super::wait_readable(self.file.as_fd(), timeout)
    }

    fn read_event(&mut self) -> io::Result<GpioEvent> {
        let mut buf = [0u8; uapi::LINE_EVENT_SIZE];
        self.file.read_exact(&mut buf)?;

        let mut timestamp = [0u8; 8];
        timestamp.copy_from_slice(&buf[0..8]);
        let mut id = [0u8; 4];
        id.copy_from_slice(&buf[8..12]);

        let edge = match u32::from_ne_bytes(id) {
            uapi::LINE_EVENT_RISING_EDGE => EventEdge::Rising,
            uapi::LINE_EVENT_FALLING_EDGE => EventEdge::Falling,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unknown GPIO event id {other}"),
                ))
            }
        };
        Ok(GpioEvent {
            edge,
            timestamp_ns: u64::from_ne_bytes(timestamp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_flags() {
        let config = GpioConfig {
            edge: Edge::Both,
            bias: Bias::PullUp,
            inverted: true,
            ..GpioConfig::new(Direction::In)
        };
        assert_eq!(
            line_flags(&config),
            LineFlags::INPUT
                | LineFlags::EDGE_RISING
                | LineFlags::EDGE_FALLING
                | LineFlags::BIAS_PULL_UP
                | LineFlags::ACTIVE_LOW
        );

        let config = GpioConfig {
            drive: Drive::OpenDrain,
            bias: Bias::Disable,
            ..GpioConfig::new(Direction::OutHigh)
        };
        assert_eq!(
            line_flags(&config),
            LineFlags::OUTPUT | LineFlags::OPEN_DRAIN | LineFlags::BIAS_DISABLED
        );
    }

    #[test]
    fn test_output_config_carries_initial_value() {
        let raw = line_config(&GpioConfig::new(Direction::OutHigh), true);
        assert_eq!(raw.num_attrs, 1);
        assert_eq!(raw.attrs[0].attr.id, uapi::LINE_ATTR_ID_OUTPUT_VALUES);
        assert_eq!(raw.attrs[0].attr.value, 1);
        assert_eq!(raw.attrs[0].mask, 1);

        let raw = line_config(&GpioConfig::new(Direction::In), false);
        assert_eq!(raw.num_attrs, 0);
    }

    #[test]
    fn test_c_string() {
        let mut field = [0u8; 32];
        field[..6].copy_from_slice(b"GPIO17");
        assert_eq!(c_string(&field), "GPIO17");
        assert_eq!(c_string(b"full"), "full");
    }

    #[test]
    fn test_open_regular_file_is_not_a_chip() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = CdevChip::open(file.path()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(nix::libc::ENOTTY));
    }
}
