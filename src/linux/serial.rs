//! TTY backend built on `serialport`'s POSIX port.

use std::{
    fs::OpenOptions,
    io::{self, Read, Write},
    os::{
        fd::{AsRawFd, BorrowedFd},
        unix::fs::OpenOptionsExt,
    },
    path::Path,
    time::Duration,
};

use nix::{libc, sys::termios};
use serialport::{SerialPort, TTYPort};

use crate::{
    hw_trait::serial::{DataBits, FlowControl, Parity, SerialConfig, SerialDevice, StopBits},
    tracing::prelude::*,
};

/// How long a write waits for room in the output queue before reporting a
/// short write.
const WRITE_TIMEOUT: Duration = Duration::from_millis(10);

/// Line speed the port is opened at, before the caller's settings apply.
const OPEN_BAUD: u32 = 9600;

/// An opened TTY.
pub struct TtyPort {
    port: TTYPort,
}

impl std::fmt::Debug for TtyPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtyPort")
            .field("fd", &self.port.as_raw_fd())
            .finish()
    }
}

fn data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Five => serialport::DataBits::Five,
        DataBits::Six => serialport::DataBits::Six,
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Odd => serialport::Parity::Odd,
        Parity::Even => serialport::Parity::Even,
    }
}

fn stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

fn flow_control(flow: FlowControl) -> serialport::FlowControl {
    match flow {
        FlowControl::None => serialport::FlowControl::None,
        FlowControl::Software => serialport::FlowControl::Software,
        FlowControl::Hardware => serialport::FlowControl::Hardware,
    }
}

impl TtyPort {
    /// Open the TTY at `path`. Line settings are applied separately through
    /// [`SerialDevice::configure`].
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();

        // serialport reports open failures as text only; probing the node
        // first keeps the errno for missing, inaccessible or non-TTY paths.
        let probe = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NOCTTY | libc::O_NONBLOCK)
            .open(path)?;
        termios::tcgetattr(&probe)?;
        drop(probe);

        let port = serialport::new(path.to_string_lossy(), OPEN_BAUD)
            .timeout(WRITE_TIMEOUT)
            .open_native()
            .map_err(io::Error::from)?;

        debug!(path = %path.display(), "TTY opened");
        Ok(Self { port })
    }

    fn fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the descriptor is owned by `port`, which outlives the
        // borrow.
        unsafe { BorrowedFd::borrow_raw(self.port.as_raw_fd()) }
    }
}

impl SerialDevice for TtyPort {
    fn configure(&mut self, config: &SerialConfig) -> io::Result<()> {
        self.port.set_baud_rate(config.baud_rate)?;
        self.port.set_data_bits(data_bits(config.data_bits))?;
        self.port.set_parity(parity(config.parity))?;
        self.port.set_stop_bits(stop_bits(config.stop_bits))?;
        self.port.set_flow_control(flow_control(config.flow_control))?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        if buf.is_empty() || !super::wait_readable(self.fd(), timeout)? {
            return Ok(0);
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.port.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        super::wait_readable(self.fd(), timeout)
    }

    fn input_waiting(&mut self) -> io::Result<u32> {
        Ok(self.port.bytes_to_read()?)
    }

    fn output_waiting(&mut self) -> io::Result<u32> {
        Ok(self.port.bytes_to_write()?)
    }
}

#[cfg(test)]
mod tests {
    use nix::{pty, unistd};

    use super::*;

    #[test]
    fn test_regular_file_is_not_a_tty() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = TtyPort::open(file.path()).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOTTY));
    }

    #[test]
    fn test_missing_path() {
        let err = TtyPort::open("/dev/does-not-exist-ttyX9").unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_settings_applied_by_configure() {
        let pty = pty::openpty(None, None).unwrap();
        let path = unistd::ttyname(&pty.slave).unwrap();

        let mut port = TtyPort::open(&path).unwrap();
        let attrs = termios::tcgetattr(&pty.slave).unwrap();
        assert_eq!(termios::cfgetospeed(&attrs), termios::BaudRate::B9600);

        let config = SerialConfig {
            parity: Parity::Even,
            ..SerialConfig::new(57_600)
        };
        port.configure(&config).unwrap();
        let attrs = termios::tcgetattr(&pty.slave).unwrap();
        assert_eq!(termios::cfgetospeed(&attrs), termios::BaudRate::B57600);
        assert!(attrs.control_flags.contains(termios::ControlFlags::PARENB));
        assert!(!attrs.control_flags.contains(termios::ControlFlags::PARODD));
    }

    #[test]
    fn test_full_output_queue_gives_short_write() {
        let pty = pty::openpty(None, None).unwrap();
        let path = unistd::ttyname(&pty.slave).unwrap();
        let mut port = TtyPort::open(&path).unwrap();

        // Nobody reads the master side, so the queue eventually fills.
        let mut accepted = 0;
        let full = (0..1 << 20).any(|_| match port.write(b"x").unwrap() {
            0 => true,
            n => {
                accepted += n;
                false
            }
        });
        assert!(full, "queue never filled after {accepted} bytes");
        assert!(accepted > 0);
    }
}
