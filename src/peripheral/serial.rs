//! Serial ports.

use std::{
    fmt,
    path::Path,
    time::{Duration, Instant},
};

use serde::Serialize;

use super::{Kind, Peripheral, Resource};
use crate::{
    error::{Error, ErrorKind, Result},
    hw_trait::serial::{DataBits, FlowControl, Parity, SerialConfig, SerialDevice, StopBits},
    linux::serial::TtyPort,
    tracing::prelude::*,
};

/// Diagnostic snapshot of a serial handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialInfo {
    pub device: String,
    pub config: SerialConfig,
    pub open: bool,
}

impl fmt::Display for SerialInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Serial (device={}, baudrate={}, databits={}, parity={}, stopbits={}, xonxoff={}, rtscts={})",
            self.device,
            self.config.baud_rate,
            self.config.data_bits,
            self.config.parity,
            self.config.stop_bits,
            self.config.flow_control == FlowControl::Software,
            self.config.flow_control == FlowControl::Hardware,
        )
    }
}

/// An opened serial port.
pub struct Serial {
    device_name: String,
    config: SerialConfig,
    port: Resource<Box<dyn SerialDevice>>,
}

impl fmt::Debug for Serial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Serial")
            .field("device", &self.device_name)
            .field("config", &self.config)
            .field("open", &self.port.is_open())
            .finish()
    }
}

impl Serial {
    /// Open the TTY at `path` with the given line settings.
    pub fn open(path: impl AsRef<Path>, config: SerialConfig) -> Result<Self> {
        let path = path.as_ref();
        config.validate().map_err(Error::invalid_argument)?;

        let port = TtyPort::open(path).map_err(|e| {
            Error::from_io(
                ErrorKind::OpenFailed,
                &e,
                format!("Opening serial port \"{}\"", path.display()),
            )
        })?;
        Self::attach(path.display().to_string(), Box::new(port), config)
    }

    /// Apply `config` to an already-opened serial backend.
    pub fn with_port(port: Box<dyn SerialDevice>, config: SerialConfig) -> Result<Self> {
        Self::attach("custom".to_string(), port, config)
    }

    fn attach(
        device_name: String,
        mut port: Box<dyn SerialDevice>,
        config: SerialConfig,
    ) -> Result<Self> {
        config.validate().map_err(Error::invalid_argument)?;

        // On error `port` is dropped here, closing the TTY.
        port.configure(&config).map_err(|e| {
            Error::from_io(
                ErrorKind::ConfigureFailed,
                &e,
                format!("Configuring serial port \"{device_name}\""),
            )
        })?;

        debug!(
            device = %device_name,
            baud = config.baud_rate,
            data_bits = %config.data_bits,
            parity = %config.parity,
            stop_bits = %config.stop_bits,
            "Serial port opened"
        );
        Ok(Self {
            device_name,
            config,
            port: Resource::Open(port),
        })
    }

    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.port.is_open()
    }

    /// Read up to `max_len` bytes.
    ///
    /// Keeps reading until `max_len` bytes have arrived or `timeout` has
    /// elapsed since the call, and returns what it got; an empty result on
    /// timeout is not an error. `None` waits for the full length.
    pub fn read(&mut self, max_len: usize, timeout: Option<Duration>) -> Result<Vec<u8>> {
        let what = self.describe();
        let port = self.port.get_mut(&what)?;

        let deadline = timeout.map(|t| Instant::now() + t);
        let mut buf = vec![0u8; max_len];
        let mut got = 0;
        while got < max_len {
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            let n = port
                .read(&mut buf[got..], remaining)
                .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Reading {what}")))?;
            if n == 0 {
                break;
            }
            got += n;
        }
        buf.truncate(got);
        trace!(device = %self.device_name, requested = max_len, read = got, "Serial read");
        Ok(buf)
    }

    /// Read using the configured default timeout.
    pub fn read_default(&mut self, max_len: usize) -> Result<Vec<u8>> {
        self.read(max_len, self.config.timeout)
    }

    /// Queue `data` for transmission and return how many bytes were
    /// accepted, which may be fewer than offered.
    pub fn write(&mut self, data: &[u8]) -> Result<usize> {
        let what = self.describe();
        let port = self.port.get_mut(&what)?;
        if data.is_empty() {
            return Ok(0);
        }
        let n = port
            .write(data)
            .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Writing {what}")))?;
        trace!(device = %self.device_name, offered = data.len(), written = n, "Serial write");
        Ok(n)
    }

    /// Block until all queued output has been transmitted.
    pub fn flush(&mut self) -> Result<()> {
        let what = self.describe();
        let port = self.port.get_mut(&what)?;
        port.flush()
            .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Flushing {what}")))
    }

    /// Bytes received and not yet read.
    pub fn input_waiting(&mut self) -> Result<u32> {
        let what = self.describe();
        let port = self.port.get_mut(&what)?;
        port.input_waiting().map_err(|e| {
            Error::from_io(ErrorKind::IoFailed, &e, format!("Querying input queue of {what}"))
        })
    }

    /// Bytes queued and not yet transmitted.
    pub fn output_waiting(&mut self) -> Result<u32> {
        let what = self.describe();
        let port = self.port.get_mut(&what)?;
        port.output_waiting().map_err(|e| {
            Error::from_io(ErrorKind::IoFailed, &e, format!("Querying output queue of {what}"))
        })
    }

    /// Whether input becomes readable within `timeout`.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let what = self.describe();
        let port = self.port.get_mut(&what)?;
        port.poll(timeout)
            .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Polling {what}")))
    }

    /// Apply new line settings. On failure the previous settings are
    /// re-applied and stay in effect.
    pub fn reconfigure(&mut self, config: SerialConfig) -> Result<()> {
        let what = self.describe();
        let port = self.port.get_mut(&what)?;
        config.validate().map_err(Error::invalid_argument)?;

        if let Err(e) = port.configure(&config) {
            let err = Error::from_io(ErrorKind::ConfigureFailed, &e, format!("Configuring {what}"));
            if let Err(rollback) = port.configure(&self.config) {
                warn!(device = %self.device_name, error = %rollback, "Serial rollback failed, closing port");
                self.port.lose();
            }
            return Err(err);
        }

        debug!(device = %self.device_name, baud = config.baud_rate, "Serial port reconfigured");
        self.config = config;
        Ok(())
    }

    pub fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let config = SerialConfig {
            baud_rate,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_data_bits(&mut self, data_bits: DataBits) -> Result<()> {
        let config = SerialConfig {
            data_bits,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_parity(&mut self, parity: Parity) -> Result<()> {
        let config = SerialConfig {
            parity,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_stop_bits(&mut self, stop_bits: StopBits) -> Result<()> {
        let config = SerialConfig {
            stop_bits,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    pub fn set_flow_control(&mut self, flow_control: FlowControl) -> Result<()> {
        let config = SerialConfig {
            flow_control,
            ..self.config.clone()
        };
        self.reconfigure(config)
    }

    /// Change the default read timeout. Nothing is sent to the device.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) -> Result<()> {
        let what = self.describe();
        self.port.get_mut(&what)?;
        self.config.timeout = timeout;
        Ok(())
    }

    /// Close the port. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.port.close().is_some() {
            debug!(device = %self.device_name, "Serial port closed");
        }
        Ok(())
    }

    pub fn info(&self) -> SerialInfo {
        SerialInfo {
            device: self.device_name.clone(),
            config: self.config.clone(),
            open: self.port.is_open(),
        }
    }

    fn describe(&self) -> String {
        format!("serial port \"{}\"", self.device_name)
    }
}

impl Peripheral for Serial {
    const KIND: Kind = Kind::Serial;
    type Config = SerialConfig;
    type Info = SerialInfo;

    fn is_open(&self) -> bool {
        Serial::is_open(self)
    }

    fn close(&mut self) -> Result<()> {
        Serial::close(self)
    }

    fn configure(&mut self, config: SerialConfig) -> Result<()> {
        self.reconfigure(config)
    }

    fn info(&self) -> SerialInfo {
        Serial::info(self)
    }
}

impl Drop for Serial {
    fn drop(&mut self) {
        if self.port.is_open() {
            warn!(device = %self.device_name, "Serial handle dropped while open, closing port");
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::sim::SimPort;

    fn pair() -> (Serial, Serial) {
        let (a, b) = SimPort::pair();
        (
            Serial::with_port(Box::new(a), SerialConfig::default()).unwrap(),
            Serial::with_port(Box::new(b), SerialConfig::default()).unwrap(),
        )
    }

    #[test]
    fn test_read_accumulates_until_length() {
        let (mut a, mut b) = pair();
        assert_eq!(a.write(b"hello world").unwrap(), 11);
        assert_eq!(b.input_waiting().unwrap(), 11);

        let data = b.read(5, Some(Duration::from_millis(50))).unwrap();
        assert_eq!(data, b"hello");
        let rest = b.read(100, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(rest, b" world");
    }

    #[test]
    fn test_read_timeout_returns_empty() {
        let (_a, mut b) = pair();
        let start = Instant::now();
        let data = b.read(10, Some(Duration::from_millis(100))).unwrap();
        assert!(data.is_empty());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[test]
    fn test_read_timeout_bounds_whole_call() {
        let (mut a, mut b) = pair();
        let writer = thread::spawn(move || {
            for byte in 0..10u8 {
                a.write(&[byte]).unwrap();
                thread::sleep(Duration::from_millis(60));
            }
        });

        let start = Instant::now();
        let data = b.read(10, Some(Duration::from_millis(100))).unwrap();
        let elapsed = start.elapsed();
        writer.join().unwrap();

        assert!(!data.is_empty() && data.len() < 10, "got {} bytes", data.len());
        assert!(elapsed < Duration::from_millis(250), "read took {elapsed:?}");
    }

    #[test]
    fn test_read_zero_timeout_takes_what_is_there() {
        let (mut a, mut b) = pair();
        a.write(b"ab").unwrap();
        assert_eq!(b.read(10, Some(Duration::ZERO)).unwrap(), b"ab");
        assert!(b.read(10, Some(Duration::ZERO)).unwrap().is_empty());
    }

    #[test]
    fn test_read_default_uses_configured_timeout() {
        let (_a, mut b) = pair();
        b.set_timeout(Some(Duration::from_millis(10))).unwrap();
        assert!(b.read_default(4).unwrap().is_empty());
    }

    #[test]
    fn test_poll() {
        let (mut a, mut b) = pair();
        assert!(!b.poll(Some(Duration::ZERO)).unwrap());
        a.write(&[0x55]).unwrap();
        assert!(b.poll(Some(Duration::from_millis(10))).unwrap());
        a.flush().unwrap();
        assert_eq!(a.output_waiting().unwrap(), 0);
    }

    #[test]
    fn test_short_write_is_reported() {
        let (port, _peer) = SimPort::pair_with(4, 115_200);
        let mut serial = Serial::with_port(Box::new(port), SerialConfig::new(9600)).unwrap();
        assert_eq!(serial.write(b"abcdef").unwrap(), 4);
    }

    #[test]
    fn test_rejected_open_and_reconfigure() {
        let (port, _peer) = SimPort::pair_with(16, 115_200);
        let err = Serial::with_port(Box::new(port), SerialConfig::new(921_600)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigureFailed);

        let (port, _peer) = SimPort::pair_with(16, 115_200);
        let monitor = port.clone();
        let mut serial = Serial::with_port(Box::new(port), SerialConfig::new(57_600)).unwrap();
        let err = serial.set_baud_rate(230_400).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigureFailed);
        assert_eq!(serial.config().baud_rate, 57_600);
        assert_eq!(monitor.applied().map(|c| c.baud_rate), Some(57_600));

        serial.set_parity(Parity::Even).unwrap();
        assert_eq!(monitor.applied().map(|c| c.parity), Some(Parity::Even));
    }

    #[test]
    fn test_zero_baud_is_invalid() {
        let err = Serial::with_port(Box::new(SimPort::loopback()), SerialConfig::new(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_close_twice() {
        let (mut a, _b) = pair();
        a.close().unwrap();
        a.close().unwrap();
        assert_eq!(a.write(b"x").unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(a.read(1, None).unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn test_info_display() {
        let serial = Serial::with_port(Box::new(SimPort::loopback()), SerialConfig::default()).unwrap();
        assert_eq!(
            serial.info().to_string(),
            "Serial (device=custom, baudrate=115200, databits=8, parity=none, stopbits=1, xonxoff=false, rtscts=false)"
        );
    }
}
