//! Linux backends against files that are not the device they expect.

use std::io::Write;

use periphery::{
    ErrorKind, Gpio, GpioConfig, I2c, Mmio, Serial, SerialConfig, Spi, SpiConfig,
};

const ENOENT: i32 = 2;
const ENOTTY: i32 = 25;

#[test]
fn missing_nodes_fail_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let err = Gpio::open(&missing, 17u32, GpioConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOENT);
    assert!(err.to_string().contains("[errno 2]"));

    let err = Spi::open(&missing, SpiConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOENT);

    let err = I2c::open(&missing).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOENT);

    let err = Serial::open(&missing, SerialConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOENT);

    let err = Mmio::open_path(&missing, 0, 4096).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOENT);
}

#[test]
fn regular_files_are_rejected_by_the_kernel() {
    let file = tempfile::NamedTempFile::new().unwrap();

    let err = Gpio::open(file.path(), 0u32, GpioConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOTTY);

    // spidev opens anything; the first configuration ioctl is refused.
    let err = Spi::open(file.path(), SpiConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConfigureFailed);
    assert_eq!(err.os_code(), ENOTTY);

    let err = I2c::open(file.path()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOTTY);

    let err = Serial::open(file.path(), SerialConfig::default()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::OpenFailed);
    assert_eq!(err.os_code(), ENOTTY);
}

#[test]
fn invalid_configuration_fails_before_opening() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing");

    let err = Spi::open(&missing, SpiConfig::new(periphery::SpiMode::Mode0, 0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = Serial::open(&missing, SerialConfig::new(0)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let err = Mmio::open_path(&missing, 0x1000, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn mmio_maps_a_regular_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&[0u8; 8192]).unwrap();
    file.flush().unwrap();

    // An unaligned base exercises the page adjustment.
    let mut mmio = Mmio::open_path(file.path(), 0x1010, 0x100).unwrap();
    mmio.write32(0x20, 0x1234_5678).unwrap();
    assert_eq!(mmio.read32(0x20).unwrap(), 0x1234_5678);
    mmio.write_bytes(0x40, b"periphery").unwrap();
    assert_eq!(mmio.read_bytes(0x40, 9).unwrap(), b"periphery");

    let err = mmio.read32(0x100).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    mmio.close().unwrap();
    mmio.close().unwrap();
    assert_eq!(mmio.read8(0).unwrap_err().kind(), ErrorKind::Closed);

    // The mapping was shared, so the writes reached the file.
    let contents = std::fs::read(file.path()).unwrap();
    assert_eq!(&contents[0x1030..0x1034], &0x1234_5678u32.to_ne_bytes());
    assert_eq!(&contents[0x1050..0x1059], b"periphery");
}

#[test]
fn serial_open_on_a_pty_applies_line_settings() {
    use nix::{pty, sys::termios, unistd};

    let pty = pty::openpty(None, None).unwrap();
    let path = unistd::ttyname(&pty.slave).unwrap();

    let mut serial = Serial::open(&path, SerialConfig::new(57_600)).unwrap();
    let attrs = termios::tcgetattr(&pty.slave).unwrap();
    assert_eq!(termios::cfgetospeed(&attrs), termios::BaudRate::B57600);

    serial.set_baud_rate(19_200).unwrap();
    let attrs = termios::tcgetattr(&pty.slave).unwrap();
    assert_eq!(termios::cfgetospeed(&attrs), termios::BaudRate::B19200);
    serial.close().unwrap();
}
