//! GPIO lines.
//!
//! A [`Gpio`] handle claims one line of a GPIO chip and keeps the claim
//! until it is closed. Levels are logical: with `inverted` set, `true`
//! means the pin is physically low.

use std::{fmt, path::Path, time::Duration};

use nix::errno::Errno;
use serde::Serialize;

use super::{Kind, Peripheral, Resource};
use crate::{
    config::Settings,
    error::{Error, ErrorKind, Result},
    hw_trait::gpio::{
        Bias, Direction, Drive, Edge, GpioChip, GpioConfig, GpioEvent, GpioLine, LineId,
    },
    linux::gpio::CdevChip,
    tracing::prelude::*,
};

/// Diagnostic snapshot of a GPIO handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpioInfo {
    pub chip_name: String,
    pub chip_label: String,
    pub offset: u32,
    /// Line name, if the chip names its lines.
    pub name: Option<String>,
    pub config: GpioConfig,
    pub open: bool,
}

impl fmt::Display for GpioInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPIO {} (name=\"{}\", chip_name=\"{}\", chip_label=\"{}\", direction={}, edge={}, bias={}, drive={}, inverted={}, label=\"{}\")",
            self.offset,
            self.name.as_deref().unwrap_or(""),
            self.chip_name,
            self.chip_label,
            self.config.direction,
            self.config.edge,
            self.config.bias,
            self.config.drive,
            self.config.inverted,
            self.config.label,
        )
    }
}

/// A claimed GPIO line.
pub struct Gpio {
    chip_name: String,
    chip_label: String,
    offset: u32,
    name: Option<String>,
    config: GpioConfig,
    line: Resource<Box<dyn GpioLine>>,
}

impl fmt::Debug for Gpio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gpio")
            .field("chip_name", &self.chip_name)
            .field("offset", &self.offset)
            .field("config", &self.config)
            .field("open", &self.line.is_open())
            .finish()
    }
}

impl Gpio {
    /// Claim `line` on the chip at `chip_path`.
    pub fn open(
        chip_path: impl AsRef<Path>,
        line: impl Into<LineId>,
        config: GpioConfig,
    ) -> Result<Self> {
        let chip_path = chip_path.as_ref();
        config.validate().map_err(Error::invalid_argument)?;

        let chip = CdevChip::open(chip_path).map_err(|e| {
            Error::from_io(
                ErrorKind::OpenFailed,
                &e,
                format!("Opening GPIO chip \"{}\"", chip_path.display()),
            )
        })?;
        // The request fd keeps the line claimed; the chip fd is only needed
        // for the lookup.
        Self::with_chip(&chip, line, config)
    }

    /// Claim `line` on the default chip with the default consumer label.
    pub fn open_line(line: impl Into<LineId>, direction: Direction) -> Result<Self> {
        let settings = Settings::from_env();
        let config = GpioConfig {
            label: settings.gpio_consumer,
            ..GpioConfig::new(direction)
        };
        Self::open(&settings.gpio_chip, line, config)
    }

    /// Claim `line` through any GPIO chip backend.
    pub fn with_chip(
        chip: &dyn GpioChip,
        line: impl Into<LineId>,
        config: GpioConfig,
    ) -> Result<Self> {
        config.validate().map_err(Error::invalid_argument)?;
        let chip_info = chip.chip_info();

        let offset = match line.into() {
            LineId::Offset(offset) => offset,
            LineId::Name(name) => chip
                .find_line(&name)
                .map_err(|e| {
                    Error::from_io(
                        ErrorKind::OpenFailed,
                        &e,
                        format!("Looking up GPIO line \"{name}\" on {}", chip_info.name),
                    )
                })?
                .ok_or_else(|| {
                    Error::with_errno(
                        ErrorKind::OpenFailed,
                        Errno::ENOENT,
                        format!("GPIO line \"{name}\" not found on {}", chip_info.name),
                    )
                })?,
        };

        let handle = chip.request_line(offset, &config).map_err(|e| {
            Error::from_io(
                ErrorKind::OpenFailed,
                &e,
                format!("Requesting GPIO line {offset} on {}", chip_info.name),
            )
        })?;
        // Line names are informational only.
        let name = chip.line_name(offset).ok().flatten();

        debug!(
            chip = %chip_info.name,
            line = offset,
            direction = %config.direction,
            edge = %config.edge,
            "GPIO line requested"
        );
        Ok(Self {
            chip_name: chip_info.name,
            chip_label: chip_info.label,
            offset,
            name,
            config,
            line: Resource::Open(handle),
        })
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn config(&self) -> &GpioConfig {
        &self.config
    }

    pub fn is_open(&self) -> bool {
        self.line.is_open()
    }

    /// Read the logical level.
    pub fn read(&mut self) -> Result<bool> {
        let what = self.describe();
        let line = self.line.get_mut(&what)?;
        line.get_value()
            .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Reading {what}")))
    }

    /// Drive the logical level of an output line.
    pub fn write(&mut self, value: bool) -> Result<()> {
        let what = self.describe();
        let line = self.line.get_mut(&what)?;
        if !self.config.direction.is_output() {
            return Err(Error::invalid_argument(format!(
                "Cannot write {what}: direction is in"
            )));
        }
        line.set_value(value)
            .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Writing {what}")))?;
        trace!(line = self.offset, value, "GPIO write");
        Ok(())
    }

    /// Wait for an edge event. Returns `false` if `timeout` expires first;
    /// `Some(Duration::ZERO)` only checks, `None` waits indefinitely.
    pub fn poll(&mut self, timeout: Option<Duration>) -> Result<bool> {
        let what = self.describe();
        let line = self.line.get_mut(&what)?;
        if self.config.edge == Edge::None {
            return Err(Error::invalid_argument(format!(
                "Cannot poll {what}: edge is none"
            )));
        }
        line.wait_event(timeout)
            .map_err(|e| Error::from_io(ErrorKind::IoFailed, &e, format!("Polling {what}")))
    }

    /// Consume the next edge event, blocking until one arrives.
    pub fn read_event(&mut self) -> Result<GpioEvent> {
        let what = self.describe();
        let line = self.line.get_mut(&what)?;
        if self.config.edge == Edge::None {
            return Err(Error::invalid_argument(format!(
                "Cannot read events from {what}: edge is none"
            )));
        }
        line.read_event().map_err(|e| {
            Error::from_io(ErrorKind::IoFailed, &e, format!("Reading event from {what}"))
        })
    }

    /// Replace the line configuration without releasing the claim.
    ///
    /// On failure the previous configuration is restored. If even that
    /// fails, the line is released and the handle reports
    /// [`ErrorKind::NotOpen`] from then on.
    pub fn configure(&mut self, config: GpioConfig) -> Result<()> {
        let what = self.describe();
        let line = self.line.get_mut(&what)?;
        config.validate().map_err(Error::invalid_argument)?;

        if let Err(e) = line.reconfigure(&config) {
            let err = Error::from_io(ErrorKind::ConfigureFailed, &e, format!("Configuring {what}"));
            if let Err(rollback) = line.reconfigure(&self.config) {
                warn!(line = self.offset, error = %rollback, "GPIO rollback failed, releasing line");
                self.line.lose();
            }
            return Err(err);
        }

        debug!(
            line = self.offset,
            direction = %config.direction,
            edge = %config.edge,
            bias = %config.bias,
            "GPIO line reconfigured"
        );
        self.config = config;
        Ok(())
    }

    /// Change direction. Switching to an output clears the edge setting,
    /// which only applies to inputs.
    pub fn set_direction(&mut self, direction: Direction) -> Result<()> {
        let mut config = self.config.clone();
        config.direction = direction;
        if direction.is_output() {
            config.edge = Edge::None;
        }
        self.configure(config)
    }

    pub fn set_edge(&mut self, edge: Edge) -> Result<()> {
        let config = GpioConfig {
            edge,
            ..self.config.clone()
        };
        self.configure(config)
    }

    pub fn set_bias(&mut self, bias: Bias) -> Result<()> {
        let config = GpioConfig {
            bias,
            ..self.config.clone()
        };
        self.configure(config)
    }

    pub fn set_drive(&mut self, drive: Drive) -> Result<()> {
        let config = GpioConfig {
            drive,
            ..self.config.clone()
        };
        self.configure(config)
    }

    pub fn set_inverted(&mut self, inverted: bool) -> Result<()> {
        let config = GpioConfig {
            inverted,
            ..self.config.clone()
        };
        self.configure(config)
    }

    /// Release the line. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.line.close().is_some() {
            debug!(chip = %self.chip_name, line = self.offset, "GPIO line released");
        }
        Ok(())
    }

    pub fn info(&self) -> GpioInfo {
        GpioInfo {
            chip_name: self.chip_name.clone(),
            chip_label: self.chip_label.clone(),
            offset: self.offset,
            name: self.name.clone(),
            config: self.config.clone(),
            open: self.line.is_open(),
        }
    }

    fn describe(&self) -> String {
        format!("GPIO line {} on {}", self.offset, self.chip_name)
    }
}

impl Peripheral for Gpio {
    const KIND: Kind = Kind::Gpio;
    type Config = GpioConfig;
    type Info = GpioInfo;

    fn is_open(&self) -> bool {
        Gpio::is_open(self)
    }

    fn close(&mut self) -> Result<()> {
        Gpio::close(self)
    }

    fn configure(&mut self, config: GpioConfig) -> Result<()> {
        Gpio::configure(self, config)
    }

    fn info(&self) -> GpioInfo {
        Gpio::info(self)
    }
}

impl Drop for Gpio {
    fn drop(&mut self) {
        if self.line.is_open() {
            warn!(chip = %self.chip_name, line = self.offset, "GPIO handle dropped while open, releasing line");
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChip;

    fn output(chip: &SimChip, offset: u32) -> Gpio {
        Gpio::with_chip(chip, offset, GpioConfig::new(Direction::Out)).unwrap()
    }

    #[test]
    fn test_write_then_read_back() {
        let chip = SimChip::new("sim", 32);
        let mut gpio = output(&chip, 17);

        gpio.write(true).unwrap();
        assert!(gpio.read().unwrap());
        assert!(chip.level(17));

        gpio.write(false).unwrap();
        assert!(!gpio.read().unwrap());
    }

    #[test]
    fn test_open_by_name() {
        let chip = SimChip::with_names("sim", &["", "LED0", "BUTTON"]);
        let gpio = Gpio::with_chip(&chip, "BUTTON", GpioConfig::default()).unwrap();
        assert_eq!(gpio.offset(), 2);
        assert_eq!(gpio.name(), Some("BUTTON"));

        let err = Gpio::with_chip(&chip, "MISSING", GpioConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OpenFailed);
        assert_eq!(err.os_code(), Errno::ENOENT as i32);
    }

    #[test]
    fn test_busy_line() {
        let chip = SimChip::new("sim", 4);
        let _first = output(&chip, 1);
        let err = Gpio::with_chip(&chip, 1u32, GpioConfig::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OpenFailed);
        assert_eq!(err.os_code(), Errno::EBUSY as i32);
    }

    #[test]
    fn test_invalid_config_rejected_before_request() {
        let chip = SimChip::new("sim", 4);
        let config = GpioConfig {
            edge: Edge::Rising,
            ..GpioConfig::new(Direction::OutHigh)
        };
        let err = Gpio::with_chip(&chip, 0u32, config).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(!chip.is_requested(0));
    }

    #[test]
    fn test_write_input_is_invalid() {
        let chip = SimChip::new("sim", 4);
        let mut gpio = Gpio::with_chip(&chip, 0u32, GpioConfig::default()).unwrap();
        assert_eq!(
            gpio.write(true).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_poll_zero_does_not_block() {
        let chip = SimChip::new("sim", 4);
        let config = GpioConfig {
            edge: Edge::Both,
            ..GpioConfig::default()
        };
        let mut gpio = Gpio::with_chip(&chip, 3u32, config).unwrap();
        assert!(!gpio.poll(Some(Duration::ZERO)).unwrap());

        chip.set_input(3, true);
        assert!(gpio.poll(Some(Duration::ZERO)).unwrap());
        let event = gpio.read_event().unwrap();
        assert_eq!(event.edge, crate::hw_trait::gpio::EventEdge::Rising);
    }

    #[test]
    fn test_poll_without_edge_is_invalid() {
        let chip = SimChip::new("sim", 4);
        let mut gpio = Gpio::with_chip(&chip, 3u32, GpioConfig::default()).unwrap();
        let err = gpio.poll(Some(Duration::ZERO)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_set_direction_clears_edge() {
        let chip = SimChip::new("sim", 4);
        let config = GpioConfig {
            edge: Edge::Rising,
            ..GpioConfig::default()
        };
        let mut gpio = Gpio::with_chip(&chip, 0u32, config).unwrap();
        gpio.set_direction(Direction::OutHigh).unwrap();
        assert_eq!(gpio.config().edge, Edge::None);
        assert!(gpio.read().unwrap());
        assert!(chip.level(0));
    }

    #[test]
    fn test_failed_configure_keeps_previous() {
        let chip = SimChip::new("sim", 4);
        let mut gpio = Gpio::with_chip(&chip, 0u32, GpioConfig::default()).unwrap();
        chip.fail_reconfigure(Errno::EIO, 1);

        let err = gpio.set_bias(Bias::PullDown).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigureFailed);
        assert_eq!(gpio.config().bias, Bias::Default);
        assert!(gpio.is_open());
    }

    #[test]
    fn test_failed_rollback_loses_line() {
        let chip = SimChip::new("sim", 4);
        let mut gpio = Gpio::with_chip(&chip, 0u32, GpioConfig::default()).unwrap();
        chip.fail_reconfigure(Errno::EIO, 2);

        gpio.set_inverted(true).unwrap_err();
        assert!(!gpio.is_open());
        assert!(!chip.is_requested(0));
        assert_eq!(gpio.read().unwrap_err().kind(), ErrorKind::NotOpen);
        gpio.close().unwrap();
    }

    #[test]
    fn test_close_is_idempotent() {
        let chip = SimChip::new("sim", 4);
        let mut gpio = output(&chip, 2);
        gpio.close().unwrap();
        gpio.close().unwrap();
        assert!(!chip.is_requested(2));
        assert_eq!(gpio.write(true).unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(gpio.read().unwrap_err().kind(), ErrorKind::Closed);
    }

    #[test]
    fn test_info_display() {
        let chip = SimChip::with_names("pinctrl-sim", &["A", "B"]);
        let gpio = output(&chip, 1);
        let text = gpio.info().to_string();
        assert!(text.starts_with("GPIO 1 (name=\"B\", chip_name=\"gpiochip-sim\""));
        assert!(text.contains("direction=out"));
        assert!(text.contains("label=\"periphery\""));
    }

    #[test]
    fn test_drop_releases_claim() {
        let chip = SimChip::new("sim", 4);
        drop(output(&chip, 0));
        assert!(!chip.is_requested(0));
    }
}
