//! Serial port backend trait and line settings.

use std::{fmt, io, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Character size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => Err(Error::invalid_argument(format!(
                "Invalid data bits {value} (expected 5, 6, 7 or 8)"
            ))),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

impl fmt::Display for DataBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => Err(Error::invalid_argument(format!(
                "Invalid stop bits {value} (expected 1 or 2)"
            ))),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

impl fmt::Display for StopBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", u8::from(*self))
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Serial line settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub flow_control: FlowControl,
    /// Default inter-byte timeout for reads; `None` blocks until the
    /// requested length has arrived.
    pub timeout: Option<Duration>,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            flow_control: FlowControl::None,
            timeout: None,
        }
    }
}

impl SerialConfig {
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.baud_rate == 0 {
            return Err("Invalid baud rate 0".to_string());
        }
        Ok(())
    }
}

/// An opened serial port.
pub trait SerialDevice: Send {
    /// Apply line settings. The read timeout is handled by the caller and
    /// may be ignored.
    fn configure(&mut self, config: &SerialConfig) -> io::Result<()>;

    /// Wait up to `timeout` for input, then read what is available into
    /// `buf`. Returns 0 if nothing arrived in time. `None` waits until at
    /// least one byte is available.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize>;

    /// Queue bytes for transmission; may accept fewer than offered.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Block until queued output has been transmitted.
    fn flush(&mut self) -> io::Result<()>;

    /// Whether input becomes readable within `timeout`.
    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<bool>;

    fn input_waiting(&mut self) -> io::Result<u32>;

    fn output_waiting(&mut self) -> io::Result<u32>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_settings() {
        assert_eq!(DataBits::try_from(7).unwrap(), DataBits::Seven);
        assert!(DataBits::try_from(9).is_err());
        assert_eq!(StopBits::try_from(2).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(0).is_err());
        assert_eq!(u8::from(DataBits::Five), 5);
    }

    #[test]
    fn test_textual_settings() {
        assert_eq!("even".parse::<Parity>().unwrap(), Parity::Even);
        assert_eq!("hardware".parse::<FlowControl>().unwrap(), FlowControl::Hardware);
        assert_eq!(Parity::Odd.to_string(), "odd");
    }

    #[test]
    fn test_validate() {
        assert!(SerialConfig::default().validate().is_ok());
        assert!(SerialConfig::new(0).validate().is_err());
    }
}
