//! Peripheral handles.
//!
//! Each handle exclusively owns one open OS resource (a mapping, a line
//! request or a device node) together with the configuration it was last
//! successfully given. Handles share one lifecycle:
//!
//! - construction acquires the resource and applies the configuration, or
//!   fails without leaving anything open;
//! - data operations on a handle that no longer holds its resource fail with
//!   [`ErrorKind::Closed`] or [`ErrorKind::NotOpen`];
//! - `close()` releases the resource and can be called any number of times;
//! - dropping a still-open handle releases it as a last resort and logs a
//!   warning, since the host should have closed it explicitly.

pub mod gpio;
pub mod i2c;
pub mod mmio;
pub mod serial;
pub mod spi;

use serde::Serialize;

use crate::error::{Error, Result};

/// The five peripheral kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display)]
pub enum Kind {
    #[strum(serialize = "MMIO")]
    Mmio,
    #[strum(serialize = "GPIO")]
    Gpio,
    #[strum(serialize = "SPI")]
    Spi,
    #[strum(serialize = "I2C")]
    I2c,
    #[strum(serialize = "Serial")]
    Serial,
}

/// Capabilities every handle provides, whatever its kind.
pub trait Peripheral {
    const KIND: Kind;

    /// Configuration accepted by [`Peripheral::configure`].
    type Config;

    /// Diagnostic snapshot returned by [`Peripheral::info`].
    type Info: std::fmt::Display;

    fn is_open(&self) -> bool;

    /// Release the OS resource. Closing a closed handle succeeds.
    fn close(&mut self) -> Result<()>;

    /// Replace the configuration atomically: on error the previous
    /// configuration is still in effect.
    fn configure(&mut self, config: Self::Config) -> Result<()>;

    fn info(&self) -> Self::Info;
}

/// Lifecycle slot holding a handle's OS resource.
#[derive(Debug)]
pub(crate) enum Resource<T> {
    Open(T),
    /// Released by an explicit close.
    Closed,
    /// Released because a reconfiguration could not be rolled back.
    Lost,
}

impl<T> Resource<T> {
    pub(crate) fn is_open(&self) -> bool {
        matches!(self, Resource::Open(_))
    }

    /// Borrow the resource, or explain why there is none. `what` names the
    /// handle in the error message.
    pub(crate) fn get_mut(&mut self, what: &str) -> Result<&mut T> {
        match self {
            Resource::Open(resource) => Ok(resource),
            Resource::Closed => Err(Error::closed(what)),
            Resource::Lost => Err(Error::not_open(what)),
        }
    }

    /// Take the resource out, leaving the slot closed.
    pub(crate) fn close(&mut self) -> Option<T> {
        match std::mem::replace(self, Resource::Closed) {
            Resource::Open(resource) => Some(resource),
            Resource::Closed | Resource::Lost => None,
        }
    }

    pub(crate) fn lose(&mut self) {
        *self = Resource::Lost;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_resource_lifecycle() {
        let mut slot = Resource::Open(7u8);
        assert!(slot.is_open());
        assert_eq!(*slot.get_mut("thing").unwrap(), 7);

        assert_eq!(slot.close(), Some(7));
        assert!(!slot.is_open());
        assert_eq!(slot.close(), None);
        assert_eq!(
            slot.get_mut("thing").unwrap_err().kind(),
            ErrorKind::Closed
        );

        let mut slot = Resource::Open(1u8);
        slot.lose();
        assert_eq!(
            slot.get_mut("thing").unwrap_err().kind(),
            ErrorKind::NotOpen
        );
        // A lost handle can still be closed.
        assert_eq!(slot.close(), None);
        assert_eq!(
            slot.get_mut("thing").unwrap_err().kind(),
            ErrorKind::Closed
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(Kind::I2c.to_string(), "I2C");
        assert_eq!(Kind::Mmio.to_string(), "MMIO");
    }
}
