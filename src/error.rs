//! Error model shared by every peripheral.
//!
//! All fallible operations return [`Error`], a `(kind, os_code, message)`
//! triple. The kind is what callers dispatch on; the OS code is kept for
//! diagnostics and is zero when the failure did not come from the kernel.
//!
//! Backends report failures as plain [`std::io::Error`]s. The handle that
//! issued the call knows which operation failed and converts the I/O error
//! with [`Error::from_io`], so raw errno values never leave this crate
//! except inside [`Error::os_code`].

use std::io;

use nix::errno::Errno;
use serde::Serialize;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Category of a peripheral failure.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    strum::Display,
    strum::IntoStaticStr,
    strum::EnumString,
)]
pub enum ErrorKind {
    /// The device node, line or mapping could not be acquired.
    OpenFailed,
    /// The kernel rejected a configuration value.
    ConfigureFailed,
    /// A data transfer failed.
    #[strum(serialize = "IOFailed")]
    #[serde(rename = "IOFailed")]
    IoFailed,
    /// An argument was outside the legal value set.
    InvalidArgument,
    /// The handle holds no resource (never acquired, or lost on reconfigure).
    NotOpen,
    /// The hardware or kernel interface lacks the requested capability.
    Unsupported,
    /// The kernel reported a timeout.
    Timeout,
    /// The handle was explicitly closed.
    Closed,
}

/// Structured peripheral error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message}{}", os_suffix(.os_code))]
pub struct Error {
    kind: ErrorKind,
    os_code: i32,
    message: String,
}

fn os_suffix(code: &i32) -> String {
    if *code == 0 {
        String::new()
    } else {
        format!(": {} [errno {}]", Errno::from_raw(*code).desc(), code)
    }
}

impl Error {
    /// Error without an underlying OS code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            os_code: 0,
            message: message.into(),
        }
    }

    /// Error carrying an explicit errno.
    pub fn with_errno(kind: ErrorKind, errno: Errno, message: impl Into<String>) -> Self {
        Self {
            kind: refine_kind(kind, errno as i32),
            os_code: errno as i32,
            message: message.into(),
        }
    }

    /// Convert an I/O failure of the operation described by `message`.
    ///
    /// The errno is preserved when the I/O error has one. Otherwise the I/O
    /// error's own text is appended to the message so nothing is lost.
    /// Capability and timeout failures override `kind`.
    pub fn from_io(kind: ErrorKind, err: &io::Error, message: impl Into<String>) -> Self {
        let message = message.into();
        match err.raw_os_error() {
            Some(code) => Self {
                kind: refine_kind(kind, code),
                os_code: code,
                message,
            },
            None => {
                let kind = match err.kind() {
                    io::ErrorKind::Unsupported => ErrorKind::Unsupported,
                    io::ErrorKind::TimedOut => ErrorKind::Timeout,
                    _ => kind,
                };
                Self {
                    kind,
                    os_code: 0,
                    message: format!("{message}: {err}"),
                }
            }
        }
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    /// `what` names the handle, e.g. `SPI device "/dev/spidev0.0"`.
    pub fn not_open(what: &str) -> Self {
        Self::new(ErrorKind::NotOpen, format!("{what} is not open"))
    }

    pub fn closed(what: &str) -> Self {
        Self::new(ErrorKind::Closed, format!("{what} is closed"))
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Originating errno, or 0 when there is none.
    pub fn os_code(&self) -> i32 {
        self.os_code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Split into the `(kind, os_code, message)` triple a host binding raises.
    pub fn into_parts(self) -> (ErrorKind, i32, String) {
        (self.kind, self.os_code, self.message)
    }
}

fn refine_kind(kind: ErrorKind, code: i32) -> ErrorKind {
    match Errno::from_raw(code) {
        Errno::EOPNOTSUPP => ErrorKind::Unsupported,
        Errno::ETIMEDOUT if kind == ErrorKind::IoFailed => ErrorKind::Timeout,
        _ => kind,
    }
}
