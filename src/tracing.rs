//! Provide tracing, tailored to this library.
//!
//! Peripheral handles emit `tracing` events when they open, reconfigure and
//! close, and when a failure is converted into an [`crate::Error`]. The crate
//! never installs a subscriber on its own; a host (or a test) calls one of
//! the init functions below once.
//!
//! Library code uses `use crate::tracing::prelude::*` for the level macros.

use std::{env, fmt, io::IsTerminal};

use time::OffsetDateTime;
use tracing_subscriber::{
    filter::{EnvFilter, LevelFilter},
    fmt::{format::Writer, time::FormatTime, FmtContext, FormatEvent, FormatFields},
    prelude::*,
    registry::LookupSpan,
};

pub mod prelude {
    #[allow(unused_imports)]
    pub use tracing::{debug, error, info, trace, warn};
}

use prelude::*;

/// Initialize logging for a long-running host.
///
/// If running under systemd, use journald; otherwise fall back to stdout.
/// Panics if a global subscriber is already installed, like
/// `tracing_subscriber`'s own `init`.
pub fn init_journald_or_stdout() {
    if env::var("JOURNAL_STREAM").is_ok() {
        if let Ok(layer) = tracing_journald::layer() {
            tracing_subscriber::registry().with(layer).init();
        } else {
            tracing_subscriber::registry().with(stdout_layers()).init();
            error!("Failed to initialize journald logging, using stdout.");
        }
    } else {
        tracing_subscriber::registry().with(stdout_layers()).init();
    }
}

/// Install the stdout subscriber unless one is already installed.
///
/// Returns `false` if another subscriber was already in place. Scripting
/// hosts that may load the library more than once use this variant.
pub fn try_init_stdout() -> bool {
    tracing_subscriber::registry()
        .with(stdout_layers())
        .try_init()
        .is_ok()
}

// Log to stdout, filtering according to environment variable RUST_LOG,
// overriding the default level (ERROR) to INFO.
fn stdout_layers<S>() -> impl tracing_subscriber::Layer<S>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var("RUST_LOG")
        .from_env_lossy();

    tracing_subscriber::fmt::layer()
        .event_format(LineFormat {
            ansi: std::io::stdout().is_terminal(),
        })
        .with_filter(env_filter)
}

/// Single-line event format: `time LEVEL target: message key=value ...`.
///
/// The crate prefix is stripped from targets, so `periphery::peripheral::spi`
/// prints as `peripheral::spi`.
struct LineFormat {
    ansi: bool,
}

/// Visitor that splits the message from the structured fields.
#[derive(Default)]
struct FieldCollector {
    message: Option<String>,
    fields: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldCollector {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push((field.name(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields.push((field.name(), format!("{value:?}")));
        }
    }
}

impl<S, N> FormatEvent<S, N> for LineFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        LocalTimer.format_time(&mut writer)?;

        let level = *event.metadata().level();
        let (color, text) = match level {
            tracing::Level::ERROR => ("\x1b[31m", "ERROR"),
            tracing::Level::WARN => ("\x1b[33m", "WARN "),
            tracing::Level::INFO => ("\x1b[32m", "INFO "),
            tracing::Level::DEBUG => ("\x1b[34m", "DEBUG"),
            tracing::Level::TRACE => ("\x1b[35m", "TRACE"),
        };
        if self.ansi {
            write!(writer, " {color}{text}\x1b[0m ")?;
        } else {
            write!(writer, " {text} ")?;
        }

        let target = event.metadata().target();
        let target = target.strip_prefix("periphery::").unwrap_or(target);
        write!(writer, "{target}: ")?;

        if let Some(message) = &visitor.message {
            write!(writer, "{message}")?;
        }
        for (key, value) in &visitor.fields {
            write!(writer, " {key}={value}")?;
        }

        writeln!(writer)
    }
}

// Local time to the nearest second; the default timer is UTC with a long
// RFC 3339 timestamp.
struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now
            .format(time::macros::format_description!("[hour]:[minute]:[second]"))
            .map_err(|_| fmt::Error)?;
        write!(w, "{stamp}")
    }
}
