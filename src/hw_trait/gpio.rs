//! GPIO backend traits and line configuration types.

use std::{fmt, io, time::Duration};

use serde::{Deserialize, Serialize};

/// Line direction.
///
/// `Out` drives the line low on request; `OutLow`/`OutHigh` name the
/// initial logical level explicitly.
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
pub enum Direction {
    #[default]
    In,
    Out,
    #[strum(serialize = "low")]
    #[serde(rename = "low")]
    OutLow,
    #[strum(serialize = "high")]
    #[serde(rename = "high")]
    OutHigh,
}

impl Direction {
    pub fn is_output(self) -> bool {
        !matches!(self, Direction::In)
    }

    /// Logical level an output takes when first requested.
    pub fn initial_level(self) -> bool {
        matches!(self, Direction::OutHigh)
    }
}

/// Which signal transitions generate events.
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
pub enum Edge {
    #[default]
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    /// Whether a transition of the given kind matches this edge setting.
    pub fn matches(self, edge: EventEdge) -> bool {
        match self {
            Edge::None => false,
            Edge::Both => true,
            Edge::Rising => edge == EventEdge::Rising,
            Edge::Falling => edge == EventEdge::Falling,
        }
    }
}

/// Line bias (internal pull resistors).
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Bias {
    /// Leave whatever the hardware or device tree configured.
    #[default]
    Default,
    PullUp,
    PullDown,
    Disable,
}

/// Output drive mode.
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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Drive {
    #[default]
    PushPull,
    OpenDrain,
    OpenSource,
}

/// Full configuration of a requested line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub direction: Direction,
    pub edge: Edge,
    pub bias: Bias,
    pub drive: Drive,
    /// Active-low: logical level is the inverse of the physical level.
    pub inverted: bool,
    /// Consumer label shown by the kernel for the claimed line.
    pub label: String,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            direction: Direction::In,
            edge: Edge::None,
            bias: Bias::Default,
            drive: Drive::PushPull,
            inverted: false,
            label: crate::config::DEFAULT_GPIO_CONSUMER.to_string(),
        }
    }
}

impl GpioConfig {
    pub fn new(direction: Direction) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    /// Check the combination against the values a line can legally take.
    pub fn validate(&self) -> Result<(), String> {
        if self.edge != Edge::None && self.direction.is_output() {
            return Err(format!(
                "Edge {} requires direction in, got {}",
                self.edge, self.direction
            ));
        }
        if self.drive != Drive::PushPull && !self.direction.is_output() {
            return Err(format!(
                "Drive {} requires an output direction",
                self.drive
            ));
        }
        if self.label.len() >= 32 {
            return Err(format!(
                "Consumer label \"{}\" exceeds 31 bytes",
                self.label
            ));
        }
        if self.label.contains('\0') {
            return Err("Consumer label contains a NUL byte".to_string());
        }
        Ok(())
    }
}

impl From<Direction> for GpioConfig {
    fn from(direction: Direction) -> Self {
        Self::new(direction)
    }
}

/// How a line is identified on its chip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LineId {
    Offset(u32),
    Name(String),
}

impl From<u32> for LineId {
    fn from(offset: u32) -> Self {
        LineId::Offset(offset)
    }
}

impl From<&str> for LineId {
    fn from(name: &str) -> Self {
        LineId::Name(name.to_string())
    }
}

impl From<String> for LineId {
    fn from(name: String) -> Self {
        LineId::Name(name)
    }
}

impl fmt::Display for LineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineId::Offset(offset) => write!(f, "{offset}"),
            LineId::Name(name) => write!(f, "\"{name}\""),
        }
    }
}

/// Transition reported by an edge event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum EventEdge {
    Rising,
    Falling,
}

/// An edge event read from a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GpioEvent {
    pub edge: EventEdge,
    /// Kernel timestamp in nanoseconds (monotonic clock).
    pub timestamp_ns: u64,
}

/// Chip identification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChipInfo {
    pub name: String,
    pub label: String,
    pub lines: u32,
}

/// A GPIO controller lines can be requested from.
pub trait GpioChip {
    fn chip_info(&self) -> ChipInfo;

    /// Name of the line at `offset`, if it has one.
    fn line_name(&self, offset: u32) -> io::Result<Option<String>>;

    /// Resolve a line name to its offset.
    fn find_line(&self, name: &str) -> io::Result<Option<u32>> {
        for offset in 0..self.chip_info().lines {
            if self.line_name(offset)?.as_deref() == Some(name) {
                return Ok(Some(offset));
            }
        }
        Ok(None)
    }

    /// Claim a line. The claim lasts until the returned line is dropped.
    fn request_line(&self, offset: u32, config: &GpioConfig) -> io::Result<Box<dyn GpioLine>>;
}

/// A claimed GPIO line.
///
/// Levels are logical: inversion is applied by the backend.
pub trait GpioLine: Send {
    fn get_value(&mut self) -> io::Result<bool>;

    fn set_value(&mut self, value: bool) -> io::Result<()>;

    /// Apply a new configuration without releasing the claim. Either the
    /// whole configuration takes effect or none of it does.
    fn reconfigure(&mut self, config: &GpioConfig) -> io::Result<()>;

    /// Wait for a pending edge event. `None` waits forever. Returns `false`
    /// if the timeout expired with no event pending.
    fn wait_event(&mut self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Consume the next edge event, blocking until one arrives.
    fn read_event(&mut self) -> io::Result<GpioEvent>;
}
