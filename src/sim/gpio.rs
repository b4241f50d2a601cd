//! Simulated GPIO chip.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use nix::errno::Errno;

use crate::hw_trait::gpio::{
    Bias, ChipInfo, Direction, EventEdge, GpioChip, GpioConfig, GpioEvent, GpioLine,
};

/// Events kept per line before the oldest are dropped, like the kernel's
/// request event buffer.
const EVENT_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Default)]
struct LineState {
    name: Option<String>,
    /// Level driven onto the pin from outside; `None` leaves it to the bias.
    external: Option<bool>,
    /// Physical level the line drives while requested as an output.
    driven: bool,
    claim: Option<Claim>,
}

#[derive(Debug)]
struct Claim {
    id: u64,
    config: GpioConfig,
    events: VecDeque<GpioEvent>,
}

impl LineState {
    fn physical(&self) -> bool {
        match &self.claim {
            Some(claim) if claim.config.direction.is_output() => self.driven,
            Some(claim) => self
                .external
                .unwrap_or(claim.config.bias == Bias::PullUp),
            None => self.external.unwrap_or(false),
        }
    }

    fn logical(&self) -> bool {
        let inverted = self.claim.as_ref().is_some_and(|c| c.config.inverted);
        self.physical() ^ inverted
    }
}

#[derive(Debug)]
struct ChipState {
    lines: Vec<LineState>,
    next_claim: u64,
    reconfigure_failures: Option<(Errno, usize)>,
}

#[derive(Debug)]
struct Shared {
    info: ChipInfo,
    state: Mutex<ChipState>,
    event_ready: Condvar,
    epoch: Instant,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, ChipState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A GPIO chip whose pins exist only in memory.
///
/// Cloning yields another view of the same chip, so tests keep a clone to
/// drive inputs after handing the chip to a peripheral handle.
#[derive(Debug, Clone)]
pub struct SimChip {
    shared: Arc<Shared>,
}

impl SimChip {
    /// A chip with `lines` unnamed lines.
    pub fn new(label: &str, lines: u32) -> Self {
        Self::build(label, (0..lines).map(|_| None).collect())
    }

    /// A chip whose lines carry the given names, in offset order.
    pub fn with_names(label: &str, names: &[&str]) -> Self {
        Self::build(
            label,
            names
                .iter()
                .map(|name| (!name.is_empty()).then(|| name.to_string()))
                .collect(),
        )
    }

    fn build(label: &str, names: Vec<Option<String>>) -> Self {
        let info = ChipInfo {
            name: "gpiochip-sim".to_string(),
            label: label.to_string(),
            lines: names.len() as u32,
        };
        let lines = names
            .into_iter()
            .map(|name| LineState {
                name,
                ..LineState::default()
            })
            .collect();
        Self {
            shared: Arc::new(Shared {
                info,
                state: Mutex::new(ChipState {
                    lines,
                    next_claim: 1,
                    reconfigure_failures: None,
                }),
                event_ready: Condvar::new(),
                epoch: Instant::now(),
            }),
        }
    }

    /// Drive the pin at `offset` from outside, generating edge events for a
    /// requested input line whose edge setting matches.
    pub fn set_input(&self, offset: u32, level: bool) {
        let mut state = self.shared.lock();
        let timestamp_ns = self.shared.epoch.elapsed().as_nanos() as u64;
        let Some(line) = state.lines.get_mut(offset as usize) else {
            return;
        };

        let before = line.logical();
        line.external = Some(level);
        let after = line.logical();

        if let Some(claim) = &mut line.claim {
            if before != after && !claim.config.direction.is_output() {
                let edge = if after {
                    EventEdge::Rising
                } else {
                    EventEdge::Falling
                };
                if claim.config.edge.matches(edge) {
                    if claim.events.len() == EVENT_QUEUE_DEPTH {
                        claim.events.pop_front();
                    }
                    claim.events.push_back(GpioEvent { edge, timestamp_ns });
                    self.shared.event_ready.notify_all();
                }
            }
        }
    }

    /// Physical level of the pin.
    pub fn level(&self, offset: u32) -> bool {
        let state = self.shared.lock();
        state
            .lines
            .get(offset as usize)
            .is_some_and(LineState::physical)
    }

    pub fn is_requested(&self, offset: u32) -> bool {
        let state = self.shared.lock();
        state
            .lines
            .get(offset as usize)
            .is_some_and(|line| line.claim.is_some())
    }

    /// Consumer label of the current claim.
    pub fn consumer(&self, offset: u32) -> Option<String> {
        let state = self.shared.lock();
        state
            .lines
            .get(offset as usize)
            .and_then(|line| line.claim.as_ref())
            .map(|claim| claim.config.label.clone())
    }

    /// Make the next `times` line reconfigurations fail with `errno`.
    pub fn fail_reconfigure(&self, errno: Errno, times: usize) {
        self.shared.lock().reconfigure_failures = (times > 0).then_some((errno, times));
    }
}

impl GpioChip for SimChip {
    fn chip_info(&self) -> ChipInfo {
        self.shared.info.clone()
    }

    fn line_name(&self, offset: u32) -> io::Result<Option<String>> {
        let state = self.shared.lock();
        let line = state.lines.get(offset as usize).ok_or(Errno::EINVAL)?;
        Ok(line.name.clone())
    }

    fn request_line(&self, offset: u32, config: &GpioConfig) -> io::Result<Box<dyn GpioLine>> {
        let mut state = self.shared.lock();
        let id = state.next_claim;
        let line = state.lines.get_mut(offset as usize).ok_or(Errno::EINVAL)?;
        if line.claim.is_some() {
            return Err(Errno::EBUSY.into());
        }

        if config.direction.is_output() {
            line.driven = config.direction.initial_level() ^ config.inverted;
        }
        line.claim = Some(Claim {
            id,
            config: config.clone(),
            events: VecDeque::new(),
        });
        state.next_claim += 1;

        Ok(Box::new(SimLine {
            shared: Arc::clone(&self.shared),
            offset: offset as usize,
            id,
        }))
    }
}

/// A claimed line of a [`SimChip`]. Dropping it releases the claim.
#[derive(Debug)]
struct SimLine {
    shared: Arc<Shared>,
    offset: usize,
    id: u64,
}

impl SimLine {
    fn with_claim<T>(
        &self,
        f: impl FnOnce(&mut LineState) -> io::Result<T>,
    ) -> io::Result<T> {
        let mut state = self.shared.lock();
        let line = state.lines.get_mut(self.offset).ok_or(Errno::EINVAL)?;
        match &line.claim {
            Some(claim) if claim.id == self.id => f(line),
            _ => Err(Errno::EBADF.into()),
        }
    }
}

impl GpioLine for SimLine {
    fn get_value(&mut self) -> io::Result<bool> {
        self.with_claim(|line| Ok(line.logical()))
    }

    fn set_value(&mut self, value: bool) -> io::Result<()> {
        self.with_claim(|line| {
            let Some(claim) = &line.claim else {
                return Err(Errno::EBADF.into());
            };
            if !claim.config.direction.is_output() {
                return Err(Errno::EPERM.into());
            }
            line.driven = value ^ claim.config.inverted;
            Ok(())
        })
    }

    fn reconfigure(&mut self, config: &GpioConfig) -> io::Result<()> {
        {
            let mut state = self.shared.lock();
            if let Some((errno, remaining)) = state.reconfigure_failures {
                state.reconfigure_failures = (remaining > 1).then_some((errno, remaining - 1));
                return Err(errno.into());
            }
        }

        self.with_claim(|line| {
            let was_output = line
                .claim
                .as_ref()
                .is_some_and(|c| c.config.direction.is_output());
            let logical = line.logical();

            if config.direction.is_output() {
                let level = if config.direction == Direction::Out && was_output {
                    logical
                } else {
                    config.direction.initial_level()
                };
                line.driven = level ^ config.inverted;
            }
            if let Some(claim) = &mut line.claim {
                claim.config = config.clone();
            }
            Ok(())
        })
    }

    fn wait_event(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.shared.lock();
        loop {
            let line = state.lines.get(self.offset).ok_or(Errno::EINVAL)?;
            match &line.claim {
                Some(claim) if claim.id == self.id => {
                    if !claim.events.is_empty() {
                        return Ok(true);
                    }
                }
                _ => return Err(Errno::EBADF.into()),
            }

            state = match deadline {
                None => self
                    .shared
                    .event_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    self.shared
                        .event_ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }

    fn read_event(&mut self) -> io::Result<GpioEvent> {
        self.wait_event(None)?;
        self.with_claim(|line| {
            line.claim
                .as_mut()
                .and_then(|claim| claim.events.pop_front())
                .ok_or_else(|| Errno::EAGAIN.into())
        })
    }
}

impl Drop for SimLine {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        if let Some(line) = state.lines.get_mut(self.offset) {
            if line.claim.as_ref().is_some_and(|c| c.id == self.id) {
                line.claim = None;
            }
        }
        self.shared.event_ready.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::gpio::Edge;

    #[test]
    fn test_claims_are_exclusive() {
        let chip = SimChip::new("test", 4);
        let line = chip.request_line(2, &GpioConfig::default()).unwrap();
        assert!(chip.is_requested(2));

        let err = chip.request_line(2, &GpioConfig::default()).err().expect("expected request_line to fail");
        assert_eq!(err.raw_os_error(), Some(Errno::EBUSY as i32));

        drop(line);
        assert!(!chip.is_requested(2));
        assert!(chip.request_line(2, &GpioConfig::default()).is_ok());
    }

    #[test]
    fn test_offset_out_of_range() {
        let chip = SimChip::new("test", 4);
        let err = chip.request_line(4, &GpioConfig::default()).err().expect("expected request_line to fail");
        assert_eq!(err.raw_os_error(), Some(Errno::EINVAL as i32));
    }

    #[test]
    fn test_inverted_output_drives_physical_low() {
        let chip = SimChip::new("test", 1);
        let config = GpioConfig {
            inverted: true,
            ..GpioConfig::new(Direction::OutHigh)
        };
        let mut line = chip.request_line(0, &config).unwrap();
        assert!(!chip.level(0));
        assert!(line.get_value().unwrap());

        line.set_value(false).unwrap();
        assert!(chip.level(0));
    }

    #[test]
    fn test_set_value_on_input_is_rejected() {
        let chip = SimChip::new("test", 1);
        let mut line = chip.request_line(0, &GpioConfig::default()).unwrap();
        let err = line.set_value(true).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(Errno::EPERM as i32));
    }

    #[test]
    fn test_edge_events_follow_configuration() {
        let chip = SimChip::new("test", 1);
        let config = GpioConfig {
            edge: Edge::Falling,
            ..GpioConfig::default()
        };
        let mut line = chip.request_line(0, &config).unwrap();

        chip.set_input(0, true);
        assert!(!line.wait_event(Some(Duration::ZERO)).unwrap());

        chip.set_input(0, false);
        assert!(line.wait_event(Some(Duration::ZERO)).unwrap());
        let event = line.read_event().unwrap();
        assert_eq!(event.edge, EventEdge::Falling);
    }

    #[test]
    fn test_pull_up_bias_reads_high() {
        let chip = SimChip::new("test", 1);
        let config = GpioConfig {
            bias: Bias::PullUp,
            ..GpioConfig::default()
        };
        let mut line = chip.request_line(0, &config).unwrap();
        assert!(line.get_value().unwrap());
    }

    #[test]
    fn test_injected_reconfigure_failures() {
        let chip = SimChip::new("test", 1);
        let mut line = chip.request_line(0, &GpioConfig::default()).unwrap();
        chip.fail_reconfigure(Errno::EIO, 1);

        let out = GpioConfig::new(Direction::Out);
        assert!(line.reconfigure(&out).is_err());
        assert!(line.reconfigure(&out).is_ok());
    }
}
