//! Simulated serial ports joined by in-memory lines.

use std::{
    collections::VecDeque,
    io,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    time::{Duration, Instant},
};

use nix::errno::Errno;

use crate::hw_trait::serial::{SerialConfig, SerialDevice};

const DEFAULT_CAPACITY: usize = 4096;
const DEFAULT_MAX_BAUD: u32 = 4_000_000;

#[derive(Debug)]
struct LinkState {
    /// One queue per direction, indexed by the receiving side.
    queues: [VecDeque<u8>; 2],
    applied: [Option<SerialConfig>; 2],
    capacity: usize,
    max_baud_rate: u32,
}

#[derive(Debug)]
struct Link {
    state: Mutex<LinkState>,
    data_ready: Condvar,
}

impl Link {
    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One end of a simulated serial line.
///
/// Each direction buffers at most `capacity` bytes; writes beyond that are
/// short. Transmission is instantaneous, so `flush` never waits and the
/// output queue is always empty.
#[derive(Debug, Clone)]
pub struct SimPort {
    link: Arc<Link>,
    rx: usize,
    tx: usize,
}

impl SimPort {
    /// Two ports wired to each other.
    pub fn pair() -> (SimPort, SimPort) {
        Self::pair_with(DEFAULT_CAPACITY, DEFAULT_MAX_BAUD)
    }

    /// Two connected ports with the given per-direction buffer size and
    /// highest accepted baud rate.
    pub fn pair_with(capacity: usize, max_baud_rate: u32) -> (SimPort, SimPort) {
        let link = Self::link(capacity, max_baud_rate);
        (
            SimPort {
                link: Arc::clone(&link),
                rx: 0,
                tx: 1,
            },
            SimPort { link, rx: 1, tx: 0 },
        )
    }

    /// A port whose TX is wired to its own RX.
    pub fn loopback() -> SimPort {
        SimPort {
            link: Self::link(DEFAULT_CAPACITY, DEFAULT_MAX_BAUD),
            rx: 0,
            tx: 0,
        }
    }

    fn link(capacity: usize, max_baud_rate: u32) -> Arc<Link> {
        Arc::new(Link {
            state: Mutex::new(LinkState {
                queues: [VecDeque::new(), VecDeque::new()],
                applied: [None, None],
                capacity,
                max_baud_rate,
            }),
            data_ready: Condvar::new(),
        })
    }

    /// Line settings last accepted by this end.
    pub fn applied(&self) -> Option<SerialConfig> {
        self.link.lock().applied[self.rx].clone()
    }

    /// Block until this end has input or the timeout expires; returns the
    /// guard with input pending, or `None` on expiry.
    fn wait_input(&self, timeout: Option<Duration>) -> Option<MutexGuard<'_, LinkState>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.link.lock();
        loop {
            if !state.queues[self.rx].is_empty() {
                return Some(state);
            }
            state = match deadline {
                None => self
                    .link
                    .data_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.link
                        .data_ready
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
            };
        }
    }
}

impl SerialDevice for SimPort {
    fn configure(&mut self, config: &SerialConfig) -> io::Result<()> {
        let mut state = self.link.lock();
        if config.baud_rate == 0 || config.baud_rate > state.max_baud_rate {
            return Err(Errno::EINVAL.into());
        }
        state.applied[self.rx] = Some(config.clone());
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let rx = self.rx;
        let Some(mut state) = self.wait_input(timeout) else {
            return Ok(0);
        };
        let queue = &mut state.queues[rx];
        let n = buf.len().min(queue.len());
        for (slot, byte) in buf.iter_mut().zip(queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.link.lock();
        let room = state.capacity.saturating_sub(state.queues[self.tx].len());
        let n = buf.len().min(room);
        state.queues[self.tx].extend(&buf[..n]);
        if n > 0 {
            self.link.data_ready.notify_all();
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn poll(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        Ok(self.wait_input(timeout).is_some())
    }

    fn input_waiting(&mut self) -> io::Result<u32> {
        let len = self.link.lock().queues[self.rx].len();
        Ok(u32::try_from(len).unwrap_or(u32::MAX))
    }

    fn output_waiting(&mut self) -> io::Result<u32> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_carries_bytes_both_ways() {
        let (mut a, mut b) = SimPort::pair();
        assert_eq!(a.write(b"ping").unwrap(), 4);
        assert_eq!(b.input_waiting().unwrap(), 4);

        let mut buf = [0u8; 8];
        let n = b.read(&mut buf, Some(Duration::ZERO)).unwrap();
        assert_eq!(&buf[..n], b"ping");

        b.write(b"pong").unwrap();
        let n = a.read(&mut buf, None).unwrap();
        assert_eq!(&buf[..n], b"pong");
    }

    #[test]
    fn test_full_buffer_gives_short_write() {
        let (mut a, _b) = SimPort::pair_with(3, DEFAULT_MAX_BAUD);
        assert_eq!(a.write(b"hello").unwrap(), 3);
        assert_eq!(a.write(b"!").unwrap(), 0);
    }

    #[test]
    fn test_read_times_out_empty() {
        let mut port = SimPort::loopback();
        let mut buf = [0u8; 4];
        let start = Instant::now();
        let n = port.read(&mut buf, Some(Duration::from_millis(20))).unwrap();
        assert_eq!(n, 0);
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_rejects_unsupported_baud() {
        let (mut a, _b) = SimPort::pair_with(16, 115_200);
        let err = a.configure(&SerialConfig::new(230_400)).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(Errno::EINVAL as i32));
        assert!(a.applied().is_none());
    }
}
