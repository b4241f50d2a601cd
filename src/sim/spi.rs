//! Simulated SPI device with MISO wired to MOSI.

use std::{
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use nix::errno::Errno;

use crate::hw_trait::spi::{SpiConfig, SpiDevice};

const DEFAULT_MAX_SPEED_HZ: u32 = 50_000_000;

#[derive(Debug)]
struct SpiState {
    applied: SpiConfig,
    max_speed_hz: u32,
    transfers: Vec<Vec<u8>>,
    fail_transfers: bool,
}

/// A loopback SPI device: every transfer returns the bytes sent.
///
/// Configuration is applied field by field like spidev's separate ioctls,
/// so a rejected value can leave earlier fields changed. Clones share
/// state.
#[derive(Debug, Clone)]
pub struct LoopbackSpi {
    state: Arc<Mutex<SpiState>>,
}

impl Default for LoopbackSpi {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackSpi {
    pub fn new() -> Self {
        Self::with_max_speed(DEFAULT_MAX_SPEED_HZ)
    }

    /// A device whose controller rejects speeds above `max_speed_hz`.
    pub fn with_max_speed(max_speed_hz: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SpiState {
                applied: SpiConfig::default(),
                max_speed_hz,
                transfers: Vec::new(),
                fail_transfers: false,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SpiState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Configuration currently in effect on the device.
    pub fn applied(&self) -> SpiConfig {
        self.lock().applied.clone()
    }

    /// Outgoing bytes of every transfer so far.
    pub fn transfers(&self) -> Vec<Vec<u8>> {
        self.lock().transfers.clone()
    }

    /// Make transfers fail with `EIO`.
    pub fn set_fail_transfers(&self, fail: bool) {
        self.lock().fail_transfers = fail;
    }
}

impl SpiDevice for LoopbackSpi {
    fn configure(&mut self, config: &SpiConfig) -> io::Result<()> {
        let mut state = self.lock();
        state.applied.mode = config.mode;
        state.applied.bit_order = config.bit_order;
        state.applied.extra_flags = config.extra_flags;

        if !matches!(config.bits_per_word, 8 | 16 | 32) {
            return Err(Errno::EINVAL.into());
        }
        state.applied.bits_per_word = config.bits_per_word;

        if config.max_speed_hz > state.max_speed_hz {
            return Err(Errno::EINVAL.into());
        }
        state.applied.max_speed_hz = config.max_speed_hz;
        Ok(())
    }

    fn transfer(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        let mut state = self.lock();
        if state.fail_transfers {
            return Err(Errno::EIO.into());
        }
        if tx.len() != rx.len() {
            return Err(Errno::EINVAL.into());
        }
        rx.copy_from_slice(tx);
        state.transfers.push(tx.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw_trait::spi::SpiMode;

    #[test]
    fn test_loopback() {
        let mut spi = LoopbackSpi::new();
        let mut rx = [0u8; 3];
        spi.transfer(&[1, 2, 3], &mut rx).unwrap();
        assert_eq!(rx, [1, 2, 3]);
        assert_eq!(spi.transfers(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_rejected_speed_leaves_partial_configuration() {
        let mut spi = LoopbackSpi::with_max_speed(1_000_000);
        let err = spi
            .configure(&SpiConfig::new(SpiMode::Mode2, 2_000_000))
            .unwrap_err();
        assert_eq!(err.raw_os_error(), Some(Errno::EINVAL as i32));

        let applied = spi.applied();
        assert_eq!(applied.mode, SpiMode::Mode2);
        assert_eq!(applied.max_speed_hz, SpiConfig::default().max_speed_hz);
    }
}
