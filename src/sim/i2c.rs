//! Simulated I2C bus with register-file targets.

use std::{
    collections::BTreeMap,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use nix::errno::Errno;

use crate::hw_trait::i2c::{Functionality, I2cBus, Segment};

/// A target device exposing a bank of byte registers.
///
/// The first byte of a write segment selects a register; further written
/// bytes and all read bytes move through consecutive registers, wrapping at
/// the end of the bank.
#[derive(Debug, Clone)]
pub struct SimI2cDevice {
    registers: Vec<u8>,
    pointer: usize,
}

impl SimI2cDevice {
    /// A device with `size` zeroed registers (at least one).
    pub fn new(size: usize) -> Self {
        Self {
            registers: vec![0; size.max(1)],
            pointer: 0,
        }
    }

    fn write(&mut self, data: &[u8]) {
        let Some((&register, rest)) = data.split_first() else {
            return;
        };
        self.pointer = usize::from(register) % self.registers.len();
        for &byte in rest {
            self.registers[self.pointer] = byte;
            self.advance();
        }
    }

    fn read(&mut self, buf: &mut [u8]) {
        for byte in buf {
            *byte = self.registers[self.pointer];
            self.advance();
        }
    }

    fn advance(&mut self) {
        self.pointer = (self.pointer + 1) % self.registers.len();
    }
}

#[derive(Debug)]
struct BusState {
    devices: BTreeMap<u16, SimI2cDevice>,
    functionality: Functionality,
    transfers: usize,
}

/// An I2C adapter with simulated targets attached. Clones share state.
#[derive(Debug, Clone)]
pub struct SimI2cBus {
    state: Arc<Mutex<BusState>>,
}

impl Default for SimI2cBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SimI2cBus {
    /// An adapter supporting plain I2C and SMBus byte/word transfers.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BusState {
                devices: BTreeMap::new(),
                functionality: Functionality::I2C
                    | Functionality::SMBUS_QUICK
                    | Functionality::SMBUS_READ_BYTE
                    | Functionality::SMBUS_WRITE_BYTE
                    | Functionality::SMBUS_READ_BYTE_DATA
                    | Functionality::SMBUS_WRITE_BYTE_DATA
                    | Functionality::SMBUS_READ_WORD_DATA
                    | Functionality::SMBUS_WRITE_WORD_DATA,
                transfers: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attach(&self, address: u16, device: SimI2cDevice) {
        self.lock().devices.insert(address, device);
    }

    pub fn set_functionality(&self, functionality: Functionality) {
        self.lock().functionality = functionality;
    }

    pub fn register(&self, address: u16, register: u8) -> Option<u8> {
        let state = self.lock();
        let device = state.devices.get(&address)?;
        device
            .registers
            .get(usize::from(register) % device.registers.len())
            .copied()
    }

    pub fn set_register(&self, address: u16, register: u8, value: u8) {
        if let Some(device) = self.lock().devices.get_mut(&address) {
            let index = usize::from(register) % device.registers.len();
            device.registers[index] = value;
        }
    }

    /// Number of transfer sessions that reached the bus.
    pub fn transfer_count(&self) -> usize {
        self.lock().transfers
    }
}

impl I2cBus for SimI2cBus {
    fn functionality(&mut self) -> io::Result<Functionality> {
        Ok(self.lock().functionality)
    }

    fn transfer(&mut self, address: u16, segments: &mut [Segment<'_>]) -> io::Result<()> {
        let mut state = self.lock();
        state.transfers += 1;
        // No target acknowledges the address.
        let device = state.devices.get_mut(&address).ok_or(Errno::ENXIO)?;
        for segment in segments.iter_mut() {
            if segment.is_read() {
                device.read(segment.buf);
            } else {
                device.write(segment.buf);
            }
        }
        Ok(())
    }
}
