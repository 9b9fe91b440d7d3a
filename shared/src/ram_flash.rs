//! An in-memory [Flash] for host-side simulation and tests
//!
//! Behaves like NOR flash: erased bytes read as `0xFF` and programming can only clear bits.
//! Faults can be armed to simulate a power loss in the middle of an operation.

use crate::{
    error::FlashError,
    flash_addresses::{CHUNK_SIZE, MAX_WRITE_CHUNK},
    Flash,
};
use std::collections::BTreeMap;

/// One operation as it reached the flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashOp {
    /// An erase of `length` bytes at the address
    Erase(u32, u32),
    /// A write of `length` bytes at the address
    Write(u32, usize),
}

/// Flash contents kept per erase chunk. Chunks never touched read as erased.
#[derive(Debug, Default)]
pub struct RamFlash {
    chunks: BTreeMap<u32, Vec<u8>>,
    ops: Vec<FlashOp>,
    fail_erase_at: Option<u32>,
    fail_write_at: Option<(u32, usize)>,
    fail_reads: bool,
}

impl RamFlash {
    /// An entirely erased flash
    pub fn new() -> Self {
        Self::default()
    }

    /// The next erase starting at `address` fails before anything is erased
    pub fn fail_erase_at(&mut self, address: u32) {
        self.fail_erase_at = Some(address);
    }

    /// The next write starting at `address` programs only its first `torn_after` bytes, then fails
    pub fn fail_write_at(&mut self, address: u32, torn_after: usize) {
        self.fail_write_at = Some((address, torn_after));
    }

    /// Makes every read fail until turned off again
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }

    /// Every erase and write that reached the flash, in order
    pub fn ops(&self) -> &[FlashOp] {
        &self.ops
    }

    /// Forget the recorded operations
    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Overwrite bytes directly, bypassing NOR semantics. Used to plant corruption.
    pub fn poke(&mut self, address: u32, data: &[u8]) {
        for (i, byte) in data.iter().enumerate() {
            *self.byte_mut(address + i as u32) = *byte;
        }
    }

    /// Read bytes without going through the [Flash] trait
    pub fn peek(&self, address: u32, length: usize) -> Vec<u8> {
        (0..length as u32).map(|i| self.byte(address + i)).collect()
    }

    fn byte(&self, address: u32) -> u8 {
        let chunk = address - address % CHUNK_SIZE;
        match self.chunks.get(&chunk) {
            Some(data) => data[(address - chunk) as usize],
            None => 0xFF,
        }
    }

    fn byte_mut(&mut self, address: u32) -> &mut u8 {
        let chunk = address - address % CHUNK_SIZE;
        let data = self
            .chunks
            .entry(chunk)
            .or_insert_with(|| vec![0xFF; CHUNK_SIZE as usize]);
        &mut data[(address - chunk) as usize]
    }

    fn check_range(address: u32, length: usize) -> Result<(), FlashError> {
        match address.checked_add(length as u32) {
            Some(_) if length <= u32::MAX as usize => Ok(()),
            _ => Err(FlashError::OutOfBounds),
        }
    }
}

impl Flash for RamFlash {
    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), FlashError> {
        if self.fail_reads {
            return Err(FlashError::Device);
        }
        Self::check_range(address, buffer.len())?;

        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.byte(address + i as u32);
        }
        Ok(())
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        if data.len() > MAX_WRITE_CHUNK {
            return Err(FlashError::TooLong);
        }
        Self::check_range(address, data.len())?;

        let (length, result) = match self.fail_write_at {
            Some((fail_address, torn_after)) if fail_address == address => {
                self.fail_write_at = None;
                (torn_after.min(data.len()), Err(FlashError::Device))
            }
            _ => (data.len(), Ok(())),
        };

        self.ops.push(FlashOp::Write(address, data.len()));
        for (i, byte) in data[..length].iter().enumerate() {
            // Programming can only turn ones into zeros
            *self.byte_mut(address + i as u32) &= *byte;
        }
        result
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), FlashError> {
        if address % CHUNK_SIZE != 0 || length % CHUNK_SIZE != 0 {
            return Err(FlashError::Unaligned);
        }
        Self::check_range(address, length as usize)?;

        if self.fail_erase_at == Some(address) {
            self.fail_erase_at = None;
            return Err(FlashError::Device);
        }

        self.ops.push(FlashOp::Erase(address, length));
        for chunk in (address..address + length).step_by(CHUNK_SIZE as usize) {
            self.chunks.remove(&chunk);
        }
        Ok(())
    }
}
