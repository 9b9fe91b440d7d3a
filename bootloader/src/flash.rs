//! Implementation of [shared::Flash]

use shared::{flash_addresses::APP_FLASH_RANGE, FlashError};

/// The application processor's flash as it is mapped into the address space
///
/// The bootloader only needs to read the slot record, so programming is refused.
pub struct MappedFlash;

impl shared::Flash for MappedFlash {
    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), FlashError> {
        let end = address
            .checked_add(buffer.len() as u32)
            .ok_or(FlashError::OutOfBounds)?;
        if address < APP_FLASH_RANGE.start || end > APP_FLASH_RANGE.end {
            return Err(FlashError::OutOfBounds);
        }

        for (i, byte) in buffer.iter_mut().enumerate() {
            // The whole window is memory mapped, so every address in it can be read
            *byte = unsafe { ((address as usize + i) as *const u8).read_volatile() };
        }
        Ok(())
    }

    fn write(&mut self, _address: u32, _data: &[u8]) -> Result<(), FlashError> {
        Err(FlashError::ReadOnly)
    }

    fn erase(&mut self, _address: u32, _length: u32) -> Result<(), FlashError> {
        Err(FlashError::ReadOnly)
    }
}
