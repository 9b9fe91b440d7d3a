//! Flash geometry shared by the bootloader and the application

use core::ops::Range;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The size of an erase chunk in bytes
pub const CHUNK_SIZE: u32 = 0x0000_1000;

/// The largest amount of bytes a single flash write may carry
pub const MAX_WRITE_CHUNK: usize = 1024;

/// Start of the application processor's flash window
pub const APP_FLASH_BASE: u32 = 0x0800_0000;
/// Start of the network co-processor's flash window
pub const CO_FLASH_BASE: u32 = 0x0400_0000;

/// The address range owned by the application processor
pub const APP_FLASH_RANGE: Range<u32> = APP_FLASH_BASE..0x0C00_0000;
/// The address range owned by the network co-processor
pub const CO_FLASH_RANGE: Range<u32> = CO_FLASH_BASE..APP_FLASH_BASE;

/// Where the bootloader lives, at the start of the application processor's window
pub const BOOTLOADER_RANGE: Range<u32> = APP_FLASH_BASE..0x0801_0000;

/// Where the primary slot record is stored
pub const SLOT_RECORD_OFFSET: u32 = 0x081F_1000;
/// Where the backup slot record is stored, one erase chunk after the primary
pub const BACKUP_SLOT_RECORD_OFFSET: u32 = SLOT_RECORD_OFFSET + CHUNK_SIZE;

/// The processor an image or slot set belongs to
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// The network co-processor (control flag bit 0 cleared)
    CoProcessor = 0,
    /// The application processor (control flag bit 0 set)
    Application = 1,
}

/// Where everything lives in flash
///
/// [FlashLayout::default] is the layout of the real device.
/// Boards or tests with another memory map can construct their own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashLayout {
    /// Address of the primary slot record. Must be chunk aligned.
    pub record_offset: u32,
    /// The window of the application processor's images
    pub app_range: Range<u32>,
    /// The window of the co-processor's images
    pub co_range: Range<u32>,
    /// Flash holding the bootloader. Never erased by the store.
    pub bootloader_range: Range<u32>,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            record_offset: SLOT_RECORD_OFFSET,
            app_range: APP_FLASH_RANGE,
            co_range: CO_FLASH_RANGE,
            bootloader_range: BOOTLOADER_RANGE,
        }
    }
}

impl FlashLayout {
    /// Address of the primary slot record
    pub fn primary_record(&self) -> u32 {
        self.record_offset
    }

    /// Address of the backup slot record
    pub fn backup_record(&self) -> u32 {
        self.record_offset + CHUNK_SIZE
    }

    /// Both record chunks, primary and backup
    pub fn record_range(&self) -> Range<u32> {
        self.primary_record()..self.backup_record() + CHUNK_SIZE
    }

    /// True if `[start, start + length)` touches the bootloader or the slot record
    pub fn overlaps_reserved(&self, start: u32, length: u32) -> bool {
        let end = start as u64 + length as u64;
        [self.bootloader_range.clone(), self.record_range()]
            .iter()
            .any(|reserved| (start as u64) < reserved.end as u64 && (reserved.start as u64) < end)
    }

    /// The flash window owned by the given processor
    pub fn range_of(&self, role: Role) -> Range<u32> {
        match role {
            Role::Application => self.app_range.clone(),
            Role::CoProcessor => self.co_range.clone(),
        }
    }

    /// Start of the flash window owned by the given processor
    pub fn base_of(&self, role: Role) -> u32 {
        self.range_of(role).start
    }

    /// Which processor's window the address falls in, if any
    pub fn role_of(&self, address: u32) -> Option<Role> {
        if self.app_range.contains(&address) {
            Some(Role::Application)
        } else if self.co_range.contains(&address) {
            Some(Role::CoProcessor)
        } else {
            None
        }
    }
}

/// Round a length up to the next erase chunk boundary, `None` if that doesn't fit a `u32`
pub fn round_up_to_chunk(length: u32) -> Option<u32> {
    length.div_ceil(CHUNK_SIZE).checked_mul(CHUNK_SIZE)
}
