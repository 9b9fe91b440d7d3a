//! The persisted slot management record
//!
//! The record is 64 bytes, stored little-endian with C layout. Padding is explicit
//! and kept zero so that the checksum covers well defined bytes.

use crate::{checksum::crc32, error::Error, flash_addresses::Role};
use core::mem::{offset_of, size_of};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Identifies one of the two slots of a processor
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SlotId {
    /// Slot A, the factory slot
    A = 1,
    /// Slot B
    B = 2,
}

impl SlotId {
    /// The slot that is not this one
    pub fn other(self) -> Self {
        match self {
            SlotId::A => SlotId::B,
            SlotId::B => SlotId::A,
        }
    }
}

/// The location of one firmware image
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotDescriptor {
    /// Raw [SlotId] of this slot
    pub slot_id: u8,
    _padding: [u8; 3],
    /// Absolute flash address of the image (including its header)
    pub image_offset: u32,
    /// Size of the image in bytes (including its header)
    pub image_size: u32,
}

impl SlotDescriptor {
    /// A descriptor for the given slot
    pub fn new(slot_id: SlotId, image_offset: u32, image_size: u32) -> Self {
        Self {
            slot_id: slot_id.into(),
            _padding: [0; 3],
            image_offset,
            image_size,
        }
    }

    /// True if `[start, start + length)` overlaps the image or starts at its offset
    pub fn overlaps(&self, start: u32, length: u32) -> bool {
        if start == self.image_offset {
            return true;
        }
        let image_end = self.image_offset as u64 + self.image_size as u64;
        let end = start as u64 + length as u64;
        (start as u64) < image_end && (self.image_offset as u64) < end
    }
}

/// Both slots of one processor and which of them boots
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ProcessorSlotSet {
    /// Slot A
    pub slot_a: SlotDescriptor,
    /// Slot B
    pub slot_b: SlotDescriptor,
    /// Raw [SlotId] of the active slot
    pub active_slot: u8,
    _padding: [u8; 3],
}

impl ProcessorSlotSet {
    /// A slot set with the given slots
    pub fn new(slot_a: SlotDescriptor, slot_b: SlotDescriptor, active_slot: SlotId) -> Self {
        Self {
            slot_a,
            slot_b,
            active_slot: active_slot.into(),
            _padding: [0; 3],
        }
    }

    /// Get the active slot.
    /// A stored value that is neither A nor B is reported as [Error::InvalidActiveSlot].
    pub fn active_slot(&self) -> Result<SlotId, Error> {
        SlotId::try_from(self.active_slot).map_err(|_| Error::InvalidActiveSlot)
    }

    /// Sets the active slot
    pub fn set_active_slot(&mut self, slot: SlotId) {
        self.active_slot = slot.into();
    }

    /// The descriptor of the given slot
    pub fn slot(&self, slot: SlotId) -> &SlotDescriptor {
        match slot {
            SlotId::A => &self.slot_a,
            SlotId::B => &self.slot_b,
        }
    }

    /// The descriptor of the given slot, mutably
    pub fn slot_mut(&mut self, slot: SlotId) -> &mut SlotDescriptor {
        match slot {
            SlotId::A => &mut self.slot_a,
            SlotId::B => &mut self.slot_b,
        }
    }

    /// The descriptor of the active slot
    pub fn active(&self) -> Result<&SlotDescriptor, Error> {
        Ok(self.slot(self.active_slot()?))
    }
}

/// The single persisted structure governing the slots of both processors
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlotManagementRecord {
    /// Must be [SlotManagementRecord::MAGIC_WORD] for the record to be valid
    pub magic_word: u32,
    /// The slots of the application processor
    pub app_slots: ProcessorSlotSet,
    /// The slots of the network co-processor
    pub co_slots: ProcessorSlotSet,
    /// CRC32 over every byte before this field
    pub checksum: u32,
}

impl SlotManagementRecord {
    /// The word that needs to be present to know if the record is valid instead of erased or random bits
    pub const MAGIC_WORD: u32 = 0xA5A5_B5B5;
    /// What an erased flash word reads as
    pub const ERASED_WORD: u32 = 0xFFFF_FFFF;
    /// Size of the record in flash
    pub const SIZE: usize = size_of::<Self>();

    const CHECKSUM_OFFSET: usize = offset_of!(SlotManagementRecord, checksum);

    /// Creates a record with a correct magic word and checksum
    pub fn new(app_slots: ProcessorSlotSet, co_slots: ProcessorSlotSet) -> Self {
        let mut record = Self {
            magic_word: Self::MAGIC_WORD,
            app_slots,
            co_slots,
            checksum: 0,
        };
        record.update_checksum();
        record
    }

    /// The record a device is provisioned with: both processors boot their factory image from slot A
    /// and slot B is still empty
    pub fn factory(app_image: SlotDescriptor, co_image: SlotDescriptor) -> Self {
        let app_a = SlotDescriptor::new(SlotId::A, app_image.image_offset, app_image.image_size);
        let co_a = SlotDescriptor::new(SlotId::A, co_image.image_offset, co_image.image_size);
        let empty_b = SlotDescriptor::new(SlotId::B, 0, 0);

        Self::new(
            ProcessorSlotSet::new(app_a, empty_b, SlotId::A),
            ProcessorSlotSet::new(co_a, empty_b, SlotId::A),
        )
    }

    /// Parses a record from the bytes read from flash. Does not validate it.
    pub fn from_flash_bytes(bytes: &[u8; SlotManagementRecord::SIZE]) -> Self {
        zerocopy::transmute!(*bytes)
    }

    /// The slot set of the given processor
    pub fn slots(&self, role: Role) -> &ProcessorSlotSet {
        match role {
            Role::Application => &self.app_slots,
            Role::CoProcessor => &self.co_slots,
        }
    }

    /// The slot set of the given processor, mutably
    pub fn slots_mut(&mut self, role: Role) -> &mut ProcessorSlotSet {
        match role {
            Role::Application => &mut self.app_slots,
            Role::CoProcessor => &mut self.co_slots,
        }
    }

    /// Calculates the checksum over every byte that precedes the checksum field
    pub fn calculate_checksum(&self) -> u32 {
        crc32(&self.as_bytes()[..Self::CHECKSUM_OFFSET])
    }

    /// Sets the checksum field to match the current contents
    pub fn update_checksum(&mut self) {
        self.checksum = self.calculate_checksum();
    }

    /// True if the magic word reads as erased flash
    pub fn is_erased(&self) -> bool {
        self.magic_word == Self::ERASED_WORD
    }

    /// Checks that this record can be trusted.
    ///
    /// The magic word and the checksum are checked independently.
    /// An erased magic word is reported as [Error::NotProvisioned].
    pub fn validate(&self) -> Result<(), Error> {
        if self.is_erased() {
            return Err(Error::NotProvisioned);
        }
        if self.magic_word != Self::MAGIC_WORD {
            return Err(Error::MagicMismatch);
        }
        if self.calculate_checksum() != self.checksum {
            return Err(Error::ChecksumMismatch);
        }
        Ok(())
    }
}
