//! Implementation of the slot record store
//!
//! The record is stored on two chunks: the primary one and the backup one right after it.
//! Semantically there is one record, but if it were only stored once, a reset in the middle
//! of the erase-program cycle would leave nothing to boot from. Because the backup is
//! always programmed and verified before the primary is erased, one of the two always validates.

use crate::{
    error::Error,
    flash_addresses::{round_up_to_chunk, FlashLayout, Role, CHUNK_SIZE},
    log,
    record::{SlotId, SlotManagementRecord},
    Flash, FlashError,
};
use zerocopy::IntoBytes;

/// Owns the flash and everything that is stored about the slots
///
/// All access goes through `&mut self`, so a write can never be observed half-way by a read
/// in the same program. A port with more than one execution context must hold a lock around
/// the whole store.
pub struct SlotStore<F> {
    flash: F,
    layout: FlashLayout,
}

impl<F: Flash> SlotStore<F> {
    /// A store using the device's default layout
    pub fn new(flash: F) -> Self {
        Self::with_layout(flash, FlashLayout::default())
    }

    /// A store using a custom layout
    pub fn with_layout(flash: F, layout: FlashLayout) -> Self {
        Self { flash, layout }
    }

    /// The layout this store works with
    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    /// The underlying flash
    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// Give back the underlying flash
    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Loads the slot record from flash.
    ///
    /// The primary copy is used when it validates. If its magic word or checksum is off
    /// (which is possible when [Self::write] got reset in the middle of programming it),
    /// the backup copy is read under the same validation.
    /// When neither copy validates, the backup's error is returned, except when the backup is
    /// erased but the primary is not: that device was provisioned and is reported as corrupted.
    pub fn read(&mut self) -> Result<SlotManagementRecord, Error> {
        match self.load(self.layout.primary_record()) {
            Ok(record) => Ok(record),
            Err(e) if e.is_integrity() => {
                log::warn!("Primary slot record invalid ({:?}), reading backup", e);
                match self.load(self.layout.backup_record()) {
                    Err(Error::NotProvisioned) if e != Error::NotProvisioned => Err(e),
                    backup => backup,
                }
            }
            Err(e) => Err(e),
        }
    }

    /// The active slot of the given processor
    pub fn active_slot(&mut self, role: Role) -> Result<SlotId, Error> {
        self.read()?.slots(role).active_slot()
    }

    /// Stores the record in flash.
    ///
    /// The magic word and checksum are filled in. The backup copy is erased, programmed and
    /// verified first; only then is the primary copy touched the same way. Finally both copies
    /// are read again and must agree on the active slot of each processor.
    pub fn write(&mut self, record: &SlotManagementRecord) -> Result<(), Error> {
        let mut record = *record;
        record.magic_word = SlotManagementRecord::MAGIC_WORD;
        record.update_checksum();

        let backup = self.layout.backup_record();
        let primary = self.layout.primary_record();

        log::debug!("Storing backup slot record at {:#x}", backup);
        self.store(backup, &record)?;
        let verified_backup = self
            .verify(backup, &record)
            .map_err(|e| if e.is_integrity() { Error::BackupVerify } else { e })?;

        log::debug!("Storing primary slot record at {:#x}", primary);
        self.store(primary, &record)?;
        let verified_primary = self
            .verify(primary, &record)
            .map_err(|e| if e.is_integrity() { Error::FlashVerify } else { e })?;

        // The backup must not have been disturbed by programming the primary
        let final_backup = self
            .load(backup)
            .map_err(|e| if e.is_integrity() { Error::FlashVerify } else { e })?;

        for copy in [&verified_backup, &final_backup] {
            if copy.app_slots.active_slot != verified_primary.app_slots.active_slot
                || copy.co_slots.active_slot != verified_primary.co_slots.active_slot
            {
                log::error!("Primary and backup slot records disagree on the active slot");
                return Err(Error::FlashVerify);
            }
        }

        log::info!(
            "Slot record stored, active app slot {}, active co-processor slot {}",
            record.app_slots.active_slot,
            record.co_slots.active_slot
        );
        Ok(())
    }

    /// Writes the record only if the device has never been provisioned.
    ///
    /// Returns `true` when the record was written and `false` when a valid record was already present.
    pub fn provision(&mut self, record: &SlotManagementRecord) -> Result<bool, Error> {
        match self.read() {
            Ok(_) => Ok(false),
            Err(Error::NotProvisioned) => {
                log::info!("No slot record present, provisioning the factory record");
                self.write(record)?;
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// Erases a flash region, rounding the length up to whole chunks.
    ///
    /// The request is rejected when the region touches the bootloader, the slot record or
    /// the active image of either processor. A device without a slot record has no active image,
    /// but the bootloader and record chunks stay protected.
    pub fn erase_region(&mut self, address: u32, length: u32) -> Result<(), Error> {
        if address % CHUNK_SIZE != 0 {
            return Err(Error::Unaligned);
        }
        let length =
            round_up_to_chunk(length).ok_or(Error::FlashErase(FlashError::OutOfBounds))?;

        if self.layout.overlaps_reserved(address, length) {
            log::warn!("Erase of {:#x} rejected, it overlaps a reserved region", address);
            return Err(Error::ReservedRegionEraseRejected);
        }

        match self.read() {
            Ok(record) => {
                for role in [Role::Application, Role::CoProcessor] {
                    let active = record.slots(role).active()?;
                    if active.overlaps(address, length) {
                        log::warn!(
                            "Erase of {:#x} rejected, it overlaps the active {:?} image at {:#x}",
                            address,
                            role,
                            active.image_offset
                        );
                        return Err(Error::ActiveSlotEraseRejected);
                    }
                }
            }
            Err(Error::NotProvisioned) => {
                log::warn!(
                    "Slot record not provisioned, erasing {:#x} without the active slot check",
                    address
                );
            }
            Err(e) => return Err(e),
        }

        self.flash.erase(address, length).map_err(Error::FlashErase)
    }

    fn load(&mut self, address: u32) -> Result<SlotManagementRecord, Error> {
        let mut buffer = [0u8; SlotManagementRecord::SIZE];
        self.flash
            .read(address, &mut buffer)
            .map_err(Error::FlashRead)?;

        let record = SlotManagementRecord::from_flash_bytes(&buffer);
        record.validate()?;
        Ok(record)
    }

    fn store(&mut self, address: u32, record: &SlotManagementRecord) -> Result<(), Error> {
        self.flash
            .erase(address, CHUNK_SIZE)
            .map_err(Error::FlashErase)?;
        self.flash
            .write(address, record.as_bytes())
            .map_err(Error::FlashWrite)
    }

    /// Reads a copy back. Anything but the record that was written counts as an integrity failure.
    fn verify(
        &mut self,
        address: u32,
        expected: &SlotManagementRecord,
    ) -> Result<SlotManagementRecord, Error> {
        let stored = self.load(address)?;
        if stored != *expected {
            return Err(Error::ChecksumMismatch);
        }
        Ok(stored)
    }
}
