//! Where the bootloader jumps to

use crate::{
    error::Error,
    flash_addresses::{Role, CHUNK_SIZE},
    log,
    state::SlotStore,
    Flash,
};

impl<F: Flash> SlotStore<F> {
    /// The entry point of the active application image.
    ///
    /// An image starts with one erase chunk of header and metadata, so the vector table
    /// sits one chunk past the slot's offset.
    pub fn resolve_boot_address(&mut self) -> Result<u32, Error> {
        let record = self.read()?;
        let slots = record.slots(Role::Application);
        let active = slots.active().inspect_err(|_| {
            log::error!("Active application slot is {}", slots.active_slot);
        })?;

        let address = active
            .image_offset
            .checked_add(CHUNK_SIZE)
            .ok_or(Error::InvalidOffset)?;
        log::info!("Booting slot {} at {:#x}", active.slot_id, address);
        Ok(address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ram_flash::RamFlash,
        record::{ProcessorSlotSet, SlotDescriptor, SlotId, SlotManagementRecord},
    };

    fn record(active: SlotId) -> SlotManagementRecord {
        let co = ProcessorSlotSet::new(
            SlotDescriptor::new(SlotId::A, 0x0401_1000, 0x2EFE0),
            SlotDescriptor::new(SlotId::B, 0x0410_0000, 0),
            SlotId::A,
        );
        SlotManagementRecord::new(
            ProcessorSlotSet::new(
                SlotDescriptor::new(SlotId::A, 0x0801_0000, 100_000),
                SlotDescriptor::new(SlotId::B, 0x0808_0000, 120_000),
                active,
            ),
            co,
        )
    }

    #[test]
    fn boots_the_active_slot() {
        let mut store = SlotStore::new(RamFlash::new());
        store.write(&record(SlotId::A)).unwrap();
        assert_eq!(store.resolve_boot_address(), Ok(0x0801_1000));

        store.write(&record(SlotId::B)).unwrap();
        assert_eq!(store.resolve_boot_address(), Ok(0x0808_1000));
    }

    #[test]
    fn co_processor_slot_does_not_matter() {
        let mut store = SlotStore::new(RamFlash::new());
        let mut with_co_on_b = record(SlotId::A);
        with_co_on_b.co_slots.set_active_slot(SlotId::B);
        store.write(&with_co_on_b).unwrap();
        assert_eq!(store.resolve_boot_address(), Ok(0x0801_1000));
    }

    #[test]
    fn unknown_active_slot_does_not_boot() {
        let mut store = SlotStore::new(RamFlash::new());
        let mut broken = record(SlotId::A);
        broken.app_slots.active_slot = 0;
        store.write(&broken).unwrap();
        assert_eq!(store.resolve_boot_address(), Err(Error::InvalidActiveSlot));
    }

    #[test]
    fn nothing_to_boot_without_a_record() {
        let mut store = SlotStore::new(RamFlash::new());
        assert_eq!(store.resolve_boot_address(), Err(Error::NotProvisioned));
    }

    #[test]
    fn boots_from_the_backup() {
        let mut store = SlotStore::new(RamFlash::new());
        store.write(&record(SlotId::B)).unwrap();
        let primary = store.layout().primary_record();
        store.flash_mut().poke(primary + 4, &[0x00]);
        assert_eq!(store.resolve_boot_address(), Ok(0x0808_1000));
    }
}
