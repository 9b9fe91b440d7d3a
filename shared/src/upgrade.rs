//! Committing new images to the inactive slot and streaming them into flash

use crate::{
    checksum::crc32_digest,
    error::Error,
    flash_addresses::{Role, MAX_WRITE_CHUNK},
    header::{self, ImageInfo},
    log,
    record::{SlotDescriptor, SlotId},
    state::SlotStore,
    Flash,
};
use crc::Digest;

impl<F: Flash> SlotStore<F> {
    /// Records a new image for the given processor and makes it the one that boots.
    ///
    /// The image must already be in flash. It takes the place of the inactive slot,
    /// which becomes active in the same record write.
    pub fn commit_new_image(&mut self, new_offset: u32, new_size: u32, role: Role) -> Result<(), Error> {
        if !self.layout().range_of(role).contains(&new_offset) {
            log::warn!("Image offset {:#x} is not in the {:?} window", new_offset, role);
            return Err(Error::InvalidOffset);
        }

        let mut record = self.read()?;
        let slots = record.slots_mut(role);
        let target = match slots.active_slot() {
            Ok(active) => active.other(),
            Err(_) => {
                log::warn!("Active {:?} slot unknown, committing to slot A", role);
                SlotId::A
            }
        };

        *slots.slot_mut(target) = SlotDescriptor::new(target, new_offset, new_size);
        slots.set_active_slot(target);

        log::info!(
            "Committing {:?} image at {:#x} ({} bytes) to slot {:?}",
            role,
            new_offset,
            new_size,
            target
        );
        self.write(&record)
    }

    /// Switches the selected processors back to the image in their other slot
    ///
    /// The application processor is switched first. If that fails the co-processor is left alone.
    pub fn toggle(&mut self, app: bool, co: bool) -> Result<(), Error> {
        for (selected, role) in [(app, Role::Application), (co, Role::CoProcessor)] {
            if !selected {
                continue;
            }

            let record = self.read()?;
            let slots = record.slots(role);
            let other = *slots.slot(slots.active_slot()?.other());
            self.commit_new_image(other.image_offset, other.image_size, role)?;
        }
        Ok(())
    }

    /// Starts writing the image described by the header at the start of `image_buffer`.
    ///
    /// The whole target region is erased up front, which fails if it touches an active image.
    /// The header itself is part of the image and must be written through the returned writer
    /// like the rest of the data.
    pub fn begin_image(&mut self, image_buffer: &[u8]) -> Result<ImageWriter<'_, F>, Error> {
        let info = header::parse(image_buffer, self.layout())?;

        let window = self.layout().range_of(info.role);
        let end = info
            .flash_offset
            .checked_add(info.total_size)
            .ok_or(Error::InvalidOffset)?;
        if !window.contains(&info.flash_offset) || end > window.end {
            return Err(Error::InvalidOffset);
        }

        log::info!(
            "Receiving {:?} image of {} bytes at {:#x}",
            info.role,
            info.total_size,
            info.flash_offset
        );
        self.erase_region(info.flash_offset, info.total_size)?;

        Ok(ImageWriter {
            store: self,
            info,
            written: 0,
            digest: crc32_digest(),
        })
    }
}

/// Streams an image into its slot. Created by [SlotStore::begin_image].
pub struct ImageWriter<'a, F> {
    store: &'a mut SlotStore<F>,
    info: ImageInfo,
    written: u32,
    digest: Digest<'static, u32>,
}

impl<F: Flash> ImageWriter<'_, F> {
    /// Where the image goes
    pub fn info(&self) -> &ImageInfo {
        &self.info
    }

    /// How many bytes are still expected
    pub fn remaining(&self) -> u32 {
        self.info.total_size - self.written
    }

    /// Writes the next piece of the image. Pieces may have any size.
    pub fn write_chunk(&mut self, data: &[u8]) -> Result<(), Error> {
        if data.len() > self.remaining() as usize {
            return Err(Error::ImageOverflow);
        }

        for piece in data.chunks(MAX_WRITE_CHUNK) {
            let address = self.info.flash_offset + self.written;
            self.store
                .flash_mut()
                .write(address, piece)
                .map_err(Error::FlashWrite)?;
            self.digest.update(piece);
            self.written += piece.len() as u32;
        }
        Ok(())
    }

    /// Checks what ended up in flash and commits the image to its slot
    pub fn finish(self) -> Result<ImageInfo, Error> {
        if self.written != self.info.total_size {
            return Err(Error::IncompleteImage);
        }

        let expected = self.digest.finalize();
        let mut stored = crc32_digest();
        let mut buffer = [0u8; 256];
        let mut address = self.info.flash_offset;
        let end = self.info.flash_offset + self.info.total_size;
        while address < end {
            let length = buffer.len().min((end - address) as usize);
            self.store
                .flash_mut()
                .read(address, &mut buffer[..length])
                .map_err(Error::FlashRead)?;
            stored.update(&buffer[..length]);
            address += length as u32;
        }

        if stored.finalize() != expected {
            log::error!("Image at {:#x} does not read back as written", self.info.flash_offset);
            return Err(Error::ImageVerify);
        }

        self.store
            .commit_new_image(self.info.flash_offset, self.info.total_size, self.info.role)?;
        Ok(self.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        flash_addresses::CHUNK_SIZE,
        header::{ImageHeader, HEADER_SIZE},
        ram_flash::{FlashOp, RamFlash},
        record::{ProcessorSlotSet, SlotManagementRecord},
        FlashError,
    };
    use proptest::prelude::*;
    use zerocopy::IntoBytes;

    fn initial_record() -> SlotManagementRecord {
        SlotManagementRecord::new(
            ProcessorSlotSet::new(
                SlotDescriptor::new(SlotId::A, 0x0801_0000, 100_000),
                SlotDescriptor::new(SlotId::B, 0x0808_0000, 0),
                SlotId::A,
            ),
            ProcessorSlotSet::new(
                SlotDescriptor::new(SlotId::A, 0x0401_1000, 0x2EFE0),
                SlotDescriptor::new(SlotId::B, 0x0410_0000, 0),
                SlotId::A,
            ),
        )
    }

    fn store() -> SlotStore<RamFlash> {
        let mut store = SlotStore::new(RamFlash::new());
        store.write(&initial_record()).unwrap();
        store.flash_mut().clear_ops();
        store
    }

    fn image(control_flags: u32, flash_location: u32, payload: &[u8]) -> Vec<u8> {
        let header = ImageHeader {
            magic_no: ImageHeader::MAGIC_NO,
            control_flags,
            flash_location,
            image_size: payload.len() as u32,
            fw_version: 2,
            image_crc: 0,
            mic: [0; 4],
            counter: 0,
            reserved: [0; 5],
        };
        let mut image = header.as_bytes().to_vec();
        image.extend_from_slice(payload);
        image
    }

    #[test]
    fn commit_activates_the_other_slot() {
        let mut store = store();
        store
            .commit_new_image(0x0808_0000, 120_000, Role::Application)
            .unwrap();

        let record = store.read().unwrap();
        assert_eq!(record.app_slots.active_slot(), Ok(SlotId::B));
        assert_eq!(record.app_slots.slot_b.image_offset, 0x0808_0000);
        assert_eq!(record.app_slots.slot_b.image_size, 120_000);
        assert_eq!(record.app_slots.slot_a, initial_record().app_slots.slot_a);
        assert_eq!(store.resolve_boot_address(), Ok(0x0808_0000 + CHUNK_SIZE));
    }

    #[test]
    fn commit_goes_back_to_slot_a() {
        let mut store = store();
        store
            .commit_new_image(0x0808_0000, 120_000, Role::Application)
            .unwrap();
        store
            .commit_new_image(0x0801_0000, 110_000, Role::Application)
            .unwrap();

        let record = store.read().unwrap();
        assert_eq!(record.app_slots.active_slot(), Ok(SlotId::A));
        assert_eq!(record.app_slots.slot_a.image_size, 110_000);
        assert_eq!(record.app_slots.slot_b.image_size, 120_000);
    }

    #[test]
    fn commit_checks_the_window() {
        let mut store = store();
        assert_eq!(
            store.commit_new_image(0x0410_0000, 1000, Role::Application),
            Err(Error::InvalidOffset)
        );
        assert_eq!(
            store.commit_new_image(0x0808_0000, 1000, Role::CoProcessor),
            Err(Error::InvalidOffset)
        );
        assert!(store.flash_mut().ops().is_empty());
    }

    #[test]
    fn commit_needs_a_record() {
        let mut store = SlotStore::new(RamFlash::new());
        assert_eq!(
            store.commit_new_image(0x0808_0000, 1000, Role::Application),
            Err(Error::NotProvisioned)
        );
    }

    #[test]
    fn failed_commit_keeps_the_old_image() {
        let mut store = store();
        let primary = store.layout().primary_record();
        store.flash_mut().fail_erase_at(primary);

        assert_eq!(
            store.commit_new_image(0x0808_0000, 120_000, Role::Application),
            Err(Error::FlashErase(FlashError::Device))
        );
        assert_eq!(store.resolve_boot_address(), Ok(0x0801_0000 + CHUNK_SIZE));
    }

    #[test]
    fn toggle_rolls_back() {
        let mut store = store();
        store
            .commit_new_image(0x0808_0000, 120_000, Role::Application)
            .unwrap();
        store.toggle(true, false).unwrap();

        let record = store.read().unwrap();
        assert_eq!(record.app_slots.active_slot(), Ok(SlotId::A));
        assert_eq!(record.app_slots.slot_a, initial_record().app_slots.slot_a);
        assert_eq!(record.co_slots, initial_record().co_slots);
    }

    #[test]
    fn toggle_to_an_empty_slot_is_rejected() {
        let mut store = store();
        let factory = SlotManagementRecord::factory(
            initial_record().app_slots.slot_a,
            initial_record().co_slots.slot_a,
        );
        store.write(&factory).unwrap();
        assert_eq!(store.toggle(false, true), Err(Error::InvalidOffset));
    }

    #[test]
    fn stream_an_image() {
        let mut store = store();
        let payload: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let image = image(1, 0x8_0000, &payload);

        let mut writer = store.begin_image(&image).unwrap();
        for piece in image.chunks(1500) {
            writer.write_chunk(piece).unwrap();
        }
        assert_eq!(writer.remaining(), 0);
        let info = writer.finish().unwrap();

        assert_eq!(info.flash_offset, 0x0808_0000);
        assert_eq!(info.total_size, 5000 + HEADER_SIZE);
        assert_eq!(store.flash_mut().peek(0x0808_0000, image.len()), image);
        assert_eq!(store.active_slot(Role::Application), Ok(SlotId::B));
        assert_eq!(store.resolve_boot_address(), Ok(0x0808_0000 + CHUNK_SIZE));

        // Every write respects the maximum write size
        assert!(store.flash_mut().ops().iter().all(|op| match op {
            FlashOp::Write(_, length) => *length <= MAX_WRITE_CHUNK,
            FlashOp::Erase(..) => true,
        }));
    }

    #[test]
    fn image_over_the_active_slot_is_refused() {
        let mut store = store();
        let image = image(1, 0x1_0000, &[0u8; 100]);
        assert_eq!(
            store.begin_image(&image).err(),
            Some(Error::ActiveSlotEraseRejected)
        );
        assert!(store.flash_mut().ops().is_empty());
    }

    #[test]
    fn image_over_the_slot_record_is_refused() {
        let mut store = store();
        let over_record = image(1, 0x1F_1000, &[0u8; 100]);
        assert_eq!(
            store.begin_image(&over_record).err(),
            Some(Error::ReservedRegionEraseRejected)
        );

        // Running into the record from below
        let into_record = image(1, 0x1F_0000, &[0u8; 0x1000]);
        assert_eq!(
            store.begin_image(&into_record).err(),
            Some(Error::ReservedRegionEraseRejected)
        );
        assert!(store.flash_mut().ops().is_empty());
        assert_eq!(store.resolve_boot_address(), Ok(0x0801_0000 + CHUNK_SIZE));
    }

    #[test]
    fn image_over_the_bootloader_is_refused() {
        let mut store = store();
        let image = image(1, 0, &[0u8; 100]);
        assert_eq!(
            store.begin_image(&image).err(),
            Some(Error::ReservedRegionEraseRejected)
        );
        assert!(store.flash_mut().ops().is_empty());
    }

    #[test]
    fn image_outside_its_window_is_refused() {
        let mut store = store();
        let image = image(0, 0x03FF_F000, &[0u8; 0x2000]);
        assert_eq!(store.begin_image(&image).err(), Some(Error::InvalidOffset));
    }

    #[test]
    fn too_much_data() {
        let mut store = store();
        let image = image(1, 0x8_0000, &[0u8; 10]);
        let mut writer = store.begin_image(&image).unwrap();
        writer.write_chunk(&image).unwrap();
        assert_eq!(writer.write_chunk(&[0]), Err(Error::ImageOverflow));
    }

    #[test]
    fn incomplete_image_is_not_committed() {
        let mut store = store();
        let image = image(1, 0x8_0000, &[0u8; 10]);
        let mut writer = store.begin_image(&image).unwrap();
        writer.write_chunk(&image[..20]).unwrap();
        assert_eq!(writer.finish(), Err(Error::IncompleteImage));
        assert_eq!(store.active_slot(Role::Application), Ok(SlotId::A));
    }

    #[test]
    fn image_that_reads_back_wrong_is_not_committed() {
        let mut store = store();
        let image = image(1, 0x8_0000, &[0x55u8; 100]);
        let mut writer = store.begin_image(&image).unwrap();
        writer.write_chunk(&image).unwrap();
        writer.store.flash_mut().poke(0x0808_0050, &[0x00]);
        assert_eq!(writer.finish(), Err(Error::ImageVerify));
        assert_eq!(store.active_slot(Role::Application), Ok(SlotId::A));
    }

    proptest! {
        #[test]
        fn roles_are_independent(
            app in any::<bool>(),
            offset_in_window in 0u32..0x0400_0000,
            size in any::<u32>(),
        ) {
            let mut store = store();
            let (role, untouched) = if app {
                (Role::Application, Role::CoProcessor)
            } else {
                (Role::CoProcessor, Role::Application)
            };
            let offset = store.layout().base_of(role) + offset_in_window;

            store.commit_new_image(offset, size, role).unwrap();
            let record = store.read().unwrap();
            let initial = initial_record();
            prop_assert_eq!(record.slots(untouched), initial.slots(untouched));
            prop_assert_eq!(record.slots(role).active_slot(), Ok(SlotId::B));
            prop_assert_eq!(record.slots(role).slot_b.image_offset, offset);
        }
    }
}
