#![no_main]
#![no_std]

use crate::flash::MappedFlash;
use defmt_rtt as _;
use panic_probe as _;
use shared::SlotStore;

mod flash;

#[cortex_m_rt::entry]
fn main() -> ! {
    defmt::info!("Starting bootloader version `{}`", env!("CARGO_PKG_VERSION"));

    let mut store = SlotStore::new(MappedFlash);
    match store.resolve_boot_address() {
        Ok(address) => {
            defmt::info!("Jumping to {:#x}", address);
            // The record validated, so the address points at the vector table of a committed image
            unsafe { jump_to_application(address) }
        }
        Err(e) => {
            defmt::error!("No bootable image: {}", e);
            loop {
                cortex_m::asm::wfi();
            }
        }
    }
}

/// Hands the core over to the image whose vector table is at `address`
///
/// # Safety
///
/// `address` must point at a valid vector table: the initial stack pointer followed by the reset vector.
unsafe fn jump_to_application(address: u32) -> ! {
    cortex_m::interrupt::disable();

    let scb = &*cortex_m::peripheral::SCB::PTR;
    scb.vtor.write(address);
    cortex_m::asm::dsb();
    cortex_m::asm::isb();

    cortex_m::asm::bootload(address as *const u32)
}

#[cortex_m_rt::exception]
unsafe fn HardFault(frame: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::panic!("HardFault: {}", defmt::Debug2Format(frame));
}
