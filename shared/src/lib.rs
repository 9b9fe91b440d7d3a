//! A/B firmware slot management shared by the bootloader and the OTA application.
//!
//! Two processors (the application processor and the network co-processor) each own
//! two flash slots. Which slot is active is recorded in a [record::SlotManagementRecord]
//! that lives twice in flash: a primary copy and a backup copy one erase chunk further.
//! The backup is always written and verified before the primary is touched, so a reset
//! at any point leaves at least one copy that validates.
//!
//! - [checksum] computes the CRC32 protecting the record
//! - [header] parses the header that is prepended to every firmware image
//! - [state::SlotStore] reads, writes and guards the record
//! - [upgrade] commits new images and streams them into the inactive slot
//! - [boot] resolves the address the bootloader should jump to
#![cfg_attr(not(any(test, feature = "std-compat")), no_std)]
#![warn(missing_docs)]

pub mod boot;
pub mod checksum;
pub mod error;
pub mod flash_addresses;
pub mod header;
pub mod record;
pub mod state;
pub mod upgrade;

#[cfg(any(test, feature = "std-compat"))]
pub mod ram_flash;

pub use error::{Error, FlashError};
pub use state::SlotStore;

#[cfg(feature = "defmt")]
pub(crate) use defmt as log;

#[cfg(all(feature = "log", not(feature = "defmt")))]
pub(crate) use ::log;

#[cfg(not(any(feature = "log", feature = "defmt")))]
pub(crate) mod log {
    macro_rules! info {
        ( $( $x:expr ),* $(,)? ) => {};
    }
    pub(crate) use info;
    macro_rules! debug {
        ( $( $x:expr ),* $(,)? ) => {};
    }
    pub(crate) use debug;
    macro_rules! warner {
        ( $( $x:expr ),* $(,)? ) => {};
    }
    pub(crate) use warner as warn;
    macro_rules! error {
        ( $( $x:expr ),* $(,)? ) => {};
    }
    pub(crate) use error;
}

/// A trait defining the common flash operations
///
/// Addresses are absolute flash addresses. Implementations report failures instead of
/// retrying; the callers in this crate surface them unchanged.
pub trait Flash {
    /// Read `buffer.len()` bytes starting at the given address
    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), FlashError>;

    /// Program the given data at the address.
    /// The data is at most [flash_addresses::MAX_WRITE_CHUNK] bytes long.
    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Erase `length` bytes starting at the given address.
    /// The address is aligned to [flash_addresses::CHUNK_SIZE] and the length is a multiple of it.
    fn erase(&mut self, address: u32, length: u32) -> Result<(), FlashError>;
}

impl<F: Flash + ?Sized> Flash for &mut F {
    fn read(&mut self, address: u32, buffer: &mut [u8]) -> Result<(), FlashError> {
        (**self).read(address, buffer)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<(), FlashError> {
        (**self).write(address, data)
    }

    fn erase(&mut self, address: u32, length: u32) -> Result<(), FlashError> {
        (**self).erase(address, length)
    }
}
