//! Errors of the slot management operations

use thiserror::Error;

/// Failure reported by a [crate::Flash] implementation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// The device rejected or failed the operation
    #[error("flash device error")]
    Device,
    /// The address range lies outside of the flash
    #[error("address range outside of flash")]
    OutOfBounds,
    /// The address or length is not aligned to an erase chunk
    #[error("address or length not chunk aligned")]
    Unaligned,
    /// More data than a single write may carry
    #[error("write longer than the maximum chunk")]
    TooLong,
    /// The flash is mapped read-only
    #[error("flash is read-only")]
    ReadOnly,
}

/// Everything that can go wrong while managing the slots
///
/// The variants fall in four groups:
/// media errors wrap a [FlashError],
/// integrity errors mean the data was readable but can't be trusted,
/// logic errors are rejected caller requests or impossible states,
/// and verification errors tell where in the two-phase commit a write went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Reading from flash failed
    #[error("flash read failed: {0}")]
    FlashRead(FlashError),
    /// Programming flash failed
    #[error("flash write failed: {0}")]
    FlashWrite(FlashError),
    /// Erasing flash failed
    #[error("flash erase failed: {0}")]
    FlashErase(FlashError),

    /// The magic word of a record or image header is wrong
    #[error("magic word mismatch")]
    MagicMismatch,
    /// The stored checksum does not match the record contents
    #[error("checksum mismatch")]
    ChecksumMismatch,
    /// The record reads as erased flash; the device was never provisioned
    #[error("no slot record has been provisioned")]
    NotProvisioned,

    /// The active slot of a record is neither A nor B
    #[error("active slot is neither A nor B")]
    InvalidActiveSlot,
    /// The erase would hit the image that is currently active
    #[error("refusing to erase an active slot")]
    ActiveSlotEraseRejected,
    /// The erase would hit the bootloader or the slot record
    #[error("refusing to erase the bootloader or the slot record")]
    ReservedRegionEraseRejected,
    /// The image offset is outside of the window owned by its processor
    #[error("image offset outside of the processor's flash window")]
    InvalidOffset,
    /// The image header selects no known processor
    #[error("unknown image type")]
    UnknownImageType,
    /// An erase was requested at an address that is not chunk aligned
    #[error("address is not chunk aligned")]
    Unaligned,
    /// The buffer is shorter than an image header
    #[error("buffer too short for an image header")]
    TruncatedHeader,
    /// More image data was supplied than the header announced
    #[error("image data exceeds the announced size")]
    ImageOverflow,
    /// The image stream was finished before all announced bytes arrived
    #[error("image is incomplete")]
    IncompleteImage,

    /// The backup record did not validate after it was written
    #[error("backup record verification failed")]
    BackupVerify,
    /// The primary record did not validate after it was written, or disagrees with the backup
    #[error("primary record verification failed")]
    FlashVerify,
    /// The image read back from flash differs from what was written
    #[error("image verification failed")]
    ImageVerify,
}

impl Error {
    /// True for errors that mean "readable but untrustworthy", the ones that make a
    /// read fall back to the backup record
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Error::MagicMismatch | Error::ChecksumMismatch | Error::NotProvisioned
        )
    }
}
