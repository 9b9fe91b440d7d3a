//! Parsing of the header that precedes every firmware image

use crate::{
    error::Error,
    flash_addresses::{FlashLayout, Role},
};
use core::mem::size_of;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// The header prepended to a firmware image, as it arrives in the first OTA chunk
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ImageHeader {
    /// Must be [ImageHeader::MAGIC_NO]
    pub magic_no: u32,
    /// Bit 0 selects the processor the image is for
    pub control_flags: u32,
    /// Offset of the image within its processor's flash window
    pub flash_location: u32,
    /// Size of the payload that follows the header
    pub image_size: u32,
    /// Version of the firmware
    pub fw_version: u32,
    /// Checksum of the payload as computed by the image tooling
    pub image_crc: u32,
    /// Message integrity code of an encrypted image
    pub mic: [u32; 4],
    /// Anti-rollback counter
    pub counter: u32,
    /// Reserved
    pub reserved: [u32; 5],
}

/// Size of [ImageHeader] in bytes
pub const HEADER_SIZE: u32 = size_of::<ImageHeader>() as u32;

impl ImageHeader {
    /// The magic number every valid image header starts with
    pub const MAGIC_NO: u32 = 0x900D_900D;
    /// The control flag bit that selects the image role
    pub const ROLE_BIT: u32 = 1 << 0;

    /// The processor the image is meant for
    pub fn role(&self) -> Result<Role, Error> {
        Role::try_from((self.control_flags & Self::ROLE_BIT) as u8).map_err(|_| Error::UnknownImageType)
    }
}

/// Where an incoming image goes and how large it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageInfo {
    /// The processor the image is for
    pub role: Role,
    /// Absolute flash address of the image, header included
    pub flash_offset: u32,
    /// Size of the image, header included
    pub total_size: u32,
}

/// Interpret the image header at the start of `image_buffer`.
///
/// The buffer may contain more than the header, such as the first chunk of an OTA transfer.
pub fn parse(image_buffer: &[u8], layout: &FlashLayout) -> Result<ImageInfo, Error> {
    let (header, _) =
        ImageHeader::read_from_prefix(image_buffer).map_err(|_| Error::TruncatedHeader)?;

    if header.magic_no != ImageHeader::MAGIC_NO {
        return Err(Error::MagicMismatch);
    }

    let role = header.role()?;
    let flash_offset = layout
        .base_of(role)
        .checked_add(header.flash_location)
        .ok_or(Error::InvalidOffset)?;
    let total_size = header
        .image_size
        .checked_add(HEADER_SIZE)
        .ok_or(Error::InvalidOffset)?;

    Ok(ImageInfo {
        role,
        flash_offset,
        total_size,
    })
}
