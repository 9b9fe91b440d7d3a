//! CRC32 protecting the slot record and the streamed images
//!
//! The algorithm is the MSB-first CRC-32 with polynomial `0x04C11DB7`,
//! initial value `0xFFFFFFFF` and an inverted result, known as CRC-32/BZIP2.

use crc::{Crc, Digest, CRC_32_BZIP2};

static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_BZIP2);

/// Calculates the CRC32 of the given bytes
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

/// A running CRC32 for data that arrives in pieces
pub fn crc32_digest() -> Digest<'static, u32> {
    CRC32.digest()
}
