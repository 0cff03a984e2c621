//! CRC32 used on both sides of the link.
//!
//! CRC-32/ISO-HDLC (the zlib/Ethernet variant). Encoder and decoder must
//! agree on this or every frame is rejected.

use crc::{CRC_32_ISO_HDLC, Crc};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksum a byte range. Total over any input, including empty.
pub fn crc32(bytes: &[u8]) -> u32 {
    CRC32.checksum(bytes)
}
