//! Protocol constants for the syscon serial link.
//!
//! Command identifiers are two ASCII characters packed big-endian, so
//! `0x7276` reads as `"rv"` in a hex dump of the type field.

// ============================================================================
// Sync Markers
// ============================================================================

/// Host -> device frame marker.
pub const SYNC_HOST_TO_DEVICE: u32 = 0x423248AA;

/// Device -> host frame marker.
pub const SYNC_DEVICE_TO_HOST: u32 = 0x483242AA;

// ============================================================================
// Frame Layout
// ============================================================================

/// Sync marker size in bytes.
pub const SYNC_SIZE: usize = 4;

/// Marker + type + length.
pub const FRAME_HEADER_SIZE: usize = 8;

/// Trailing CRC32 size.
pub const FRAME_FOOTER_SIZE: usize = 4;

/// Header + footer. A frame is `payload.len() + FRAME_OVERHEAD` bytes.
pub const FRAME_OVERHEAD: usize = FRAME_HEADER_SIZE + FRAME_FOOTER_SIZE;

/// Offset of the 16-bit type field.
pub const TYPE_OFFSET: usize = 4;

/// Offset of the 16-bit payload length field.
pub const LENGTH_OFFSET: usize = 6;

/// Largest payload the length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

// ============================================================================
// Command Identifiers
// ============================================================================

pub const DATA_FRAME: u16 = 0x6466; // 'df'
pub const CONT_DATA: u16 = 0x6364; // 'cd'
pub const MODE_CHANGE: u16 = 0x6d64; // 'md'
pub const VERSION: u16 = 0x7276; // 'rv'
pub const ACK: u16 = 0x6b61; // 'ka'
pub const ERASE: u16 = 0x7878; // 'xx'
pub const VALIDATE: u16 = 0x7374; // 'st'
pub const DFU_PACKET: u16 = 0x6675; // 'fu'

// ============================================================================
// Firmware Update
// ============================================================================

/// Opaque header at the start of every firmware image, never transmitted.
pub const FIRMWARE_HEADER_SIZE: usize = 16;

/// Maximum image bytes carried by one DFU_PACKET.
pub const DFU_CHUNK_SIZE: usize = 0x400;

/// `[offset:u16][word_count:u16]` prefix of a DFU_PACKET payload.
pub const DFU_PACKET_HEADER_SIZE: usize = 4;

/// Bytes per word in the DFU_PACKET word count.
pub const DFU_WORD_SIZE: usize = 4;

/// Size of the signed status carried by an ACK payload.
pub const ACK_PAYLOAD_SIZE: usize = 4;
