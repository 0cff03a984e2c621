//! Protocol module - syscon serial link definitions.

pub mod ack;
pub mod command;
pub mod constants;
pub mod crc;
pub mod frame;

pub use ack::AckStatus;
pub use command::{Command, describe_type, mnemonic};
pub use constants::*;
pub use crc::crc32;
pub use frame::{DecoderStats, Frame, FrameDecoder, SyncMarker, encode, encode_with_sync};
