//! ACK payload classification.
//!
//! An ACK frame carries a little-endian `i32`: non-negative means the device
//! accepted the last command, negative means it refused it.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};

use super::constants::ACK_PAYLOAD_SIZE;

/// Classified ACK status from the device.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum AckStatus {
    Ack(i32),
    Nack(i32),
}

impl AckStatus {
    /// Classify a raw status value.
    pub const fn from_value(value: i32) -> Self {
        if value >= 0 {
            AckStatus::Ack(value)
        } else {
            AckStatus::Nack(value)
        }
    }

    /// Parse an ACK frame payload. `None` if it is too short to hold the status.
    ///
    /// Bytes past the status are ignored.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < ACK_PAYLOAD_SIZE {
            return None;
        }
        Some(Self::from_value(LittleEndian::read_i32(payload)))
    }

    /// Raw status value.
    pub fn value(&self) -> i32 {
        match *self {
            AckStatus::Ack(v) | AckStatus::Nack(v) => v,
        }
    }

    pub fn is_nack(&self) -> bool {
        matches!(self, AckStatus::Nack(_))
    }
}

impl fmt::Debug for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Ack(v) => write!(f, "Ack({})", v),
            AckStatus::Nack(v) => write!(f, "Nack({})", v),
        }
    }
}

impl fmt::Display for AckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AckStatus::Ack(_) => write!(f, "ACK"),
            AckStatus::Nack(_) => write!(f, "NACK"),
        }
    }
}
