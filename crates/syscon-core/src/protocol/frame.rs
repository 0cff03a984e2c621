//! Frame encoding and stream decoding.
//!
//! Wire layout, all integers little-endian:
//!
//! ```text
//! +--------+--------+--------+-----------------+--------+
//! | sync   | type   | length | payload         | crc32  |
//! | 4      | 2      | 2      | length bytes    | 4      |
//! +--------+--------+--------+-----------------+--------+
//! ```
//!
//! The CRC covers the payload only. The decoder never fails: corrupt or
//! foreign bytes are dropped and the stream resynchronizes on the next sync
//! marker.

use std::fmt;

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, trace, warn};

use super::command::{Command, describe_type};
use super::constants::*;
use super::crc::crc32;

/// Direction-identifying sync marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMarker {
    HostToDevice,
    DeviceToHost,
}

impl SyncMarker {
    pub const fn value(self) -> u32 {
        match self {
            SyncMarker::HostToDevice => SYNC_HOST_TO_DEVICE,
            SyncMarker::DeviceToHost => SYNC_DEVICE_TO_HOST,
        }
    }

    /// Marker as it appears on the wire.
    pub const fn bytes(self) -> [u8; SYNC_SIZE] {
        self.value().to_le_bytes()
    }
}

/// One validated protocol frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_type: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(frame_type: u16, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            frame_type,
            payload: payload.into(),
        }
    }

    /// Known command for this frame's type, if any.
    pub fn command(&self) -> Option<Command> {
        Command::from_u16(self.frame_type)
    }

    /// Serialize with the given direction marker.
    pub fn to_bytes(&self, sync: SyncMarker) -> Vec<u8> {
        encode_with_sync(sync, self.frame_type, &self.payload)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("type", &describe_type(self.frame_type))
            .field("len", &self.payload.len())
            .finish()
    }
}

/// Encode a host -> device frame.
pub fn encode(frame_type: u16, payload: &[u8]) -> Vec<u8> {
    encode_with_sync(SyncMarker::HostToDevice, frame_type, payload)
}

/// Encode a frame with an explicit direction marker.
///
/// Payloads longer than [`MAX_PAYLOAD_LEN`] cannot be described by the length
/// field; callers must not pass them.
pub fn encode_with_sync(sync: SyncMarker, frame_type: u16, payload: &[u8]) -> Vec<u8> {
    debug_assert!(
        payload.len() <= MAX_PAYLOAD_LEN,
        "payload of {} bytes exceeds the 16-bit length field",
        payload.len()
    );

    let mut header = [0u8; FRAME_HEADER_SIZE];
    LittleEndian::write_u32(&mut header[0..SYNC_SIZE], sync.value());
    LittleEndian::write_u16(&mut header[TYPE_OFFSET..LENGTH_OFFSET], frame_type);
    LittleEndian::write_u16(
        &mut header[LENGTH_OFFSET..FRAME_HEADER_SIZE],
        payload.len() as u16,
    );

    let mut footer = [0u8; FRAME_FOOTER_SIZE];
    LittleEndian::write_u32(&mut footer, crc32(payload));

    let mut buf = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&footer);
    buf
}

/// Running counters for a decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Frames emitted.
    pub frames: u64,
    /// Bytes dropped while hunting for a sync marker.
    pub bytes_discarded: u64,
    /// Candidate frames rejected by CRC.
    pub crc_failures: u64,
}

/// Incremental decoder owning the receive buffer for one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    sync: SyncMarker,
    buffer: Vec<u8>,
    stats: DecoderStats,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder for device -> host traffic.
    pub fn new() -> Self {
        Self::with_sync(SyncMarker::DeviceToHost)
    }

    pub fn with_sync(sync: SyncMarker) -> Self {
        Self {
            sync,
            buffer: Vec::new(),
            stats: DecoderStats::default(),
        }
    }

    pub fn sync(&self) -> SyncMarker {
        self.sync
    }

    /// Bytes held back waiting for the rest of a frame.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    /// Drop any partial data.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Append bytes and extract every complete, valid frame.
    ///
    /// Each loop iteration either emits a frame or shrinks the buffer by at
    /// least one sync marker, so a fixed buffer always terminates.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buffer.extend_from_slice(bytes);
        let mut frames = Vec::new();

        loop {
            let start = match self.find_sync() {
                Ok(start) => start,
                Err(scanned) => {
                    // No marker starts before `scanned`; those bytes can never
                    // become part of a frame.
                    self.discard(scanned);
                    break;
                }
            };
            self.discard(start);

            let frame_type = LittleEndian::read_u16(&self.buffer[TYPE_OFFSET..]);
            let payload_len = LittleEndian::read_u16(&self.buffer[LENGTH_OFFSET..]) as usize;
            let frame_size = payload_len + FRAME_OVERHEAD;
            if self.buffer.len() < frame_size {
                trace!(
                    have = self.buffer.len(),
                    need = frame_size,
                    "Waiting for rest of frame"
                );
                break;
            }

            let payload_end = FRAME_HEADER_SIZE + payload_len;
            let payload = &self.buffer[FRAME_HEADER_SIZE..payload_end];
            let expected = LittleEndian::read_u32(&self.buffer[payload_end..]);
            let actual = crc32(payload);

            if actual == expected {
                let frame = Frame::new(frame_type, payload);
                self.buffer.drain(..frame_size);
                self.stats.frames += 1;
                debug!(
                    frame_type = %describe_type(frame_type),
                    len = payload_len,
                    "Frame decoded"
                );
                frames.push(frame);
            } else {
                warn!(
                    frame_type = %describe_type(frame_type),
                    len = payload_len,
                    expected = %format!("0x{:08X}", expected),
                    actual = %format!("0x{:08X}", actual),
                    "CRC mismatch, skipping sync marker"
                );
                self.stats.crc_failures += 1;
                self.buffer.drain(..SYNC_SIZE);
            }

            if self.buffer.is_empty() {
                break;
            }
        }

        frames
    }

    /// Offset of the first sync marker with a full header behind it, or
    /// `Err(n)` where `n` is how far the scan got before running short.
    fn find_sync(&self) -> Result<usize, usize> {
        let marker = self.sync.bytes();
        let mut pos = 0;
        while self.buffer.len() - pos >= FRAME_HEADER_SIZE {
            if self.buffer[pos..pos + SYNC_SIZE] == marker {
                return Ok(pos);
            }
            pos += 1;
        }
        Err(pos)
    }

    fn discard(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.buffer.drain(..count);
        self.stats.bytes_discarded += count as u64;
        warn!(discarded = count, "Resynchronizing receive stream");
    }
}
