//! Firmware image handling and DFU chunking.
//!
//! An image is a 16-byte opaque header followed by the application body.
//! Only the body is streamed, in slices of up to 1 KiB, each wrapped in a
//! `[offset:u16][word_count:u16][bytes]` DFU_PACKET payload.

use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;
use tracing::{info, warn};

use crate::protocol::constants::{
    DFU_CHUNK_SIZE, DFU_PACKET_HEADER_SIZE, DFU_WORD_SIZE, FIRMWARE_HEADER_SIZE,
};

#[derive(Error, Debug)]
pub enum FirmwareError {
    #[error("File too small: {actual} bytes, minimum {minimum}")]
    TooSmall { actual: usize, minimum: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Immutable firmware image.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
}

impl FirmwareImage {
    /// Wrap raw image bytes. The image must at least hold the header.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, FirmwareError> {
        if data.len() < FIRMWARE_HEADER_SIZE {
            return Err(FirmwareError::TooSmall {
                actual: data.len(),
                minimum: FIRMWARE_HEADER_SIZE,
            });
        }

        let body_len = data.len() - FIRMWARE_HEADER_SIZE;
        if body_len > usize::from(u16::MAX) + 1 {
            // Chunk offsets are 16 bits on the wire and wrap past 64 KiB.
            warn!(
                body_len,
                "Image body exceeds 64 KiB, DFU_PACKET offsets will wrap"
            );
        }
        if body_len % DFU_WORD_SIZE != 0 {
            warn!(
                body_len,
                "Image body is not word aligned, trailing bytes are not counted in word_count"
            );
        }

        Ok(Self { data })
    }

    /// Read an image from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FirmwareError> {
        let path = path.as_ref();
        let data = std::fs::read(path)?;
        info!(path = %path.display(), size = data.len(), "Loaded firmware image");
        Self::from_bytes(data)
    }

    /// The opaque 16-byte header.
    pub fn header(&self) -> &[u8] {
        &self.data[..FIRMWARE_HEADER_SIZE]
    }

    /// Everything after the header.
    pub fn body(&self) -> &[u8] {
        &self.data[FIRMWARE_HEADER_SIZE..]
    }

    /// Get total size.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of DFU_PACKETs needed for the body.
    pub fn chunk_count(&self) -> usize {
        self.body().len().div_ceil(DFU_CHUNK_SIZE)
    }

    /// Slice of the body starting at `offset`, or `None` past the end.
    pub fn chunk_at(&self, offset: usize) -> Option<DfuChunk<'_>> {
        let body = self.body();
        if offset >= body.len() {
            return None;
        }
        let len = (body.len() - offset).min(DFU_CHUNK_SIZE);
        Some(DfuChunk {
            offset,
            data: &body[offset..offset + len],
        })
    }

    /// Iterate over every chunk of the body.
    pub fn chunks(&self) -> ChunkIterator<'_> {
        ChunkIterator {
            image: self,
            offset: 0,
        }
    }
}

/// One slice of the image body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DfuChunk<'a> {
    /// Byte offset relative to the end of the header.
    pub offset: usize,
    pub data: &'a [u8],
}

impl DfuChunk<'_> {
    /// Whole 32-bit words in this slice.
    pub fn word_count(&self) -> u16 {
        (self.data.len() / DFU_WORD_SIZE) as u16
    }

    /// Offset as carried on the wire.
    pub fn wire_offset(&self) -> u16 {
        self.offset as u16
    }

    /// Build the DFU_PACKET payload for this slice.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut prefix = [0u8; DFU_PACKET_HEADER_SIZE];
        LittleEndian::write_u16(&mut prefix[0..2], self.wire_offset());
        LittleEndian::write_u16(&mut prefix[2..4], self.word_count());

        let mut payload = Vec::with_capacity(DFU_PACKET_HEADER_SIZE + self.data.len());
        payload.extend_from_slice(&prefix);
        payload.extend_from_slice(self.data);
        payload
    }
}

/// Iterator over 1 KiB body chunks.
#[derive(Debug)]
pub struct ChunkIterator<'a> {
    image: &'a FirmwareImage,
    offset: usize,
}

impl<'a> Iterator for ChunkIterator<'a> {
    type Item = DfuChunk<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let chunk = self.image.chunk_at(self.offset)?;
        self.offset += chunk.data.len();
        Some(chunk)
    }
}
