//! Chunk framing for the PNG image stream
//!
//! A stream is a concatenation of images. Each image is the 8-byte signature
//! followed by chunks laid out as `[length: u32 BE][type: 4 bytes][payload][crc: u32]`.
//! The image ends with the `IEND` chunk's checksum.

/// Fixed signature every image starts with
pub const PNG_SIGNATURE: [u8; 8] = [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A];

/// Size of the length + type block that precedes each payload
pub const CHUNK_HEADER_LEN: usize = 8;

/// Size of the checksum that trails each payload
pub const CHUNK_CRC_LEN: usize = 4;

/// Type tag of the chunk that completes an image
pub const IEND_CHUNK_TYPE: [u8; 4] = *b"IEND";

/// Parsed chunk metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Payload size in bytes, excluding the trailing checksum
    pub length: u32,
    /// Whether this chunk completes the current image
    pub is_terminal: bool,
}

impl ChunkHeader {
    /// Parse a header from its 8-byte metadata block
    pub fn parse(block: [u8; CHUNK_HEADER_LEN]) -> Self {
        let length = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
        let is_terminal = block[4..8] == IEND_CHUNK_TYPE;
        Self { length, is_terminal }
    }

    /// Bytes that must be buffered before the chunk body can be skipped
    pub fn body_len(&self) -> usize {
        (self.length as usize).saturating_add(CHUNK_CRC_LEN)
    }
}
