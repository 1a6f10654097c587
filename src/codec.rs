//! Binary record codec
//!
//! Encoding and decoding of the fixed-size structures stored in shard files.
//!
//! ## Log File
//! ```text
//! ┌───────────────┬─────────────┬──────────────────────────────────────┐
//! │ Magic (8)     │ Version (1) │ Record*                              │
//! └───────────────┴─────────────┴──────────────────────────────────────┘
//!
//! Record:
//! ┌──────────────┬──────────────┬──────────────────────────────────────┐
//! │ Len (4, LE)  │ Id (8, LE)   │ Payload (Len bytes)                  │
//! └──────────────┴──────────────┴──────────────────────────────────────┘
//! ```
//!
//! ## Index File
//! ```text
//! ┌──────────────────┬──────────────┐
//! │ Offset (8, LE)   │ Len (4, LE)  │   one slot per id, Len == 0 → gap
//! └──────────────────┴──────────────┘
//! ```
//!
//! The index offset points at the first payload byte, i.e. just past the
//! record header.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::{Result, StoreError};

/// Magic bytes identifying a shard log file
pub const MAGIC_NUMBER: [u8; 8] = [42, 249, 180, 108, 82, 75, 222, 182];

/// Current log file format version
pub const FORMAT_VERSION: u8 = 1;

/// Log header size: Magic (8) + Version (1) = 9 bytes
pub const LOG_HEADER_SIZE: u64 = 9;

/// Record header size: Len (4) + Id (8) = 12 bytes
pub const RECORD_HEADER_SIZE: u64 = 12;

/// Index slot size: Offset (8) + Len (4) = 12 bytes
pub const INDEX_RECORD_SIZE: u64 = 12;

// =============================================================================
// Log Header
// =============================================================================

/// Encode the 9-byte header written at the start of every log file
pub fn encode_log_header() -> [u8; LOG_HEADER_SIZE as usize] {
    let mut header = [0u8; LOG_HEADER_SIZE as usize];
    let mut buf = &mut header[..];
    buf.put_slice(&MAGIC_NUMBER);
    buf.put_u8(FORMAT_VERSION);
    header
}

/// Validate a log header, returning its format version
pub fn decode_log_header(bytes: &[u8]) -> Result<u8> {
    if bytes.len() < LOG_HEADER_SIZE as usize {
        return Err(StoreError::corruption(format!(
            "Truncated log header: expected {} bytes, got {}",
            LOG_HEADER_SIZE,
            bytes.len()
        )));
    }

    if bytes[..8] != MAGIC_NUMBER {
        return Err(StoreError::corruption(format!(
            "Invalid log magic: got {:?}",
            &bytes[..8]
        )));
    }

    let version = bytes[8];
    if version != FORMAT_VERSION {
        return Err(StoreError::corruption(format!(
            "Unsupported log format version: {}",
            version
        )));
    }

    Ok(version)
}

// =============================================================================
// Log Records
// =============================================================================

/// Header preceding every payload in the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Payload length in bytes
    pub size: u32,
    /// Message id
    pub id: u64,
}

impl RecordHeader {
    pub fn encode(&self) -> [u8; RECORD_HEADER_SIZE as usize] {
        let mut out = [0u8; RECORD_HEADER_SIZE as usize];
        let mut buf = &mut out[..];
        buf.put_u32_le(self.size);
        buf.put_u64_le(self.id);
        out
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < RECORD_HEADER_SIZE as usize {
            return Err(StoreError::corruption(format!(
                "Truncated record header: expected {} bytes, got {}",
                RECORD_HEADER_SIZE,
                bytes.len()
            )));
        }
        let size = bytes.get_u32_le();
        let id = bytes.get_u64_le();
        Ok(Self { size, id })
    }
}

/// Encode a complete log record (header + payload) into one buffer,
/// so it can be appended with a single write
pub fn encode_record(id: u64, payload: &[u8]) -> Result<BytesMut> {
    let size = u32::try_from(payload.len()).map_err(|_| {
        StoreError::invalid_request(format!(
            "Payload too large: {} bytes (max {})",
            payload.len(),
            u32::MAX
        ))
    })?;

    let mut buf = BytesMut::with_capacity(RECORD_HEADER_SIZE as usize + payload.len());
    buf.put_slice(&RecordHeader { size, id }.encode());
    buf.put_slice(payload);
    Ok(buf)
}

// =============================================================================
// Index Records
// =============================================================================

/// One fixed-size index slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexRecord {
    /// Byte offset of the payload in the log file
    pub offset: u64,
    /// Payload length; 0 marks a gap
    pub size: u32,
}

impl IndexRecord {
    /// The empty slot
    pub const GAP: IndexRecord = IndexRecord { offset: 0, size: 0 };

    pub fn new(offset: u64, size: u32) -> Self {
        Self { offset, size }
    }

    /// True if no message was stored for this slot
    pub fn is_gap(&self) -> bool {
        self.size == 0
    }

    pub fn encode(&self) -> [u8; INDEX_RECORD_SIZE as usize] {
        let mut out = [0u8; INDEX_RECORD_SIZE as usize];
        let mut buf = &mut out[..];
        buf.put_u64_le(self.offset);
        buf.put_u32_le(self.size);
        out
    }

    pub fn decode(mut bytes: &[u8]) -> Result<Self> {
        if bytes.len() < INDEX_RECORD_SIZE as usize {
            return Err(StoreError::corruption(format!(
                "Truncated index record: expected {} bytes, got {}",
                INDEX_RECORD_SIZE,
                bytes.len()
            )));
        }
        let offset = bytes.get_u64_le();
        let size = bytes.get_u32_le();
        Ok(Self { offset, size })
    }
}

/// Decode a whole index file image. A trailing partial slot is ignored.
pub fn decode_index(bytes: &[u8]) -> Vec<IndexRecord> {
    bytes
        .chunks_exact(INDEX_RECORD_SIZE as usize)
        .map(|mut chunk| IndexRecord {
            offset: chunk.get_u64_le(),
            size: chunk.get_u32_le(),
        })
        .collect()
}
