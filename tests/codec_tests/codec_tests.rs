//! Tests for the binary record codec
//!
//! These tests verify:
//! - Log header layout and validation
//! - Record header and full record layout
//! - Index slot layout and gap detection
//! - Decoding of whole index images

use msgstore::codec::{
    decode_index, decode_log_header, encode_log_header, encode_record, IndexRecord, RecordHeader,
    FORMAT_VERSION, INDEX_RECORD_SIZE, LOG_HEADER_SIZE, MAGIC_NUMBER, RECORD_HEADER_SIZE,
};
use msgstore::StoreError;

// =============================================================================
// Log Header Tests
// =============================================================================

#[test]
fn test_log_header_layout() {
    let header = encode_log_header();

    assert_eq!(header.len() as u64, LOG_HEADER_SIZE);
    assert_eq!(&header[0..8], &MAGIC_NUMBER);
    assert_eq!(header[8], FORMAT_VERSION);
    assert_eq!(header[8], 1);
}

#[test]
fn test_log_header_validates() {
    let header = encode_log_header();
    assert_eq!(decode_log_header(&header).unwrap(), FORMAT_VERSION);
}

#[test]
fn test_log_header_bad_magic() {
    let mut header = encode_log_header();
    header[0] ^= 0xFF;

    let result = decode_log_header(&header);
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

#[test]
fn test_log_header_unknown_version() {
    let mut header = encode_log_header();
    header[8] = 2;

    let result = decode_log_header(&header);
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

#[test]
fn test_log_header_truncated() {
    let header = encode_log_header();

    let result = decode_log_header(&header[..5]);
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

// =============================================================================
// Record Tests
// =============================================================================

#[test]
fn test_record_layout_is_little_endian() {
    let record = encode_record(2, b"defgh").unwrap();

    assert_eq!(
        &record[..],
        &[
            5, 0, 0, 0, // len
            2, 0, 0, 0, 0, 0, 0, 0, // id
            b'd', b'e', b'f', b'g', b'h',
        ]
    );
}

#[test]
fn test_record_header_decode() {
    let record = encode_record(0x0102_0304_0506_0708, b"abc").unwrap();
    let header = RecordHeader::decode(&record).unwrap();

    assert_eq!(
        header,
        RecordHeader {
            size: 3,
            id: 0x0102_0304_0506_0708
        }
    );
    assert_eq!(record.len() as u64, RECORD_HEADER_SIZE + 3);
}

#[test]
fn test_record_header_truncated() {
    let result = RecordHeader::decode(&[1, 2, 3]);
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

// =============================================================================
// Index Record Tests
// =============================================================================

#[test]
fn test_index_record_layout() {
    let slot = IndexRecord::new(21, 3).encode();

    assert_eq!(slot.len() as u64, INDEX_RECORD_SIZE);
    assert_eq!(slot, [21, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0]);
    assert_eq!(IndexRecord::decode(&slot).unwrap(), IndexRecord::new(21, 3));
}

#[test]
fn test_gap_slot_is_all_zero() {
    assert_eq!(IndexRecord::GAP.encode(), [0u8; 12]);
    assert!(IndexRecord::GAP.is_gap());
    assert!(IndexRecord::default().is_gap());
    assert!(!IndexRecord::new(21, 1).is_gap());
}

#[test]
fn test_index_record_truncated() {
    let result = IndexRecord::decode(&[0u8; 11]);
    assert!(matches!(result, Err(StoreError::Corruption(_))));
}

#[test]
fn test_decode_index_image() {
    let mut image = Vec::new();
    image.extend_from_slice(&IndexRecord::GAP.encode());
    image.extend_from_slice(&IndexRecord::new(21, 3).encode());
    image.extend_from_slice(&IndexRecord::new(36, 5).encode());

    let slots = decode_index(&image);

    assert_eq!(
        slots,
        vec![
            IndexRecord::GAP,
            IndexRecord::new(21, 3),
            IndexRecord::new(36, 5)
        ]
    );
}

#[test]
fn test_decode_index_ignores_partial_slot() {
    let mut image = IndexRecord::new(21, 3).encode().to_vec();
    image.extend_from_slice(&[9, 9, 9]);

    let slots = decode_index(&image);

    assert_eq!(slots, vec![IndexRecord::new(21, 3)]);
}
