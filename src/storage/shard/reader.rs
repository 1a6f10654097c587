//! Shard Reader
//!
//! Positioned payload reads from a shard log file and index loading.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::codec::{self, IndexRecord, RecordHeader, LOG_HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::error::{Result, StoreError};
use crate::fetch::FetchEntry;

/// Read handle for one shard's log file
///
/// Opened independently of the writer, so reads can run while the shard is
/// still being appended to.
pub struct ShardReader {
    first_id: u64,
    path: PathBuf,
    log: File,
}

impl ShardReader {
    /// Open a log file for reading and validate its header
    pub fn open(path: &Path, first_id: u64) -> Result<Self> {
        let mut log = File::open(path)?;

        let mut header = [0u8; LOG_HEADER_SIZE as usize];
        log.read_exact(&mut header).map_err(|e| eof_as_corruption(e, path))?;
        codec::decode_log_header(&header)?;

        Ok(Self {
            first_id,
            path: path.to_path_buf(),
            log,
        })
    }

    /// Read `size` bytes at `offset`
    ///
    /// Fails with a corruption error if the range runs past end-of-file.
    pub fn read_payload(&mut self, offset: u64, size: u32) -> Result<Bytes> {
        self.read_range(offset, u64::from(size))
    }

    /// Read the payload an index entry points at
    ///
    /// The record header in front of the payload must agree with the entry's
    /// id and size.
    pub fn read_entry(&mut self, entry: &FetchEntry) -> Result<Bytes> {
        if entry.offset < LOG_HEADER_SIZE + RECORD_HEADER_SIZE {
            return Err(StoreError::corruption(format!(
                "Index entry for id {} points into the log header of {} (offset {})",
                entry.id,
                self.path.display(),
                entry.offset
            )));
        }

        let record_start = entry.offset - RECORD_HEADER_SIZE;
        let record = self.read_range(record_start, RECORD_HEADER_SIZE + u64::from(entry.size))?;

        let header = RecordHeader::decode(&record)?;
        if header.id != entry.id || header.size != entry.size {
            return Err(StoreError::corruption(format!(
                "Record at offset {} of {} is (id {}, {} bytes), index expects (id {}, {} bytes)",
                record_start,
                self.path.display(),
                header.id,
                header.size,
                entry.id,
                entry.size
            )));
        }

        Ok(record.slice(RECORD_HEADER_SIZE as usize..))
    }

    fn read_range(&mut self, offset: u64, len: u64) -> Result<Bytes> {
        let file_len = self.log.metadata()?.len();
        let end = offset.checked_add(len).filter(|&end| end <= file_len).ok_or_else(|| {
            StoreError::corruption(format!(
                "Read of {} bytes at offset {} runs past end of {} ({} bytes)",
                len,
                offset,
                self.path.display(),
                file_len
            ))
        })?;

        let mut buf = vec![0u8; (end - offset) as usize];
        self.log.seek(SeekFrom::Start(offset))?;
        self.log
            .read_exact(&mut buf)
            .map_err(|e| eof_as_corruption(e, &self.path))?;

        Ok(Bytes::from(buf))
    }

    pub fn first_id(&self) -> u64 {
        self.first_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Load every slot of an index file. A trailing partial slot is ignored.
pub fn read_index(path: &Path) -> Result<Vec<IndexRecord>> {
    let image = std::fs::read(path)?;
    Ok(codec::decode_index(&image))
}

fn eof_as_corruption(err: io::Error, path: &Path) -> StoreError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        StoreError::corruption(format!("Unexpected end of file in {}", path.display()))
    } else {
        StoreError::Io(err)
    }
}
