//! Shard Writer
//!
//! Appends records to the open shard of a partition and recovers the append
//! cursor of an existing shard.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::codec::{self, IndexRecord, INDEX_RECORD_SIZE, LOG_HEADER_SIZE, RECORD_HEADER_SIZE};
use crate::config::SyncStrategy;
use crate::error::{Result, StoreError};
use crate::storage;

use super::ShardMeta;

/// Append handle for one shard's log and index files
pub struct ShardWriter {
    first_id: u64,
    log_path: PathBuf,
    index_path: PathBuf,
    log: File,
    index: File,
    /// Next byte offset in the log file
    write_offset: u64,
    /// Number of slots the index file currently holds
    slot_count: u64,
    meta: ShardMeta,
    sync_strategy: SyncStrategy,
    /// Appends since the last fsync
    unsynced: usize,
}

impl ShardWriter {
    /// Create the file pair for a new shard
    ///
    /// The log file gets its 9-byte header, the index file starts empty and
    /// grows as ids are stored. Fails if the index file already exists; the
    /// index is created last, after the log header is on disk.
    pub fn create(
        dir: &Path,
        partition: &str,
        first_id: u64,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        let log_path = storage::log_path(dir, partition, first_id);
        let index_path = storage::index_path(dir, partition, first_id);

        // The index file marks a live shard. A log file without one holds no
        // referenced records and is reset.
        if index_path.exists() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("Shard index {} already exists", index_path.display()),
            )));
        }

        let mut log = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&log_path)?;
        log.write_all(&codec::encode_log_header())?;
        log.sync_all()?;

        let index = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&index_path)?;
        index.sync_all()?;

        tracing::debug!(partition, first_id, "Created shard {}", log_path.display());

        Ok(Self {
            first_id,
            log_path,
            index_path,
            log,
            index,
            write_offset: LOG_HEADER_SIZE,
            slot_count: 0,
            meta: ShardMeta::empty(first_id),
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Reopen an existing shard for appending
    ///
    /// Recovery:
    /// 1. Validate the log header
    /// 2. Drop a torn tail from the index: a partial slot, trailing gap slots
    ///    and trailing slots whose record never reached the log
    /// 3. Check that every remaining populated slot lies within the log
    /// 4. Resume appends at the end of the log file
    pub fn open(
        dir: &Path,
        partition: &str,
        first_id: u64,
        sync_strategy: SyncStrategy,
    ) -> Result<Self> {
        let log_path = storage::log_path(dir, partition, first_id);
        let index_path = storage::index_path(dir, partition, first_id);

        let mut log = OpenOptions::new().read(true).write(true).open(&log_path)?;
        let log_len = log.metadata()?.len();
        if log_len < LOG_HEADER_SIZE {
            return Err(StoreError::corruption(format!(
                "Log file {} is shorter than its header ({} bytes)",
                log_path.display(),
                log_len
            )));
        }
        let mut header = [0u8; LOG_HEADER_SIZE as usize];
        log.read_exact(&mut header)?;
        codec::decode_log_header(&header)?;

        let mut index = OpenOptions::new().read(true).write(true).open(&index_path)?;
        let mut image = Vec::new();
        index.read_to_end(&mut image)?;

        let past_end = |record: &IndexRecord| record.offset + u64::from(record.size) > log_len;

        let mut slots = codec::decode_index(&image);
        while slots
            .last()
            .map_or(false, |last| last.is_gap() || past_end(last))
        {
            slots.pop();
        }

        let kept_len = slots.len() as u64 * INDEX_RECORD_SIZE;
        if kept_len != image.len() as u64 {
            tracing::warn!(
                partition,
                first_id,
                "Trimming torn index tail of {}: {} -> {} bytes",
                index_path.display(),
                image.len(),
                kept_len
            );
            index.set_len(kept_len)?;
            index.sync_all()?;
        }

        if let Some((slot, record)) = slots
            .iter()
            .enumerate()
            .find(|(_, r)| !r.is_gap() && past_end(*r))
        {
            return Err(StoreError::corruption(format!(
                "Index slot {} of {} points past end of log ({} + {} > {})",
                slot,
                index_path.display(),
                record.offset,
                record.size,
                log_len
            )));
        }

        let meta = ShardMeta::from_index(first_id, &slots);

        Ok(Self {
            first_id,
            log_path,
            index_path,
            log,
            index,
            write_offset: log_len,
            slot_count: slots.len() as u64,
            meta,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Append a message and point its index slot at it
    ///
    /// Slots between the previous end of the index and `id` are zero-filled
    /// as gaps. Returns the new write offset.
    pub fn append(&mut self, id: u64, payload: &[u8]) -> Result<u64> {
        if id < self.first_id {
            return Err(StoreError::invalid_request(format!(
                "Message id {} precedes shard starting at {}",
                id, self.first_id
            )));
        }
        if payload.is_empty() {
            return Err(StoreError::invalid_request(format!(
                "Empty payload for message id {}",
                id
            )));
        }

        let slot = id - self.first_id;
        if slot < self.slot_count && !self.read_slot(slot)?.is_gap() {
            return Err(StoreError::invalid_request(format!(
                "Message id {} is already stored",
                id
            )));
        }

        // Step 1: Append the record to the log
        let record = codec::encode_record(id, payload)?;
        self.log.seek(SeekFrom::Start(self.write_offset))?;
        self.log.write_all(&record)?;
        if self.sync_strategy == SyncStrategy::EveryWrite {
            self.log.sync_data()?;
        }

        // Step 2: Point the index slot at the payload
        let entry = IndexRecord::new(self.write_offset + RECORD_HEADER_SIZE, payload.len() as u32);
        let slot_offset = slot * INDEX_RECORD_SIZE;
        if slot > self.slot_count {
            // Extending the file zero-fills the skipped slots as gaps
            self.index.set_len(slot_offset)?;
        }
        self.index.seek(SeekFrom::Start(slot_offset))?;
        self.index.write_all(&entry.encode())?;
        self.slot_count = self.slot_count.max(slot + 1);

        self.write_offset += record.len() as u64;
        self.meta.record(id);

        // Step 3: fsync per strategy
        self.unsynced += 1;
        match self.sync_strategy {
            SyncStrategy::EveryWrite => {
                self.index.sync_data()?;
                self.unsynced = 0;
            }
            SyncStrategy::EveryNEntries { count } if self.unsynced >= count => self.sync()?,
            SyncStrategy::EveryNEntries { .. } => {}
        }

        Ok(self.write_offset)
    }

    /// Force both files to disk
    pub fn sync(&mut self) -> Result<()> {
        self.log.sync_data()?;
        self.index.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    fn read_slot(&mut self, slot: u64) -> Result<IndexRecord> {
        let mut buf = [0u8; INDEX_RECORD_SIZE as usize];
        self.index.seek(SeekFrom::Start(slot * INDEX_RECORD_SIZE))?;
        self.index.read_exact(&mut buf)?;
        IndexRecord::decode(&buf)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn first_id(&self) -> u64 {
        self.first_id
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    pub fn slot_count(&self) -> u64 {
        self.slot_count
    }

    /// Highest id held by this shard: `first_id + slot_count - 1`
    pub fn max_id(&self) -> Option<u64> {
        self.slot_count.checked_sub(1).map(|last| self.first_id + last)
    }

    pub fn meta(&self) -> ShardMeta {
        self.meta
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }
}
