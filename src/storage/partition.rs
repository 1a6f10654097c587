//! Message Partition
//!
//! The partition engine: owns one topic's ordered shard sequence, serializes
//! all writes to it and keeps track of the highest stored id.
//!
//! ## Responsibilities
//! - Discover existing shards on first use and reopen the newest for appends
//! - Roll over to a new shard when an id crosses the shard boundary
//! - Plan fetches from shard metadata
//! - Give callers an atomic read-max-id-then-store window

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};

use crate::config::{Config, SyncStrategy};
use crate::error::{Result, StoreError};
use crate::fetch::{FetchEntry, FetchRequest};
use crate::storage::{self, planner};

use super::shard::{read_index, ShardMeta, ShardWriter};

/// One topic's append-only log
///
/// ## Concurrency:
/// - `state`: Mutex held for every write, rollover and transaction
///   (single logical writer), and briefly by fetch planning to snapshot
///   shard metadata
/// - `max_message_id`: Atomic, readable without taking the lock
/// - `retired`: set under the state lock, checked before every reload
pub struct MessagePartition {
    /// Store root holding the shard files
    dir: PathBuf,

    /// Partition name, the shard file name prefix
    name: String,

    /// Shard capacity in ids
    messages_per_file: u64,

    sync_strategy: SyncStrategy,

    /// `None` until the shard files are first loaded, and again after `close`
    state: Mutex<Option<PartitionState>>,

    max_message_id: AtomicU64,

    /// Set by `retire`; the handle never reloads afterwards
    retired: AtomicBool,
}

/// Loaded partition state, guarded by the partition lock
struct PartitionState {
    /// Known shards, ascending by `first_id`. When an append shard is open it
    /// is the last element.
    shards: Vec<ShardMeta>,

    /// Open append shard
    appender: Option<ShardWriter>,
}

impl MessagePartition {
    /// Create a partition handle without touching the disk
    ///
    /// Shard files are discovered on first use.
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>, config: &Config) -> Result<Self> {
        let name = name.into();
        storage::validate_partition_name(&name)?;
        config.validate()?;

        Ok(Self {
            dir: dir.into(),
            name,
            messages_per_file: config.messages_per_file,
            sync_strategy: config.sync_strategy,
            state: Mutex::new(None),
            max_message_id: AtomicU64::new(0),
            retired: AtomicBool::new(false),
        })
    }

    /// Open a partition and load its shard files
    pub fn open(dir: impl Into<PathBuf>, name: impl Into<String>, config: &Config) -> Result<Self> {
        let partition = Self::new(dir, name, config)?;
        partition.ensure_loaded()?;
        Ok(partition)
    }

    /// Load the shard files if that has not happened yet
    pub fn ensure_loaded(&self) -> Result<()> {
        self.lock_state().map(|_| ())
    }

    /// Store a message
    ///
    /// Ids may arrive in any order. An id past the open shard's range rolls
    /// over to a new shard; an id below it is written into its own shard.
    pub fn store(&self, id: u64, payload: &[u8]) -> Result<()> {
        let mut state = self.lock_state()?;
        self.store_locked(&mut state, id, payload)
    }

    /// Highest id ever stored (0 for an empty partition)
    pub fn max_message_id(&self) -> u64 {
        self.max_message_id.load(Ordering::Acquire)
    }

    /// Resolve a fetch request into ordered entry addresses
    ///
    /// Holds the partition lock only while copying shard metadata; index
    /// files are read without it.
    pub fn plan_fetch(&self, request: &FetchRequest) -> Result<Vec<FetchEntry>> {
        let shards = self.lock_state()?.shards.clone();

        planner::plan(&shards, request, |shard| {
            read_index(&self.index_path(shard.first_id))
        })
    }

    /// Run `f` while holding the partition's write lock
    ///
    /// `f` sees the current max id and may store through the transaction;
    /// no other write can interleave until it returns. Stores inside `f` must
    /// go through [`Transaction::store`]: the lock is not reentrant, so
    /// calling [`MessagePartition::store`] from `f` deadlocks.
    pub fn do_in_transaction<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        let state = self.lock_state()?;
        let mut tx = Transaction {
            partition: self,
            state,
        };
        f(&mut tx)
    }

    /// Sync and release the shard files
    ///
    /// A later operation reloads the partition from disk.
    pub fn close(&self) -> Result<()> {
        let mut guard = self.state.lock();
        self.release(&mut guard)
    }

    /// Close the partition for good
    ///
    /// Later operations on this handle fail with `Stopped` instead of
    /// reloading, so a handle still held elsewhere cannot write behind a new
    /// owner of the same files.
    pub fn retire(&self) -> Result<()> {
        let mut guard = self.state.lock();
        self.retired.store(true, Ordering::Release);
        self.release(&mut guard)
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn release(&self, guard: &mut MutexGuard<'_, Option<PartitionState>>) -> Result<()> {
        if let Some(mut state) = guard.take() {
            if let Some(writer) = state.appender.as_mut() {
                writer.sync()?;
            }
            tracing::debug!(partition = %self.name, "Closed partition");
        }
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn messages_per_file(&self) -> u64 {
        self.messages_per_file
    }

    /// Snapshot of the shard metadata, ascending by `first_id`
    pub fn shards(&self) -> Result<Vec<ShardMeta>> {
        Ok(self.lock_state()?.shards.clone())
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().is_some()
    }

    pub fn log_path(&self, first_id: u64) -> PathBuf {
        storage::log_path(&self.dir, &self.name, first_id)
    }

    pub fn index_path(&self, first_id: u64) -> PathBuf {
        storage::index_path(&self.dir, &self.name, first_id)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn lock_state(&self) -> Result<MappedMutexGuard<'_, PartitionState>> {
        let mut guard = self.state.lock();
        if guard.is_none() {
            if self.is_retired() {
                return Err(StoreError::Stopped);
            }
            *guard = Some(self.load()?);
        }
        MutexGuard::try_map(guard, Option::as_mut)
            .map_err(|_| StoreError::not_found(format!("Partition {} is not loaded", self.name)))
    }

    /// Discover this partition's shards and reopen the newest for appends
    fn load(&self) -> Result<PartitionState> {
        fs::create_dir_all(&self.dir)?;

        let mut first_ids = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let parsed = file_name.to_str().and_then(storage::parse_index_file_name);

            if let Some((partition, first_id)) = parsed {
                if partition == self.name {
                    first_ids.push(first_id);
                }
            }
        }
        first_ids.sort_unstable();
        first_ids.dedup();

        let mut shards = Vec::with_capacity(first_ids.len());
        let mut appender = None;

        for (position, &first_id) in first_ids.iter().enumerate() {
            if first_id % self.messages_per_file != 0 {
                return Err(StoreError::Config(format!(
                    "Shard {} of partition {} is not aligned to messages_per_file = {}; \
                     shard capacity cannot change once data exists",
                    first_id, self.name, self.messages_per_file
                )));
            }

            let (meta, slot_count) = if position + 1 == first_ids.len() {
                let writer =
                    ShardWriter::open(&self.dir, &self.name, first_id, self.sync_strategy)?;
                let loaded = (writer.meta(), writer.slot_count());
                appender = Some(writer);
                loaded
            } else {
                if !self.log_path(first_id).is_file() {
                    return Err(StoreError::corruption(format!(
                        "Missing log file for shard {} of partition {}",
                        first_id, self.name
                    )));
                }
                let index = read_index(&self.index_path(first_id))?;
                (ShardMeta::from_index(first_id, &index), index.len() as u64)
            };

            if slot_count > self.messages_per_file {
                return Err(StoreError::Config(format!(
                    "Shard {} of partition {} holds {} slots, more than messages_per_file = {}",
                    first_id, self.name, slot_count, self.messages_per_file
                )));
            }
            shards.push(meta);
        }

        let max_message_id = shards
            .iter()
            .filter_map(ShardMeta::index_range)
            .map(|(_, max)| max)
            .max()
            .unwrap_or(0);
        self.max_message_id.store(max_message_id, Ordering::Release);

        tracing::info!(
            partition = %self.name,
            shards = shards.len(),
            max_message_id,
            "Opened partition"
        );

        Ok(PartitionState { shards, appender })
    }

    /// Store with the partition lock already held
    ///
    /// The open append shard is always the newest one. Ids past it roll over
    /// to a new shard; ids below it go to their own, possibly new, shard.
    fn store_locked(&self, state: &mut PartitionState, id: u64, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(StoreError::invalid_request(format!(
                "Empty payload for message id {} in partition {}",
                id, self.name
            )));
        }

        let first_id = id - id % self.messages_per_file;
        match state.shards.last().map(|shard| shard.first_id) {
            Some(newest) if first_id < newest => {
                return self.store_below(state, first_id, id, payload);
            }
            Some(newest) if first_id == newest => {
                if state.appender.is_none() {
                    state.appender = Some(ShardWriter::open(
                        &self.dir,
                        &self.name,
                        first_id,
                        self.sync_strategy,
                    )?);
                }
            }
            _ => self.roll_over(state, first_id)?,
        }

        let writer = state.appender.as_mut().ok_or_else(|| {
            StoreError::not_found(format!("No open shard in partition {}", self.name))
        })?;
        writer.append(id, payload)?;

        if let Some(meta) = state.shards.last_mut() {
            *meta = writer.meta();
        }
        self.max_message_id.fetch_max(id, Ordering::AcqRel);

        Ok(())
    }

    /// Seal the open shard and start a new one at `first_id`
    fn roll_over(&self, state: &mut PartitionState, first_id: u64) -> Result<()> {
        if let Some(sealed) = state.appender.as_mut() {
            sealed.sync()?;
            tracing::debug!(partition = %self.name, first_id = sealed.first_id(), "Sealed shard");
        }
        state.appender = None;

        let writer = ShardWriter::create(&self.dir, &self.name, first_id, self.sync_strategy)?;
        state.shards.push(writer.meta());
        state.appender = Some(writer);
        Ok(())
    }

    /// Store into a shard older than the open one through a short-lived writer
    fn store_below(
        &self,
        state: &mut PartitionState,
        first_id: u64,
        id: u64,
        payload: &[u8],
    ) -> Result<()> {
        let (position, mut writer) =
            match state.shards.binary_search_by_key(&first_id, |shard| shard.first_id) {
                Ok(position) => (
                    position,
                    ShardWriter::open(&self.dir, &self.name, first_id, self.sync_strategy)?,
                ),
                Err(position) => {
                    let writer =
                        ShardWriter::create(&self.dir, &self.name, first_id, self.sync_strategy)?;
                    state.shards.insert(position, writer.meta());
                    (position, writer)
                }
            };

        writer.append(id, payload)?;
        writer.sync()?;
        state.shards[position] = writer.meta();
        self.max_message_id.fetch_max(id, Ordering::AcqRel);

        tracing::debug!(partition = %self.name, first_id, id, "Stored below the open shard");
        Ok(())
    }
}

/// Exclusive write window on a partition, see [`MessagePartition::do_in_transaction`]
pub struct Transaction<'a> {
    partition: &'a MessagePartition,
    state: MappedMutexGuard<'a, PartitionState>,
}

impl Transaction<'_> {
    /// Highest id stored so far, stable for the lifetime of the transaction
    /// apart from this transaction's own stores
    pub fn max_message_id(&self) -> u64 {
        self.partition.max_message_id()
    }

    /// Store a message inside the transaction
    pub fn store(&mut self, id: u64, payload: &[u8]) -> Result<()> {
        self.partition.store_locked(&mut self.state, id, payload)
    }

    pub fn partition(&self) -> &str {
        self.partition.name()
    }
}
