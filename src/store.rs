//! Store Module
//!
//! The message store: a registry of partition engines keyed by partition name.
//!
//! ## Responsibilities
//! - Lazily create exactly one [`MessagePartition`] per name
//! - Route Store / Fetch / MaxMessageID calls to the right partition
//! - Expose per-partition transactions
//! - Health check and shutdown

use std::collections::{BTreeSet, HashMap};
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, StoreError};
use crate::fetch::{Fetch, FetchRequest};
use crate::storage::{self, MessagePartition, ShardMeta, Transaction};

/// File-backed message store
///
/// ## Concurrency Model
/// - `partitions`: Mutex held only to look up, insert or remove an entry,
///   never during file I/O. A new partition is inserted unloaded; its files
///   are loaded once, under the partition's own lock, by its first operation.
/// - Writes to different partitions run in parallel; writes to one partition
///   are serialized by that partition.
/// - Each fetch runs on its own worker thread.
/// - `stopped`: set under the registry lock by [`FileMessageStore::stop`];
///   no partition is created once it is set.
pub struct FileMessageStore {
    config: Config,
    partitions: Mutex<HashMap<String, Arc<MessagePartition>>>,
    stopped: AtomicBool,
}

impl FileMessageStore {
    /// Name of the scratch file written by [`FileMessageStore::check`]
    const CHECK_FILENAME: &'static str = ".msgstore-check";

    /// Create a store over `config.data_dir`
    ///
    /// No files are touched until a partition is first used.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            partitions: Mutex::new(HashMap::new()),
            stopped: AtomicBool::new(false),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Store a message in a partition
    pub fn store(&self, partition: &str, id: u64, payload: &[u8]) -> Result<()> {
        self.partition(partition)?.store(id, payload)
    }

    /// Start an asynchronous fetch
    ///
    /// Returns as soon as the request is validated and the worker is
    /// started. Failures to open the partition or plan the fetch are
    /// reported by [`Fetch::wait`]. A partition that was never written
    /// yields an empty stream.
    pub fn fetch(&self, request: FetchRequest) -> Result<Fetch> {
        request.validate()?;
        let partition = self.resolve(&request.partition)?;
        Fetch::spawn(partition, request, self.config.fetch_buffer)
    }

    /// Highest id stored in a partition
    ///
    /// Fails with `NotFound` if the partition holds no messages, whether or
    /// not it has been used through this store.
    pub fn max_message_id(&self, partition: &str) -> Result<u64> {
        storage::validate_partition_name(partition)?;
        self.ensure_running()?;

        let open = self.partitions.lock().get(partition).cloned();
        let handle = match open {
            Some(handle) => handle,
            None if self.partitions()?.iter().any(|name| name == partition) => {
                self.resolve(partition)?
            }
            None => return Err(Self::no_messages(partition)),
        };

        handle.ensure_loaded()?;
        if handle.shards()?.iter().all(ShardMeta::is_empty) {
            return Err(Self::no_messages(partition));
        }
        Ok(handle.max_message_id())
    }

    /// Names of all partitions with shard files on disk, sorted
    pub fn partitions(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.config.data_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = BTreeSet::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            if let Some((partition, _)) = file_name.to_str().and_then(storage::parse_index_file_name) {
                names.insert(partition.to_string());
            }
        }

        Ok(names.into_iter().collect())
    }

    /// Run `f` under a partition's write lock
    ///
    /// `f` receives a [`Transaction`] exposing the current max id and a
    /// `store` that cannot be interleaved with other writers. Store through
    /// [`Transaction::store`] only: calling [`FileMessageStore::store`] for the
    /// same partition from `f` deadlocks.
    pub fn do_in_transaction<T, F>(&self, partition: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T>,
    {
        self.partition(partition)?.do_in_transaction(f)
    }

    /// Verify the root directory exists and is writable
    pub fn check(&self) -> Result<()> {
        let dir = &self.config.data_dir;
        let metadata = fs::metadata(dir)?;
        if !metadata.is_dir() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::Other,
                format!("{} is not a directory", dir.display()),
            )));
        }

        let scratch = dir.join(Self::CHECK_FILENAME);
        OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&scratch)?;
        fs::remove_file(&scratch)?;

        Ok(())
    }

    /// Close every open partition and stop the store
    ///
    /// Stopping is final: later `store`, `fetch`, `max_message_id` and
    /// `do_in_transaction` calls fail with [`StoreError::Stopped`]. Open a new
    /// store over the same directory to continue. Keeps closing after a
    /// failure and returns the first error.
    pub fn stop(&self) -> Result<()> {
        let partitions: Vec<_> = {
            let mut registry = self.partitions.lock();
            self.stopped.store(true, Ordering::Release);
            registry.drain().collect()
        };

        let mut first_error = None;
        for (name, partition) in partitions {
            if let Err(e) = partition.retire() {
                tracing::error!(partition = %name, error = %e, "Failed to close partition");
                first_error.get_or_insert(e);
            }
        }

        tracing::info!("Message store stopped");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Number of partitions currently held in memory
    pub fn open_partition_count(&self) -> usize {
        self.partitions.lock().len()
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Look up or create a partition and make sure its files are loaded
    fn partition(&self, name: &str) -> Result<Arc<MessagePartition>> {
        let partition = self.resolve(name)?;
        partition.ensure_loaded()?;
        Ok(partition)
    }

    /// Look up or create a partition handle; no I/O
    fn resolve(&self, name: &str) -> Result<Arc<MessagePartition>> {
        let mut partitions = self.partitions.lock();
        self.ensure_running()?;
        if let Some(partition) = partitions.get(name) {
            return Ok(Arc::clone(partition));
        }

        let partition = Arc::new(MessagePartition::new(
            self.config.data_dir.clone(),
            name,
            &self.config,
        )?);
        partitions.insert(name.to_string(), Arc::clone(&partition));
        Ok(partition)
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_stopped() {
            return Err(StoreError::Stopped);
        }
        Ok(())
    }

    fn no_messages(partition: &str) -> StoreError {
        StoreError::not_found(format!("Partition {} has no stored messages", partition))
    }
}
