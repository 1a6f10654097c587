//! Storage Module
//!
//! Partitioned append-only message log.
//!
//! ## Responsibilities
//! - Persist each partition as a sequence of fixed-capacity shards
//! - Recover the append cursor and max message id on restart
//! - Plan directional fetches from shard index metadata
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/
//!   ├── orders-00000000000000000000.msg    (log file, shard [0, C))
//!   ├── orders-00000000000000000000.idx    (index file, shard [0, C))
//!   ├── orders-00000000000000010000.msg    (shard [C, 2C))
//!   ├── orders-00000000000000010000.idx
//!   └── users-00000000000000000000.msg ... (other partitions, same directory)
//! ```
//!
//! The first id is zero-padded to 20 digits so that lexicographic file order
//! equals numeric shard order.

pub mod shard;
pub mod partition;
pub mod planner;

use std::path::{Path, PathBuf};

pub use partition::{MessagePartition, Transaction};
pub use shard::{ShardMeta, ShardReader, ShardWriter};

/// Extension of shard log files
pub const LOG_EXTENSION: &str = "msg";

/// Extension of shard index files
pub const INDEX_EXTENSION: &str = "idx";

/// Generate the log file path of a shard
pub fn log_path(dir: &Path, partition: &str, first_id: u64) -> PathBuf {
    dir.join(shard_file_name(partition, first_id, LOG_EXTENSION))
}

/// Generate the index file path of a shard
pub fn index_path(dir: &Path, partition: &str, first_id: u64) -> PathBuf {
    dir.join(shard_file_name(partition, first_id, INDEX_EXTENSION))
}

fn shard_file_name(partition: &str, first_id: u64, extension: &str) -> String {
    format!("{}-{:020}.{}", partition, first_id, extension)
}

/// Parse an index file name
/// "orders-00000000000000010000.idx" → Some(("orders", 10000))
pub fn parse_index_file_name(file_name: &str) -> Option<(&str, u64)> {
    let stem = file_name.strip_suffix(INDEX_EXTENSION)?.strip_suffix('.')?;
    let (partition, digits) = stem.rsplit_once('-')?;

    if partition.is_empty() || digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    Some((partition, digits.parse().ok()?))
}

/// Reject partition names that cannot be embedded in a file name
pub fn validate_partition_name(name: &str) -> crate::Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(|c| c == '/' || c == '\\' || c == '\0');

    if invalid {
        return Err(crate::StoreError::invalid_request(format!(
            "Invalid partition name: {:?}",
            name
        )));
    }
    Ok(())
}
