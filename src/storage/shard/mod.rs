//! Shard Module
//!
//! One shard covers the id range `[first_id, first_id + messages_per_file)` of
//! a partition and is backed by a log file plus a dense index file.
//!
//! ## Write Ordering
//! Payload bytes are appended to the log before the index slot that points at
//! them is written, so a reader that sees a populated slot can always read the
//! bytes it references.

mod reader;
mod writer;

pub use reader::{read_index, ShardReader};
pub use writer::ShardWriter;

use crate::codec::IndexRecord;

/// In-memory summary of a shard, used to select candidate shards for a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardMeta {
    /// First id of the shard's range (its identity)
    pub first_id: u64,
    /// Smallest and largest id with a populated slot
    range: Option<(u64, u64)>,
}

impl ShardMeta {
    /// A shard with no stored messages
    pub fn empty(first_id: u64) -> Self {
        Self {
            first_id,
            range: None,
        }
    }

    /// Derive the id range from a shard's index slots
    pub fn from_index(first_id: u64, index: &[IndexRecord]) -> Self {
        let first = index.iter().position(|slot| !slot.is_gap());
        let last = index.iter().rposition(|slot| !slot.is_gap());

        let range = match (first, last) {
            (Some(lo), Some(hi)) => Some((first_id + lo as u64, first_id + hi as u64)),
            _ => None,
        };

        Self { first_id, range }
    }

    /// `(min_id, max_id)` of the stored messages, `None` if the shard is empty
    pub fn index_range(&self) -> Option<(u64, u64)> {
        self.range
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_none()
    }

    /// Widen the range to include a newly stored id
    pub fn record(&mut self, id: u64) {
        self.range = Some(match self.range {
            Some((min, max)) => (min.min(id), max.max(id)),
            None => (id, id),
        });
    }
}
