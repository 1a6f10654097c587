//! Fetch Module
//!
//! Directional range queries over a partition.
//!
//! A fetch is answered in two stages:
//! 1. The planner resolves the request into an ordered list of [`FetchEntry`]
//!    addresses using only index data.
//! 2. A worker thread reads each entry's payload and streams it to the caller
//!    through a [`FetchStream`].

mod stream;

use bytes::Bytes;

use crate::error::{Result, StoreError};
use crate::storage::validate_partition_name;

pub use stream::{Fetch, FetchStream};

/// Scan direction of a fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Floor search: start at the largest stored id `<= start_id` and walk down
    Backward,
    /// Ceiling search: start at `start_id` if stored, otherwise at the next
    /// stored id above it, and walk up
    #[default]
    ExactOrAfter,
    /// Walk up from the smallest stored id `>= start_id`; scans like
    /// `ExactOrAfter`
    Forward,
}

impl Direction {
    /// Map the broker's signed direction (-1, 0, 1)
    pub fn from_signed(direction: i8) -> Result<Self> {
        match direction {
            -1 => Ok(Self::Backward),
            0 => Ok(Self::ExactOrAfter),
            1 => Ok(Self::Forward),
            other => Err(StoreError::invalid_request(format!(
                "Unknown fetch direction: {}",
                other
            ))),
        }
    }

    pub fn is_backward(self) -> bool {
        self == Self::Backward
    }
}

/// A directional range query against one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub partition: String,
    pub start_id: u64,
    /// Far bound of the scan (inclusive): ids above it are dropped when
    /// scanning up, ids below it when scanning down
    pub end_id: Option<u64>,
    pub direction: Direction,
    /// Maximum number of messages to return
    pub count: usize,
}

impl FetchRequest {
    /// A ceiling fetch of one message at `start_id`
    pub fn new(partition: impl Into<String>, start_id: u64) -> Self {
        Self {
            partition: partition.into(),
            start_id,
            end_id: None,
            direction: Direction::ExactOrAfter,
            count: 1,
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn count(mut self, count: usize) -> Self {
        self.count = count;
        self
    }

    pub fn end_id(mut self, end_id: u64) -> Self {
        self.end_id = Some(end_id);
        self
    }

    pub fn validate(&self) -> Result<()> {
        validate_partition_name(&self.partition)?;
        if self.count == 0 {
            return Err(StoreError::invalid_request(
                "Fetch count must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Address of a stored message, resolved from the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchEntry {
    pub id: u64,
    /// Payload offset in the shard log file
    pub offset: u64,
    pub size: u32,
    /// First id of the shard holding the message
    pub shard_id: u64,
}

/// A fetched message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAndId {
    pub id: u64,
    pub payload: Bytes,
}
