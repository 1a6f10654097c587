//! # msgstore
//!
//! The durable message log of a publish/subscribe broker:
//! - One append-only log per partition (topic), split into fixed-capacity shards
//! - Dense per-shard index for O(1) id → offset lookup, with gaps for unused ids
//! - Crash recovery of the append cursor and max message id from shard files
//! - Asynchronous directional fetches (backward / exact-or-after / forward)
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    FileMessageStore                          │
//! │          (partition registry, lazy per-name open)            │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                   MessagePartition                           │
//! │        (single writer, shard rollover, transactions)         │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │ store                            │ fetch
//!            ▼                                  ▼
//!   ┌─────────────────┐                ┌─────────────────┐
//!   │   ShardWriter   │                │  Fetch planner  │
//!   │ (.msg + .idx)   │                │ (index only)    │
//!   └─────────────────┘                └────────┬────────┘
//!                                               ▼
//!                                      ┌─────────────────┐
//!                                      │  Fetch worker   │
//!                                      │ (ShardReader)   │
//!                                      └─────────────────┘
//! ```
//!
//! ## Operational constraint
//!
//! `messages_per_file` fixes the shard boundaries of a data directory. It must
//! not change once data exists; mismatching shards are rejected on open.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod codec;
pub mod storage;
pub mod fetch;
pub mod store;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, StoreError};
pub use config::{Config, SyncStrategy};
pub use fetch::{Direction, Fetch, FetchEntry, FetchRequest, FetchStream, MessageAndId};
pub use storage::{MessagePartition, Transaction};
pub use store::FileMessageStore;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of msgstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
