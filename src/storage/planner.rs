//! Fetch Planner
//!
//! Turns a [`FetchRequest`] into the ordered list of [`FetchEntry`] addresses
//! that satisfy it, using shard metadata and index slots only. No payload
//! bytes are read here.
//!
//! ## Algorithm
//! 1. Select candidate shards by their `[min_id, max_id]` range: shards that
//!    reach `start_id` or beyond when scanning up, shards that reach down to
//!    `start_id` or below when scanning down.
//! 2. Visit them in ascending `first_id` order (up) or descending (down),
//!    scanning index slots from the one nearest `start_id` and skipping gaps.
//! 3. Stop once `count` entries are collected, the `end_id` bound is crossed,
//!    or the candidates run out.
//! 4. Return the entries ascending by id whatever the scan direction.

use crate::codec::IndexRecord;
use crate::error::Result;
use crate::fetch::{FetchEntry, FetchRequest};

use super::ShardMeta;

/// Plan a fetch over `shards` (ascending by `first_id`)
///
/// `load_index` is called once per visited shard to obtain its index slots.
pub fn plan<F>(shards: &[ShardMeta], request: &FetchRequest, load_index: F) -> Result<Vec<FetchEntry>>
where
    F: FnMut(&ShardMeta) -> Result<Vec<IndexRecord>>,
{
    if request.direction.is_backward() {
        plan_backward(shards, request, load_index)
    } else {
        plan_forward(shards, request, load_index)
    }
}

fn plan_forward<F>(
    shards: &[ShardMeta],
    request: &FetchRequest,
    mut load_index: F,
) -> Result<Vec<FetchEntry>>
where
    F: FnMut(&ShardMeta) -> Result<Vec<IndexRecord>>,
{
    let start = request.start_id;
    let mut entries = Vec::new();

    for shard in shards {
        match shard.index_range() {
            Some((_, max_id)) if max_id >= start => {}
            _ => continue,
        }
        if request.end_id.map_or(false, |end| shard.first_id > end) {
            break;
        }

        let index = load_index(shard)?;
        let from = usize::try_from(start.saturating_sub(shard.first_id)).unwrap_or(usize::MAX);

        for (slot, record) in index.iter().enumerate().skip(from) {
            if record.is_gap() {
                continue;
            }
            let id = shard.first_id + slot as u64;
            if request.end_id.map_or(false, |end| id > end) {
                return Ok(entries);
            }

            entries.push(to_entry(shard, id, record));
            if entries.len() >= request.count {
                return Ok(entries);
            }
        }
    }

    Ok(entries)
}

fn plan_backward<F>(
    shards: &[ShardMeta],
    request: &FetchRequest,
    mut load_index: F,
) -> Result<Vec<FetchEntry>>
where
    F: FnMut(&ShardMeta) -> Result<Vec<IndexRecord>>,
{
    let start = request.start_id;
    let mut entries = Vec::new();

    'shards: for shard in shards.iter().rev() {
        let max_id = match shard.index_range() {
            Some((min_id, max_id)) if min_id <= start => max_id,
            _ => continue,
        };
        if request.end_id.map_or(false, |end| max_id < end) {
            break;
        }

        let index = load_index(shard)?;
        if index.is_empty() {
            continue;
        }
        let top = (start - shard.first_id).min(index.len() as u64 - 1) as usize;

        for slot in (0..=top).rev() {
            let record = &index[slot];
            if record.is_gap() {
                continue;
            }
            let id = shard.first_id + slot as u64;
            if request.end_id.map_or(false, |end| id < end) {
                break 'shards;
            }

            entries.push(to_entry(shard, id, record));
            if entries.len() >= request.count {
                break 'shards;
            }
        }
    }

    entries.reverse();
    Ok(entries)
}

fn to_entry(shard: &ShardMeta, id: u64, record: &IndexRecord) -> FetchEntry {
    FetchEntry {
        id,
        offset: record.offset,
        size: record.size,
        shard_id: shard.first_id,
    }
}
