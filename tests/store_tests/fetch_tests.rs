//! Tests for asynchronous fetches
//!
//! These tests verify:
//! - A fetch reports its length before streaming messages
//! - Messages arrive ascending by id in every direction
//! - Empty fetches, request validation and planning failures
//! - Abandoned fetches do not block the store

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use msgstore::{
    Config, Direction, FetchRequest, FileMessageStore, MessageAndId, StoreError, SyncStrategy,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const TIMEOUT: Duration = Duration::from_secs(10);

fn setup_temp_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

fn open_store(path: impl Into<PathBuf>, messages_per_file: u64, fetch_buffer: usize) -> FileMessageStore {
    let config = Config::builder()
        .data_dir(path)
        .messages_per_file(messages_per_file)
        .sync_strategy(SyncStrategy::EveryWrite)
        .fetch_buffer(fetch_buffer)
        .build();
    FileMessageStore::open(config).unwrap()
}

fn fetch_all(store: &FileMessageStore, request: FetchRequest) -> Vec<MessageAndId> {
    store
        .fetch(request)
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap()
        .collect::<msgstore::Result<Vec<_>>>()
        .unwrap()
}

fn ids(messages: &[MessageAndId]) -> Vec<u64> {
    messages.iter().map(|m| m.id).collect()
}

fn message(id: u64) -> Vec<u8> {
    format!("message-{}", id).into_bytes()
}

// =============================================================================
// Delivery Tests
// =============================================================================

#[test]
fn test_fetch_reports_length_then_streams() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);
    for id in 1..=5 {
        store.store("p1", id, &message(id)).unwrap();
    }

    let fetch = store
        .fetch(FetchRequest::new("p1", 2).direction(Direction::Forward).count(3))
        .unwrap();
    assert_eq!(fetch.partition(), "p1");

    let mut stream = fetch.wait_timeout(TIMEOUT).unwrap();
    assert_eq!(stream.len(), 3);
    assert!(!stream.is_empty());

    let first = stream.next().unwrap().unwrap();
    assert_eq!(first.id, 2);
    assert_eq!(first.payload, Bytes::from(message(2)));
    assert_eq!(stream.delivered(), 1);

    let rest: Vec<_> = stream.map(|m| m.unwrap().id).collect();
    assert_eq!(rest, vec![3, 4]);
}

#[test]
fn test_fetch_round_trip_payloads() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);
    store.store("p1", 1, b"abc").unwrap();
    store.store("p1", 2, b"defgh").unwrap();

    let messages = fetch_all(&store, FetchRequest::new("p1", 0).count(10));

    assert_eq!(
        messages,
        vec![
            MessageAndId {
                id: 1,
                payload: Bytes::from_static(b"abc")
            },
            MessageAndId {
                id: 2,
                payload: Bytes::from_static(b"defgh")
            },
        ]
    );
}

#[test]
fn test_backward_fetch_is_ascending() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);
    for id in 1..=5 {
        store.store("p1", id, &message(id)).unwrap();
    }

    let messages = fetch_all(
        &store,
        FetchRequest::new("p1", 5)
            .direction(Direction::Backward)
            .count(2),
    );

    assert_eq!(ids(&messages), vec![4, 5]);
}

#[test]
fn test_fetch_skips_gaps() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);
    for id in [3u64, 4, 10, 9, 5] {
        store.store("p1", id, &message(id)).unwrap();
    }

    let first = fetch_all(&store, FetchRequest::new("p1", 1).direction(Direction::Forward));
    assert_eq!(ids(&first), vec![3]);
    assert_eq!(first[0].payload, Bytes::from(message(3)));

    let all = fetch_all(&store, FetchRequest::new("p1", 0).count(100));
    assert_eq!(ids(&all), vec![3, 4, 5, 9, 10]);
}

#[test]
fn test_fetch_across_shards_with_small_buffer() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 5, 1);
    for id in 1..=23 {
        store.store("p1", id, &message(id)).unwrap();
    }

    let messages = fetch_all(
        &store,
        FetchRequest::new("p1", 3)
            .direction(Direction::Forward)
            .count(100)
            .end_id(17),
    );

    assert_eq!(ids(&messages), (3..=17).collect::<Vec<u64>>());
    for m in &messages {
        assert_eq!(m.payload, Bytes::from(message(m.id)));
    }
}

// =============================================================================
// Empty / Error Tests
// =============================================================================

#[test]
fn test_fetch_after_stop_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);
    store.store("p1", 1, b"abc").unwrap();
    store.stop().unwrap();

    let result = store.fetch(FetchRequest::new("p1", 0));

    assert!(matches!(result, Err(StoreError::Stopped)));
}

#[test]
fn test_fetch_never_written_partition_is_empty() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);

    let mut stream = store
        .fetch(FetchRequest::new("nobody", 0).count(10))
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap();

    assert_eq!(stream.len(), 0);
    assert!(stream.is_empty());
    assert!(stream.next().is_none());
}

#[test]
fn test_fetch_zero_count_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);

    let result = store.fetch(FetchRequest::new("p1", 0).count(0));

    assert!(matches!(result, Err(StoreError::InvalidRequest(_))));
}

#[test]
fn test_fetch_invalid_partition_rejected() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);

    let result = store.fetch(FetchRequest::new("../escape", 0));

    assert!(matches!(result, Err(StoreError::InvalidRequest(_))));
}

#[test]
fn test_fetch_error_delivered_on_wait() {
    let (_temp, dir) = setup_temp_dir();
    let blocker = dir.join("file");
    fs::write(&blocker, b"not a directory").unwrap();
    let store = open_store(blocker.join("sub"), 100, 64);

    let fetch = store.fetch(FetchRequest::new("p1", 0)).unwrap();
    let result = fetch.wait_timeout(TIMEOUT);

    assert!(result.err().unwrap().is_io_error());
}

#[test]
fn test_fetch_read_error_ends_stream() {
    let (_temp, dir) = setup_temp_dir();
    {
        let store = open_store(&dir, 5, 64);
        store.store("p1", 1, b"abc").unwrap();
        store.store("p1", 2, b"defgh").unwrap();
        store.store("p1", 7, b"xy").unwrap();
        store.stop().unwrap();
    }

    // Lose the tail of the sealed shard's last payload
    let log = dir.join("p1-00000000000000000000.msg");
    let bytes = fs::read(&log).unwrap();
    fs::write(&log, &bytes[..bytes.len() - 2]).unwrap();

    let store = open_store(&dir, 5, 64);
    let mut stream = store
        .fetch(FetchRequest::new("p1", 0).count(10))
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap();

    assert_eq!(stream.len(), 3);
    assert_eq!(stream.next().unwrap().unwrap().id, 1);
    assert!(stream.next().unwrap().unwrap_err().is_corruption());
    assert!(stream.next().is_none());
}

#[test]
fn test_lost_log_tail_recovered_before_fetch() {
    let (_temp, dir) = setup_temp_dir();
    {
        let store = open_store(&dir, 100, 64);
        store.store("p1", 1, b"abc").unwrap();
        store.store("p1", 2, b"defgh").unwrap();
        store.stop().unwrap();
    }

    let log = dir.join("p1-00000000000000000000.msg");
    let bytes = fs::read(&log).unwrap();
    fs::write(&log, &bytes[..bytes.len() - 2]).unwrap();

    let store = open_store(&dir, 100, 64);
    let messages = fetch_all(&store, FetchRequest::new("p1", 0).count(10));

    assert_eq!(ids(&messages), vec![1]);
    assert_eq!(store.max_message_id("p1").unwrap(), 1);
}

#[test]
fn test_corrupt_open_shard_fails_planning() {
    let (_temp, dir) = setup_temp_dir();
    {
        let store = open_store(&dir, 100, 64);
        store.store("p1", 2, b"abcd").unwrap();
        store.store("p1", 1, b"x").unwrap();
        store.stop().unwrap();
    }

    // Id 1's record is gone while id 2, indexed after it, is intact
    let log = dir.join("p1-00000000000000000000.msg");
    let bytes = fs::read(&log).unwrap();
    fs::write(&log, &bytes[..bytes.len() - 1]).unwrap();

    let store = open_store(&dir, 100, 64);
    let result = store
        .fetch(FetchRequest::new("p1", 0).count(10))
        .unwrap()
        .wait_timeout(TIMEOUT);

    assert!(result.err().unwrap().is_corruption());
}

#[test]
fn test_abandoned_fetch_does_not_block_store() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 1);
    for id in 1..=50 {
        store.store("p1", id, &message(id)).unwrap();
    }

    let mut stream = store
        .fetch(FetchRequest::new("p1", 0).count(50))
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap();
    assert_eq!(stream.len(), 50);
    assert_eq!(stream.next().unwrap().unwrap().id, 1);
    drop(stream);

    // An unread fetch is dropped before planning completes
    drop(store.fetch(FetchRequest::new("p1", 0).count(50)).unwrap());

    store.store("p1", 51, b"after").unwrap();
    let latest = fetch_all(
        &store,
        FetchRequest::new("p1", 51).direction(Direction::Backward),
    );
    assert_eq!(ids(&latest), vec![51]);
    store.stop().unwrap();
}

#[test]
fn test_next_timeout_on_live_stream() {
    let (_temp, dir) = setup_temp_dir();
    let store = open_store(&dir, 100, 64);
    store.store("p1", 1, b"abc").unwrap();

    let mut stream = store
        .fetch(FetchRequest::new("p1", 1))
        .unwrap()
        .wait_timeout(TIMEOUT)
        .unwrap();

    let message = stream.next_timeout(TIMEOUT).unwrap().unwrap();
    assert_eq!(message.id, 1);
    assert!(stream.next_timeout(TIMEOUT).is_none());
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_fetch_after_restart_matches_before() {
    let (_temp, dir) = setup_temp_dir();
    let request = FetchRequest::new("p1", 0).count(100);

    let before = {
        let store = open_store(&dir, 7, 64);
        for id in [1u64, 2, 5, 8, 13, 21, 34] {
            store.store("p1", id, &message(id)).unwrap();
        }
        let before = fetch_all(&store, request.clone());
        store.stop().unwrap();
        before
    };

    let store = open_store(&dir, 7, 64);
    let after = fetch_all(&store, request.clone());
    assert_eq!(before, after);

    // Reopening twice changes nothing on disk
    store.stop().unwrap();
    let again = fetch_all(&open_store(&dir, 7, 64), request);
    assert_eq!(after, again);
}

// =============================================================================
// Direction Tests
// =============================================================================

#[test]
fn test_direction_from_signed() {
    assert_eq!(Direction::from_signed(-1).unwrap(), Direction::Backward);
    assert_eq!(Direction::from_signed(0).unwrap(), Direction::ExactOrAfter);
    assert_eq!(Direction::from_signed(1).unwrap(), Direction::Forward);
    assert!(Direction::from_signed(2).unwrap_err().is_invalid_request());
    assert_eq!(Direction::default(), Direction::ExactOrAfter);
}

#[test]
fn test_request_defaults() {
    let request = FetchRequest::new("p1", 7);

    assert_eq!(request.direction, Direction::ExactOrAfter);
    assert_eq!(request.count, 1);
    assert_eq!(request.end_id, None);
    assert!(request.validate().is_ok());
}
