//! Fetch delivery
//!
//! A fetch runs on its own worker thread. The worker plans the fetch, reports
//! how many messages will follow, then reads and sends them one at a time in
//! ascending id order. The caller sees a single result: either the error that
//! stopped planning, or a [`FetchStream`] of known length.
//!
//! The channel between worker and caller is bounded, so the worker never reads
//! far ahead of its consumer. Dropping the [`Fetch`] or [`FetchStream`] makes
//! the worker's next send fail, and it stops reading.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::error::{Result, StoreError};
use crate::storage::{MessagePartition, ShardReader};

use super::{FetchEntry, FetchRequest, MessageAndId};

/// Events sent by the worker, in order: one `Planned` or `Failed`, then
/// `Message`s, optionally ended by one `Failed`
enum FetchEvent {
    Planned(usize),
    Message(MessageAndId),
    Failed(StoreError),
}

/// A fetch in progress, before its plan is known
pub struct Fetch {
    partition: String,
    events: Receiver<FetchEvent>,
}

impl Fetch {
    /// Start the worker thread for `request`
    pub(crate) fn spawn(
        partition: Arc<MessagePartition>,
        request: FetchRequest,
        buffer: usize,
    ) -> Result<Self> {
        let (sender, events) = channel::bounded(buffer.max(1));
        let name = request.partition.clone();

        thread::Builder::new()
            .name(format!("fetch-{}", name))
            .spawn(move || run_fetch(&partition, &request, &sender))?;

        Ok(Self {
            partition: name,
            events,
        })
    }

    /// Block until the fetch is planned
    ///
    /// Returns the planning error, or a stream of the planned messages.
    pub fn wait(self) -> Result<FetchStream> {
        match self.events.recv() {
            Ok(event) => self.into_stream(event),
            Err(_) => Err(self.disconnected()),
        }
    }

    /// Like [`Fetch::wait`], giving up after `timeout`
    ///
    /// On timeout the fetch is dropped and its worker stops.
    pub fn wait_timeout(self, timeout: Duration) -> Result<FetchStream> {
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.into_stream(event),
            Err(RecvTimeoutError::Timeout) => Err(StoreError::Timeout(format!(
                "Fetch from {} was not planned within {:?}",
                self.partition, timeout
            ))),
            Err(RecvTimeoutError::Disconnected) => Err(self.disconnected()),
        }
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    fn into_stream(self, event: FetchEvent) -> Result<FetchStream> {
        match event {
            FetchEvent::Planned(len) => Ok(FetchStream {
                partition: self.partition,
                len,
                delivered: 0,
                finished: len == 0,
                events: self.events,
            }),
            FetchEvent::Failed(err) => Err(err),
            FetchEvent::Message(_) => Err(StoreError::Disconnected(format!(
                "Fetch from {} sent a message before its plan",
                self.partition
            ))),
        }
    }

    fn disconnected(&self) -> StoreError {
        StoreError::Disconnected(format!(
            "Fetch worker for {} exited before planning",
            self.partition
        ))
    }
}

/// Ordered messages of a planned fetch
///
/// Yields at most [`FetchStream::len`] messages ascending by id. A read
/// failure is yielded once as an error and ends the stream.
pub struct FetchStream {
    partition: String,
    len: usize,
    delivered: usize,
    finished: bool,
    events: Receiver<FetchEvent>,
}

impl FetchStream {
    /// Number of messages the plan promised
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of messages yielded so far
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Next message, giving up after `timeout`
    ///
    /// A timeout is reported as an error but leaves the stream usable.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<Result<MessageAndId>> {
        if self.finished {
            return None;
        }
        match self.events.recv_timeout(timeout) {
            Ok(event) => self.accept(Some(event)),
            Err(RecvTimeoutError::Timeout) => Some(Err(StoreError::Timeout(format!(
                "No message from {} within {:?}",
                self.partition, timeout
            )))),
            Err(RecvTimeoutError::Disconnected) => self.accept(None),
        }
    }

    fn accept(&mut self, event: Option<FetchEvent>) -> Option<Result<MessageAndId>> {
        match event {
            Some(FetchEvent::Message(message)) => {
                self.delivered += 1;
                self.finished = self.delivered >= self.len;
                Some(Ok(message))
            }
            Some(FetchEvent::Failed(err)) => {
                self.finished = true;
                Some(Err(err))
            }
            Some(FetchEvent::Planned(_)) | None => {
                self.finished = true;
                Some(Err(StoreError::Disconnected(format!(
                    "Fetch from {} ended after {} of {} messages",
                    self.partition, self.delivered, self.len
                ))))
            }
        }
    }
}

impl Iterator for FetchStream {
    type Item = Result<MessageAndId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let event = self.events.recv().ok();
        self.accept(event)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.finished {
            (0, Some(0))
        } else {
            (0, Some(self.len - self.delivered))
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

fn run_fetch(partition: &MessagePartition, request: &FetchRequest, events: &Sender<FetchEvent>) {
    let entries = match partition.plan_fetch(request) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::error!(partition = %request.partition, error = %err, "Fetch planning failed");
            let _ = events.send(FetchEvent::Failed(err));
            return;
        }
    };

    if events.send(FetchEvent::Planned(entries.len())).is_err() {
        tracing::debug!(partition = %request.partition, "Fetch abandoned before delivery");
        return;
    }

    let mut reader = None;
    for entry in &entries {
        let payload = match read_entry(partition, &mut reader, entry) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(
                    partition = %request.partition,
                    id = entry.id,
                    error = %err,
                    "Fetch read failed"
                );
                let _ = events.send(FetchEvent::Failed(err));
                return;
            }
        };

        let message = MessageAndId {
            id: entry.id,
            payload,
        };
        if events.send(FetchEvent::Message(message)).is_err() {
            tracing::debug!(
                partition = %request.partition,
                id = entry.id,
                "Fetch consumer went away, stopping"
            );
            return;
        }
    }

    tracing::debug!(
        partition = %request.partition,
        count = entries.len(),
        "Fetch delivered"
    );
}

/// Read one entry, reusing the open shard reader while entries stay in the
/// same shard
fn read_entry(
    partition: &MessagePartition,
    reader: &mut Option<ShardReader>,
    entry: &FetchEntry,
) -> Result<Bytes> {
    let shard_reader = match reader.take() {
        Some(open) if open.first_id() == entry.shard_id => reader.insert(open),
        _ => reader.insert(ShardReader::open(
            &partition.log_path(entry.shard_id),
            entry.shard_id,
        )?),
    };
    shard_reader.read_entry(entry)
}
