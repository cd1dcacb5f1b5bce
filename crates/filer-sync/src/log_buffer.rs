//! The aggregation buffer: an in-process, bounded, append-only log of every
//! change this filer has observed, local or foreign.
//!
//! Entries are kept in arrival order and addressed by a process-wide
//! position. Readers tail the log from any position they have seen and are
//! woken on every append and every flush. An optional [`FlushSink`] receives
//! entries that have not been flushed yet.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use filer_sync_core::{FullPath, TsNs};

use crate::config::BufferConfig;
use crate::error::{Result, SyncError};
use crate::shutdown;

/// One buffered change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Arrival position, unique within the process.
    pub position: u64,
    /// Directory the change happened under.
    pub partition_key: FullPath,
    /// The encoded change event.
    pub payload: Bytes,
    /// Origin timestamp of the change.
    pub ts_ns: TsNs,
}

/// Destination for flushed entries.
#[async_trait]
pub trait FlushSink: Send + Sync {
    /// Persist `entries`, given in position order.
    async fn flush(&self, entries: &[LogEntry]) -> Result<()>;
}

/// Why [`LogBuffer::wait_for_more`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// An entry at or past the requested position exists.
    NewData,
    /// The buffer was flushed while waiting.
    Flushed,
    /// The deadline passed first.
    TimedOut,
}

/// What waiters observe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Signal {
    /// Position the next append will get.
    head: u64,
    /// Completed flushes.
    flushes: u64,
}

#[derive(Default)]
struct BufferState {
    entries: VecDeque<LogEntry>,
    bytes: usize,
    next_position: u64,
    /// Entries before this position were handed to the sink.
    flushed_through: u64,
    /// Entries evicted before the sink saw them.
    dropped_unflushed: u64,
}

impl BufferState {
    fn oldest_position(&self) -> u64 {
        self.entries
            .front()
            .map(|e| e.position)
            .unwrap_or(self.next_position)
    }
}

/// The aggregation buffer.
pub struct LogBuffer {
    config: BufferConfig,
    state: Mutex<BufferState>,
    signal: watch::Sender<Signal>,
    sink: Option<Arc<dyn FlushSink>>,
    /// Serializes flushes so the sink sees each entry once.
    flush_lock: tokio::sync::Mutex<()>,
}

impl LogBuffer {
    /// Create a buffer with no flush sink.
    pub fn new(config: BufferConfig) -> Arc<Self> {
        Self::build(config, None)
    }

    /// Create a buffer that hands entries to `sink` when flushed.
    pub fn with_sink(config: BufferConfig, sink: Arc<dyn FlushSink>) -> Arc<Self> {
        Self::build(config, Some(sink))
    }

    fn build(config: BufferConfig, sink: Option<Arc<dyn FlushSink>>) -> Arc<Self> {
        let (signal, _) = watch::channel(Signal::default());
        Arc::new(Self {
            config,
            state: Mutex::new(BufferState::default()),
            signal,
            sink,
            flush_lock: tokio::sync::Mutex::new(()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append a change and wake every waiting reader. Returns its position.
    pub fn append(&self, partition_key: FullPath, payload: impl Into<Bytes>, ts_ns: TsNs) -> u64 {
        let payload = payload.into();
        let position = {
            let mut state = self.lock();
            let position = state.next_position;
            state.next_position += 1;
            state.bytes += payload.len();
            state.entries.push_back(LogEntry {
                position,
                partition_key,
                payload,
                ts_ns,
            });
            self.evict(&mut state);
            position
        };

        self.signal.send_modify(|s| s.head = position + 1);
        position
    }

    /// Drop the oldest entries until the buffer is within its limits. The
    /// newest entry is always kept.
    fn evict(&self, state: &mut BufferState) {
        let mut dropped = 0u64;
        while state.entries.len() > 1
            && (state.entries.len() > self.config.max_entries
                || state.bytes > self.config.max_bytes)
        {
            let Some(evicted) = state.entries.pop_front() else {
                break;
            };
            state.bytes -= evicted.payload.len();
            if self.sink.is_some() && evicted.position >= state.flushed_through {
                dropped += 1;
            }
        }

        if dropped > 0 {
            state.dropped_unflushed += dropped;
            // Keep the sink from asking for entries that are gone.
            state.flushed_through = state.flushed_through.max(state.oldest_position());
            tracing::warn!(
                dropped,
                total = state.dropped_unflushed,
                "evicted buffered changes before they were flushed"
            );
        }
    }

    /// Position the next append will get.
    pub fn head(&self) -> u64 {
        self.lock().next_position
    }

    /// Position of the oldest retained entry, or the head when empty.
    pub fn oldest_position(&self) -> u64 {
        self.lock().oldest_position()
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries evicted before they reached the sink.
    pub fn dropped_unflushed(&self) -> u64 {
        self.lock().dropped_unflushed
    }

    /// Read entries from `position` onwards.
    pub fn tail_from(self: &Arc<Self>, position: u64) -> LogTail {
        LogTail {
            buffer: Arc::clone(self),
            next: position,
            missed: 0,
            prefix: None,
        }
    }

    /// Wait until an entry at or past `position` exists, the buffer is
    /// flushed, or `deadline` passes.
    pub async fn wait_for_more(&self, position: u64, deadline: Instant) -> WaitOutcome {
        let mut rx = self.signal.subscribe();
        let flushes_at_start = rx.borrow().flushes;

        loop {
            let signal = *rx.borrow_and_update();
            if signal.head > position {
                return WaitOutcome::NewData;
            }
            if signal.flushes != flushes_at_start {
                return WaitOutcome::Flushed;
            }

            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return WaitOutcome::TimedOut,
            }
        }
    }

    /// Wait with no deadline until an entry at or past `position` exists.
    async fn wait_past(&self, position: u64) {
        let mut rx = self.signal.subscribe();
        loop {
            if rx.borrow_and_update().head > position {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Hand every not yet flushed entry to the sink and wake waiters.
    ///
    /// Returns the number of entries flushed. Without a sink this only
    /// wakes waiters.
    pub async fn flush(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock().await;

        let batch: Vec<LogEntry> = {
            let state = self.lock();
            let from = state.flushed_through;
            state
                .entries
                .iter()
                .filter(|e| e.position >= from)
                .cloned()
                .collect()
        };

        let flushed = match (&self.sink, batch.last()) {
            (Some(sink), Some(last)) => {
                sink.flush(&batch)
                    .await
                    .map_err(|e| SyncError::Buffer(format!("flush sink failed: {}", e)))?;
                let mut state = self.lock();
                state.flushed_through = state.flushed_through.max(last.position + 1);
                batch.len()
            }
            (Some(_), None) => 0,
            (None, _) => {
                let mut state = self.lock();
                state.flushed_through = state.next_position;
                0
            }
        };

        self.signal.send_modify(|s| s.flushes += 1);
        tracing::trace!(flushed, "flushed aggregation buffer");
        Ok(flushed)
    }

    /// Flush every `flush_interval` until `true` is sent on `shutdown`, then
    /// flush once more. A dropped sender leaves the flusher running.
    pub fn spawn_flusher(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let buffer = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(buffer.config.flush_interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = buffer.flush().await {
                            tracing::warn!(error = %e, "periodic buffer flush failed");
                        }
                    }
                    _ = shutdown::requested(&mut shutdown) => break,
                }
            }

            if let Err(e) = buffer.flush().await {
                tracing::warn!(error = %e, "final buffer flush failed");
            }
        })
    }
}

/// A reader over the buffer.
///
/// Restartable: a new tail from any earlier [`LogTail::position`] resumes
/// where that reader was, as long as those entries are still retained.
pub struct LogTail {
    buffer: Arc<LogBuffer>,
    next: u64,
    missed: u64,
    prefix: Option<FullPath>,
}

impl LogTail {
    /// Only yield entries whose partition key lies under `prefix`.
    pub fn with_path_prefix(mut self, prefix: FullPath) -> Self {
        self.prefix = Some(prefix);
        self
    }

    /// Position of the next entry this reader will consider.
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Entries evicted before this reader got to them.
    pub fn missed(&self) -> u64 {
        self.missed
    }

    /// The next entry, if one is available now.
    pub fn try_next(&mut self) -> Option<LogEntry> {
        let state = self.buffer.lock();

        let oldest = state.oldest_position();
        if self.next < oldest {
            let skipped = oldest - self.next;
            self.missed += skipped;
            tracing::warn!(
                skipped,
                from = self.next,
                to = oldest,
                "tail reader fell behind buffer retention"
            );
            self.next = oldest;
        }

        let start = usize::try_from(self.next - oldest).unwrap_or(usize::MAX);
        for entry in state.entries.iter().skip(start) {
            self.next = entry.position + 1;
            let wanted = self
                .prefix
                .as_ref()
                .map_or(true, |prefix| entry.partition_key.is_under(prefix));
            if wanted {
                return Some(entry.clone());
            }
        }
        None
    }

    /// The next entry, waiting for one to be appended if necessary.
    pub async fn next(&mut self) -> LogEntry {
        loop {
            if let Some(entry) = self.try_next() {
                return entry;
            }
            self.buffer.wait_past(self.next).await;
        }
    }

    /// The next entry, or `None` if none arrives before `deadline`.
    pub async fn next_before(&mut self, deadline: Instant) -> Option<LogEntry> {
        loop {
            if let Some(entry) = self.try_next() {
                return Some(entry);
            }
            if self.buffer.wait_for_more(self.next, deadline).await == WaitOutcome::TimedOut {
                return None;
            }
        }
    }
}
