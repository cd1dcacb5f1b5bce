//! # Filer Sync
//!
//! Cross-filer metadata replication.
//!
//! ## Overview
//!
//! Every filer follows the local change feed of each peer filer, replays
//! foreign changes into its own store, checkpoints per-peer progress so a
//! restart resumes close to where it stopped, and republishes everything it
//! observes into one ordered in-process buffer that local readers can tail.
//!
//! ## Key Properties
//!
//! - **Independent**: one pipeline per peer; a failing peer never stalls
//!   the others
//! - **Idempotent**: replaying a change twice equals replaying it once
//! - **Loop-free**: peers sharing the local store are never replayed, and
//!   changes already carrying the local signature are skipped
//! - **Resumable**: offsets are checkpointed every 100 events or every
//!   minute
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use filer_sync::{AggregatorConfig, MetaAggregator};
//! use filer_sync_core::PeerAddress;
//! use filer_sync_feed::MemoryNetwork;
//! use filer_sync_store::SqliteStore;
//!
//! async fn example() {
//!     let store = Arc::new(SqliteStore::open("filer.db").unwrap());
//!     let network = MemoryNetwork::new();
//!
//!     let aggregator = MetaAggregator::open(
//!         PeerAddress::from("filer-a:8888"),
//!         store,
//!         network,
//!         AggregatorConfig::default(),
//!     )
//!     .await
//!     .unwrap();
//!
//!     let mut tail = aggregator.buffer().tail_from(0);
//!     let handle = aggregator.start(vec![PeerAddress::from("filer-b:8888")]);
//!
//!     let entry = tail.next().await;
//!     println!("{} changed at {}", entry.partition_key, entry.ts_ns);
//!
//!     handle.shutdown().await;
//! }
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! peer feed --> pipeline --+--> LogBuffer (every change)
//!                          +--> Replayer --> local store
//!                          +--> OffsetTracker --> local store KV
//! ```

pub mod aggregator;
pub mod config;
pub mod error;
pub mod log_buffer;
pub mod offset;
mod pipeline;
pub mod replay;
mod shutdown;

pub use aggregator::{AggregatorHandle, MetaAggregator};
pub use config::{AggregatorConfig, BufferConfig, CheckpointPolicy};
pub use error::{Result, SyncError};
pub use log_buffer::{FlushSink, LogBuffer, LogEntry, LogTail, WaitOutcome};
pub use offset::OffsetTracker;
pub use replay::{ReplayOutcome, Replayer};
