//! # Filer Sync Store
//!
//! The local metadata store contract consumed by the replication engine,
//! with a SQLite implementation and an in-memory one for tests.
//!
//! ## Key Types
//!
//! - [`FilerStore`] - Entry persistence: insert, update, find, delete, list
//! - [`KvStore`] - Small key/value side table kept next to the entries
//! - [`OffsetStore`] - Durable per-peer replication offsets; every
//!   [`KvStore`] is one
//! - [`SqliteStore`] - SQLite-backed store
//! - [`MemoryStore`] - In-memory store for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use filer_sync_core::{Entry, FullPath, PeerAddress, TsNs};
//! use filer_sync_store::{load_or_create_signature, FilerStore, OffsetStore, SqliteStore};
//!
//! async fn example() {
//!     let store = SqliteStore::open("filer.db").unwrap();
//!     let signature = load_or_create_signature(&store).await.unwrap();
//!
//!     store
//!         .insert_entry(&FullPath::root(), &Entry::directory("buckets"))
//!         .await
//!         .unwrap();
//!
//!     let peer = PeerAddress::from("filer-b:8888");
//!     store.write_offset(&peer, TsNs(1_000)).await.unwrap();
//!     assert_eq!(store.read_offset(&peer).await.unwrap(), Some(TsNs(1_000)));
//!     # let _ = signature;
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Upserting inserts**: `insert_entry` overwrites an existing entry, so
//!   replaying a create twice is harmless.
//! - **Quiet deletes**: deleting a missing entry succeeds.
//! - **Optional offsets**: a store advertises offset persistence through
//!   [`FilerStore::offsets`]; the engine replicates without checkpoints
//!   when it returns `None`.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{
    load_or_create_signature, offset_key, FilerStore, FilerStoreExt, KvStore, OffsetStore,
    SIGNATURE_KEY,
};
