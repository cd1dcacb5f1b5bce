//! # Filer Sync Core
//!
//! Pure primitives for filer metadata replication: namespace paths, entries,
//! change events and their wire codec.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`FullPath`] - An absolute path in the filer namespace
//! - [`Entry`] - A file or directory with its attributes and chunk pointers
//! - [`EventNotification`] - The mutation carried by a change event
//! - [`ChangeEvent`] - One mutation as observed at its origin filer
//! - [`TsNs`] - Origin timestamp in nanoseconds, used as the feed offset
//! - [`StoreSignature`] - Identity of the storage backing a filer
//!
//! ## Encoding
//!
//! Payloads and buffered events are CBOR. See the [`codec`] module.

pub mod codec;
pub mod entry;
pub mod error;
pub mod event;
pub mod path;
pub mod types;

pub use codec::{decode, encode};
pub use entry::{Attributes, Entry, FileChunk};
pub use error::{CoreError, Result};
pub use event::{ChangeEvent, EventNotification, MutationKind};
pub use path::FullPath;
pub use types::{PeerAddress, StoreSignature, TsNs};
