//! # Filer Sync Testkit
//!
//! Testing utilities for filer metadata sync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: [`EventFactory`] for timestamped change events, entry
//!   builders, a tracing setup for tests
//! - **Generators**: Proptest strategies for paths, entries and mutation
//!   sequences
//! - **Fault injection**: [`FlakyStore`], a store wrapper whose writes can
//!   be made to fail
//!
//! ## Test Fixtures
//!
//! ```rust
//! use filer_sync_testkit::fixtures::EventFactory;
//!
//! let mut events = EventFactory::starting_at(1_000);
//! let created = events.create("/docs", "a.txt");
//! let deleted = events.delete("/docs", "a.txt");
//! assert!(deleted.ts_ns > created.ts_ns);
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use filer_sync_testkit::generators::mutation_sequence;
//!
//! proptest! {
//!     #[test]
//!     fn replay_is_idempotent(mutations in mutation_sequence(20)) {
//!         // ...
//!     }
//! }
//! ```

pub mod fixtures;
pub mod flaky;
pub mod generators;

pub use fixtures::{file_entry, init_tracing, EventFactory};
pub use flaky::FlakyStore;
pub use generators::{directory, entry, entry_name, mutation_sequence, Mutation};
