//! # Filer Sync Feed
//!
//! Subscriptions to the local metadata change feed of peer filers.
//!
//! ## Overview
//!
//! A filer follows each peer by opening one long-lived stream of that
//! peer's local changes, starting at a timestamp offset. The stream is
//! infinite until the peer ends it (`Ok(None)`) or it fails.
//!
//! ## Key Types
//!
//! - [`Transport`] / [`EventStream`] - How peers are reached
//! - [`ChangeFeedClient`] - Builds subscribe requests for this filer
//! - [`MemoryNetwork`] - In-process transport with fault injection, for tests
//!
//! ## Usage
//!
//! ```rust,no_run
//! use filer_sync_core::{PeerAddress, StoreSignature, TsNs};
//! use filer_sync_feed::{ChangeFeedClient, MemoryNetwork};
//!
//! async fn example() {
//!     let network = MemoryNetwork::new();
//!     let peer = PeerAddress::from("filer-b:8888");
//!     network.add_peer(peer.clone(), StoreSignature(7));
//!
//!     let client = ChangeFeedClient::new(network, PeerAddress::from("filer-a:8888"));
//!     let mut stream = client.open(&peer, TsNs(0)).await.unwrap();
//!     while let Some(event) = stream.recv().await.unwrap() {
//!         println!("{} at {}", event.directory, event.ts_ns);
//!     }
//! }
//! ```

pub mod client;
pub mod error;
pub mod messages;
pub mod transport;

pub use client::ChangeFeedClient;
pub use error::{FeedError, Result};
pub use messages::{SubscribeRequest, CLIENT_NAME_PREFIX};
pub use transport::{memory::MemoryNetwork, EventStream, Transport};
