//! Transport abstraction for change feed subscriptions.
//!
//! A transport dials a peer filer and opens its local metadata change
//! stream. Implementations may use gRPC, HTTP streaming, or anything else.

use async_trait::async_trait;

use filer_sync_core::{ChangeEvent, PeerAddress, StoreSignature};

use crate::error::Result;
use crate::messages::SubscribeRequest;

/// One open subscription.
#[async_trait]
pub trait EventStream: Send {
    /// Receive the next change.
    ///
    /// Blocks until a change is available. Returns `Ok(None)` when the peer
    /// ends the stream cleanly.
    async fn recv(&mut self) -> Result<Option<ChangeEvent>>;
}

/// Transport trait for reaching peer filers.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribe to the local metadata changes of `peer`.
    async fn subscribe_local_metadata(
        &self,
        peer: &PeerAddress,
        request: SubscribeRequest,
    ) -> Result<Box<dyn EventStream>>;

    /// Ask `peer` for the signature of its backing store.
    async fn store_signature(&self, peer: &PeerAddress) -> Result<StoreSignature>;
}

/// An in-memory transport for testing.
///
/// Each simulated filer owns an append-only change log. Streams replay the
/// log from the requested offset and then follow live appends. Faults can be
/// injected per peer.
pub mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex, MutexGuard};
    use tokio::sync::watch;

    use crate::error::FeedError;

    /// How the next opened stream misbehaves.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum StreamFault {
        /// Fail with a transport error after delivering this many events.
        ErrorAfter(usize),
        /// End cleanly after delivering this many events.
        CloseAfter(usize),
    }

    #[derive(Default)]
    struct FeedState {
        log: Vec<ChangeEvent>,
        /// Bumped to break every open stream.
        generation: u64,
        failing_subscribes: usize,
        failing_signatures: usize,
        next_stream_fault: Option<StreamFault>,
        requests: Vec<SubscribeRequest>,
    }

    struct PeerFeed {
        signature: StoreSignature,
        state: Mutex<FeedState>,
        /// Bumped on every append or generation change.
        changed: watch::Sender<u64>,
    }

    impl PeerFeed {
        fn lock(&self) -> MutexGuard<'_, FeedState> {
            self.state.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn notify(&self) {
            self.changed.send_modify(|v| *v += 1);
        }
    }

    /// Shared state for a network of simulated filers.
    pub struct MemoryNetwork {
        peers: Mutex<HashMap<PeerAddress, Arc<PeerFeed>>>,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        /// Register a filer reachable at `address`.
        pub fn add_peer(&self, address: impl Into<PeerAddress>, signature: StoreSignature) {
            let (changed, _) = watch::channel(0);
            let feed = Arc::new(PeerFeed {
                signature,
                state: Mutex::new(FeedState::default()),
                changed,
            });
            self.peers_lock().insert(address.into(), feed);
        }

        /// Take a filer off the network. Open streams to it end with an
        /// error.
        pub fn remove_peer(&self, address: &PeerAddress) {
            if let Some(feed) = self.peers_lock().remove(address) {
                feed.lock().generation += 1;
                feed.notify();
            }
        }

        /// Record a local change at `address`, visible to all subscribers.
        pub fn publish(&self, address: &PeerAddress, event: ChangeEvent) -> Result<()> {
            let feed = self.feed(address)?;
            feed.lock().log.push(event);
            feed.notify();
            Ok(())
        }

        /// Make the next `count` subscribe calls to `address` fail.
        pub fn fail_next_subscribes(&self, address: &PeerAddress, count: usize) -> Result<()> {
            self.feed(address)?.lock().failing_subscribes = count;
            Ok(())
        }

        /// Make the next `count` signature lookups on `address` fail.
        pub fn fail_next_signatures(&self, address: &PeerAddress, count: usize) -> Result<()> {
            self.feed(address)?.lock().failing_signatures = count;
            Ok(())
        }

        /// The next stream opened to `address` errors after `delivered`
        /// events.
        pub fn error_stream_after(&self, address: &PeerAddress, delivered: usize) -> Result<()> {
            self.feed(address)?.lock().next_stream_fault = Some(StreamFault::ErrorAfter(delivered));
            Ok(())
        }

        /// The next stream opened to `address` ends cleanly after
        /// `delivered` events.
        pub fn close_stream_after(&self, address: &PeerAddress, delivered: usize) -> Result<()> {
            self.feed(address)?.lock().next_stream_fault = Some(StreamFault::CloseAfter(delivered));
            Ok(())
        }

        /// Break every stream currently open to `address`.
        pub fn reset_streams(&self, address: &PeerAddress) -> Result<()> {
            let feed = self.feed(address)?;
            feed.lock().generation += 1;
            feed.notify();
            Ok(())
        }

        /// Every subscribe request `address` has received, in order.
        pub fn subscriptions(&self, address: &PeerAddress) -> Vec<SubscribeRequest> {
            match self.feed(address) {
                Ok(feed) => feed.lock().requests.clone(),
                Err(_) => Vec::new(),
            }
        }

        fn peers_lock(&self) -> MutexGuard<'_, HashMap<PeerAddress, Arc<PeerFeed>>> {
            self.peers.lock().unwrap_or_else(|e| e.into_inner())
        }

        fn feed(&self, address: &PeerAddress) -> Result<Arc<PeerFeed>> {
            self.peers_lock()
                .get(address)
                .cloned()
                .ok_or_else(|| FeedError::PeerNotFound(address.clone()))
        }
    }

    impl Default for MemoryNetwork {
        fn default() -> Self {
            Self {
                peers: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Transport for MemoryNetwork {
        async fn subscribe_local_metadata(
            &self,
            peer: &PeerAddress,
            request: SubscribeRequest,
        ) -> Result<Box<dyn EventStream>> {
            let feed = self.feed(peer)?;
            let (generation, fault) = {
                let mut state = feed.lock();
                state.requests.push(request.clone());
                if state.failing_subscribes > 0 {
                    state.failing_subscribes -= 1;
                    return Err(FeedError::Transport(format!(
                        "connection refused by {}",
                        peer
                    )));
                }
                (state.generation, state.next_stream_fault.take())
            };

            let changed = feed.changed.subscribe();
            Ok(Box::new(MemoryEventStream {
                feed,
                request,
                generation,
                fault,
                cursor: 0,
                delivered: 0,
                changed,
            }))
        }

        async fn store_signature(&self, peer: &PeerAddress) -> Result<StoreSignature> {
            let feed = self.feed(peer)?;
            let mut state = feed.lock();
            if state.failing_signatures > 0 {
                state.failing_signatures -= 1;
                return Err(FeedError::Transport(format!("{} unavailable", peer)));
            }
            Ok(feed.signature)
        }
    }

    /// Stream over one simulated filer's change log.
    struct MemoryEventStream {
        feed: Arc<PeerFeed>,
        request: SubscribeRequest,
        generation: u64,
        fault: Option<StreamFault>,
        /// Index of the next log entry to inspect.
        cursor: usize,
        delivered: usize,
        changed: watch::Receiver<u64>,
    }

    #[async_trait]
    impl EventStream for MemoryEventStream {
        async fn recv(&mut self) -> Result<Option<ChangeEvent>> {
            loop {
                match self.fault {
                    Some(StreamFault::ErrorAfter(n)) if self.delivered >= n => {
                        return Err(FeedError::Transport("stream reset by peer".into()));
                    }
                    Some(StreamFault::CloseAfter(n)) if self.delivered >= n => {
                        return Ok(None);
                    }
                    _ => {}
                }

                // Mark the current version seen before scanning, so an
                // append racing with the scan still wakes us below.
                let _ = self.changed.borrow_and_update();
                {
                    let state = self.feed.lock();
                    if state.generation != self.generation {
                        return Err(FeedError::Transport("connection reset".into()));
                    }
                    while let Some(event) = state.log.get(self.cursor) {
                        self.cursor += 1;
                        if self.request.wants(&event.directory, event.ts_ns) {
                            self.delivered += 1;
                            return Ok(Some(event.clone()));
                        }
                    }
                }

                if self.changed.changed().await.is_err() {
                    return Ok(None);
                }
            }
        }
    }
}
