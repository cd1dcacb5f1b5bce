//! One peer's replication pipeline: subscribe, buffer, replay, checkpoint,
//! and retry forever.

use std::sync::Arc;

use tokio::sync::watch;

use filer_sync_core::{ChangeEvent, PeerAddress, StoreSignature, TsNs};
use filer_sync_feed::ChangeFeedClient;
use filer_sync_store::FilerStore;

use crate::config::AggregatorConfig;
use crate::error::{Result, SyncError};
use crate::log_buffer::LogBuffer;
use crate::offset::OffsetTracker;
use crate::replay::Replayer;
use crate::shutdown;

/// How a subscription ended without failing.
enum FollowEnd {
    /// The peer closed the stream; reopen it.
    EndOfStream,
    Shutdown,
}

/// Follows a single peer until shut down.
pub(crate) struct PeerPipeline<S: FilerStore + 'static> {
    peer: PeerAddress,
    feed: ChangeFeedClient,
    store: Arc<S>,
    buffer: Arc<LogBuffer>,
    local_signature: StoreSignature,
    config: AggregatorConfig,
    shutdown: watch::Receiver<bool>,
}

impl<S: FilerStore + 'static> PeerPipeline<S> {
    pub(crate) fn new(
        peer: PeerAddress,
        feed: ChangeFeedClient,
        store: Arc<S>,
        buffer: Arc<LogBuffer>,
        local_signature: StoreSignature,
        config: AggregatorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            peer,
            feed,
            store,
            buffer,
            local_signature,
            config,
            shutdown,
        }
    }

    /// Run until shutdown. Never fails; every error is logged and retried.
    pub(crate) async fn run(mut self) {
        let Some(peer_signature) = self.peer_signature().await else {
            return;
        };

        let replicate = peer_signature != self.local_signature;
        let mut state = if replicate {
            tracing::info!(peer = %self.peer, %peer_signature, "following peer metadata");
            self.replicating_state().await
        } else {
            tracing::info!(
                peer = %self.peer,
                %peer_signature,
                "peer shares the local store; following without replay"
            );
            PeerState {
                last_seen: TsNs::now().saturating_sub(self.config.replication_window),
                last_processed: None,
                replay: None,
            }
        };

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.follow(&mut state).await {
                Ok(FollowEnd::Shutdown) => break,
                Ok(FollowEnd::EndOfStream) => {
                    tracing::debug!(
                        peer = %self.peer,
                        since_ns = state.last_seen.as_nanos(),
                        "peer ended stream; reopening"
                    );
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    tracing::warn!(
                        peer = %self.peer,
                        error = %e,
                        since_ns = state.last_seen.as_nanos(),
                        "subscription failed; retrying"
                    );
                    if self.sleep_or_shutdown().await {
                        break;
                    }
                }
            }
        }

        if let Some((_, tracker)) = &mut state.replay {
            if let Err(e) = tracker.flush().await {
                tracing::warn!(peer = %self.peer, error = %e, "final checkpoint failed");
            }
        }
        tracing::info!(peer = %self.peer, "stopped following peer");
    }

    /// Ask the peer for its store signature, retrying until it answers.
    /// `None` on shutdown.
    async fn peer_signature(&mut self) -> Option<StoreSignature> {
        loop {
            if *self.shutdown.borrow() {
                return None;
            }
            match self.feed.store_signature(&self.peer).await {
                Ok(signature) => return Some(signature),
                Err(e) => {
                    tracing::warn!(peer = %self.peer, error = %e, "reading peer store signature failed");
                    if self.sleep_or_shutdown().await {
                        return None;
                    }
                }
            }
        }
    }

    async fn replicating_state(&self) -> PeerState<S> {
        let mut tracker = OffsetTracker::new(
            self.peer.clone(),
            Arc::clone(&self.store),
            self.config.checkpoint,
        );

        let last_seen = match tracker.load(self.config.replication_window).await {
            Ok(ts) => ts,
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "reading peer offset failed");
                TsNs::now().saturating_sub(self.config.replication_window)
            }
        };

        PeerState {
            last_seen,
            last_processed: None,
            replay: Some((
                Replayer::new(Arc::clone(&self.store), self.local_signature),
                tracker,
            )),
        }
    }

    /// Open one subscription and drain it.
    async fn follow(&mut self, state: &mut PeerState<S>) -> Result<FollowEnd> {
        let mut stream = self.feed.open(&self.peer, state.last_seen).await?;

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown::requested(&mut self.shutdown) => return Ok(FollowEnd::Shutdown),
                next = stream.recv() => next?,
            };

            match next {
                Some(event) => self.process(state, event).await,
                None => return Ok(FollowEnd::EndOfStream),
            }
        }
    }

    async fn process(&self, state: &mut PeerState<S>, event: ChangeEvent) {
        // Reopening is inclusive of the last seen timestamp.
        if state.last_processed.is_some_and(|last| event.ts_ns <= last) {
            tracing::trace!(peer = %self.peer, ts_ns = event.ts_ns.as_nanos(), "skipping redelivered change");
            return;
        }

        match event.to_bytes() {
            Ok(bytes) => {
                self.buffer
                    .append(event.directory.clone(), bytes, event.ts_ns);
            }
            Err(e) => {
                tracing::warn!(peer = %self.peer, error = %e, "encoding change for buffer failed");
            }
        }

        state.last_seen = event.ts_ns;
        state.last_processed = Some(event.ts_ns);

        let Some((replayer, tracker)) = &mut state.replay else {
            return;
        };

        match replayer.apply(&event).await {
            Ok(_) => {
                if let Err(e) = tracker.mark_applied(event.ts_ns).await {
                    tracing::warn!(peer = %self.peer, error = %e, "checkpointing peer offset failed");
                }
            }
            Err(SyncError::Decode(e)) => {
                tracing::warn!(
                    peer = %self.peer,
                    dir = %event.directory,
                    ts_ns = event.ts_ns.as_nanos(),
                    error = %e,
                    "skipping undecodable change"
                );
            }
            Err(e) => {
                tracing::error!(
                    peer = %self.peer,
                    dir = %event.directory,
                    ts_ns = event.ts_ns.as_nanos(),
                    error = %e,
                    "replaying change failed"
                );
            }
        }
    }

    /// Sleep the retry delay. Returns true if shutdown was requested.
    async fn sleep_or_shutdown(&mut self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(self.config.retry_delay) => *self.shutdown.borrow(),
            _ = shutdown::requested(&mut self.shutdown) => true,
        }
    }
}

/// What one pipeline owns about its peer.
struct PeerState<S: FilerStore> {
    /// Where the next subscription starts.
    last_seen: TsNs,
    /// Highest timestamp handled since this pipeline started.
    last_processed: Option<TsNs>,
    /// Present when the peer's changes are replayed locally.
    replay: Option<(Replayer<S>, OffsetTracker<S>)>,
}
