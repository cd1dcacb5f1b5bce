//! Per-peer replication checkpoints.
//!
//! The tracker batches offset writes: progress is made durable every
//! `max_pending` applied events or every `max_interval`, whichever comes
//! first. Replay is idempotent, so a lagging checkpoint only costs some
//! redelivery after a restart.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use filer_sync_core::{PeerAddress, TsNs};
use filer_sync_store::FilerStore;

use crate::config::CheckpointPolicy;
use crate::error::Result;

/// Checkpoint state for one peer.
pub struct OffsetTracker<S: FilerStore> {
    peer: PeerAddress,
    store: Arc<S>,
    policy: CheckpointPolicy,
    /// Applied events since the last durable write.
    pending: usize,
    last_checkpoint: Instant,
    last_applied: Option<TsNs>,
    persisted: Option<TsNs>,
}

impl<S: FilerStore> OffsetTracker<S> {
    /// Create a tracker for `peer`.
    pub fn new(peer: PeerAddress, store: Arc<S>, policy: CheckpointPolicy) -> Self {
        Self {
            peer,
            store,
            policy,
            pending: 0,
            last_checkpoint: Instant::now(),
            last_applied: None,
            persisted: None,
        }
    }

    /// The offset to resume `peer` from.
    ///
    /// The stored offset if there is one, otherwise `now - window`.
    pub async fn load(&mut self, window: Duration) -> Result<TsNs> {
        let stored = match self.store.offsets() {
            Some(offsets) => offsets.read_offset(&self.peer).await?,
            None => None,
        };

        match stored {
            Some(ts) => {
                self.persisted = Some(ts);
                Ok(ts)
            }
            None => Ok(TsNs::now().saturating_sub(window)),
        }
    }

    /// Record that the event at `ts` was applied, writing a checkpoint if
    /// the policy calls for one.
    ///
    /// Returns whether a durable write happened. On a failed write the
    /// pending count and timer are left alone so the next call retries.
    pub async fn mark_applied(&mut self, ts: TsNs) -> Result<bool> {
        self.last_applied = Some(self.last_applied.map_or(ts, |prev| prev.max(ts)));
        self.pending += 1;

        let due = self.pending >= self.policy.max_pending
            || self.last_checkpoint.elapsed() >= self.policy.max_interval;
        if !due {
            return Ok(false);
        }

        self.write().await?;
        Ok(true)
    }

    /// Persist any pending progress now.
    pub async fn flush(&mut self) -> Result<()> {
        if self.pending == 0 {
            return Ok(());
        }
        self.write().await
    }

    async fn write(&mut self) -> Result<()> {
        let Some(ts) = self.last_applied else {
            return Ok(());
        };

        // Never move the persisted offset backwards.
        let advances = self.persisted.map_or(true, |persisted| ts > persisted);
        if advances {
            if let Some(offsets) = self.store.offsets() {
                offsets.write_offset(&self.peer, ts).await?;
                self.persisted = Some(ts);
                tracing::debug!(peer = %self.peer, ts_ns = ts.as_nanos(), "checkpointed peer offset");
            }
        }

        self.pending = 0;
        self.last_checkpoint = Instant::now();
        Ok(())
    }

    /// Applied events not yet covered by a durable write.
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Highest applied timestamp seen so far.
    pub fn last_applied(&self) -> Option<TsNs> {
        self.last_applied
    }

    /// Last offset known to be durable.
    pub fn persisted(&self) -> Option<TsNs> {
        self.persisted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filer_sync_store::{MemoryStore, OffsetStore};
    use filer_sync_testkit::FlakyStore;

    fn peer() -> PeerAddress {
        PeerAddress::from("filer-b:8888")
    }

    fn tracker<S: FilerStore>(store: &Arc<S>) -> OffsetTracker<S> {
        OffsetTracker::new(peer(), Arc::clone(store), CheckpointPolicy::default())
    }

    #[tokio::test]
    async fn test_load_defaults_to_window_start() {
        let store = Arc::new(MemoryStore::new());
        let before = TsNs::now().saturating_sub(Duration::from_secs(60));

        let start = tracker(&store).load(Duration::from_secs(60)).await.unwrap();
        assert!(start >= before);
        assert!(start <= TsNs::now());
    }

    #[tokio::test]
    async fn test_load_uses_stored_offset() {
        let store = Arc::new(MemoryStore::new());
        store.write_offset(&peer(), TsNs(1000)).await.unwrap();

        let mut t = tracker(&store);
        assert_eq!(t.load(Duration::from_secs(60)).await.unwrap(), TsNs(1000));
        assert_eq!(t.persisted(), Some(TsNs(1000)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_every_hundred_events() {
        let store = Arc::new(MemoryStore::new());
        let mut t = tracker(&store);

        for i in 1..100 {
            assert!(!t.mark_applied(TsNs(i)).await.unwrap());
        }
        assert_eq!(store.read_offset(&peer()).await.unwrap(), None);

        assert!(t.mark_applied(TsNs(100)).await.unwrap());
        assert_eq!(store.read_offset(&peer()).await.unwrap(), Some(TsNs(100)));
        assert_eq!(t.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checkpoint_after_interval() {
        let store = Arc::new(MemoryStore::new());
        let mut t = tracker(&store);

        assert!(!t.mark_applied(TsNs(1)).await.unwrap());
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(t.mark_applied(TsNs(2)).await.unwrap());
        assert_eq!(store.read_offset(&peer()).await.unwrap(), Some(TsNs(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_retried_on_next_event() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let mut t = tracker(&store);

        for i in 1..100 {
            t.mark_applied(TsNs(i)).await.unwrap();
        }
        store.fail_next_kv_writes(1);
        assert!(t.mark_applied(TsNs(100)).await.is_err());
        assert_eq!(t.pending(), 100);

        assert!(t.mark_applied(TsNs(101)).await.unwrap());
        assert_eq!(store.read_offset(&peer()).await.unwrap(), Some(TsNs(101)));
    }

    #[tokio::test]
    async fn test_never_moves_backwards() {
        let store = Arc::new(MemoryStore::new());
        store.write_offset(&peer(), TsNs(5000)).await.unwrap();

        let mut t = tracker(&store);
        t.load(Duration::from_secs(60)).await.unwrap();
        t.mark_applied(TsNs(10)).await.unwrap();
        t.flush().await.unwrap();

        assert_eq!(store.read_offset(&peer()).await.unwrap(), Some(TsNs(5000)));
        assert_eq!(t.pending(), 0);
    }

    #[tokio::test]
    async fn test_flush_writes_pending() {
        let store = Arc::new(MemoryStore::new());
        let mut t = tracker(&store);

        t.flush().await.unwrap();
        assert_eq!(store.read_offset(&peer()).await.unwrap(), None);

        for ts in [1001, 1005, 1010] {
            t.mark_applied(TsNs(ts)).await.unwrap();
        }
        t.flush().await.unwrap();
        assert_eq!(store.read_offset(&peer()).await.unwrap(), Some(TsNs(1010)));
    }

    #[tokio::test]
    async fn test_inert_without_offset_capability() {
        let store = Arc::new(FlakyStore::new(MemoryStore::new()).without_offsets());
        let mut t = tracker(&store);

        for i in 1..=150 {
            t.mark_applied(TsNs(i)).await.unwrap();
        }
        t.flush().await.unwrap();
        assert_eq!(store.inner().read_offset(&peer()).await.unwrap(), None);
        assert_eq!(t.persisted(), None);
    }
}
