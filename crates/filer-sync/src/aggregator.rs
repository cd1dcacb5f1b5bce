//! The peer supervisor: one replication pipeline per peer, plus the shared
//! aggregation buffer every pipeline publishes into.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use filer_sync_core::{ChangeEvent, PeerAddress, StoreSignature};
use filer_sync_feed::{ChangeFeedClient, Transport};
use filer_sync_store::{load_or_create_signature, FilerStore, KvStore};

use crate::config::AggregatorConfig;
use crate::error::Result;
use crate::log_buffer::{FlushSink, LogBuffer};
use crate::pipeline::PeerPipeline;

/// Follows every peer filer and aggregates all observed changes.
pub struct MetaAggregator<S: FilerStore + 'static> {
    local: PeerAddress,
    local_signature: StoreSignature,
    store: Arc<S>,
    feed: ChangeFeedClient,
    buffer: Arc<LogBuffer>,
    config: AggregatorConfig,
}

impl<S: FilerStore + 'static> MetaAggregator<S> {
    /// Create an aggregator for the filer at `local`, whose store has
    /// `local_signature`.
    pub fn new(
        local: PeerAddress,
        local_signature: StoreSignature,
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        config: AggregatorConfig,
    ) -> Result<Self> {
        config.validate()?;
        let buffer = LogBuffer::new(config.buffer);
        Ok(Self::assemble(local, local_signature, store, transport, config, buffer))
    }

    /// Like [`MetaAggregator::new`], with a sink that receives buffered
    /// changes on every flush.
    pub fn with_flush_sink(
        local: PeerAddress,
        local_signature: StoreSignature,
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        config: AggregatorConfig,
        sink: Arc<dyn FlushSink>,
    ) -> Result<Self> {
        config.validate()?;
        let buffer = LogBuffer::with_sink(config.buffer, sink);
        Ok(Self::assemble(local, local_signature, store, transport, config, buffer))
    }

    fn assemble(
        local: PeerAddress,
        local_signature: StoreSignature,
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        config: AggregatorConfig,
        buffer: Arc<LogBuffer>,
    ) -> Self {
        let feed = ChangeFeedClient::new(transport, local.clone())
            .with_path_prefix(config.path_prefix.clone());
        Self {
            local,
            local_signature,
            store,
            feed,
            buffer,
            config,
        }
    }

    /// The filer's address.
    pub fn local_address(&self) -> &PeerAddress {
        &self.local
    }

    /// The signature of the local store.
    pub fn local_signature(&self) -> StoreSignature {
        self.local_signature
    }

    /// The aggregation buffer, for tailing.
    pub fn buffer(&self) -> &Arc<LogBuffer> {
        &self.buffer
    }

    /// Append a change that originated on this filer to the buffer.
    pub fn publish_local(&self, event: &ChangeEvent) -> Result<u64> {
        let bytes = event.to_bytes()?;
        Ok(self
            .buffer
            .append(event.directory.clone(), bytes, event.ts_ns))
    }

    /// Start one pipeline per distinct peer, skipping this filer's own
    /// address. Must be called within a tokio runtime.
    ///
    /// Pipelines stop only through [`AggregatorHandle::shutdown`]; dropping
    /// the handle leaves them running until the process exits.
    #[must_use = "the handle is the only way to stop the pipelines"]
    pub fn start<I>(&self, peers: I) -> AggregatorHandle
    where
        I: IntoIterator<Item = PeerAddress>,
    {
        let peers: Vec<PeerAddress> = peers
            .into_iter()
            .filter(|peer| peer != &self.local)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let tasks = peers
            .iter()
            .map(|peer| {
                let pipeline = PeerPipeline::new(
                    peer.clone(),
                    self.feed.clone(),
                    Arc::clone(&self.store),
                    Arc::clone(&self.buffer),
                    self.local_signature,
                    self.config.clone(),
                    shutdown_rx.clone(),
                );
                tokio::spawn(pipeline.run())
            })
            .collect();

        let flusher = self.buffer.spawn_flusher(shutdown_rx);

        tracing::info!(
            local = %self.local,
            peers = peers.len(),
            "started metadata aggregation"
        );

        AggregatorHandle {
            peers,
            shutdown: shutdown_tx,
            tasks,
            flusher,
        }
    }
}

impl<S: FilerStore + KvStore + 'static> MetaAggregator<S> {
    /// Create an aggregator, reading the local signature from the store
    /// and generating one on first use.
    pub async fn open(
        local: PeerAddress,
        store: Arc<S>,
        transport: Arc<dyn Transport>,
        config: AggregatorConfig,
    ) -> Result<Self> {
        let signature = load_or_create_signature(store.as_ref()).await?;
        Self::new(local, signature, store, transport, config)
    }
}

/// Controls running pipelines.
#[must_use = "dropping the handle detaches the pipelines"]
pub struct AggregatorHandle {
    peers: Vec<PeerAddress>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    flusher: JoinHandle<()>,
}

impl AggregatorHandle {
    /// The supervised peers.
    pub fn peers(&self) -> &[PeerAddress] {
        &self.peers
    }

    /// Stop every pipeline, flush pending checkpoints and the buffer, and
    /// wait for all of it to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "peer pipeline panicked");
            }
        }
        if let Err(e) = self.flusher.await {
            tracing::error!(error = %e, "buffer flusher panicked");
        }
        tracing::info!("stopped metadata aggregation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use filer_sync_core::{Entry, EventNotification, FullPath, TsNs};
    use filer_sync_feed::MemoryNetwork;
    use filer_sync_store::{MemoryStore, OffsetStore};
    use tokio::time::Instant;

    fn addr(s: &str) -> PeerAddress {
        PeerAddress::from(s)
    }

    fn create(dir: &str, name: &str, ts: i64) -> ChangeEvent {
        ChangeEvent::new(
            FullPath::parse(dir).unwrap(),
            &EventNotification::create(Entry::file(name)),
            TsNs(ts),
        )
        .unwrap()
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_start_skips_self_and_duplicates() {
        let network = MemoryNetwork::new();
        for peer in ["b:1", "c:1"] {
            network.add_peer(addr(peer), StoreSignature(2));
        }

        let aggregator = MetaAggregator::new(
            addr("a:1"),
            StoreSignature(1),
            Arc::new(MemoryStore::new()),
            network.clone(),
            AggregatorConfig::default(),
        )
        .unwrap();

        let handle = aggregator.start(vec![addr("c:1"), addr("a:1"), addr("b:1"), addr("c:1")]);
        assert_eq!(handle.peers(), &[addr("b:1"), addr("c:1")]);
        settle().await;

        assert!(network.subscriptions(&addr("a:1")).is_empty());
        assert_eq!(network.subscriptions(&addr("b:1")).len(), 1);
        assert_eq!(network.subscriptions(&addr("c:1")).len(), 1);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = AggregatorConfig::default();
        config.buffer.max_entries = 0;

        let result = MetaAggregator::new(
            addr("a:1"),
            StoreSignature(1),
            Arc::new(MemoryStore::new()),
            MemoryNetwork::new(),
            config,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_publish_local_and_foreign_share_buffer() {
        let network = MemoryNetwork::new();
        let peer = addr("b:1");
        network.add_peer(peer.clone(), StoreSignature(2));

        let store = Arc::new(MemoryStore::new());
        let aggregator = MetaAggregator::open(
            addr("a:1"),
            Arc::clone(&store),
            network.clone(),
            AggregatorConfig::default(),
        )
        .await
        .unwrap();

        let mut tail = aggregator.buffer().tail_from(0);
        let local = create("/local", "mine", TsNs::now().as_nanos());
        aggregator.publish_local(&local).unwrap();

        let handle = aggregator.start(vec![peer.clone()]);
        network
            .publish(&peer, create("/remote", "theirs", TsNs::now().as_nanos()))
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let first = tail.next_before(deadline).await.unwrap();
        let second = tail.next_before(deadline).await.unwrap();
        assert_eq!(first.partition_key.as_str(), "/local");
        assert_eq!(second.partition_key.as_str(), "/remote");
        assert_eq!(ChangeEvent::from_bytes(&first.payload).unwrap(), local);

        handle.shutdown().await;
        assert!(store
            .find_entry(&FullPath::parse("/remote/theirs").unwrap())
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_shutdown_persists_pending_offset() {
        let network = MemoryNetwork::new();
        let peer = addr("b:1");
        network.add_peer(peer.clone(), StoreSignature(2));

        let store = Arc::new(MemoryStore::new());
        store.write_offset(&peer, TsNs(1000)).await.unwrap();
        for ts in [1001, 1005, 1010] {
            network.publish(&peer, create("/d", &format!("f{}", ts), ts)).unwrap();
        }

        let aggregator = MetaAggregator::new(
            addr("a:1"),
            StoreSignature(1),
            Arc::clone(&store),
            network.clone(),
            AggregatorConfig::default(),
        )
        .unwrap();
        let mut tail = aggregator.buffer().tail_from(0);
        let handle = aggregator.start(vec![peer.clone()]);

        let deadline = Instant::now() + Duration::from_secs(5);
        for _ in 0..3 {
            tail.next_before(deadline).await.unwrap();
        }
        settle().await;
        handle.shutdown().await;

        assert_eq!(store.read_offset(&peer).await.unwrap(), Some(TsNs(1010)));
        assert_eq!(network.subscriptions(&peer)[0].since_ns, TsNs(1000));
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_replicating() {
        let network = MemoryNetwork::new();
        let peer = addr("b:1");
        network.add_peer(peer.clone(), StoreSignature(2));

        let store = Arc::new(MemoryStore::new());
        let aggregator = MetaAggregator::new(
            addr("a:1"),
            StoreSignature(1),
            Arc::clone(&store),
            network.clone(),
            AggregatorConfig::default(),
        )
        .unwrap();
        let mut tail = aggregator.buffer().tail_from(0);

        drop(aggregator.start(vec![peer.clone()]));
        settle().await;

        network
            .publish(&peer, create("/d", "x", TsNs::now().as_nanos()))
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(3);
        let entry = tail.next_before(deadline).await.unwrap();
        assert_eq!(entry.partition_key.as_str(), "/d");

        settle().await;
        assert!(store
            .find_entry(&FullPath::parse("/d/x").unwrap())
            .await
            .unwrap()
            .is_some());
    }
}
