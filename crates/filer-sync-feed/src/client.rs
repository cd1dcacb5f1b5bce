//! Change feed client: opens subscriptions to peers on behalf of this filer.

use std::sync::Arc;

use filer_sync_core::{FullPath, PeerAddress, StoreSignature, TsNs};

use crate::error::Result;
use crate::messages::SubscribeRequest;
use crate::transport::{EventStream, Transport};

/// Opens change feeds of peer filers.
///
/// Cheap to clone; every pipeline holds its own copy.
#[derive(Clone)]
pub struct ChangeFeedClient {
    transport: Arc<dyn Transport>,
    local: PeerAddress,
    path_prefix: FullPath,
}

impl ChangeFeedClient {
    /// A client subscribing as the filer at `local`, following the whole
    /// namespace.
    pub fn new(transport: Arc<dyn Transport>, local: PeerAddress) -> Self {
        Self {
            transport,
            local,
            path_prefix: FullPath::root(),
        }
    }

    /// Only follow changes under `prefix`.
    pub fn with_path_prefix(mut self, prefix: FullPath) -> Self {
        self.path_prefix = prefix;
        self
    }

    /// The address this client subscribes as.
    pub fn local_address(&self) -> &PeerAddress {
        &self.local
    }

    /// Open a stream of every change on `peer` with an origin timestamp at
    /// or after `since`.
    pub async fn open(&self, peer: &PeerAddress, since: TsNs) -> Result<Box<dyn EventStream>> {
        let request = SubscribeRequest::for_filer(&self.local, self.path_prefix.clone(), since);
        tracing::debug!(
            peer = %peer,
            client = %request.client_name,
            since_ns = since.as_nanos(),
            "subscribing to peer metadata"
        );
        self.transport.subscribe_local_metadata(peer, request).await
    }

    /// The signature of the store backing `peer`.
    pub async fn store_signature(&self, peer: &PeerAddress) -> Result<StoreSignature> {
        self.transport.store_signature(peer).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryNetwork;
    use filer_sync_core::{ChangeEvent, Entry, EventNotification};

    #[tokio::test]
    async fn test_open_sends_filer_request() {
        let network = MemoryNetwork::new();
        let peer = PeerAddress::from("filer-b:8888");
        network.add_peer(peer.clone(), StoreSignature(2));
        network
            .publish(
                &peer,
                ChangeEvent::new(
                    FullPath::parse("/data").unwrap(),
                    &EventNotification::create(Entry::file("x")),
                    TsNs(1000),
                )
                .unwrap(),
            )
            .unwrap();

        let client = ChangeFeedClient::new(network.clone(), PeerAddress::from("filer-a:8888"));
        let mut stream = client.open(&peer, TsNs(1000)).await.unwrap();
        assert_eq!(stream.recv().await.unwrap().unwrap().ts_ns, TsNs(1000));

        let requests = network.subscriptions(&peer);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].client_name, "filer:filer-a:8888");
        assert_eq!(requests[0].path_prefix, FullPath::root());
        assert_eq!(requests[0].since_ns, TsNs(1000));

        assert_eq!(client.store_signature(&peer).await.unwrap(), StoreSignature(2));
    }
}
