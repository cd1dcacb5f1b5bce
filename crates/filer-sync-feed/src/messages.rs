//! Subscription request sent to a peer.

use serde::{Deserialize, Serialize};

use filer_sync_core::{FullPath, PeerAddress, TsNs};

/// Prefix of the client name a filer subscribes under.
pub const CLIENT_NAME_PREFIX: &str = "filer:";

/// Ask a peer for its local metadata changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    /// Who is subscribing, e.g. `filer:10.0.0.4:8888`. Informational.
    pub client_name: String,

    /// Only changes under this directory are streamed.
    pub path_prefix: FullPath,

    /// Stream changes with an origin timestamp at or after this one.
    pub since_ns: TsNs,
}

impl SubscribeRequest {
    /// The request a filer at `local` sends to follow a peer.
    pub fn for_filer(local: &PeerAddress, path_prefix: FullPath, since_ns: TsNs) -> Self {
        Self {
            client_name: format!("{}{}", CLIENT_NAME_PREFIX, local),
            path_prefix,
            since_ns,
        }
    }

    /// Check whether a change under `directory` at `ts_ns` belongs in this
    /// subscription.
    pub fn wants(&self, directory: &FullPath, ts_ns: TsNs) -> bool {
        ts_ns >= self.since_ns && directory.is_under(&self.path_prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_name() {
        let req = SubscribeRequest::for_filer(
            &PeerAddress::from("10.0.0.4:8888"),
            FullPath::root(),
            TsNs(5),
        );
        assert_eq!(req.client_name, "filer:10.0.0.4:8888");
    }

    #[test]
    fn test_wants_is_inclusive_and_prefix_scoped() {
        let req = SubscribeRequest::for_filer(
            &PeerAddress::from("a:1"),
            FullPath::parse("/buckets").unwrap(),
            TsNs(1000),
        );
        let under = FullPath::parse("/buckets/photos").unwrap();
        let outside = FullPath::parse("/tmp").unwrap();

        assert!(req.wants(&under, TsNs(1000)));
        assert!(!req.wants(&under, TsNs(999)));
        assert!(!req.wants(&outside, TsNs(2000)));
    }
}
