//! Error types for change feed subscriptions.

use filer_sync_core::{CoreError, PeerAddress};
use thiserror::Error;

/// Errors that can occur while talking to a peer's change feed.
#[derive(Debug, Error)]
pub enum FeedError {
    /// Connection-level failure: refused, reset, timed out.
    #[error("transport error: {0}")]
    Transport(String),

    /// No filer answers at this address.
    #[error("peer not found: {0}")]
    PeerNotFound(PeerAddress),

    /// A frame from the peer could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] CoreError),

    /// The feed was shut down on this side.
    #[error("feed closed")]
    Closed,
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;
