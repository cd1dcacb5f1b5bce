//! Error types for the replication engine.

use thiserror::Error;

use filer_sync_core::CoreError;
use filer_sync_feed::FeedError;
use filer_sync_store::StoreError;

/// Errors that can occur while replicating.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Subscription to a peer failed.
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),

    /// A change payload could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] CoreError),

    /// Aggregation buffer flush failed.
    #[error("buffer error: {0}")]
    Buffer(String),

    /// Configuration rejected by validation.
    #[error("invalid config: {0}")]
    Config(String),
}

/// Result type for replication operations.
pub type Result<T> = std::result::Result<T, SyncError>;
