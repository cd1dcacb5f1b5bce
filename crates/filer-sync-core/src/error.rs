//! Error types for the core crate.

use thiserror::Error;

/// Errors raised while building or decoding core values.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("encoding error: {0}")]
    Encoding(String),

    #[error("decoding error: {0}")]
    Decoding(String),

    #[error("invalid path: {0:?}")]
    InvalidPath(String),

    #[error("invalid entry name: {0:?}")]
    InvalidName(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
