//! Error types for the opstream core library.

use thiserror::Error;

/// Result type alias using the opstream core Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for opstream operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Wire protocol error (malformed terminal or exec message)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
