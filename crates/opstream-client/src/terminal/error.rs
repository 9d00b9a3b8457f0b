//! Terminal session error types.

use std::time::Duration;

/// Errors returned to callers of the session manager and its handles.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Session closed: {key}")]
    Closed { key: String },

    #[error("Too many listeners for session {key} (max: {max})")]
    TooManyListeners { key: String, max: usize },
}

/// Errors raised while opening a duplex connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connect(String),

    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),
}
