//! opstream client library
//!
//! Network-facing halves of opstream:
//! - [`stream`]: Server-Sent-Events reader over a cancellable HTTP body
//! - [`terminal`]: reference-counted terminal session registry with
//!   automatic reconnection
//! - [`api`]: one-shot command execution
//! - [`endpoints`]: backend URL construction

pub mod api;
pub mod endpoints;
pub mod stream;
pub mod terminal;

pub use api::{ApiClient, ApiError};
pub use endpoints::Endpoints;
pub use stream::{EventStreamReader, StreamError, StreamHandler, StreamRequest};
pub use terminal::{
    SessionError, TerminalEvent, TerminalHandle, TerminalSessionManager, TransportError,
};

/// Install the process-wide TLS crypto provider.
///
/// reqwest and tokio-tungstenite are built without a bundled provider; call
/// this once before opening any `https`/`wss` connection. Repeated calls are
/// harmless.
pub fn install_crypto_provider() {
    // `Err` means a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
}
