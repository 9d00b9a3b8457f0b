//! Terminal session manager.
//!
//! Keeps at most one live duplex connection per session key, shared by any
//! number of attached listeners. The connection outlives individual
//! attachments: the last detach starts a grace period instead of closing,
//! and lost connections are re-established with exponential backoff.

mod error;
mod handle;
mod manager;
mod session;
mod state;
mod transport;
mod types;
mod ws;

pub use error::{SessionError, TransportError};
pub use handle::TerminalHandle;
pub use manager::TerminalSessionManager;
pub use transport::{
    ABNORMAL_CLOSURE, Connection, Connector, NORMAL_CLOSURE, RemoteEnd, TransportEvent,
};
pub use types::{ManagerStats, SessionConfig, SessionSnapshot, SessionStatus, TerminalEvent};
pub use ws::WsConnector;
