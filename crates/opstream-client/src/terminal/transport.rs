//! Duplex transport seam.
//!
//! A [`Connector`] opens one connection per call. The session task owns the
//! returned [`Connection`]; dropping it closes the underlying socket with a
//! normal closure.

use std::future::Future;

use tokio::sync::mpsc;

use opstream_core::protocol::{ClientMessage, ServerMessage};

use super::error::TransportError;

/// Close code of a normal, intentional closure.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the socket ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Opens duplex connections.
pub trait Connector: Send + Sync + 'static {
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send;
}

/// What the remote side of a connection reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Message(ServerMessage),
    /// The socket closed. Any code other than [`NORMAL_CLOSURE`] is abnormal.
    Closed { code: u16, reason: String },
    /// The socket failed; no close code is available.
    Error(String),
}

/// Session-side ends of one connection.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Transport-side ends of one connection, held by the task pumping the socket.
#[derive(Debug)]
pub struct RemoteEnd {
    /// Messages to write to the socket. `None` means the owner dropped the
    /// connection and the socket should be closed normally.
    pub outbound: mpsc::Receiver<ClientMessage>,
    pub inbound: mpsc::Sender<TransportEvent>,
}

impl Connection {
    /// Create a connected pair of channel ends with `capacity` slots each way.
    pub fn pair(capacity: usize) -> (Self, RemoteEnd) {
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        (
            Self {
                outbound: outbound_tx,
                inbound: inbound_rx,
            },
            RemoteEnd {
                outbound: outbound_rx,
                inbound: inbound_tx,
            },
        )
    }
}
