//! WebSocket transport.
//!
//! Client messages go out as JSON text frames. Incoming text frames are
//! decoded as server messages; text that does not decode and binary frames
//! are passed through as terminal output.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, info, warn};

use opstream_core::protocol::ServerMessage;

use super::error::TransportError;
use super::transport::{ABNORMAL_CLOSURE, Connection, Connector, RemoteEnd, TransportEvent};

/// Close code used when a close frame carries no status.
const NO_STATUS_RECEIVED: u16 = 1005;

/// Buffered messages per direction.
const CHANNEL_CAPACITY: usize = 256;

/// [`Connector`] over `ws://` / `wss://` URLs.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        crate::install_crypto_provider();
        Self { connect_timeout }
    }
}

impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Connection, TransportError> {
        let target = redact(url);
        debug!(url = %target, "Opening terminal socket");

        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| TransportError::Timeout(self.connect_timeout))?
                .map_err(|e| TransportError::Connect(e.to_string()))?;

        info!(url = %target, "Terminal socket connected");
        let (conn, remote) = Connection::pair(CHANNEL_CAPACITY);
        tokio::spawn(pump(socket, remote, target));
        Ok(conn)
    }
}

/// Shuttle messages between the socket and the session's channel ends until
/// either side finishes.
async fn pump<S>(socket: WebSocketStream<S>, remote: RemoteEnd, target: String)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    let RemoteEnd {
        mut outbound,
        inbound,
    } = remote;

    loop {
        tokio::select! {
            message = outbound.recv() => {
                let Some(message) = message else {
                    // Connection dropped by its owner
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client closed".to_string().into(),
                    };
                    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                        debug!(url = %target, error = %e, "Close frame not sent");
                    }
                    debug!(url = %target, "Terminal socket closed by client");
                    return;
                };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(url = %target, error = %e, "Failed to encode terminal message");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::text(text)).await {
                    let _ = inbound.send(TransportEvent::Error(format!("send failed: {e}"))).await;
                    return;
                }
            }
            frame = stream.next() => {
                let (event, last) = match frame {
                    Some(Ok(Message::Text(text))) => (Some(decode_text(text.as_str())), false),
                    Some(Ok(Message::Binary(bytes))) => (
                        Some(TransportEvent::Message(ServerMessage::Output {
                            data: String::from_utf8_lossy(&bytes).into_owned(),
                        })),
                        false,
                    ),
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or_else(
                            || (NO_STATUS_RECEIVED, String::new()),
                            |f| (u16::from(f.code), f.reason.as_str().to_string()),
                        );
                        (Some(TransportEvent::Closed { code, reason }), true)
                    }
                    Some(Ok(_)) => (None, false),
                    Some(Err(e)) => (Some(TransportEvent::Error(e.to_string())), true),
                    None => (
                        Some(TransportEvent::Closed {
                            code: ABNORMAL_CLOSURE,
                            reason: "connection ended without close frame".into(),
                        }),
                        true,
                    ),
                };

                if let Some(event) = event
                    && inbound.send(event).await.is_err()
                {
                    // Session dropped the connection
                    return;
                }
                if last {
                    debug!(url = %target, "Terminal socket finished");
                    return;
                }
            }
        }
    }
}

fn decode_text(text: &str) -> TransportEvent {
    let message = ServerMessage::parse(text).unwrap_or_else(|_| ServerMessage::Output {
        data: text.to_string(),
    });
    TransportEvent::Message(message)
}

/// URL without its query string, for logging.
fn redact(url: &str) -> String {
    url.split_once('?')
        .map_or_else(|| url.to_string(), |(base, _)| format!("{base}?<redacted>"))
}
