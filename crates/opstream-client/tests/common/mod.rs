//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

use opstream_client::terminal::{Connection, Connector, RemoteEnd, TransportError};

// =========================================================================
// In-memory connector
// =========================================================================

#[derive(Debug, Default)]
struct MockState {
    connects: usize,
    fail_next: usize,
    connect_delay: Duration,
    urls: Vec<String>,
}

/// Connector handing out in-memory connections.
#[derive(Debug, Clone)]
pub struct MockConnector {
    state: Arc<Mutex<MockState>>,
    remotes: mpsc::UnboundedSender<RemoteEnd>,
}

/// Test-side control over a [`MockConnector`].
#[derive(Debug)]
pub struct MockControl {
    state: Arc<Mutex<MockState>>,
    remotes: mpsc::UnboundedReceiver<RemoteEnd>,
}

pub fn mock_connector() -> (MockConnector, MockControl) {
    let state = Arc::new(Mutex::new(MockState::default()));
    let (tx, rx) = mpsc::unbounded_channel();
    (
        MockConnector {
            state: Arc::clone(&state),
            remotes: tx,
        },
        MockControl { state, remotes: rx },
    )
}

impl Connector for MockConnector {
    fn connect(
        &self,
        url: &str,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send {
        let state = Arc::clone(&self.state);
        let remotes = self.remotes.clone();
        let url = url.to_string();
        async move {
            let delay = {
                let mut state = state.lock().unwrap();
                state.connects += 1;
                state.urls.push(url);
                state.connect_delay
            };
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let fail = {
                let mut state = state.lock().unwrap();
                let fail = state.fail_next > 0;
                state.fail_next = state.fail_next.saturating_sub(1);
                fail
            };
            if fail {
                return Err(TransportError::Connect("connection refused".into()));
            }

            let (conn, remote) = Connection::pair(16);
            let _ = remotes.send(remote);
            Ok(conn)
        }
    }
}

impl MockControl {
    /// Connection attempts started so far.
    pub fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.state.lock().unwrap().fail_next = n;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().unwrap().connect_delay = delay;
    }

    pub fn urls(&self) -> Vec<String> {
        self.state.lock().unwrap().urls.clone()
    }

    /// Remote end of the next successful connection.
    pub async fn next_remote(&mut self) -> RemoteEnd {
        self.remotes.recv().await.expect("connector dropped")
    }
}

// =========================================================================
// Minimal HTTP/1.1 server
// =========================================================================

/// One request as seen by [`serve_once`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub head: String,
    pub body: String,
}

impl RecordedRequest {
    pub fn request_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    /// Value of header `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

/// What [`serve_once`] writes back.
pub struct Reply {
    pub status: &'static str,
    pub content_type: &'static str,
    /// Written one at a time with a flush in between.
    pub chunks: Vec<Vec<u8>>,
    /// Pause between chunks.
    pub pause: Duration,
    /// Keep the connection open after the last chunk until this fires.
    pub hold_open: Option<oneshot::Receiver<()>>,
}

impl Reply {
    pub fn event_stream(chunks: &[&str]) -> Self {
        Self {
            status: "200 OK",
            content_type: "text/event-stream",
            chunks: chunks.iter().map(|c| c.as_bytes().to_vec()).collect(),
            pause: Duration::from_millis(5),
            hold_open: None,
        }
    }

    pub fn json(status: &'static str, body: &str) -> Self {
        Self {
            status,
            content_type: "application/json",
            chunks: vec![body.as_bytes().to_vec()],
            pause: Duration::ZERO,
            hold_open: None,
        }
    }
}

/// Serve a single request on an ephemeral port.
///
/// Returns the base URL and a receiver for the recorded request. Bodies are
/// close-delimited, so the response ends when the connection does.
pub async fn serve_once(reply: Reply) -> (String, oneshot::Receiver<RecordedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (recorded_tx, recorded_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        let _ = recorded_tx.send(request);

        let head = format!(
            "HTTP/1.1 {}\r\ncontent-type: {}\r\ncache-control: no-cache\r\nconnection: close\r\n\r\n",
            reply.status, reply.content_type
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
        for chunk in reply.chunks {
            if socket.write_all(&chunk).await.is_err() || socket.flush().await.is_err() {
                return;
            }
            if !reply.pause.is_zero() {
                tokio::time::sleep(reply.pause).await;
            }
        }
        if let Some(hold) = reply.hold_open {
            let _ = hold.await;
        }
        let _ = socket.shutdown().await;
    });

    (format!("http://{addr}"), recorded_rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> RecordedRequest {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];

    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = socket.read(&mut chunk).await.unwrap();
        assert!(n > 0, "client closed before sending headers");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let content_length = head
        .lines()
        .find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buf.len() < body_start + content_length {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let body_end = buf.len().min(body_start + content_length);
    RecordedRequest {
        head,
        body: String::from_utf8_lossy(&buf[body_start..body_end]).into_owned(),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
