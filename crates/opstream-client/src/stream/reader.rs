//! Cancellable read loop.

use std::fmt::Display;
use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL, HeaderValue};
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opstream_core::FrameDecoder;

use super::types::{StreamError, StreamHandler, StreamRequest};

/// Upper bound on the error body captured from a non-success response.
const MAX_ERROR_BODY: usize = 4 * 1024;

/// Opens event streams and drives them to completion.
///
/// Holds no per-stream state; one reader can serve any number of concurrent
/// `run` calls.
#[derive(Debug, Clone)]
pub struct EventStreamReader {
    client: reqwest::Client,
    /// Bound on waiting for response headers.
    open_timeout: Duration,
}

impl EventStreamReader {
    /// Create a reader with its own HTTP client.
    pub fn new(open_timeout: Duration) -> Result<Self, StreamError> {
        crate::install_crypto_provider();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| StreamError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, open_timeout))
    }

    /// Use a preconfigured HTTP client.
    ///
    /// The client is built by the caller, so the TLS provider must already be
    /// installed (see [`crate::install_crypto_provider`]); building a reqwest
    /// client without one panics.
    pub const fn with_client(client: reqwest::Client, open_timeout: Duration) -> Self {
        Self {
            client,
            open_timeout,
        }
    }

    /// Open `request` and deliver its frames to `handler`.
    ///
    /// Open failures (transport error, timeout, non-success status) are
    /// reported through `on_error` once and returned; they are never retried.
    /// Cancellation at any point ends in `on_close` and `Ok(())`.
    pub async fn run<H>(
        &self,
        request: StreamRequest,
        cancel: &CancellationToken,
        handler: &mut H,
    ) -> Result<(), StreamError>
    where
        H: StreamHandler + ?Sized,
    {
        let url = request.url.clone();
        let method = request.method.clone();
        let send = request
            .into_builder(&self.client)
            .header(ACCEPT, HeaderValue::from_static("text/event-stream"))
            .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
            .send();

        let opened = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(%url, "Stream cancelled before open");
                handler.on_close();
                return Ok(());
            }
            result = tokio::time::timeout(self.open_timeout, send) => result,
        };

        let response = match opened {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                return fail(handler, StreamError::Connection(e.to_string()));
            }
            Err(_) => {
                return fail(
                    handler,
                    StreamError::Connection(format!(
                        "no response within {}s",
                        self.open_timeout.as_secs()
                    )),
                );
            }
        };

        let status = response.status();
        if !status.is_success() {
            let body = tokio::time::timeout(self.open_timeout, response.text())
                .await
                .ok()
                .and_then(Result::ok)
                .map(|mut body| {
                    truncate_utf8(&mut body, MAX_ERROR_BODY);
                    body
                })
                .unwrap_or_default();
            return fail(
                handler,
                StreamError::Status {
                    status: status.as_u16(),
                    body,
                },
            );
        }

        info!(%method, %url, status = status.as_u16(), "Event stream opened");
        handler.on_open();
        drive(response.bytes_stream(), cancel, handler).await
    }
}

/// Decode `stream` into frames and deliver them to `handler`.
///
/// Transport-agnostic core of [`EventStreamReader::run`]: `on_open` is the
/// caller's business, every other callback is made here.
pub async fn drive<S, B, E, H>(
    stream: S,
    cancel: &CancellationToken,
    handler: &mut H,
) -> Result<(), StreamError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
    H: StreamHandler + ?Sized,
{
    let mut stream = std::pin::pin!(stream);
    let mut decoder = FrameDecoder::new();
    let mut delivered: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            chunk = stream.next() => Some(chunk),
        };

        match next {
            None => {
                debug!(delivered, "Event stream cancelled");
                handler.on_close();
                return Ok(());
            }
            Some(Some(Ok(chunk))) => {
                decoder.push(chunk.as_ref());
                while let Some(frame) = decoder.next_frame() {
                    if cancel.is_cancelled() {
                        debug!(delivered, "Event stream cancelled mid-chunk");
                        handler.on_close();
                        return Ok(());
                    }
                    if frame.is_close() {
                        debug!(delivered, "Received close frame");
                        handler.on_close();
                        return Ok(());
                    }
                    delivered += 1;
                    handler.on_message(frame);
                }
            }
            Some(Some(Err(e))) => {
                // A read aborted by a concurrent cancel is not a failure
                if cancel.is_cancelled() {
                    debug!(error = %e, "Read failed after cancellation");
                    handler.on_close();
                    return Ok(());
                }
                return fail(handler, StreamError::Read(e.to_string()));
            }
            Some(None) => {
                let pending = decoder.pending_len();
                if pending > 0 {
                    debug!(pending, "Discarding unterminated frame at end of stream");
                }
                debug!(delivered, "Event stream ended");
                handler.on_close();
                return Ok(());
            }
        }
    }
}

fn fail<H>(handler: &mut H, error: StreamError) -> Result<(), StreamError>
where
    H: StreamHandler + ?Sized,
{
    warn!(error = %error, "Event stream failed");
    handler.on_error(&error);
    Err(error)
}

fn truncate_utf8(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
}
