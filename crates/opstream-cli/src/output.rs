//! Event stream frames rendered to the terminal.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::Write;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use opstream_client::{StreamError, StreamHandler};
use opstream_core::Frame;
use opstream_core::protocol::describe_error_payload;
use opstream_core::sse::StreamEvent;

/// How a streamed operation ended, as reported by its reserved frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Neither `success` nor `error` arrived.
    Pending,
    Succeeded { exit_code: i32 },
    Failed(String),
}

impl Outcome {
    /// Process exit code for this outcome.
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Succeeded { exit_code } => *exit_code,
            Self::Pending | Self::Failed(_) => 1,
        }
    }
}

/// Writes output frames to `out` and error frames to `err`.
///
/// A failed write to `out` (e.g. a closed pipe) cancels the stream.
pub struct StreamPrinter<O, E> {
    out: O,
    err: E,
    cancel: CancellationToken,
    outcome: Outcome,
}

impl<O: Write + Send, E: Write + Send> StreamPrinter<O, E> {
    pub const fn new(out: O, err: E, cancel: CancellationToken) -> Self {
        Self {
            out,
            err,
            cancel,
            outcome: Outcome::Pending,
        }
    }

    pub const fn outcome(&self) -> &Outcome {
        &self.outcome
    }

    pub fn into_parts(self) -> (O, E, Outcome) {
        (self.out, self.err, self.outcome)
    }

    fn write_out(&mut self, data: &str) {
        let written = writeln!(self.out, "{data}").and_then(|()| self.out.flush());
        if let Err(e) = written {
            debug!(error = %e, "Output closed, stopping stream");
            self.cancel.cancel();
        }
    }
}

impl<O: Write + Send, E: Write + Send> StreamHandler for StreamPrinter<O, E> {
    fn on_message(&mut self, frame: Frame) {
        match frame.kind() {
            StreamEvent::Open => debug!(data = %frame.data, "Backend accepted stream"),
            StreamEvent::Message | StreamEvent::Other => self.write_out(&frame.data),
            StreamEvent::Error => {
                let message = describe_error_payload(&frame.data);
                let _ = writeln!(self.err, "error: {message}");
                self.outcome = Outcome::Failed(message);
            }
            StreamEvent::Success => {
                self.outcome = Outcome::Succeeded {
                    exit_code: success_exit_code(&frame.data),
                };
            }
            StreamEvent::Close => {}
        }
    }

    fn on_error(&mut self, error: &StreamError) {
        warn!(%error, "Event stream failed");
    }
}

/// Exit code carried by a `success` payload; `0` when absent.
fn success_exit_code(data: &str) -> i32 {
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|v| v.get("exit_code").and_then(serde_json::Value::as_i64))
        .and_then(|n| i32::try_from(n).ok())
        .unwrap_or(0)
}
