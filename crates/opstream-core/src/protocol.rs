//! Wire protocol for terminal sessions and command execution.
//!
//! Terminal sockets carry JSON text messages tagged by `type`. Command
//! execution is a plain JSON request/response pair.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Client → server terminal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Raw keystrokes for the remote PTY.
    Input { data: String },
    /// New terminal geometry.
    Resize { cols: u16, rows: u16 },
}

impl ClientMessage {
    pub fn input(data: impl Into<String>) -> Self {
        Self::Input { data: data.into() }
    }

    pub const fn resize(cols: u16, rows: u16) -> Self {
        Self::Resize { cols, rows }
    }

    /// Encode as a JSON text frame.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Server → client terminal message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// PTY output as text.
    Output { data: String },
    /// Backend-reported failure (e.g. instance not running).
    Error { message: String },
}

impl ServerMessage {
    /// Decode a JSON text frame.
    pub fn parse(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| Error::Protocol(format!("invalid terminal message: {e}")))
    }
}

/// One-shot command execution request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecRequest {
    pub command: String,
    /// Allocate a pseudo-terminal for the command.
    #[serde(default)]
    pub tty: bool,
}

impl ExecRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            tty: false,
        }
    }

    #[must_use]
    pub const fn with_tty(mut self, tty: bool) -> Self {
        self.tty = tty;
        self
    }
}

/// One-shot command execution result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecResponse {
    pub exit_code: i32,
    /// Combined stdout and stderr.
    #[serde(default)]
    pub output: String,
    /// The command as executed by the backend.
    #[serde(default)]
    pub command: String,
    /// Completion timestamp as reported by the backend (RFC 3339).
    #[serde(default)]
    pub completed_at: String,
}

impl ExecResponse {
    pub const fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Payload commonly carried by `error` stream events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StreamErrorPayload {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Best-effort human-readable description of an `error` event payload.
///
/// JSON payloads yield their `error` or `message` field; anything else is
/// returned verbatim.
pub fn describe_error_payload(data: &str) -> String {
    serde_json::from_str::<StreamErrorPayload>(data)
        .ok()
        .and_then(|p| p.error.or(p.message))
        .unwrap_or_else(|| data.trim().to_string())
}
