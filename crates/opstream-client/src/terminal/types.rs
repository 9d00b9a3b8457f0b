//! Terminal session types.

use std::time::Duration;

use opstream_core::ReconnectPolicy;
use opstream_core::config::TerminalConfig;

/// Configuration for the terminal session manager.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Delay between the last detach and teardown.
    pub grace_period: Duration,
    /// Maximum listeners attached to one session.
    pub max_listeners: usize,
    /// Events buffered per listener; a listener that falls this far behind
    /// is detached.
    pub listener_queue: usize,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(5 * 60),
            max_listeners: 8,
            listener_queue: 1024,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl From<&TerminalConfig> for SessionConfig {
    fn from(config: &TerminalConfig) -> Self {
        Self {
            grace_period: config.grace_period(),
            max_listeners: config.max_listeners,
            reconnect: config.reconnect.policy(),
            ..Self::default()
        }
    }
}

/// Event delivered to every attached listener, in socket-receive order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// The connection opened; `epoch` counts successful opens for the key.
    Opened { epoch: u64 },
    /// PTY output.
    Output(String),
    /// Backend-reported error message; the connection stays up.
    RemoteError(String),
    /// The connection was lost and a reconnect is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The remote end closed normally; no reconnect is scheduled.
    Closed { code: u16, reason: String },
    /// Reconnect attempts are exhausted; only a manual reconnect re-arms.
    Failed { attempts: u32, error: String },
}

/// Connection lifecycle state as seen from outside the session task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Connecting,
    Open,
    Reconnecting,
    Closed,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub key: String,
    pub status: SessionStatus,
    /// Currently attached listeners.
    pub listeners: usize,
    /// Consecutive failed reconnects since the last successful open.
    pub attempt: u32,
    /// Successful opens so far.
    pub epoch: u64,
    /// Connection attempts started so far, successful or not.
    pub connects: u64,
    /// Whether the teardown timer is running.
    pub grace_armed: bool,
}

/// Manager statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ManagerStats {
    /// Number of live sessions.
    pub session_count: usize,
    /// Total listeners across all sessions.
    pub total_listeners: usize,
}

/// Registry-unique listener identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(pub u64);
