//! Caller-side capability for one attached listener.

use tokio::sync::mpsc;

use opstream_core::protocol::ClientMessage;

use super::error::SessionError;
use super::session::Command;
use super::types::{ListenerId, TerminalEvent};

/// One attachment to a terminal session.
///
/// Dropping the handle detaches it. Detaching never closes the connection
/// directly; the last detach only starts the grace period.
///
/// Events queue per handle up to `SessionConfig::listener_queue`. A handle
/// that falls that far behind is detached by the session: it still receives
/// what was queued, then [`recv`](Self::recv) returns `None`.
#[derive(Debug)]
pub struct TerminalHandle {
    key: String,
    id: ListenerId,
    commands: mpsc::UnboundedSender<Command>,
    events: mpsc::Receiver<TerminalEvent>,
}

impl TerminalHandle {
    pub(crate) const fn new(
        key: String,
        id: ListenerId,
        commands: mpsc::UnboundedSender<Command>,
        events: mpsc::Receiver<TerminalEvent>,
    ) -> Self {
        Self {
            key,
            id,
            commands,
            events,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Forward raw keystrokes. Input sent while the session is not open is
    /// dropped.
    pub fn send_input(&self, data: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::Send(ClientMessage::input(data)))
    }

    /// Report new terminal geometry. The last resize sent wins.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), SessionError> {
        self.command(Command::Send(ClientMessage::resize(cols, rows)))
    }

    /// Drop the current connection and connect again immediately, resetting
    /// the reconnect attempt counter.
    pub fn reconnect(&self) -> Result<(), SessionError> {
        self.command(Command::Reconnect)
    }

    /// Next event for this listener; `None` once the session has ended or
    /// this handle was detached for falling behind.
    pub async fn recv(&mut self) -> Option<TerminalEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<TerminalEvent> {
        self.events.try_recv().ok()
    }

    /// Detach explicitly; equivalent to dropping the handle.
    pub fn detach(self) {
        drop(self);
    }

    fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .map_err(|_| SessionError::Closed {
                key: self.key.clone(),
            })
    }
}

impl Drop for TerminalHandle {
    fn drop(&mut self) {
        // The session may already be gone
        let _ = self.commands.send(Command::Detach { id: self.id });
    }
}
