//! Per-session state owned by the session task.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, Sleep};
use tracing::warn;

use super::error::TransportError;
use super::transport::{Connection, TransportEvent};
use super::types::{ListenerId, SessionStatus, TerminalEvent};

pub(crate) type ConnectFuture =
    Pin<Box<dyn Future<Output = Result<Connection, TransportError>> + Send>>;

/// Connection lifecycle. Leaving a state drops whatever it owns: the
/// in-flight connect, the live connection, or the backoff timer.
pub(crate) enum ConnState {
    /// The single in-flight connect for this key.
    Connecting { connect: ConnectFuture },
    Open { conn: Connection },
    /// Waiting out a reconnect delay.
    Backoff { timer: Pin<Box<Sleep>> },
    Closed { code: u16, reason: String },
    Failed { error: String },
}

/// Progress made by the current connection state.
pub(crate) enum ConnProgress {
    Connected(Result<Connection, TransportError>),
    Transport(Option<TransportEvent>),
    RetryDue,
}

impl ConnState {
    pub(crate) fn backoff(delay: Duration) -> Self {
        Self::Backoff {
            timer: Box::pin(tokio::time::sleep(delay)),
        }
    }

    pub(crate) const fn status(&self) -> SessionStatus {
        match self {
            Self::Connecting { .. } => SessionStatus::Connecting,
            Self::Open { .. } => SessionStatus::Open,
            Self::Backoff { .. } => SessionStatus::Reconnecting,
            Self::Closed { .. } => SessionStatus::Closed,
            Self::Failed { .. } => SessionStatus::Failed,
        }
    }

    /// Wait for the current state to make progress.
    ///
    /// Cancel-safe: everything being awaited lives in `self`. Terminal states
    /// never make progress.
    pub(crate) async fn progress(&mut self) -> ConnProgress {
        match self {
            Self::Connecting { connect } => ConnProgress::Connected(connect.as_mut().await),
            Self::Open { conn } => ConnProgress::Transport(conn.inbound.recv().await),
            Self::Backoff { timer } => {
                timer.as_mut().await;
                ConnProgress::RetryDue
            }
            Self::Closed { .. } | Self::Failed { .. } => std::future::pending().await,
        }
    }

    /// Time left before a scheduled reconnect.
    pub(crate) fn backoff_remaining(&self) -> Option<Duration> {
        match self {
            Self::Backoff { timer } => Some(
                timer
                    .deadline()
                    .saturating_duration_since(Instant::now()),
            ),
            _ => None,
        }
    }
}

/// Holds at most one pending timer; arming replaces (and so cancels) the
/// previous one.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    sleep: Option<Pin<Box<Sleep>>>,
}

impl TimerSlot {
    pub(crate) fn arm(&mut self, after: Duration) {
        self.sleep = Some(Box::pin(tokio::time::sleep(after)));
    }

    /// Cancel the pending timer. Returns whether one was armed.
    pub(crate) fn clear(&mut self) -> bool {
        self.sleep.take().is_some()
    }

    pub(crate) const fn is_armed(&self) -> bool {
        self.sleep.is_some()
    }

    /// Resolve when the armed timer fires; pending forever while disarmed.
    ///
    /// The slot stays armed after firing until cleared or re-armed.
    pub(crate) async fn fired(&mut self) {
        match self.sleep.as_mut() {
            Some(sleep) => sleep.as_mut().await,
            None => std::future::pending().await,
        }
    }
}

/// Attached listeners in registration order.
#[derive(Debug, Default)]
pub(crate) struct Listeners {
    entries: Vec<(ListenerId, mpsc::Sender<TerminalEvent>)>,
}

impl Listeners {
    pub(crate) fn add(&mut self, id: ListenerId, events: mpsc::Sender<TerminalEvent>) {
        self.entries.push((id, events));
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deliver to every listener in registration order.
    ///
    /// A listener whose queue is full is dropped from the set; its handle
    /// sees the end of the event stream once drained. Returns how many were
    /// dropped.
    pub(crate) fn broadcast(&mut self, event: &TerminalEvent) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|(id, events)| match events.try_send(event.clone()) {
                Err(TrySendError::Full(_)) => {
                    warn!(listener = id.0, "Listener queue full, detaching");
                    false
                }
                // A closed receiver belongs to a handle whose detach is queued
                Ok(()) | Err(TrySendError::Closed(_)) => true,
            });
        before - self.entries.len()
    }

    /// Deliver to one freshly attached listener.
    pub(crate) fn send_to(&self, id: ListenerId, event: TerminalEvent) {
        if let Some((_, events)) = self.entries.iter().find(|(existing, _)| *existing == id) {
            let _ = events.try_send(event);
        }
    }
}
