//! Per-key session task.
//!
//! One task per session key owns the connection, the listener set and both
//! timers, and applies every state transition in the order commands and
//! transport events arrive.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info, warn};

use opstream_core::protocol::{ClientMessage, ServerMessage};

use super::error::SessionError;
use super::manager::Registry;
use super::state::{ConnProgress, ConnState, ConnectFuture, Listeners, TimerSlot};
use super::transport::{Connection, Connector, NORMAL_CLOSURE, TransportEvent};
use super::types::{ListenerId, SessionConfig, SessionSnapshot, TerminalEvent};

/// Requests sent to a session task.
pub(crate) enum Command {
    Attach {
        id: ListenerId,
        url: String,
        events: mpsc::Sender<TerminalEvent>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Detach {
        id: ListenerId,
    },
    Send(ClientMessage),
    Reconnect,
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Shutdown,
}

enum Step {
    Command(Command),
    GraceExpired,
    Progress(ConnProgress),
}

pub(crate) struct SessionTask<C> {
    key: String,
    /// Distinguishes this task's registry entry from a later one for the same key.
    generation: u64,
    /// Most recently attached URL; each attach may carry a fresh credential.
    url: String,
    connector: Arc<C>,
    config: SessionConfig,
    registry: Arc<Mutex<Registry>>,
    commands: mpsc::UnboundedReceiver<Command>,
    listeners: Listeners,
    state: ConnState,
    grace: TimerSlot,
    attempt: u32,
    epoch: u64,
    connects: u64,
}

impl<C: Connector> SessionTask<C> {
    /// Spawn the task for a new registry entry and start connecting.
    pub(crate) fn spawn(
        key: String,
        url: String,
        generation: u64,
        connector: Arc<C>,
        config: SessionConfig,
        registry: Arc<Mutex<Registry>>,
    ) -> mpsc::UnboundedSender<Command> {
        let (tx, rx) = mpsc::unbounded_channel();
        let connect = connect_future(&connector, &url);
        let task = Self {
            key,
            generation,
            url,
            connector,
            config,
            registry,
            commands: rx,
            listeners: Listeners::default(),
            state: ConnState::Connecting { connect },
            grace: TimerSlot::default(),
            attempt: 0,
            epoch: 0,
            connects: 1,
        };
        tokio::spawn(task.run());
        tx
    }

    async fn run(mut self) {
        info!(session_key = %self.key, generation = self.generation, "Session started");

        loop {
            let step = tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => break,
                },
                () = self.grace.fired() => Step::GraceExpired,
                progress = self.state.progress() => Step::Progress(progress),
            };

            match step {
                Step::Command(Command::Shutdown) => {
                    self.shutdown();
                    break;
                }
                Step::Command(command) => self.handle_command(command),
                Step::GraceExpired => {
                    if self.expire().await {
                        break;
                    }
                }
                Step::Progress(progress) => self.handle_progress(progress),
            }
        }

        info!(
            session_key = %self.key,
            epoch = self.epoch,
            connects = self.connects,
            "Session ended"
        );
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Attach {
                id,
                url,
                events,
                reply,
            } => {
                let result = self.attach(id, url, events);
                let accepted = result.is_ok();
                if reply.send(result).is_err() && accepted {
                    // The caller gave up before receiving its handle
                    self.detach(id);
                }
            }
            Command::Detach { id } => self.detach(id),
            Command::Send(message) => self.send(message),
            Command::Reconnect => self.reconnect(),
            Command::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => self.shutdown(),
        }
    }

    fn attach(
        &mut self,
        id: ListenerId,
        url: String,
        events: mpsc::Sender<TerminalEvent>,
    ) -> Result<(), SessionError> {
        if self.listeners.len() >= self.config.max_listeners {
            warn!(
                session_key = %self.key,
                max = self.config.max_listeners,
                "Listener limit reached"
            );
            return Err(SessionError::TooManyListeners {
                key: self.key.clone(),
                max: self.config.max_listeners,
            });
        }

        if self.grace.clear() {
            info!(session_key = %self.key, "Reattached within grace period");
        }
        self.url = url;
        self.listeners.add(id, events);

        // A finished epoch is not resumable; a new attach starts the next one
        if matches!(self.state, ConnState::Closed { .. }) {
            info!(session_key = %self.key, epoch = self.epoch, "Reopening closed session");
            self.attempt = 0;
            self.start_connect();
        }
        debug!(
            session_key = %self.key,
            listeners = self.listeners.len(),
            "Listener attached"
        );

        // Bring a late listener up to date with the current state
        let catch_up = match &self.state {
            // Closed was reopened above
            ConnState::Connecting { .. } | ConnState::Closed { .. } => None,
            ConnState::Open { .. } => Some(TerminalEvent::Opened { epoch: self.epoch }),
            ConnState::Backoff { .. } => Some(TerminalEvent::Reconnecting {
                attempt: self.attempt,
                delay: self.state.backoff_remaining().unwrap_or_default(),
            }),
            ConnState::Failed { error } => Some(TerminalEvent::Failed {
                attempts: self.attempt,
                error: error.clone(),
            }),
        };
        if let Some(event) = catch_up {
            self.listeners.send_to(id, event);
        }
        Ok(())
    }

    fn detach(&mut self, id: ListenerId) {
        if !self.listeners.remove(id) {
            return;
        }
        debug!(
            session_key = %self.key,
            listeners = self.listeners.len(),
            "Listener detached"
        );
        if self.listeners.is_empty() {
            self.schedule_teardown();
        }
    }

    fn schedule_teardown(&mut self) {
        self.grace.arm(self.config.grace_period);
        info!(
            session_key = %self.key,
            grace_secs = self.config.grace_period.as_secs(),
            "Last listener detached, teardown scheduled"
        );
    }

    fn broadcast(&mut self, event: &TerminalEvent) {
        let dropped = self.listeners.broadcast(event);
        if dropped > 0 && self.listeners.is_empty() {
            self.schedule_teardown();
        }
    }

    fn send(&mut self, message: ClientMessage) {
        let ConnState::Open { conn } = &self.state else {
            debug!(
                session_key = %self.key,
                status = %self.state.status(),
                "Dropping input while not connected"
            );
            return;
        };

        match conn.outbound.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(session_key = %self.key, "Outbound buffer full, dropping input");
            }
            Err(TrySendError::Closed(_)) => {
                self.connection_lost("send failed: connection closed".into());
            }
        }
    }

    fn reconnect(&mut self) {
        info!(
            session_key = %self.key,
            status = %self.state.status(),
            "Manual reconnect"
        );
        self.attempt = 0;
        self.start_connect();
    }

    fn shutdown(&mut self) {
        self.grace.clear();
        let reason = "session shut down".to_string();
        self.state = ConnState::Closed {
            code: NORMAL_CLOSURE,
            reason: reason.clone(),
        };
        self.broadcast(&TerminalEvent::Closed {
            code: NORMAL_CLOSURE,
            reason,
        });
        info!(session_key = %self.key, "Session shut down");
    }

    /// Tear down after the grace period unless an attach raced the timer.
    ///
    /// Runs under the registry lock so no attach can reach this task once
    /// its entry is gone.
    async fn expire(&mut self) -> bool {
        let mut registry = self.registry.lock().await;

        if !self.listeners.is_empty() {
            self.grace.clear();
            return false;
        }
        if !self.commands.is_empty() {
            // Serve what was queued first; re-check right after
            self.grace.arm(Duration::ZERO);
            return false;
        }

        registry.remove(&self.key, self.generation);
        drop(registry);

        self.grace.clear();
        info!(
            session_key = %self.key,
            status = %self.state.status(),
            "Grace period expired, closing session"
        );
        true
    }

    fn handle_progress(&mut self, progress: ConnProgress) {
        match progress {
            ConnProgress::Connected(Ok(conn)) => self.opened(conn),
            ConnProgress::Connected(Err(e)) => self.connection_lost(e.to_string()),
            ConnProgress::Transport(Some(TransportEvent::Message(message))) => match message {
                ServerMessage::Output { data } => {
                    self.broadcast(&TerminalEvent::Output(data));
                }
                ServerMessage::Error { message } => {
                    warn!(session_key = %self.key, error = %message, "Remote error");
                    self.broadcast(&TerminalEvent::RemoteError(message));
                }
            },
            ConnProgress::Transport(Some(TransportEvent::Closed { code, reason })) => {
                if code == NORMAL_CLOSURE {
                    info!(session_key = %self.key, epoch = self.epoch, %reason, "Connection closed by remote");
                    self.state = ConnState::Closed {
                        code,
                        reason: reason.clone(),
                    };
                    self.broadcast(&TerminalEvent::Closed { code, reason });
                } else {
                    self.connection_lost(format!("closed with code {code}: {reason}"));
                }
            }
            ConnProgress::Transport(Some(TransportEvent::Error(e))) => self.connection_lost(e),
            ConnProgress::Transport(None) => self.connection_lost("connection dropped".into()),
            ConnProgress::RetryDue => {
                debug!(session_key = %self.key, attempt = self.attempt, "Reconnect attempt");
                self.start_connect();
            }
        }
    }

    fn opened(&mut self, conn: Connection) {
        self.attempt = 0;
        self.epoch += 1;
        self.state = ConnState::Open { conn };
        info!(
            session_key = %self.key,
            epoch = self.epoch,
            listeners = self.listeners.len(),
            "Connection opened"
        );
        self.broadcast(&TerminalEvent::Opened { epoch: self.epoch });
    }

    /// Schedule a reconnect, or give up once attempts are exhausted.
    fn connection_lost(&mut self, reason: String) {
        let policy = &self.config.reconnect;
        if !policy.should_retry(self.attempt) {
            error!(
                session_key = %self.key,
                attempts = self.attempt,
                error = %reason,
                "Max reconnect attempts reached"
            );
            self.state = ConnState::Failed {
                error: reason.clone(),
            };
            self.broadcast(&TerminalEvent::Failed {
                attempts: self.attempt,
                error: reason,
            });
            return;
        }

        self.attempt = self.attempt.saturating_add(1);
        let delay = policy.delay_for_attempt(self.attempt);
        warn!(
            session_key = %self.key,
            attempt = self.attempt,
            delay_ms = delay.as_millis(),
            error = %reason,
            "Connection lost, reconnecting"
        );
        self.state = ConnState::backoff(delay);
        self.broadcast(&TerminalEvent::Reconnecting {
            attempt: self.attempt,
            delay,
        });
    }

    /// Replace the current state with a fresh connect. Whatever the old state
    /// owned (socket, timer, in-flight connect) is dropped unobserved.
    fn start_connect(&mut self) {
        self.connects += 1;
        self.state = ConnState::Connecting {
            connect: connect_future(&self.connector, &self.url),
        };
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            key: self.key.clone(),
            status: self.state.status(),
            listeners: self.listeners.len(),
            attempt: self.attempt,
            epoch: self.epoch,
            connects: self.connects,
            grace_armed: self.grace.is_armed(),
        }
    }
}

fn connect_future<C: Connector>(connector: &Arc<C>, url: &str) -> ConnectFuture {
    let connector = Arc::clone(connector);
    let url = url.to_string();
    Box::pin(async move { connector.connect(&url).await })
}
