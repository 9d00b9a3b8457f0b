//! Terminal session registry.
//!
//! Maps each session key to the task owning that key's connection. Callers
//! only ever receive [`TerminalHandle`]s; the connection itself never leaves
//! the session task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, info};

use super::error::SessionError;
use super::handle::TerminalHandle;
use super::session::{Command, SessionTask};
use super::transport::Connector;
use super::types::{ListenerId, ManagerStats, SessionConfig, SessionSnapshot};
use super::ws::WsConnector;

/// Live session entries, guarded by the manager's mutex.
#[derive(Default)]
pub(crate) struct Registry {
    sessions: HashMap<String, SessionEntry>,
    next_generation: u64,
    next_listener: u64,
}

struct SessionEntry {
    commands: mpsc::UnboundedSender<Command>,
    generation: u64,
}

impl Registry {
    /// Remove `key` if it still belongs to `generation`.
    pub(crate) fn remove(&mut self, key: &str, generation: u64) -> bool {
        if self
            .sessions
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
        {
            self.sessions.remove(key);
            true
        } else {
            false
        }
    }
}

/// Process-wide terminal session manager.
///
/// Cloning is cheap and yields a handle to the same registry.
pub struct TerminalSessionManager<C = WsConnector> {
    registry: Arc<Mutex<Registry>>,
    connector: Arc<C>,
    config: SessionConfig,
}

impl<C> Clone for TerminalSessionManager<C> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            connector: Arc::clone(&self.connector),
            config: self.config.clone(),
        }
    }
}

impl TerminalSessionManager<WsConnector> {
    /// Manager backed by WebSocket connections.
    pub fn websocket(config: SessionConfig, connect_timeout: Duration) -> Self {
        Self::new(config, WsConnector::new(connect_timeout))
    }
}

impl<C: Connector> TerminalSessionManager<C> {
    pub fn new(config: SessionConfig, connector: C) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            connector: Arc::new(connector),
            config,
        }
    }

    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Attach a listener to the session for `key`, connecting to `url` if no
    /// session exists yet.
    ///
    /// Attaching to a live session never opens a second connection; it
    /// cancels a pending teardown and, for an open session, delivers
    /// [`TerminalEvent::Opened`](super::TerminalEvent::Opened) immediately.
    #[allow(clippy::significant_drop_tightening)]
    pub async fn attach(&self, key: &str, url: &str) -> Result<TerminalHandle, SessionError> {
        let (events_tx, events_rx) = mpsc::channel(self.config.listener_queue.max(1));
        let (reply_tx, reply_rx) = oneshot::channel();

        let (id, commands) = {
            let mut registry = self.registry.lock().await;
            registry.next_listener += 1;
            let id = ListenerId(registry.next_listener);

            let commands = if let Some(entry) = registry.sessions.get(key) {
                entry.commands.clone()
            } else {
                registry.next_generation += 1;
                let generation = registry.next_generation;
                let commands = SessionTask::spawn(
                    key.to_string(),
                    url.to_string(),
                    generation,
                    Arc::clone(&self.connector),
                    self.config.clone(),
                    Arc::clone(&self.registry),
                );
                registry.sessions.insert(
                    key.to_string(),
                    SessionEntry {
                        commands: commands.clone(),
                        generation,
                    },
                );
                info!(session_key = key, generation, "Created session");
                commands
            };

            // Sent under the lock so a concurrent teardown sees it queued
            commands
                .send(Command::Attach {
                    id,
                    url: url.to_string(),
                    events: events_tx,
                    reply: reply_tx,
                })
                .map_err(|_| closed(key))?;
            (id, commands)
        };

        reply_rx.await.map_err(|_| closed(key))??;
        debug!(session_key = key, listener = id.0, "Attached");
        Ok(TerminalHandle::new(key.to_string(), id, commands, events_rx))
    }

    /// Current state of the session for `key`, if one exists.
    pub async fn snapshot(&self, key: &str) -> Option<SessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        {
            let registry = self.registry.lock().await;
            let entry = registry.sessions.get(key)?;
            entry
                .commands
                .send(Command::Snapshot { reply: reply_tx })
                .ok()?;
        }
        reply_rx.await.ok()
    }

    /// Keys of all live sessions.
    pub async fn keys(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        let mut keys: Vec<String> = registry.sessions.keys().cloned().collect();
        drop(registry);
        keys.sort();
        keys
    }

    /// Get manager statistics.
    pub async fn stats(&self) -> ManagerStats {
        let pending: Vec<_> = {
            let registry = self.registry.lock().await;
            registry
                .sessions
                .values()
                .filter_map(|entry| {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    entry
                        .commands
                        .send(Command::Snapshot { reply: reply_tx })
                        .ok()
                        .map(|()| reply_rx)
                })
                .collect()
        };

        let mut stats = ManagerStats::default();
        for reply in pending {
            if let Ok(snapshot) = reply.await {
                stats.session_count += 1;
                stats.total_listeners += snapshot.listeners;
            }
        }
        stats
    }

    /// Close every session immediately, skipping grace periods.
    ///
    /// Attached handles receive a final `Closed` event; later attaches start
    /// fresh sessions.
    pub async fn shutdown(&self) {
        let drained: Vec<(String, SessionEntry)> = {
            let mut registry = self.registry.lock().await;
            registry.sessions.drain().collect()
        };
        info!(sessions = drained.len(), "Shutting down terminal sessions");
        for (key, entry) in drained {
            if entry.commands.send(Command::Shutdown).is_err() {
                debug!(session_key = %key, "Session already ended");
            }
        }
    }
}

fn closed(key: &str) -> SessionError {
    SessionError::Closed {
        key: key.to_string(),
    }
}
