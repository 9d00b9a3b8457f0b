//! `opstream term`: interactive terminal through the session manager.
//!
//! Terminal I/O runs on a dedicated OS thread; the session handle, resize
//! debouncing and output stay on the tokio runtime. Communication via
//! `tokio::sync::mpsc` channels.

mod input;
mod resize;

pub use input::{KeyAction, KeyMapper, encode};
pub use resize::ResizeDebouncer;

use std::io::{self, Write};
use std::process::ExitCode;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossterm::event::{self, Event, KeyEvent, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use opstream_client::terminal::SessionConfig;
use opstream_client::{ApiClient, TerminalEvent, TerminalHandle, TerminalSessionManager};
use opstream_core::Config;

#[derive(clap::Args, Debug)]
pub struct TermArgs {
    /// Instance identifier
    pub instance: String,
}

/// Terminal events forwarded from the reader thread.
#[derive(Debug)]
pub enum TermInput {
    Key(KeyEvent),
    Resize(u16, u16),
}

/// Why the interactive loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// `Ctrl-] q`.
    Quit,
    /// The remote shell ended the session normally.
    RemoteClosed,
    /// The session task is gone.
    SessionEnded,
}

pub async fn run(args: TermArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let api = ApiClient::from_config(&config.api)?;
    let url = api.terminal_url(&args.instance);
    let manager = TerminalSessionManager::websocket(
        SessionConfig::from(&config.terminal),
        Duration::from_secs(config.stream.connect_timeout_secs),
    );

    // Attach BEFORE entering raw mode so Ctrl+C works if this fails.
    let mut handle = manager.attach(&args.instance, url.as_str()).await?;

    enable_raw_mode()?;
    let cancel = CancellationToken::new();
    let (input_tx, mut input_rx) = mpsc::channel::<TermInput>(64);
    let reader = spawn_input_thread(input_tx, cancel.clone());

    let mut stdout = io::stdout();
    let result = match status(
        &mut stdout,
        &format!(
            "connecting to {} (Ctrl-] r reconnects, Ctrl-] q quits)",
            args.instance
        ),
    ) {
        Ok(()) => {
            session_loop(
                &mut handle,
                &mut input_rx,
                &mut stdout,
                config.terminal.resize_debounce(),
            )
            .await
        }
        Err(e) => Err(e.into()),
    };

    // Stop the reader thread before restoring the terminal
    cancel.cancel();
    let _ = reader.join(); // fast, <50ms due to poll timeout
    let _ = disable_raw_mode();

    drop(handle);
    manager.shutdown().await;

    let exit = result?;
    info!(instance = %args.instance, ?exit, "Terminal closed");
    Ok(match exit {
        Exit::Quit | Exit::RemoteClosed => ExitCode::SUCCESS,
        Exit::SessionEnded => ExitCode::FAILURE,
    })
}

/// Pump session events to `out` and local input to the session until the
/// user quits or the session ends.
pub async fn session_loop(
    handle: &mut TerminalHandle,
    input: &mut mpsc::Receiver<TermInput>,
    out: &mut impl Write,
    resize_debounce: Duration,
) -> anyhow::Result<Exit> {
    let mut keys = KeyMapper::new();
    let mut resizes = ResizeDebouncer::new(resize_debounce);

    loop {
        let resize_due = resizes.deadline();
        tokio::select! {
            event = handle.recv() => {
                let Some(event) = event else {
                    return Ok(Exit::SessionEnded);
                };
                if let TerminalEvent::Output(data) = &event {
                    out.write_all(data.as_bytes())?;
                    out.flush()?;
                    continue;
                }
                if let Some(line) = describe(&event) {
                    status(out, &line)?;
                }
                match event {
                    // The remote PTY starts at its default geometry on every connect
                    TerminalEvent::Opened { .. } => {
                        if let Ok((cols, rows)) = crossterm::terminal::size() {
                            handle.resize(cols, rows)?;
                            resizes.sent(cols, rows);
                        }
                    }
                    TerminalEvent::Closed { .. } => return Ok(Exit::RemoteClosed),
                    _ => {}
                }
            }
            Some(input) = input.recv() => match input {
                TermInput::Key(key) => match keys.map(key) {
                    KeyAction::Input(data) => handle.send_input(data)?,
                    KeyAction::Reconnect => {
                        status(out, "reconnecting")?;
                        handle.reconnect()?;
                    }
                    KeyAction::Quit => return Ok(Exit::Quit),
                    KeyAction::Escape | KeyAction::Ignore => {}
                },
                TermInput::Resize(cols, rows) => resizes.push(cols, rows, now()),
            },
            () = wait_until(resize_due) => {
                if let Some((cols, rows)) = resizes.poll(now()) {
                    debug!(cols, rows, "Sending resize");
                    handle.resize(cols, rows)?;
                }
            }
        }
    }
}

// Read through tokio's clock so paused-time tests drive the debouncer too.
fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline.into()).await,
        None => std::future::pending().await,
    }
}

/// Status line for a lifecycle event; `None` for output.
pub fn describe(event: &TerminalEvent) -> Option<String> {
    Some(match event {
        TerminalEvent::Output(_) => return None,
        TerminalEvent::Opened { epoch: 1 } => "connected".to_string(),
        TerminalEvent::Opened { .. } => "reconnected".to_string(),
        TerminalEvent::RemoteError(message) => format!("remote error: {message}"),
        TerminalEvent::Reconnecting { attempt, delay } => format!(
            "connection lost, reconnecting in {:.1}s (attempt {attempt})",
            delay.as_secs_f64()
        ),
        TerminalEvent::Closed { code, reason } if reason.is_empty() => {
            format!("session closed ({code})")
        }
        TerminalEvent::Closed { code, reason } => format!("session closed ({code}: {reason})"),
        TerminalEvent::Failed { attempts, error } => {
            format!("giving up after {attempts} attempts: {error} (Ctrl-] r to retry)")
        }
    })
}

fn status(out: &mut impl Write, line: &str) -> io::Result<()> {
    // Raw mode: carriage returns are not implied
    write!(out, "\r\n[opstream] {line}\r\n")?;
    out.flush()
}

fn spawn_input_thread(tx: mpsc::Sender<TermInput>, cancel: CancellationToken) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while !cancel.is_cancelled() {
            // Poll with 50ms timeout so we can check cancellation
            if !event::poll(Duration::from_millis(50)).unwrap_or(false) {
                continue;
            }
            let forwarded = match event::read() {
                // Filter out Release events (Windows emits Press + Release per keystroke)
                Ok(Event::Key(key)) if matches!(key.kind, KeyEventKind::Press | KeyEventKind::Repeat) => {
                    tx.blocking_send(TermInput::Key(key))
                }
                Ok(Event::Resize(cols, rows)) => tx.blocking_send(TermInput::Resize(cols, rows)),
                Ok(_) => Ok(()),
                Err(e) => {
                    warn!(error = %e, "Terminal read failed");
                    break;
                }
            };
            if forwarded.is_err() {
                break;
            }
        }
    })
}
