//! Resize debouncing.
//!
//! Window managers report a stream of sizes while a window is dragged; only
//! the size that holds for the quiet period is sent to the remote PTY.

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct ResizeDebouncer {
    quiet: Duration,
    pending: Option<(u16, u16)>,
    deadline: Option<Instant>,
    last_sent: Option<(u16, u16)>,
}

impl ResizeDebouncer {
    pub const fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: None,
            deadline: None,
            last_sent: None,
        }
    }

    /// Record a new size; restarts the quiet period.
    pub fn push(&mut self, cols: u16, rows: u16, now: Instant) {
        self.pending = Some((cols, rows));
        self.deadline = Some(now + self.quiet);
    }

    /// When the pending size becomes due, if any.
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The size to send once the quiet period has elapsed.
    ///
    /// A size equal to the last one sent is swallowed.
    pub fn poll(&mut self, now: Instant) -> Option<(u16, u16)> {
        if self.deadline.is_none_or(|deadline| now < deadline) {
            return None;
        }
        self.deadline = None;
        let size = self.pending.take()?;
        if self.last_sent == Some(size) {
            return None;
        }
        self.last_sent = Some(size);
        Some(size)
    }

    /// Record a size sent directly, bypassing the quiet period.
    pub const fn sent(&mut self, cols: u16, rows: u16) {
        self.last_sent = Some((cols, rows));
    }
}
