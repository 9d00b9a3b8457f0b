//! opstream CLI library
//!
//! Command implementations behind the `opstream` binary: log tailing,
//! streamed and one-shot command execution, and interactive terminals.

pub mod config;
pub mod exec_cmd;
pub mod logs_cmd;
pub mod output;
pub mod run_cmd;
pub mod term;

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Token cancelled on the first Ctrl-C.
///
/// Must be called from within a tokio runtime.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            on_signal.cancel();
        }
    });
    cancel
}

/// Map a remote exit code onto a process exit status.
///
/// Codes outside `0..=255` become `1`.
pub fn exit_status(code: i32) -> ExitCode {
    u8::try_from(code).map_or(ExitCode::FAILURE, ExitCode::from)
}
