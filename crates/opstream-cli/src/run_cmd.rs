//! `opstream run`: execute a command and stream its output as it is produced.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use tracing::{info, warn};

use opstream_client::{ApiClient, EventStreamReader};
use opstream_core::Config;

use crate::exec_cmd::ExecArgs;
use crate::output::{Outcome, StreamPrinter};

pub async fn run(args: ExecArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let api = ApiClient::from_config(&config.api)?;
    let reader = EventStreamReader::new(Duration::from_secs(config.stream.connect_timeout_secs))?;
    let request = api.exec_stream_request(&args.instance, &args.request())?;

    let cancel = crate::cancel_on_ctrl_c();
    let mut printer = StreamPrinter::new(io::stdout(), io::stderr(), cancel.clone());
    reader.run(request, &cancel, &mut printer).await?;

    let outcome = printer.outcome();
    match outcome {
        Outcome::Pending if cancel.is_cancelled() => info!("Interrupted before completion"),
        Outcome::Pending => warn!("Stream ended without a result"),
        Outcome::Succeeded { exit_code } => info!(exit_code, "Command finished"),
        Outcome::Failed(message) => info!(%message, "Command failed"),
    }
    Ok(crate::exit_status(outcome.exit_code()))
}
