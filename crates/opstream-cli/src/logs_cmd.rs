//! `opstream logs`: follow an instance's log stream until interrupted.

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use tracing::info;

use opstream_client::{ApiClient, EventStreamReader};
use opstream_core::Config;

use crate::output::{Outcome, StreamPrinter};

#[derive(clap::Args, Debug)]
pub struct LogsArgs {
    /// Instance identifier
    pub instance: String,

    /// Container within the instance (defaults to the primary container)
    #[arg(short, long)]
    pub container: Option<String>,

    /// Start from the last N lines
    #[arg(short = 'n', long)]
    pub tail: Option<u32>,
}

pub async fn run(args: LogsArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let api = ApiClient::from_config(&config.api)?;
    let reader = EventStreamReader::new(Duration::from_secs(config.stream.connect_timeout_secs))?;
    let request = api.logs_request(&args.instance, args.container.as_deref(), args.tail)?;

    let cancel = crate::cancel_on_ctrl_c();
    let mut printer = StreamPrinter::new(io::stdout(), io::stderr(), cancel.clone());
    reader.run(request, &cancel, &mut printer).await?;

    info!(instance = %args.instance, "Log stream ended");
    // Error frames are reported but a tail that ends on its own is not a failure
    Ok(match printer.outcome() {
        Outcome::Failed(_) => ExitCode::FAILURE,
        Outcome::Pending | Outcome::Succeeded { .. } => ExitCode::SUCCESS,
    })
}
