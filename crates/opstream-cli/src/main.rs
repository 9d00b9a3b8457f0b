//! opstream CLI
//!
//! Follow instance logs, run commands and open interactive terminals against
//! the opstream backend.

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::info;

use opstream_cli::config::{GlobalArgs, log_filter};
use opstream_cli::exec_cmd::ExecArgs;
use opstream_cli::logs_cmd::LogsArgs;
use opstream_cli::term::TermArgs;
use opstream_cli::{exec_cmd, logs_cmd, run_cmd, term};
use opstream_core::tracing_init::init_tracing;

#[derive(Parser, Debug)]
#[command(name = "opstream")]
#[command(version, about = "Stream logs, commands and terminals from remote instances", long_about = None)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow an instance's logs until interrupted
    Logs(LogsArgs),
    /// Run a command, streaming its output as it is produced
    Run(ExecArgs),
    /// Run a command and print its output once it completes
    Exec(ExecArgs),
    /// Open an interactive terminal
    Term(TermArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let config = cli.global.resolve()?;

    // Keep the raw-mode terminal quiet unless a level was asked for
    let level = match (&cli.command, &cli.global.log_level) {
        (Commands::Term(_), None) => "warn",
        _ => config.log.level.as_str(),
    };
    init_tracing(&log_filter(level), config.log.json);
    opstream_client::install_crypto_provider();

    info!(version = env!("CARGO_PKG_VERSION"), api = %config.api.base_url, "Starting opstream CLI");

    match cli.command {
        Commands::Logs(args) => logs_cmd::run(args, &config).await,
        Commands::Run(args) => run_cmd::run(args, &config).await,
        Commands::Exec(args) => exec_cmd::run(args, &config).await,
        Commands::Term(args) => term::run(args, &config).await,
    }
}
