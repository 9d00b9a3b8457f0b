//! `opstream exec`: run a command to completion and print its output.
//!
//! User-facing output uses writeln! to stdout (this is a CLI binary, not debug output).

use std::io::{self, Write};
use std::process::ExitCode;

use opstream_client::ApiClient;
use opstream_core::Config;
use opstream_core::protocol::{ExecRequest, ExecResponse};

/// Arguments shared by `exec` and `run`.
#[derive(clap::Args, Debug)]
pub struct ExecArgs {
    /// Instance identifier
    pub instance: String,

    /// Allocate a pseudo-terminal for the command
    #[arg(long)]
    pub tty: bool,

    /// Command line to execute on the instance
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,
}

impl ExecArgs {
    pub fn request(&self) -> ExecRequest {
        ExecRequest::new(self.command.join(" ")).with_tty(self.tty)
    }
}

pub async fn run(args: ExecArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let api = ApiClient::from_config(&config.api)?;
    let response = api.exec(&args.instance, &args.request()).await?;
    print_response(&mut io::stdout(), &response)?;
    Ok(crate::exit_status(response.exit_code))
}

fn print_response(out: &mut impl Write, response: &ExecResponse) -> io::Result<()> {
    out.write_all(response.output.as_bytes())?;
    if !response.output.is_empty() && !response.output.ends_with('\n') {
        writeln!(out)?;
    }
    out.flush()
}
