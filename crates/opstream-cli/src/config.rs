//! Command-line overrides for the resolved configuration.
//!
//! Flags are the last layer on top of `opstream_core::config::load_config`
//! (defaults, global file, `--config`, environment).

use std::path::PathBuf;

use opstream_core::Config;
use opstream_core::config::load_config;

/// Flags shared by every subcommand.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct GlobalArgs {
    /// Config file layered over the global settings
    #[arg(long, global = true, env = "OPSTREAM_CONFIG")]
    pub config: Option<PathBuf>,

    /// Backend API base URL (e.g. "https://ops.example.com/api")
    #[arg(long, global = true, env = "OPSTREAM_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token for the backend
    #[arg(long, global = true, env = "OPSTREAM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Log level for opstream crates; `RUST_LOG` takes precedence
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl GlobalArgs {
    /// Load the layered configuration and apply these flags on top.
    pub fn resolve(&self) -> anyhow::Result<Config> {
        let mut config = load_config(self.config.as_deref())?;
        self.apply(&mut config);
        Ok(config)
    }

    pub fn apply(&self, config: &mut Config) {
        if let Some(url) = &self.api_url {
            config.api.base_url.clone_from(url);
        }
        if let Some(token) = &self.token {
            config.api.token = Some(token.clone());
        }
        if let Some(level) = &self.log_level {
            config.log.level.clone_from(level);
        }
        if self.log_json {
            config.log.json = true;
        }
    }
}

/// Default tracing filter covering every opstream crate.
pub fn log_filter(level: &str) -> String {
    format!("opstream={level}")
}
