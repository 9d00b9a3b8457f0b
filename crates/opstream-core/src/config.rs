//! Configuration resolution for opstream.
//!
//! Implements hierarchical config resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/opstream/settings.json)
//! 3. Explicit config file (`--config`)
//! 4. Environment variables
//! 5. CLI arguments (highest priority, applied by the binary)

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::backoff::ReconnectPolicy;
use crate::error::{Error, Result};

/// Complete opstream configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Backend API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    /// Bearer credential; sent as a header on HTTP and as `?token=` on sockets.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            token: None,
            request_timeout_secs: 30,
        }
    }
}

/// Event stream settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StreamConfig {
    /// Timeout for establishing the streaming response (headers only).
    pub connect_timeout_secs: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
        }
    }
}

/// Terminal session manager settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TerminalConfig {
    /// Delay between the last detach and socket teardown.
    pub grace_period_secs: u64,
    /// Maximum listeners attached to one session.
    pub max_listeners: usize,
    /// Quiet period before a resize is sent.
    pub resize_debounce_ms: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            grace_period_secs: 5 * 60, // 5 minutes
            max_listeners: 8,
            resize_debounce_ms: 150,
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl TerminalConfig {
    pub const fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub const fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

/// Reconnect backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    pub const fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::from_millis(self.base_delay_ms, self.max_delay_ms, self.max_attempts)
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Load configuration with hierarchical resolution.
pub fn load_config(explicit: Option<&Path>) -> Result<Config> {
    let mut config = Config::default();

    // Load global config
    if let Some(global_path) = global_config_path()
        && global_path.exists()
    {
        config = load_config_file(&global_path)?;
    }

    // Load explicit config; a missing file here is an error
    if let Some(path) = explicit {
        let overlay = load_config_file(path)?;
        merge_config(&mut config, overlay);
    }

    // Apply environment overrides
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());

    Ok(config)
}

/// Get the global config file path: `<config dir>/opstream/settings.json`.
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("opstream").join("settings.json"))
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        Error::Config(format!("Failed to parse config file {}: {}", path.display(), e))
    })
}

fn merge_config(base: &mut Config, overlay: Config) {
    // Keep a previously configured token unless the overlay sets one
    let token = overlay.api.token.or_else(|| base.api.token.take());
    base.api = ApiConfig { token, ..overlay.api };

    base.stream = overlay.stream;
    base.terminal = overlay.terminal;
    base.log = overlay.log;
}

fn apply_env_overrides(config: &mut Config, var: impl Fn(&str) -> Option<String>) {
    if let Some(val) = var("OPSTREAM_API_URL") {
        config.api.base_url = val;
    }
    if let Some(val) = var("OPSTREAM_TOKEN") {
        config.api.token = Some(val);
    }
    if let Some(val) = var("OPSTREAM_LOG_LEVEL") {
        config.log.level = val;
    }
    if let Some(n) = var("OPSTREAM_GRACE_PERIOD_SECS").and_then(|v| v.parse().ok()) {
        config.terminal.grace_period_secs = n;
    }
    if let Some(n) = var("OPSTREAM_RECONNECT_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
        config.terminal.reconnect.max_attempts = n;
    }
}
