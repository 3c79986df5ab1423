use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {0}")]
    Toml(String),
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        // The default `Display` embeds a snippet of the input; keep only the message.
        ConfigError::Toml(err.message().to_owned())
    }
}

/// Step-debugger configuration.
///
/// ```toml
/// max_wait_for_updates_ms = 30000
/// pause_poll_interval_ms = 250
///
/// [variables]
/// max_depth = 4
/// max_children = 64
/// max_nodes = 512
/// max_value_chars = 1024
///
/// [logging]
/// level = "info"
/// json = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DebuggerConfig {
    /// Upper bound applied to controller long-poll timeouts.
    #[serde(default = "DebuggerConfig::default_max_wait_for_updates_ms")]
    pub max_wait_for_updates_ms: u64,

    /// How often a parked worker re-checks its session even without a wake-up.
    #[serde(default = "DebuggerConfig::default_pause_poll_interval_ms")]
    pub pause_poll_interval_ms: u64,

    #[serde(default)]
    pub variables: VariablesConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DebuggerConfig {
    fn default_max_wait_for_updates_ms() -> u64 {
        30_000
    }

    fn default_pause_poll_interval_ms() -> u64 {
        250
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn max_wait_for_updates(&self) -> Duration {
        Duration::from_millis(self.max_wait_for_updates_ms)
    }

    /// Never zero, so a parked worker cannot spin.
    pub fn pause_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pause_poll_interval_ms.max(1))
    }

    /// Clamp a controller-supplied long-poll timeout to the configured maximum.
    pub fn clamp_wait(&self, requested: Duration) -> Duration {
        requested.min(self.max_wait_for_updates())
    }
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            max_wait_for_updates_ms: Self::default_max_wait_for_updates_ms(),
            pause_poll_interval_ms: Self::default_pause_poll_interval_ms(),
            variables: VariablesConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Bounds on the variable tree captured at every visited node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariablesConfig {
    /// Levels of structured children expanded below each top-level variable.
    #[serde(default = "VariablesConfig::default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "VariablesConfig::default_max_children")]
    pub max_children: usize,

    /// Variables rendered per capture, nested children included. Top-level variables are
    /// always listed; once the budget is spent their children are no longer expanded.
    #[serde(default = "VariablesConfig::default_max_nodes")]
    pub max_nodes: usize,

    /// Rendered values longer than this are truncated with a trailing `...`.
    #[serde(default = "VariablesConfig::default_max_value_chars")]
    pub max_value_chars: usize,
}

impl VariablesConfig {
    fn default_max_depth() -> usize {
        4
    }

    fn default_max_children() -> usize {
        64
    }

    fn default_max_nodes() -> usize {
        512
    }

    fn default_max_value_chars() -> usize {
        1024
    }
}

impl Default for VariablesConfig {
    fn default() -> Self {
        Self {
            max_depth: Self::default_max_depth(),
            max_children: Self::default_max_children(),
            max_nodes: Self::default_max_nodes(),
            max_value_chars: Self::default_max_value_chars(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// A simple level (`info`, `debug`, ...) or a full `EnvFilter` directive string.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}
