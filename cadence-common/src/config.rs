//! Configuration loading and config file resolution
//!
//! Bootstrap configuration comes from a single TOML file. Every field has a
//! built-in default, and a missing file is not an error: the service logs a
//! warning and starts with defaults.
//!
//! # Config file priority
//!
//! 1. Command-line argument (highest priority)
//! 2. `CADENCE_CONFIG` environment variable
//! 3. `<config_dir>/cadence/config.toml`
//! 4. Built-in defaults (no file)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "CADENCE_CONFIG";

/// Complete bootstrap configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub http: HttpConfig,

    #[serde(default)]
    pub simulator: SimulatorSettings,
}

/// What the session does when the transport fails to play an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Stay in `Error` with the queue intact until the user skips or plays
    #[default]
    Stall,
    /// Advance to the next item as if `skipNext` had been issued
    Skip,
}

/// Playback session tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSettings {
    /// Position reporter interval
    #[serde(default = "default_position_interval_ms")]
    pub position_interval_ms: u64,

    /// Bounded command channel capacity
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    /// Upper bound on a single catalog call made by the session worker
    #[serde(default = "default_catalog_timeout_ms")]
    pub catalog_timeout_ms: u64,

    /// skipPrevious restarts the current item when past this position
    #[serde(default = "default_previous_restart_threshold_ms")]
    pub previous_restart_threshold_ms: u64,

    #[serde(default)]
    pub on_transport_error: ErrorPolicy,

    /// How long a controller waits for the session to become ready
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Session event bus capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            position_interval_ms: default_position_interval_ms(),
            command_queue_capacity: default_command_queue_capacity(),
            catalog_timeout_ms: default_catalog_timeout_ms(),
            previous_restart_threshold_ms: default_previous_restart_threshold_ms(),
            on_transport_error: ErrorPolicy::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl SessionSettings {
    pub fn position_interval(&self) -> Duration {
        // A zero interval would make tokio::time::interval panic
        Duration::from_millis(self.position_interval_ms.max(10))
    }

    pub fn catalog_timeout(&self) -> Duration {
        Duration::from_millis(self.catalog_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// HTTP remote-control surface
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,

    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind: default_bind(),
        }
    }
}

/// Simulated transport parameters
#[derive(Debug, Clone, Deserialize)]
pub struct SimulatorSettings {
    /// Time spent buffering after each load
    #[serde(default = "default_load_latency_ms")]
    pub load_latency_ms: u64,

    /// Clock resolution of the simulated engine
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// Duration assumed for tracks whose duration is unknown
    #[serde(default = "default_duration_ms")]
    pub default_duration_ms: u64,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            load_latency_ms: default_load_latency_ms(),
            tick_ms: default_tick_ms(),
            default_duration_ms: default_duration_ms(),
        }
    }
}

fn default_position_interval_ms() -> u64 {
    500
}

fn default_command_queue_capacity() -> usize {
    64
}

fn default_catalog_timeout_ms() -> u64 {
    2000
}

fn default_previous_restart_threshold_ms() -> u64 {
    3000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_event_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_http_enabled() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1:5790".to_string()
}

fn default_load_latency_ms() -> u64 {
    50
}

fn default_tick_ms() -> u64 {
    250
}

fn default_duration_ms() -> u64 {
    180_000
}

impl TomlConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Resolve the config file and load it, falling back to defaults
    ///
    /// A missing file is logged and never fatal. A file that exists but
    /// does not parse is an error.
    pub fn load_or_default(cli_path: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_path) {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                warn!(
                    "Config file {} not found, using built-in defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file location available, using built-in defaults");
                Ok(Self::default())
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.session.command_queue_capacity == 0 {
            return Err(Error::Config(
                "session.command_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.session.event_capacity == 0 {
            return Err(Error::Config(
                "session.event_capacity must be at least 1".to_string(),
            ));
        }
        if self.simulator.tick_ms == 0 {
            return Err(Error::Config("simulator.tick_ms must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Pick the config file location following the priority order above
pub fn resolve_config_path(cli_path: Option<&Path>) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_path {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path()
}

/// `<config_dir>/cadence/config.toml` for the current platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cadence").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.session.position_interval_ms, 500);
        assert_eq!(config.session.on_transport_error, ErrorPolicy::Stall);
        assert_eq!(config.logging.level, "info");
        assert!(config.http.enabled);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let config = TomlConfig::from_toml_str(
            r#"
            [session]
            on_transport_error = "skip"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.session.on_transport_error, ErrorPolicy::Skip);
        assert_eq!(config.session.command_queue_capacity, 64);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.http.bind, "127.0.0.1:5790");
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let err = TomlConfig::from_toml_str("[session]\ncommand_queue_capacity = 0\n").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_position_interval_never_zero() {
        let settings = SessionSettings {
            position_interval_ms: 0,
            ..SessionSettings::default()
        };
        assert!(settings.position_interval() > Duration::ZERO);
    }
}
