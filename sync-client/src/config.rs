//! Configuration loading for livesync clients.
//!
//! Configuration is loaded from a TOML file (for example `livesync.toml`).
//! Every section and field is optional.

use livesync_types::CachePolicy;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for a [`LiveClient`](crate::LiveClient).
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Transport configuration.
    pub transport: TransportConfig,
    /// Defaults for every mounted live query.
    pub query: QueryConfig,
    /// Freshness policy of the client's cache.
    pub cache: CachePolicy,
}

/// Transport configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TransportConfig {
    /// Server address passed to `Transport::connect` (default: 127.0.0.1:4433).
    #[serde(default = "default_address")]
    pub address: String,
    /// Give up on a connect attempt after this many milliseconds. 0 waits
    /// forever (default: 10000).
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Live query defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueryConfig {
    /// Interval between passive refetches in milliseconds. 0 disables the
    /// interval trigger (default: 0).
    #[serde(default)]
    pub refetch_interval_ms: u64,
    /// Refetch when the transport comes back after a disconnect (default: true).
    #[serde(default = "default_true")]
    pub refetch_on_reconnect: bool,
    /// Refetch when the application becomes visible again (default: true).
    #[serde(default = "default_true")]
    pub refetch_on_visible: bool,
    /// Keep a push subscription open after each fetch (default: true).
    /// When false, fetches are one-shot resolves.
    #[serde(default = "default_true")]
    pub push_updates: bool,
}

fn default_address() -> String {
    "127.0.0.1:4433".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl TransportConfig {
    /// The connect timeout, if enabled.
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            refetch_interval_ms: 0,
            refetch_on_reconnect: default_true(),
            refetch_on_visible: default_true(),
            push_updates: default_true(),
        }
    }
}

impl QueryConfig {
    /// The interval trigger period, if enabled.
    pub fn refetch_interval(&self) -> Option<Duration> {
        (self.refetch_interval_ms > 0).then(|| Duration::from_millis(self.refetch_interval_ms))
    }
}

impl LiveConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not valid configuration.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::InvalidToml)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to parse in-memory configuration.
    #[error("invalid config: {0}")]
    InvalidToml(#[source] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LiveConfig::default();
        assert_eq!(config.transport.address, "127.0.0.1:4433");
        assert_eq!(config.transport.connect_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(config.query.refetch_interval(), None);
        assert!(config.query.refetch_on_reconnect);
        assert!(config.query.refetch_on_visible);
        assert!(config.query.push_updates);
        assert!(config.cache.is_never_expiring());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[transport]
address = "10.0.0.1:9000"
connect_timeout_ms = 0

[query]
refetch_interval_ms = 30000
refetch_on_visible = false
push_updates = false

[cache]
max_age = 60000
stale_while_revalidate = 5000
"#;

        let config = LiveConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.transport.address, "10.0.0.1:9000");
        assert_eq!(config.transport.connect_timeout(), None);
        assert_eq!(config.query.refetch_interval(), Some(Duration::from_secs(30)));
        assert!(config.query.refetch_on_reconnect);
        assert!(!config.query.refetch_on_visible);
        assert!(!config.query.push_updates);
        assert_eq!(config.cache.max_age, Some(Duration::from_secs(60)));
        assert_eq!(config.cache.stale_while_revalidate, Duration::from_secs(5));
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config = LiveConfig::from_toml_str("").unwrap();
        assert_eq!(config, LiveConfig::default());

        let config = LiveConfig::from_toml_str("[query]\n[cache]\n").unwrap();
        assert_eq!(config, LiveConfig::default());
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let result = LiveConfig::from_toml_str("[query]\nrefetch_interval_ms = \"soon\"\n");
        assert!(matches!(result, Err(ConfigError::InvalidToml(_))));
    }

    #[test]
    fn missing_file_reports_path() {
        let path = Path::new("/nonexistent/livesync.toml");
        let err = LiveConfig::from_file(path).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
        assert!(err.to_string().contains("/nonexistent/livesync.toml"));
    }
}
