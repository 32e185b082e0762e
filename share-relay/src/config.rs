//! Configuration loading for share-relay.
//!
//! Configuration is loaded from a TOML file (default: `relay.toml`).
//! Every section and field is optional.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for share-relay.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,
    /// Session lifetime configuration.
    pub sessions: SessionsConfig,
    /// Rate limiting configuration.
    pub limits: LimitsConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for HTTP and WebSocket (default: 0.0.0.0:3000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Public base URL used to build share links.
    #[serde(default = "default_public_url")]
    pub public_url: String,
    /// Take the client address from `X-Forwarded-For` (default: false).
    /// Only enable behind a trusted reverse proxy.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Largest accepted WebSocket frame in bytes (default: 2 MiB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Session lifetime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// Sweep interval in seconds (default: 300).
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Absolute session age limit in seconds (default: 1800).
    #[serde(default = "default_max_age")]
    pub max_age_secs: u64,
    /// Seconds a completed session stays readable (default: 60).
    #[serde(default = "default_completion_grace")]
    pub completion_grace_secs: u64,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// WebSocket connection attempts per source IP per minute (default: 30).
    #[serde(default = "default_connections_per_ip")]
    pub connections_per_ip: u32,
    /// Messages per peer per minute (default: 6000).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Display names are cut to this many characters (default: 64).
    #[serde(default = "default_max_display_name_len")]
    pub max_display_name_len: usize,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset (default: "info").
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_public_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_max_message_size() -> usize {
    2 * 1024 * 1024 // 2 MiB
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

fn default_max_age() -> u64 {
    30 * 60 // 30 minutes
}

fn default_completion_grace() -> u64 {
    60
}

fn default_connections_per_ip() -> u32 {
    30
}

fn default_messages_per_minute() -> u32 {
    6000
}

fn default_max_display_name_len() -> usize {
    64
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            public_url: default_public_url(),
            trust_forwarded_for: false,
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            max_age_secs: default_max_age(),
            completion_grace_secs: default_completion_grace(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            connections_per_ip: default_connections_per_ip(),
            messages_per_minute: default_messages_per_minute(),
            max_display_name_len: default_max_display_name_len(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl SessionsConfig {
    /// Sweep interval.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Absolute session age limit.
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }

    /// Grace period before a finished session is removed.
    pub fn completion_grace(&self) -> Duration {
        Duration::from_secs(self.completion_grace_secs)
    }
}

impl ServerConfig {
    /// Share link for a session.
    pub fn share_link(&self, session_id: &str) -> String {
        format!(
            "{}/receive/{}",
            self.public_url.trim_end_matches('/'),
            session_id
        )
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.server.bind_address, "0.0.0.0:3000");
        assert_eq!(config.server.max_message_size, 2 * 1024 * 1024);
        assert!(!config.server.trust_forwarded_for);
        assert_eq!(config.sessions.max_age(), Duration::from_secs(1800));
        assert_eq!(config.sessions.sweep_interval(), Duration::from_secs(300));
        assert_eq!(config.sessions.completion_grace(), Duration::from_secs(60));
        assert_eq!(config.limits.connections_per_ip, 30);
        assert_eq!(config.limits.max_display_name_len, 64);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[server]
bind_address = "127.0.0.1:5000"
public_url = "https://share.example/"
trust_forwarded_for = true

[sessions]
max_age_secs = 600

[limits]
messages_per_minute = 120

[logging]
level = "debug"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:5000");
        assert!(config.server.trust_forwarded_for);
        assert_eq!(config.sessions.max_age_secs, 600);
        assert_eq!(config.sessions.sweep_interval_secs, 300);
        assert_eq!(config.limits.messages_per_minute, 120);
        assert_eq!(config.limits.connections_per_ip, 30);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.server.share_link("abc"),
            "https://share.example/receive/abc"
        );
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.server.public_url, "http://localhost:3000");
        assert_eq!(config.sessions.completion_grace_secs, 60);
    }

    #[test]
    fn from_file_reports_read_and_parse_errors() {
        let missing = Config::from_file(std::path::Path::new("/nonexistent/relay.toml"));
        assert!(matches!(missing, Err(ConfigError::ReadError { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server\nbind_address = 1").unwrap();
        let parsed = Config::from_file(file.path());
        assert!(matches!(parsed, Err(ConfigError::ParseError { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[limits]\nconnections_per_ip = 3").unwrap();
        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.limits.connections_per_ip, 3);
    }
}
