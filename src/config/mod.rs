//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::game::MatchSettings;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Allowed client origins for CORS, comma separated. `*` allows any.
    pub client_origin: String,

    /// Shared secret for privileged match start. `None` means open mode.
    pub match_start_secret: Option<String>,

    pub tick_interval_ms: u64,
    pub match_timeout_secs: u64,
    pub queue_max_depth: usize,
    pub default_max_ticks: u64,
    /// Outbound buffer per stream connection
    pub connection_buffer: usize,
    /// How long a finished or idle match stays queryable before its task exits
    pub match_retention_secs: u64,

    /// Directory for per-tick snapshots; in-memory store when unset
    pub snapshot_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            client_origin: "*".to_string(),
            match_start_secret: None,
            tick_interval_ms: 100,
            match_timeout_secs: 180,
            queue_max_depth: 8,
            default_max_ticks: 900,
            connection_buffer: 64,
            match_retention_secs: 300,
            snapshot_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| defaults.server_addr.to_string())
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or(defaults.client_origin),

            match_start_secret: env::var("MATCH_START_SECRET")
                .ok()
                .filter(|s| !s.is_empty()),

            tick_interval_ms: parse_var("TICK_INTERVAL_MS", defaults.tick_interval_ms)?,
            match_timeout_secs: parse_var("MATCH_TIMEOUT_SECS", defaults.match_timeout_secs)?,
            queue_max_depth: parse_var("QUEUE_MAX_DEPTH", defaults.queue_max_depth)?,
            default_max_ticks: parse_var("DEFAULT_MAX_TICKS", defaults.default_max_ticks)?,
            connection_buffer: parse_var("CONNECTION_BUFFER", defaults.connection_buffer)?,
            match_retention_secs: parse_var("MATCH_RETENTION_SECS", defaults.match_retention_secs)?,

            snapshot_dir: env::var("SNAPSHOT_DIR")
                .ok()
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid("TICK_INTERVAL_MS"));
        }
        if self.queue_max_depth == 0 {
            return Err(ConfigError::Invalid("QUEUE_MAX_DEPTH"));
        }
        if self.default_max_ticks == 0 {
            return Err(ConfigError::Invalid("DEFAULT_MAX_TICKS"));
        }
        // One slot is held back for the final match_complete
        if self.connection_buffer < 2 {
            return Err(ConfigError::Invalid("CONNECTION_BUFFER"));
        }
        Ok(())
    }

    /// Settings handed to every match task
    pub fn match_settings(&self) -> MatchSettings {
        MatchSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            match_timeout: Duration::from_secs(self.match_timeout_secs),
            queue_depth: self.queue_max_depth,
            default_max_ticks: self.default_max_ticks,
            connection_buffer: self.connection_buffer,
            retention: Duration::from_secs(self.match_retention_secs),
        }
    }
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_map_to_match_settings() {
        let settings = Config::default().match_settings();
        assert_eq!(settings.tick_interval, Duration::from_millis(100));
        assert_eq!(settings.match_timeout, Duration::from_secs(180));
        assert_eq!(settings.queue_depth, 8);
        assert_eq!(settings.default_max_ticks, 900);
        assert_eq!(settings.retention, Duration::from_secs(300));
    }

    #[test]
    fn test_zero_values_rejected() {
        let config = Config {
            queue_max_depth: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid("QUEUE_MAX_DEPTH"))));
    }

    #[test]
    fn test_connection_buffer_needs_room_for_completion() {
        let config = Config {
            connection_buffer: 1,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid("CONNECTION_BUFFER"))));
        let config = Config {
            connection_buffer: 2,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
