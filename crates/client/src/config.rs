//! Client configuration, resolved from `TIMEKEEP_*` environment variables.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use timekeep_observability::LogFormat;

pub const DEFAULT_API_URL: &str = "http://localhost:8080";
pub const DEFAULT_API_PREFIX: &str = "/api/v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be a positive number of seconds, got '{value}'")]
    InvalidSeconds { var: &'static str, value: String },
    #[error("{var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    /// Server root, e.g. `http://localhost:8080`
    pub api_url: String,
    /// Versioned API path appended to `api_url`
    pub api_prefix: String,
    /// Bearer credential; requests go out unauthenticated when empty
    pub token: String,
    /// SQLite database backing the cache and queue
    pub db_path: PathBuf,
    pub request_timeout: Duration,
    pub sync_interval: Duration,
    /// Timer poll cadence while a timer is running
    pub poll_interval: Duration,
    pub log_format: LogFormat,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            token: String::new(),
            db_path: default_db_path(),
            request_timeout: Duration::from_secs(10),
            sync_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            log_format: LogFormat::default(),
        }
    }
}

/// `{data_dir}/timekeep/timekeep.db`, falling back to the working directory.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("timekeep")
        .join("timekeep.db")
}

impl ClientConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var("TIMEKEEP_API_URL") {
            config.api_url = url;
        }
        if let Some(prefix) = lookup("TIMEKEEP_API_PREFIX") {
            config.api_prefix = prefix;
        }
        if let Some(token) = var("TIMEKEEP_TOKEN") {
            config.token = token;
        }
        if let Some(path) = var("TIMEKEEP_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(value) = var("TIMEKEEP_REQUEST_TIMEOUT_SECS") {
            config.request_timeout = parse_seconds("TIMEKEEP_REQUEST_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = var("TIMEKEEP_SYNC_INTERVAL_SECS") {
            config.sync_interval = parse_seconds("TIMEKEEP_SYNC_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = var("TIMEKEEP_POLL_INTERVAL_SECS") {
            config.poll_interval = parse_seconds("TIMEKEEP_POLL_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = var("TIMEKEEP_LOG_FORMAT") {
            config.log_format = value.parse().map_err(|reason| ConfigError::Invalid {
                var: "TIMEKEEP_LOG_FORMAT",
                reason,
            })?;
        }

        if !config.api_url.starts_with("http://") && !config.api_url.starts_with("https://") {
            return Err(ConfigError::Invalid {
                var: "TIMEKEEP_API_URL",
                reason: format!("'{}' is not an http(s) URL", config.api_url),
            });
        }
        Ok(config)
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = token.into();
        self
    }

    pub fn with_db_path(mut self, db_path: impl Into<PathBuf>) -> Self {
        self.db_path = db_path.into();
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

fn parse_seconds(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(ConfigError::InvalidSeconds {
            var,
            value: value.to_string(),
        }),
    }
}
