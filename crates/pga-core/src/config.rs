//! Configuration management for the client.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default API base address (can be overridden at compile time via PGANALYTICS_DEFAULT_API_URL).
pub const DEFAULT_API_URL: &str = match option_env!("PGANALYTICS_DEFAULT_API_URL") {
    Some(url) => url,
    None => "http://localhost:8000",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default per-request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Environment variable overriding the API base address.
pub const ENV_API_URL: &str = "PGANALYTICS_API_URL";

/// Environment variable overriding the log level.
pub const ENV_LOG_LEVEL: &str = "PGANALYTICS_LOG_LEVEL";

/// Environment variable overriding the request timeout.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "PGANALYTICS_REQUEST_TIMEOUT_SECS";

/// Main client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Base address of the pgAnalytics API.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Timeout applied to every API request.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            api_url: default_api_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl Config {
    /// Load configuration from the config file, falling back to defaults.
    /// Environment variables take precedence over the file.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the config file.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(paths.config_file(), content)?;
        Ok(())
    }

    /// Override configuration from environment variables.
    fn load_from_env(&mut self) {
        if let Ok(api_url) = std::env::var(ENV_API_URL) {
            if !api_url.trim().is_empty() {
                self.api_url = api_url.trim().to_string();
            }
        }
        if let Ok(log_level) = std::env::var(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Ok(raw) = std::env::var(ENV_REQUEST_TIMEOUT_SECS) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.request_timeout_secs = secs,
                Err(_) => tracing::warn!(
                    value = %raw,
                    "Ignoring invalid {}",
                    ENV_REQUEST_TIMEOUT_SECS
                ),
            }
        }
    }

    /// Check that the loaded values are usable.
    pub fn validate(&self) -> CoreResult<()> {
        let url = self.api_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(CoreError::Config(format!(
                "api_url must use http or https, got {}",
                url.scheme()
            )));
        }
        if self.request_timeout_secs == 0 {
            return Err(CoreError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the API base address as a parsed URL.
    pub fn api_url(&self) -> CoreResult<Url> {
        Url::parse(&self.api_url).map_err(CoreError::from)
    }

    /// Get the request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
