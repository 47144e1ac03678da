//! Configuration Module
//!
//! Resolves the API endpoint and the local data directory from the environment.

use std::path::PathBuf;
use std::time::Duration;

/// Backend used when `PM_API_BASE_URL` is not set
pub const DEFAULT_API_URL: &str = "http://localhost:3001";

pub const API_URL_ENV: &str = "PM_API_BASE_URL";
pub const DATA_DIR_ENV: &str = "PM_DATA_DIR";
pub const TIMEOUT_ENV: &str = "PM_API_TIMEOUT_SECS";

/// Runtime configuration for the console
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub api_base_url: String,
    pub data_dir: PathBuf,
    /// `None` leaves timeouts to the transport defaults
    pub request_timeout: Option<Duration>,
}

impl AppConfig {
    /// Build configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_base_url = lookup(API_URL_ENV)
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let data_dir = lookup(DATA_DIR_ENV)
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let request_timeout = match lookup(TIMEOUT_ENV).filter(|v| !v.trim().is_empty()) {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidTimeout(raw.clone()))?;
                if secs == 0 {
                    return Err(ConfigError::InvalidTimeout(raw));
                }
                Some(Duration::from_secs(secs))
            }
            None => None,
        };

        Ok(Self {
            api_base_url: normalize_base_url(&api_base_url),
            data_dir,
            request_timeout,
        })
    }

    /// Override the API base URL (command-line flag)
    pub fn with_api_base_url(mut self, url: &str) -> Self {
        self.api_base_url = normalize_base_url(url);
        self
    }

    /// Override the data directory (command-line flag)
    pub fn with_data_dir(mut self, dir: PathBuf) -> Self {
        self.data_dir = dir;
        self
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            data_dir: default_data_dir(),
            request_timeout: None,
        }
    }
}

/// Strip trailing slashes from a base URL
pub fn normalize_base_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("PMConsole")
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PM_API_TIMEOUT_SECS value: {0:?} (expected a positive number of seconds)")]
    InvalidTimeout(String),
}
