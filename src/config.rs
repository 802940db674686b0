use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::apod::{RetryPolicy, APOD_API_URL};
use crate::error::{AppError, Result};
use crate::pipeline::BatchPolicy;

pub const API_KEY_ENV: &str = "NASA_API_KEY";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Credential to use.
    pub api_key: Option<String>,

    /// Fallback credential when no other key is supplied.
    #[serde(default = "default_api_key")]
    pub default_api_key: String,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default = "default_days")]
    pub days: i64,

    #[serde(default)]
    pub on_error: BatchPolicy,

    #[serde(default = "default_thumbs")]
    pub thumbs: bool,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_wait_secs")]
    pub retry_wait_secs: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: f64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: f64,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("apod-collector");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("apod.db").to_string_lossy().to_string()
}

fn default_api_key() -> String {
    "DEMO_KEY".to_string()
}

fn default_api_url() -> String {
    APOD_API_URL.to_string()
}

fn default_days() -> i64 {
    30
}

fn default_thumbs() -> bool {
    true
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_wait_secs() -> f64 {
    5.0
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_wait_secs() -> f64 {
    60.0
}

fn default_request_timeout_secs() -> f64 {
    30.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_wait_secs: default_retry_wait_secs(),
            backoff_multiplier: default_backoff_multiplier(),
            max_wait_secs: default_max_wait_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> Result<RetryPolicy> {
        Ok(RetryPolicy {
            max_retries: self.max_retries,
            retry_wait: seconds("retry_wait_secs", self.retry_wait_secs)?,
            backoff_multiplier: self.backoff_multiplier,
            max_wait: seconds("max_wait_secs", self.max_wait_secs)?,
            request_timeout: seconds("request_timeout_secs", self.request_timeout_secs)?,
        })
    }

    fn validate(&self) -> Result<()> {
        let policy = self.policy()?;
        if policy.request_timeout.is_zero() {
            return Err(AppError::InvalidConfig(format!(
                "retry.request_timeout_secs must be positive, got {}",
                self.request_timeout_secs
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(AppError::InvalidConfig(format!(
                "retry.backoff_multiplier must be at least 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Negative, NaN, infinite and too-large values have no `Duration`.
fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value).map_err(|_| {
        AppError::InvalidConfig(format!(
            "retry.{} must be a non-negative number of seconds, got {}",
            name, value
        ))
    })
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            api_key: None,
            default_api_key: default_api_key(),
            api_url: default_api_url(),
            days: default_days(),
            on_error: BatchPolicy::default(),
            thumbs: default_thumbs(),
            retry: RetryConfig::default(),
        }
    }
}

impl Config {
    /// Load from `path`, or from the default location. A missing default file
    /// is created with default values.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => {
                let config_path = Self::config_path();
                if config_path.exists() {
                    let content = std::fs::read_to_string(&config_path)?;
                    Self::from_toml_str(&content)?
                } else {
                    let config = Config::default();
                    config.save()?;
                    config
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("apod-collector")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        if self.days <= 0 {
            return Err(AppError::InvalidConfig(format!(
                "days must be a positive integer, got {}",
                self.days
            )));
        }
        if self.api_url.trim().is_empty() {
            return Err(AppError::InvalidConfig("api_url is empty".to_string()));
        }
        self.retry.validate()
    }

    /// Pick the credential once, in order: explicit flag, `NASA_API_KEY`,
    /// `api_key`, `default_api_key`.
    pub fn resolve_api_key(&self, explicit: Option<String>, env: Option<String>) -> Result<String> {
        [explicit, env, self.api_key.clone(), Some(self.default_api_key.clone())]
            .into_iter()
            .flatten()
            .map(|key| key.trim().to_string())
            .find(|key| !key.is_empty())
            .ok_or_else(|| AppError::InvalidConfig("no API key available".to_string()))
    }
}
