//! Configuration for throttling, notifications, and the remote API.
//!
//! Sources are layered with `figment`, later sources winning:
//! 1. `AppConfig::default()`
//! 2. a TOML file, when one is given and exists
//! 3. `STOREHOOK_`-prefixed environment variables, nested keys split on `__`
//!    (e.g. `STOREHOOK_THROTTLING__MAX_RETRIES=5`)
//!
//! Example
//! ```rust
//! use storehook::config::{ThrottlingConfig, ThrottlingOverrides};
//!
//! let defaults = ThrottlingConfig::default();
//! let effective = ThrottlingOverrides { max_retries: Some(1), ..Default::default() }.apply(&defaults);
//! assert_eq!(effective.max_retries, 1);
//! assert_eq!(effective.base_delay_ms, defaults.base_delay_ms);
//! ```

use crate::notify::Severity;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default environment prefix.
pub const ENV_PREFIX: &str = "STOREHOOK_";

/// Status codes retried by default.
pub const DEFAULT_RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Errors produced while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),
    #[error("base_delay_ms must be greater than zero")]
    ZeroBaseDelay,
    #[error("max_delay_ms ({max}) must be >= base_delay_ms ({base})")]
    MaxLessThanBase { base: u64, max: u64 },
    #[error("backoff_multiplier must be finite and > 1 (got {0})")]
    InvalidMultiplier(f64),
    #[error("request_timeout_ms must be greater than zero")]
    ZeroRequestTimeout,
    #[error("api_version must not be empty")]
    EmptyApiVersion,
}

/// Retry/backoff settings for the throttling executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottlingConfig {
    pub enabled: bool,
    pub max_retries: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    pub retryable_status_codes: BTreeSet<u16>,
    pub respect_remote_rate_limits: bool,
}

impl Default for ThrottlingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
            jitter: true,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.into_iter().collect(),
            respect_remote_rate_limits: true,
        }
    }
}

impl ThrottlingConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Check the numeric invariants the backoff calculator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_delay_ms == 0 {
            return Err(ConfigError::ZeroBaseDelay);
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(ConfigError::MaxLessThanBase {
                base: self.base_delay_ms,
                max: self.max_delay_ms,
            });
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::InvalidMultiplier(self.backoff_multiplier));
        }
        Ok(())
    }
}

/// Per-call overrides; `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrottlingOverrides {
    pub enabled: Option<bool>,
    pub max_retries: Option<usize>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub jitter: Option<bool>,
    pub retryable_status_codes: Option<BTreeSet<u16>>,
    pub respect_remote_rate_limits: Option<bool>,
}

impl ThrottlingOverrides {
    /// Merge over `base`, producing the effective config.
    pub fn apply(&self, base: &ThrottlingConfig) -> ThrottlingConfig {
        ThrottlingConfig {
            enabled: self.enabled.unwrap_or(base.enabled),
            max_retries: self.max_retries.unwrap_or(base.max_retries),
            base_delay_ms: self.base_delay_ms.unwrap_or(base.base_delay_ms),
            max_delay_ms: self.max_delay_ms.unwrap_or(base.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier.unwrap_or(base.backoff_multiplier),
            jitter: self.jitter.unwrap_or(base.jitter),
            retryable_status_codes: self
                .retryable_status_codes
                .clone()
                .unwrap_or_else(|| base.retryable_status_codes.clone()),
            respect_remote_rate_limits: self
                .respect_remote_rate_limits
                .unwrap_or(base.respect_remote_rate_limits),
        }
    }
}

/// Error notification policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub severity_threshold: Severity,
    pub max_emails_per_hour: u32,
    pub max_emails_per_day: u32,
    pub recipients: Vec<String>,
    pub service_name: String,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            severity_threshold: Severity::High,
            max_emails_per_hour: 10,
            max_emails_per_day: 50,
            recipients: Vec::new(),
            service_name: "storehook".to_string(),
        }
    }
}

/// Remote admin API settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub api_version: String,
    pub request_timeout_ms: u64,
    pub webhook_secret: Option<String>,
    /// Replaces `https://{shop}` when set (tests, proxies).
    pub base_url: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_version: "2024-10".to_string(),
            request_timeout_ms: 10_000,
            webhook_secret: None,
            base_url: None,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::ZeroRequestTimeout);
        }
        if self.api_version.trim().is_empty() {
            return Err(ConfigError::EmptyApiVersion);
        }
        Ok(())
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub throttling: ThrottlingConfig,
    pub notifications: NotificationConfig,
    pub api: ApiConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.throttling.validate()?;
        self.api.validate()
    }
}

/// Loads [`AppConfig`] from defaults, an optional TOML file, and the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None, env_prefix: ENV_PREFIX.to_string() }
    }

    pub fn with_config_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn with_env_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Build the layered figment without extracting it.
    pub fn figment(&self) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(AppConfig::default()));
        if let Some(path) = &self.config_path {
            if path.exists() {
                tracing::debug!(path = %path.display(), "loading configuration file");
                figment = figment.merge(Toml::file(path));
            } else {
                tracing::warn!(path = %path.display(), "configuration file not found, using defaults");
            }
        }
        figment.merge(Env::prefixed(&self.env_prefix).split("__"))
    }

    /// Load and validate.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let config: AppConfig = self.figment().extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }
}
