use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::AnchorError;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: String,
    pub anchor: AnchorSettings,
    pub ledger_retry: RetrySettings,
    pub audit: AuditSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorSettings {
    pub interval_secs: u64,
    pub batch_size: usize,
    /// Empty selects the in-process mock ledger.
    pub ledger_endpoint: String,
    pub ledger_timeout_secs: u64,
    pub network: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub max_delay_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    pub signing_enabled: bool,
    pub key_version: String,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://voketag-anchor.db".to_string(),
            anchor: AnchorSettings::default(),
            ledger_retry: RetrySettings::default(),
            audit: AuditSettings::default(),
        }
    }
}

impl Default for AnchorSettings {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            batch_size: 1000,
            ledger_endpoint: String::new(),
            ledger_timeout_secs: 30,
            network: "polygon-amoy".to_string(),
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            factor: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            signing_enabled: false,
            key_version: "v1".to_string(),
            max_attempts: 3,
            initial_backoff_ms: 10,
        }
    }
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            factor: self.factor,
            jitter: Duration::ZERO,
        }
    }
}

impl AuditSettings {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            ..RetryPolicy::audit_append()
        }
    }
}

impl AnchorSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_secs(self.ledger_timeout_secs)
    }

    pub fn uses_mock_ledger(&self) -> bool {
        self.ledger_endpoint.trim().is_empty()
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, AnchorError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AnchorError::ConfigError(format!("Invalid {}='{}': {}", key, value, e)))
}

impl AppConfig {
    /// Defaults, then `ANCHOR_CONFIG_FILE` if set, then environment overrides.
    pub fn load() -> Result<Self, AnchorError> {
        let mut config = match env::var("ANCHOR_CONFIG_FILE") {
            Ok(path) => Self::from_file(&path)?,
            Err(_) => Self::default(),
        };
        config.apply_env_from(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AnchorError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            AnchorError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, AnchorError> {
        toml::from_str(content)
            .map_err(|e| AnchorError::ConfigError(format!("Invalid config TOML: {}", e)))
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// production).
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), AnchorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATABASE_URL") {
            self.database_url = v;
        }
        if let Some(v) = lookup("ANCHOR_INTERVAL_SECS") {
            self.anchor.interval_secs = parse_var("ANCHOR_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("ANCHOR_BATCH_SIZE") {
            self.anchor.batch_size = parse_var("ANCHOR_BATCH_SIZE", &v)?;
        }
        if let Some(v) = lookup("LEDGER_ENDPOINT") {
            self.anchor.ledger_endpoint = v;
        }
        if let Some(v) = lookup("LEDGER_TIMEOUT_SECS") {
            self.anchor.ledger_timeout_secs = parse_var("LEDGER_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("LEDGER_NETWORK") {
            self.anchor.network = v;
        }
        if let Some(v) = lookup("LEDGER_MAX_ATTEMPTS") {
            self.ledger_retry.max_attempts = parse_var("LEDGER_MAX_ATTEMPTS", &v)?;
        }
        if let Some(v) = lookup("AUDIT_SIGNING_ENABLED") {
            self.audit.signing_enabled = parse_var("AUDIT_SIGNING_ENABLED", &v)?;
        }
        if let Some(v) = lookup("AUDIT_KEY_VERSION") {
            self.audit.key_version = v;
        }
        if let Some(v) = lookup("AUDIT_MAX_ATTEMPTS") {
            self.audit.max_attempts = parse_var("AUDIT_MAX_ATTEMPTS", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), AnchorError> {
        if self.database_url.trim().is_empty() {
            return Err(AnchorError::ConfigError("database_url must not be empty".to_string()));
        }
        if self.anchor.batch_size == 0 {
            return Err(AnchorError::ConfigError(
                "anchor.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.anchor.interval_secs == 0 {
            return Err(AnchorError::ConfigError(
                "anchor.interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.anchor.ledger_timeout_secs == 0 {
            return Err(AnchorError::ConfigError(
                "anchor.ledger_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.ledger_retry.max_attempts == 0 || self.audit.max_attempts == 0 {
            return Err(AnchorError::ConfigError("max_attempts must be greater than 0".to_string()));
        }
        if self.ledger_retry.factor < 1.0 {
            return Err(AnchorError::ConfigError(
                "ledger_retry.factor must be at least 1.0".to_string(),
            ));
        }
        if self.audit.key_version.trim().is_empty() {
            return Err(AnchorError::ConfigError("audit.key_version must not be empty".to_string()));
        }
        Ok(())
    }
}
