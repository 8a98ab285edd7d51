//! # Ledger Configuration
//!
//! Database location, tax rate and conflict-retry tuning.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     KARDEX_DB_PATH=/var/lib/kardex/kardex.db                           │
//! │     KARDEX_TAX_RATE_BPS=1800                                           │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/kardex/kardex.toml (Linux)                               │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "kardex.db"
//! max_connections = 5
//! busy_timeout_ms = 5000
//!
//! [tax]
//! rate_bps = 1800
//!
//! [retry]
//! max_attempts = 5
//! initial_backoff_ms = 20
//! max_backoff_ms = 500
//! ```

use kardex_core::validation::validate_tax_rate_bps;
use kardex_core::TaxRate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::pool::DbConfig;
use crate::retry::RetryPolicy;

// =============================================================================
// Errors
// =============================================================================

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Sections
// =============================================================================

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Created on first start.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// How long a writer waits for another writer's lock before the
    /// operation counts as a conflict.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("kardex.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_busy_timeout() -> u64 {
    5000
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// `[tax]` section. One rate for sales and purchases alike.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxSettings {
    #[serde(default = "default_tax_rate")]
    pub rate_bps: u32,
}

fn default_tax_rate() -> u32 {
    kardex_core::DEFAULT_TAX_RATE_BPS
}

impl Default for TaxSettings {
    fn default() -> Self {
        TaxSettings {
            rate_bps: default_tax_rate(),
        }
    }
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    20
}

fn default_max_backoff() -> u64 {
    500
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete ledger configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub tax: TaxSettings,

    #[serde(default)]
    pub retry: RetrySettings,
}

/// What the ledger services need at runtime.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    pub tax_rate: TaxRate,
    pub retry: RetryPolicy,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        LedgerSettings {
            tax_rate: TaxRate::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (kardex.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load ledger config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document. Missing sections take their defaults.
    pub fn from_toml(contents: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> ConfigResult<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        validate_tax_rate_bps(self.tax.rate_bps)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(
                "retry.initial_backoff_ms must not exceed retry.max_backoff_ms".into(),
            ));
        }

        Ok(())
    }

    /// Applies `KARDEX_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("KARDEX_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Some(value) = lookup("KARDEX_DB_MAX_CONNECTIONS") {
            match value.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %value, "Ignoring invalid KARDEX_DB_MAX_CONNECTIONS"),
            }
        }

        if let Some(value) = lookup("KARDEX_BUSY_TIMEOUT_MS") {
            match value.parse::<u64>() {
                Ok(ms) => self.database.busy_timeout_ms = ms,
                Err(_) => warn!(value = %value, "Ignoring invalid KARDEX_BUSY_TIMEOUT_MS"),
            }
        }

        if let Some(value) = lookup("KARDEX_TAX_RATE_BPS") {
            match value.parse::<u32>() {
                Ok(bps) => {
                    debug!(bps, "Overriding tax rate from environment");
                    self.tax.rate_bps = bps;
                }
                Err(_) => warn!(value = %value, "Ignoring invalid KARDEX_TAX_RATE_BPS"),
            }
        }

        if let Some(value) = lookup("KARDEX_RETRY_MAX_ATTEMPTS") {
            match value.parse::<u32>() {
                Ok(n) => self.retry.max_attempts = n,
                Err(_) => warn!(value = %value, "Ignoring invalid KARDEX_RETRY_MAX_ATTEMPTS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "kardex", "kardex")
            .map(|dirs| dirs.config_dir().join("kardex.toml"))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    /// Pool configuration for [`crate::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(&self.database.path)
            .max_connections(self.database.max_connections)
            .busy_timeout(Duration::from_millis(self.database.busy_timeout_ms))
    }

    /// Runtime settings handed to the ledger services.
    pub fn settings(&self) -> LedgerSettings {
        LedgerSettings {
            tax_rate: TaxRate::from_bps(self.tax.rate_bps),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                initial_backoff: Duration::from_millis(self.retry.initial_backoff_ms),
                max_backoff: Duration::from_millis(self.retry.max_backoff_ms),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = LedgerConfig::default();
        assert_eq!(config.tax.rate_bps, 1800);
        assert_eq!(config.database.busy_timeout_ms, 5000);
        assert_eq!(config.retry.max_attempts, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = LedgerConfig::from_toml(
            r#"
            [tax]
            rate_bps = 1000

            [database]
            path = "/tmp/ledger.db"
            "#,
        )
        .unwrap();

        assert_eq!(config.tax.rate_bps, 1000);
        assert_eq!(config.database.path, PathBuf::from("/tmp/ledger.db"));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.retry.max_backoff_ms, 500);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("KARDEX_DB_PATH", "/data/kardex.db"),
            ("KARDEX_TAX_RATE_BPS", "1500"),
            ("KARDEX_RETRY_MAX_ATTEMPTS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = LedgerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, PathBuf::from("/data/kardex.db"));
        assert_eq!(config.tax.rate_bps, 1500);
        // Invalid values are ignored.
        assert_eq!(config.retry.max_attempts, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = LedgerConfig::default();
        config.tax.rate_bps = 20_000;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.retry.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = LedgerConfig::default();
        config.retry.initial_backoff_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_settings_conversion() {
        let settings = LedgerConfig::default().settings();
        assert_eq!(settings.tax_rate.bps(), 1800);
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.initial_backoff, Duration::from_millis(20));
    }

    #[test]
    fn test_toml_round_trip() {
        let config = LedgerConfig::default();
        let text = config.to_toml().unwrap();
        let parsed = LedgerConfig::from_toml(&text).unwrap();
        assert_eq!(parsed.tax.rate_bps, config.tax.rate_bps);
        assert_eq!(parsed.database.path, config.database.path);
    }
}
