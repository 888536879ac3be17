//! Reservator configuration.
//!
//! Configuration is loaded in layers with the following precedence (lowest to highest):
//! 1. Environment variables (`CIDR_RESERVATOR_*`)
//! 2. TOML configuration file
//! 3. Command-line arguments

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;

use crate::constants::DEFAULT_BACKOFF_UNIT_MS;
use crate::constants::DEFAULT_MAX_ATTEMPTS;
use crate::constants::MAX_RESERVATION_ATTEMPTS_LIMIT;
use crate::coordinator::RetryConfig;

/// Settings shared by every reservation operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservatorConfig {
    /// Path of the redb database file holding the reservation tables.
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,

    /// Read-modify-write attempts per operation before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff unit in milliseconds; the n-th retry waits `2 * n` units.
    #[serde(default = "default_backoff_unit_ms")]
    pub backoff_unit_ms: u64,
}

impl Default for ReservatorConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            max_attempts: default_max_attempts(),
            backoff_unit_ms: default_backoff_unit_ms(),
        }
    }
}

impl ReservatorConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Load configuration from environment variables.
    ///
    /// Variables follow the pattern `CIDR_RESERVATOR_<FIELD_NAME>`; unset or
    /// unparseable values fall back to defaults.
    pub fn from_env() -> Self {
        Self {
            store_path: parse_env("CIDR_RESERVATOR_STORE_PATH").unwrap_or_else(default_store_path),
            max_attempts: parse_env("CIDR_RESERVATOR_MAX_ATTEMPTS").unwrap_or_else(default_max_attempts),
            backoff_unit_ms: parse_env("CIDR_RESERVATOR_BACKOFF_UNIT_MS").unwrap_or_else(default_backoff_unit_ms),
        }
    }

    /// Merge configuration from another source.
    ///
    /// Fields in `other` that differ from their defaults override fields in `self`.
    pub fn merge(&mut self, other: Self) {
        if other.store_path != default_store_path() {
            self.store_path = other.store_path;
        }
        if other.max_attempts != default_max_attempts() {
            self.max_attempts = other.max_attempts;
        }
        if other.backoff_unit_ms != default_backoff_unit_ms() {
            self.backoff_unit_ms = other.backoff_unit_ms;
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store_path.as_os_str().is_empty() {
            return Err(ConfigError::Validation {
                message: "store_path must not be empty".into(),
            });
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::Validation {
                message: "max_attempts must be non-zero".into(),
            });
        }

        if self.max_attempts > MAX_RESERVATION_ATTEMPTS_LIMIT {
            return Err(ConfigError::Validation {
                message: format!("max_attempts must be at most {MAX_RESERVATION_ATTEMPTS_LIMIT}"),
            });
        }

        Ok(())
    }

    /// Retry policy for the coordinator.
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            backoff_unit: Duration::from_millis(self.backoff_unit_ms),
        }
    }
}

/// Load configuration from all layers and validate the result.
///
/// `overrides` carries command-line values; fields left at their defaults do
/// not override lower layers.
pub fn load_config(toml_path: Option<&Path>, overrides: ReservatorConfig) -> Result<ReservatorConfig, ConfigError> {
    let mut config = ReservatorConfig::from_env();

    if let Some(path) = toml_path {
        config.merge(ReservatorConfig::from_toml_file(path)?);
    }

    config.merge(overrides);
    config.validate()?;
    Ok(config)
}

// Helper functions for parsing environment variables
fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok()?.parse().ok()
}

// Default value functions
fn default_store_path() -> PathBuf {
    PathBuf::from("./cidr-reservations.redb")
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_unit_ms() -> u64 {
    DEFAULT_BACKOFF_UNIT_MS
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config file {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}
