//! Configuration loading and representation.
//!
//! Sources, later ones winning: built-in defaults, an optional `wareflow.toml`
//! (or the file named by the caller), then `WAREFLOW__*` environment variables
//! (e.g. `WAREFLOW__LOCKING__MAX_ATTEMPTS=100`).

use std::time::Duration;

use config::{Config, ConfigBuilder, ConfigError, Environment, File, FileFormat};
use config::builder::DefaultState;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

const DEFAULT_CONFIG_FILE: &str = "wareflow";
const ENV_PREFIX: &str = "WAREFLOW";

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Retry policy for acquiring per-document and per-key exclusive access.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LockPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            backoff: Duration::from_millis(2),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LockingConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `wareflow_infra=debug`.
    pub filter: String,
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WarehouseConfig {
    pub locking: LockingConfig,
    pub logging: LoggingConfig,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let policy = LockPolicy::default();
        Self {
            locking: LockingConfig {
                max_attempts: policy.max_attempts,
                backoff_ms: policy.backoff.as_millis() as u64,
            },
            logging: LoggingConfig {
                filter: "info".to_string(),
                json: true,
            },
        }
    }
}

impl WarehouseConfig {
    /// Load from `wareflow.toml` (optional) and the environment.
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load from the named file (optional, any format `config` understands)
    /// and the environment.
    pub fn load_from(file: &str) -> Result<Self, ConfigLoadError> {
        debug!(file, "loading warehouse configuration");
        let config = Self::defaults()?
            .add_source(File::with_name(file).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Self::finish(config)
    }

    /// Parse a TOML document on top of the defaults (no environment).
    pub fn from_toml(contents: &str) -> Result<Self, ConfigLoadError> {
        let config = Self::defaults()?
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;
        Self::finish(config)
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            max_attempts: self.locking.max_attempts,
            backoff: Duration::from_millis(self.locking.backoff_ms),
        }
    }

    /// Install the process-wide tracing subscriber described by `logging`.
    pub fn init_observability(&self) {
        wareflow_observability::init_with(&self.logging.filter, self.logging.json);
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        let defaults = Self::default();
        Config::builder()
            .set_default("locking.max_attempts", i64::from(defaults.locking.max_attempts))?
            .set_default("locking.backoff_ms", defaults.locking.backoff_ms as i64)?
            .set_default("logging.filter", defaults.logging.filter)?
            .set_default("logging.json", defaults.logging.json)
    }

    fn finish(config: Config) -> Result<Self, ConfigLoadError> {
        let loaded: WarehouseConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.locking.max_attempts == 0 {
            return Err(ConfigLoadError::Invalid(
                "locking.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.logging.filter.trim().is_empty() {
            return Err(ConfigLoadError::Invalid(
                "logging.filter cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_sources() {
        let cfg = WarehouseConfig::from_toml("").unwrap();
        assert_eq!(cfg, WarehouseConfig::default());
        assert_eq!(cfg.lock_policy(), LockPolicy::default());
    }

    #[test]
    fn toml_overrides_individual_keys() {
        let cfg = WarehouseConfig::from_toml(
            r#"
            [locking]
            max_attempts = 200

            [logging]
            json = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.locking.max_attempts, 200);
        assert_eq!(cfg.locking.backoff_ms, 2);
        assert!(!cfg.logging.json);
        assert_eq!(cfg.logging.filter, "info");
        assert_eq!(cfg.lock_policy().max_attempts, 200);
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = WarehouseConfig::from_toml("[locking]\nmax_attempts = 0\n").unwrap_err();
        assert!(matches!(err, ConfigLoadError::Invalid(_)));
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = WarehouseConfig::load_from("does-not-exist/wareflow").unwrap();
        assert_eq!(cfg.locking.max_attempts, 50);
    }
}
