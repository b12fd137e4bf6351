use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    addressing::Namespace,
    shred::{ShredMode, ShredOptions, DEFAULT_SCAN_COUNT, DEFAULT_SHRED_TIMEOUT},
};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings for a Redis-backed key store; every field has a default.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct RedisKeyStoreConfig {
    /// Connection URL understood by the `redis` crate.
    pub url: String,
    /// Namespace anchor; empty or missing selects the default prefix.
    pub key_prefix: Option<String>,
    pub shred_timeout_ms: u64,
    pub scan_count: usize,
    pub shred_mode: ShredMode,
}

impl Default for RedisKeyStoreConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
            key_prefix: None,
            shred_timeout_ms: DEFAULT_SHRED_TIMEOUT.as_millis() as u64,
            scan_count: DEFAULT_SCAN_COUNT,
            shred_mode: ShredMode::default(),
        }
    }
}

impl RedisKeyStoreConfig {
    /// Parse and validate a TOML document; an empty document yields the defaults.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let cfg: Self = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shred_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "shred_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.scan_count == 0 {
            return Err(ConfigError::Invalid(
                "scan_count must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn namespace(&self) -> Namespace {
        Namespace::from_option(self.key_prefix.as_deref())
    }

    pub fn shred_options(&self) -> ShredOptions {
        ShredOptions {
            timeout: Duration::from_millis(self.shred_timeout_ms),
            scan_count: self.scan_count,
            mode: self.shred_mode,
        }
    }
}
