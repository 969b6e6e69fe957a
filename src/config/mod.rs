//! Application configuration.
//!
//! Aggregates configuration from all modules into a single Config struct
//! that can be loaded from YAML files or environment variables.

use serde::Deserialize;

use crate::logship::LogShipConfig;
use crate::transfer::DEFAULT_CHANNEL_PREFIX;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "courier.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "COURIER_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "COURIER";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "COURIER_LOG";
/// Environment variable supplying the default broker URL for transfers.
pub const REDIS_URL_ENV_VAR: &str = "REDIS_SERVER_URL";
/// Broker URL used when nothing else is configured.
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// File transfer configuration.
    pub transfer: TransferConfig,
    /// Log shipping configuration.
    pub log_ship: LogShipConfig,
}

/// File transfer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Prefix for transfer channel and key names.
    pub channel_prefix: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            channel_prefix: DEFAULT_CHANNEL_PREFIX.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `courier.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
