//! Service configuration: TOML file plus environment overrides.

mod loader;
mod types;
mod validate;

use thiserror::Error;

pub use loader::{load_config, load_config_from_str};
pub use types::{
    BatchBackend, BatchConfig, Config, CorsConfig, DatabaseConfig, SanitizedBatchConfig,
    SanitizedConfig, SanitizedStorageConfig, ServerConfig, StorageBackend, StorageConfig,
};
pub use validate::validate_config;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
