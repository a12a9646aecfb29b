use std::path::Path;

use figment::providers::{Env, Format, Toml};
use figment::Figment;

use super::types::Config;
use super::ConfigError;

/// Loads configuration from a TOML file with `ORTELIUS_`-prefixed
/// environment variables layered on top.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("ORTELIUS_").split("_"))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Parses configuration from a TOML string, without the environment
/// overlay. Used by tests.
pub fn load_config_from_str(toml: &str) -> Result<Config, ConfigError> {
    Figment::new()
        .merge(Toml::string(toml))
        .extract()
        .map_err(|e| ConfigError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{BatchBackend, StorageBackend};

    #[test]
    fn test_load_missing_file() {
        let err = load_config("/nonexistent/ortelius.toml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            [server]
            port = 9090

            [storage]
            backend = "memory"
            uploads_bucket = "my-uploads"

            [batch]
            backend = "simulated"
            "#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.storage.uploads_bucket, "my-uploads");
        assert_eq!(config.batch.backend, BatchBackend::Simulated);
    }

    #[test]
    fn test_load_from_str_with_nested_sections() {
        let config = load_config_from_str(
            r#"
            [storage]
            backend = "gcs"

            [storage.gcs]
            access_token = "token"
            signing_key = "key"

            [batch]
            backend = "cloud"
            allowed_zones = ["europe-west1-b"]

            [batch.cloud]
            project = "acme-maps"
            region = "europe-west1"
            access_token = "token"

            [[planner.tiers]]
            name = "tiny"
            machine_type = "e2-small"
            cpu_milli = 2000
            memory_mib = 2048
            max_images = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Gcs);
        assert_eq!(config.batch.cloud.unwrap().project, "acme-maps");
        assert_eq!(config.planner.tiers.len(), 1);
        assert_eq!(config.planner.tiers[0].name, "tiny");
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let err = load_config_from_str("[server\nport = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
