use regex_lite::Regex;

use super::types::{BatchBackend, Config, StorageBackend};
use super::ConfigError;

/// Checks cross-field constraints that serde defaults cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::Invalid(
            "server.port must be non-zero".to_string(),
        ));
    }

    if config.storage.backend == StorageBackend::Gcs && config.storage.gcs.is_none() {
        return Err(ConfigError::Invalid(
            "storage.gcs section is required when storage.backend is \"gcs\"".to_string(),
        ));
    }
    if config.storage.max_upload_size_bytes == 0 {
        return Err(ConfigError::Invalid(
            "storage.max_upload_size_bytes must be greater than zero".to_string(),
        ));
    }

    if config.batch.backend == BatchBackend::Cloud {
        if config.batch.cloud.is_none() {
            return Err(ConfigError::Invalid(
                "batch.cloud section is required when batch.backend is \"cloud\"".to_string(),
            ));
        }
        if config.batch.allowed_zones.is_empty() {
            return Err(ConfigError::Invalid(
                "batch.allowed_zones must not be empty for the cloud backend".to_string(),
            ));
        }
    }

    // A submission can hold the processing claim for up to the batch
    // client timeout before the job is visible to polling.
    let batch_timeout = match (&config.batch.backend, &config.batch.cloud) {
        (BatchBackend::Cloud, Some(cloud)) => cloud.timeout_secs,
        _ => 0,
    };
    if config.reconciler.not_found_grace_secs < batch_timeout {
        return Err(ConfigError::Invalid(format!(
            "reconciler.not_found_grace_secs ({}) must be at least batch.cloud.timeout_secs ({})",
            config.reconciler.not_found_grace_secs, batch_timeout
        )));
    }

    validate_planner(config)?;
    validate_cors(config)?;

    if Regex::new(&config.results.approved_url_pattern).is_err() {
        return Err(ConfigError::Invalid(format!(
            "results.approved_url_pattern is not a valid regex: {}",
            config.results.approved_url_pattern
        )));
    }

    Ok(())
}

fn validate_planner(config: &Config) -> Result<(), ConfigError> {
    let planner = &config.planner;
    if planner.tiers.is_empty() {
        return Err(ConfigError::Invalid(
            "planner.tiers must not be empty".to_string(),
        ));
    }
    for tier in &planner.tiers {
        if tier.cpu_milli == 0 || tier.memory_mib == 0 || tier.max_images == 0 {
            return Err(ConfigError::Invalid(format!(
                "planner tier {} has a zero resource limit",
                tier.name
            )));
        }
    }
    // First-fit selection relies on ascending capacity order.
    for pair in planner.tiers.windows(2) {
        if pair[0].max_images >= pair[1].max_images {
            return Err(ConfigError::Invalid(format!(
                "planner.tiers must have strictly ascending max_images ({} before {})",
                pair[0].name, pair[1].name
            )));
        }
    }
    if planner.disk_safety_margin < 1.0 {
        return Err(ConfigError::Invalid(
            "planner.disk_safety_margin must be at least 1.0".to_string(),
        ));
    }
    if planner.avg_image_size_mb <= 0.0 {
        return Err(ConfigError::Invalid(
            "planner.avg_image_size_mb must be positive".to_string(),
        ));
    }
    Ok(())
}

fn validate_cors(config: &Config) -> Result<(), ConfigError> {
    let origins = &config.cors.allowed_origins;
    if origins.is_empty() {
        return Err(ConfigError::Invalid(
            "cors.allowed_origins must not be empty".to_string(),
        ));
    }
    if origins.len() > 1 && origins.iter().any(|o| o == "*") {
        return Err(ConfigError::Invalid(
            "cors.allowed_origins cannot mix \"*\" with explicit origins".to_string(),
        ));
    }
    Ok(())
}
