use crate::config::types::{ApiConfig, BusConfig, Config, StoreConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_api_config(&config.api)?;
    validate_store_config(&config.store)?;
    validate_bus_config(&config.bus)?;
    Ok(())
}

/// Validates API configuration
fn validate_api_config(config: &ApiConfig) -> Result<(), ConfigError> {
    let url = Url::parse(&config.base_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid base_url: {}", e)))?;

    if url.scheme() != "https" && url.scheme() != "http" {
        return Err(ConfigError::InvalidUrl(format!(
            "base_url must use http or https, got '{}'",
            url.scheme()
        )));
    }

    if config.timeout_secs < 1 || config.timeout_secs > 600 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be between 1 and 600, got {}",
            config.timeout_secs
        )));
    }

    if config.max_concurrent_chunks < 1 || config.max_concurrent_chunks > 32 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_chunks must be between 1 and 32, got {}",
            config.max_concurrent_chunks
        )));
    }

    if matches!(&config.auth_token, Some(token) if token.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "auth_token cannot be blank when set".to_string(),
        ));
    }

    Ok(())
}

/// Validates document store configuration
fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "store database_path cannot be empty".to_string(),
        ));
    }

    for (field, value) in [
        ("session_collection", &config.session_collection),
        ("season_collection", &config.season_collection),
    ] {
        if value.is_empty() {
            return Err(ConfigError::Validation(format!("{} cannot be empty", field)));
        }
    }

    Ok(())
}

/// Validates work queue configuration
fn validate_bus_config(config: &BusConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "bus database_path cannot be empty".to_string(),
        ));
    }

    if config.request_topic.is_empty() || config.response_topic.is_empty() {
        return Err(ConfigError::Validation(
            "topic names cannot be empty".to_string(),
        ));
    }

    // Sharing a topic would feed responses back into the API fetcher
    if config.request_topic == config.response_topic {
        return Err(ConfigError::Validation(format!(
            "request_topic and response_topic must differ, both are '{}'",
            config.request_topic
        )));
    }

    if config.max_in_flight < 1 || config.max_in_flight > 100 {
        return Err(ConfigError::Validation(format!(
            "max_in_flight must be between 1 and 100, got {}",
            config.max_in_flight
        )));
    }

    if config.poll_interval_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "poll_interval_ms must be >= 10ms, got {}ms",
            config.poll_interval_ms
        )));
    }

    Ok(())
}
