use crate::config::types::{
    Config, CrawlerConfig, MasterConfig, StoreConfig, TransportConfig, UserAgentConfig,
    WhitelistEntry,
};
use crate::url::CanonicalUrl;
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_transport_config(&config.transport)?;
    validate_store_config(&config.store)?;
    validate_master_config(&config.master)?;
    validate_whitelist(&config.whitelist)?;
    Ok(())
}

fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.fetch_threads < 1 || config.fetch_threads > 256 {
        return Err(ConfigError::Validation(format!(
            "fetch_threads must be between 1 and 256, got {}",
            config.fetch_threads
        )));
    }

    if config.extract_threads < 1 || config.extract_threads > 64 {
        return Err(ConfigError::Validation(format!(
            "extract_threads must be between 1 and 64, got {}",
            config.extract_threads
        )));
    }

    if config.idle_backoff_ms < 10 {
        return Err(ConfigError::Validation(format!(
            "idle_backoff_ms must be >= 10ms, got {}ms",
            config.idle_backoff_ms
        )));
    }

    if config.max_content_bytes == 0 {
        return Err(ConfigError::Validation(
            "max_content_bytes must be > 0".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.link_batch_size == 0 {
        return Err(ConfigError::Validation(
            "link_batch_size must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // The name is also the robots.txt identifier, so keep it to a token
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    Url::parse(&config.contact_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;

    validate_email(&config.contact_email)?;

    Ok(())
}

fn validate_transport_config(config: &TransportConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "transport database_path cannot be empty".to_string(),
        ));
    }

    if config.receive_batch_size < 1 || config.receive_batch_size > 100 {
        return Err(ConfigError::Validation(format!(
            "receive_batch_size must be between 1 and 100, got {}",
            config.receive_batch_size
        )));
    }

    if config.visibility_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "visibility_timeout_secs must be > 0".to_string(),
        ));
    }

    if config.max_consecutive_failures == 0 {
        return Err(ConfigError::Validation(
            "max_consecutive_failures must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_store_config(config: &StoreConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "store database_path cannot be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_master_config(config: &MasterConfig) -> Result<(), ConfigError> {
    if config.mountpath.is_empty() {
        return Err(ConfigError::Validation(
            "mountpath cannot be empty".to_string(),
        ));
    }

    if config.checkpoint_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "checkpoint_interval_secs must be > 0".to_string(),
        ));
    }

    if config.progress_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "progress_interval_secs must be > 0".to_string(),
        ));
    }

    Ok(())
}

fn validate_whitelist(entries: &[WhitelistEntry]) -> Result<(), ConfigError> {
    for entry in entries {
        CanonicalUrl::parse(&entry.domain).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid whitelist domain '{}': {}", entry.domain, e))
        })?;
    }
    Ok(())
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    let (local, domain) = email
        .split_once('@')
        .ok_or_else(|| ConfigError::Validation(format!("Invalid email format: '{}'", email)))?;

    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
