use crate::config::types::Config;
use crate::config::validation::validate;
use crate::ConfigError;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Loads, parses and validates a configuration file
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use sumi_swarm::config::load_config;
///
/// let config = load_config(Path::new("swarm.toml")).unwrap();
/// println!("Mountpath: {}", config.master.mountpath);
/// ```
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parses and validates configuration text
pub fn parse_config(content: &str) -> Result<Config, ConfigError> {
    let config: Config = toml::from_str(content)?;
    validate(&config)?;
    Ok(config)
}

/// Computes a hex-encoded SHA-256 hash of the configuration file content
///
/// Logged at startup so master and worker logs can be matched to the exact
/// configuration each process ran with.
pub fn compute_config_hash(path: &Path) -> Result<String, ConfigError> {
    let content = std::fs::read(path)?;
    Ok(hex::encode(Sha256::digest(&content)))
}

/// Loads a configuration and returns both the config and its hash
pub fn load_config_with_hash(path: &Path) -> Result<(Config, String), ConfigError> {
    let config = load_config(path)?;
    let hash = compute_config_hash(path)?;
    Ok((config, hash))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const VALID: &str = r#"
[crawler]
fetch-threads = 8
extract-threads = 2

[user-agent]
crawler-name = "SumiSwarm"
crawler-version = "1.0"
contact-url = "https://example.com/about"
contact-email = "admin@example.com"

[transport]
database-path = "./queues.db"

[store]
database-path = "./meta.db"

[master]
mountpath = "/mnt/crawl"

[[whitelist]]
domain = "http://example.com/"
"#;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_valid_config() {
        let file = create_temp_config(VALID);
        let config = load_config(file.path()).unwrap();

        assert_eq!(config.crawler.fetch_threads, 8);
        assert_eq!(config.crawler.extract_threads, 2);
        assert_eq!(config.crawler.max_redirects, 3);
        assert_eq!(config.crawler.max_content_bytes, 5_000_000);
        assert_eq!(config.transport.receive_batch_size, 10);
        assert_eq!(config.master.checkpoint_interval_secs, 60);
        assert_eq!(config.user_agent.crawler_name, "SumiSwarm");
        assert_eq!(config.whitelist.len(), 1);
    }

    #[test]
    fn test_user_agent_header() {
        let config = parse_config(VALID).unwrap();
        assert_eq!(
            config.user_agent.header_value(),
            "SumiSwarm/1.0 (+https://example.com/about; admin@example.com)"
        );
    }

    #[test]
    fn test_load_config_with_invalid_path() {
        let result = load_config(Path::new("/nonexistent/swarm.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_load_config_with_invalid_toml() {
        let file = create_temp_config("this is not valid TOML {{{");
        let result = load_config(file.path());
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_config_with_validation_error() {
        let content = VALID.replace("fetch-threads = 8", "fetch-threads = 0");
        let result = parse_config(&content);
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_compute_config_hash() {
        let file = create_temp_config("test content");

        let hash1 = compute_config_hash(file.path()).unwrap();
        let hash2 = compute_config_hash(file.path()).unwrap();

        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_different_content_different_hash() {
        let file1 = create_temp_config("content 1");
        let file2 = create_temp_config("content 2");

        assert_ne!(
            compute_config_hash(file1.path()).unwrap(),
            compute_config_hash(file2.path()).unwrap()
        );
    }
}
