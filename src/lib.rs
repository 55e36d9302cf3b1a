//! Sumi-Swarm: a distributed polite web crawler
//!
//! A master process owns the global URL frontier and partitions it across
//! worker processes by host. Workers enforce per-site politeness, deduplicate
//! fetched content and report discoveries and completions back to the master
//! over an at-least-once message transport.

pub mod config;
pub mod crawler;
pub mod master;
pub mod robots;
pub mod state;
pub mod storage;
pub mod transport;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Swarm operations
#[derive(Debug, Error)]
pub enum SwarmError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] master::CheckpointError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("No workers registered with the master")]
    NoWorkers,

    #[error("Message transport unreachable after {failures} consecutive failures on '{channel}'")]
    TransportUnavailable { channel: String, failures: u32 },

    #[error("Invalid phase transition: {from:?} -> {to:?}")]
    InvalidPhase {
        from: master::MasterPhase,
        to: master::MasterPhase,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// URL-specific errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UrlError {
    #[error("Empty URL")]
    Empty,

    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing hostname in URL")]
    MissingDomain,
}

/// Result type alias for Sumi-Swarm operations
pub type Result<T> = std::result::Result<T, SwarmError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use master::MasterCoordinator;
pub use state::{DomainRecord, PathState, SeenState};
pub use url::CanonicalUrl;
