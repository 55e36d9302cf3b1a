//! Configuration module for Sumi-Swarm
//!
//! This module handles loading, parsing, and validating the TOML configuration
//! shared by the master and its workers.
//!
//! # Example
//!
//! ```no_run
//! use sumi_swarm::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("swarm.toml")).unwrap();
//! println!("Fetch tasks per worker: {}", config.crawler.fetch_threads);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, MasterConfig, StoreConfig, TransportConfig, UserAgentConfig,
    WhitelistEntry,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, parse_config};
