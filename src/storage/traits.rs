//! Storage traits and error types
//!
//! This module defines the trait interface for the shared metadata store and
//! the records it holds.

use crate::storage::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Corrupt record for {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// One fetched URL: when it was last crawled and what its content hashed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRecord {
    pub url: String,
    pub crawl_date: DateTime<Utc>,
    pub fingerprint: Fingerprint,
}

/// One distinct body: where it is stored and when it was last extracted
///
/// `fingerprint` is a degree-53 Rabin fingerprint, so only its low 53 bits
/// are ever set even though it is carried in a `u64`. It fits an SQLite
/// `INTEGER` without loss, and its 16-digit hex `storage_path` always starts
/// with `00`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentRecord {
    /// Low 53 bits only
    pub fingerprint: Fingerprint,
    pub storage_path: String,
    pub last_parsed: DateTime<Utc>,
}

/// Key-value metadata shared by all workers
///
/// Implementations must be safe to call from many tasks at once. A store
/// that signals overload retries internally after a backoff instead of
/// surfacing the error.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Looks up the site record for a canonical URL string
    async fn get_site_record(&self, url: &str) -> StorageResult<Option<SiteRecord>>;

    /// Inserts or replaces a site record
    async fn save_site_record(&self, record: &SiteRecord) -> StorageResult<()>;

    /// Looks up the content record for a fingerprint
    async fn get_content_record(
        &self,
        fingerprint: Fingerprint,
    ) -> StorageResult<Option<ContentRecord>>;

    /// Inserts or replaces a content record
    async fn save_content_record(&self, record: &ContentRecord) -> StorageResult<()>;
}
