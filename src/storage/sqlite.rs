//! SQLite metadata store
//!
//! This module provides a SQLite-backed implementation of [`MetadataStore`]
//! that several worker processes can share through one database file.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{ContentRecord, MetadataStore, SiteRecord, StorageError, StorageResult};
use crate::storage::Fingerprint;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::path::Path;
use std::time::Duration;

/// SQLite storage backend
pub struct SqliteStore {
    conn: Mutex<Connection>,
    overload_backoff: Duration,
}

impl SqliteStore {
    /// Opens or creates the metadata database at `path`
    pub fn new(path: &Path, overload_backoff: Duration) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        conn.busy_timeout(Duration::from_millis(250))?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            overload_backoff,
        })
    }

    /// Creates an in-memory database
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            overload_backoff: Duration::from_millis(10),
        })
    }

    /// Runs `op`, retrying after the backoff while the database is busy
    async fn with_retry<T, F>(&self, op: F) -> StorageResult<T>
    where
        F: Fn(&Connection) -> rusqlite::Result<T> + Send + Sync,
        T: Send,
    {
        loop {
            let result = {
                let conn = self.conn.lock();
                op(&conn)
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if is_overload(&e) => {
                    tracing::warn!(
                        "Metadata store overloaded, retrying in {}ms",
                        self.overload_backoff.as_millis()
                    );
                    tokio::time::sleep(self.overload_backoff).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_overload(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn millis_to_datetime(key: &str, millis: i64) -> StorageResult<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| StorageError::Corrupt {
            key: key.to_string(),
            reason: format!("timestamp {} out of range", millis),
        })
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn get_site_record(&self, url: &str) -> StorageResult<Option<SiteRecord>> {
        let row = self
            .with_retry(|conn| {
                conn.query_row(
                    "SELECT crawl_date, fingerprint FROM siterecord WHERE url = ?1",
                    params![url],
                    |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
            })
            .await?;

        row.map(|(crawl_date, fingerprint)| {
            Ok(SiteRecord {
                url: url.to_string(),
                crawl_date: millis_to_datetime(url, crawl_date)?,
                fingerprint: fingerprint as Fingerprint,
            })
        })
        .transpose()
    }

    async fn save_site_record(&self, record: &SiteRecord) -> StorageResult<()> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO siterecord (url, crawl_date, fingerprint) VALUES (?1, ?2, ?3)",
                params![
                    record.url,
                    record.crawl_date.timestamp_millis(),
                    record.fingerprint as i64
                ],
            )
        })
        .await?;
        Ok(())
    }

    async fn get_content_record(
        &self,
        fingerprint: Fingerprint,
    ) -> StorageResult<Option<ContentRecord>> {
        let row = self
            .with_retry(|conn| {
                conn.query_row(
                    "SELECT storage_path, last_parsed FROM fingerprints WHERE fingerprint = ?1",
                    params![fingerprint as i64],
                    |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
                )
                .optional()
            })
            .await?;

        row.map(|(storage_path, last_parsed)| {
            Ok(ContentRecord {
                fingerprint,
                last_parsed: millis_to_datetime(&storage_path, last_parsed)?,
                storage_path,
            })
        })
        .transpose()
    }

    async fn save_content_record(&self, record: &ContentRecord) -> StorageResult<()> {
        self.with_retry(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO fingerprints (fingerprint, storage_path, last_parsed) VALUES (?1, ?2, ?3)",
                params![
                    record.fingerprint as i64,
                    record.storage_path,
                    record.last_parsed.timestamp_millis()
                ],
            )
        })
        .await?;
        Ok(())
    }
}
