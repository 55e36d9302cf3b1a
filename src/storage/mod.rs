//! Storage module for fetched documents
//!
//! This module handles everything a worker persists:
//! - Rabin fingerprints identifying document bodies
//! - Content-addressed blob storage of bodies
//! - The shared SQLite metadata store (site and content records)
//! - [`DocumentStore`], which ties them together for the fetch pipeline

mod blob;
mod fingerprint;
mod schema;
mod sqlite;
mod traits;

pub use blob::BlobStore;
pub use fingerprint::{blob_name, fingerprint, Fingerprint, POLYNOMIAL};
pub use sqlite::SqliteStore;
pub use traits::{ContentRecord, MetadataStore, SiteRecord, StorageError, StorageResult};

use crate::url::CanonicalUrl;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Deposits and looks up fetched documents for one crawl
///
/// `crawl_time` is the crawl start time announced by the master; it stamps
/// every record written during this crawl.
#[derive(Clone)]
pub struct DocumentStore {
    metadata: Arc<dyn MetadataStore>,
    blobs: BlobStore,
    crawl_time: DateTime<Utc>,
}

impl DocumentStore {
    pub fn new(metadata: Arc<dyn MetadataStore>, blobs: BlobStore, crawl_time: DateTime<Utc>) -> Self {
        Self {
            metadata,
            blobs,
            crawl_time,
        }
    }

    pub fn crawl_time(&self) -> DateTime<Utc> {
        self.crawl_time
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Records a fetched body
    ///
    /// Identical bodies share one blob and one content record no matter how
    /// many URLs serve them. The content record's `last_parsed` and the URL's
    /// site record are stamped with the crawl time.
    pub async fn deposit(&self, url: &CanonicalUrl, body: &[u8]) -> StorageResult<ContentRecord> {
        let fp = fingerprint(body);

        let mut record = match self.metadata.get_content_record(fp).await? {
            Some(existing) => {
                if !self.blobs.contains(&existing.storage_path).await {
                    self.blobs.put(&existing.storage_path, body).await?;
                }
                existing
            }
            None => {
                let name = blob_name(fp);
                self.blobs.put(&name, body).await?;
                tracing::debug!(url = %url, blob = %name, "Stored new document body");
                ContentRecord {
                    fingerprint: fp,
                    storage_path: name,
                    last_parsed: self.crawl_time,
                }
            }
        };

        record.last_parsed = self.crawl_time;
        self.metadata.save_content_record(&record).await?;
        self.metadata
            .save_site_record(&SiteRecord {
                url: url.as_str().to_string(),
                crawl_date: self.crawl_time,
                fingerprint: fp,
            })
            .await?;

        Ok(record)
    }

    pub async fn site_record(&self, url: &CanonicalUrl) -> StorageResult<Option<SiteRecord>> {
        self.metadata.get_site_record(url.as_str()).await
    }

    pub async fn content_record(&self, fp: Fingerprint) -> StorageResult<Option<ContentRecord>> {
        self.metadata.get_content_record(fp).await
    }

    pub async fn read_body(&self, record: &ContentRecord) -> StorageResult<Vec<u8>> {
        self.blobs.get(&record.storage_path).await
    }

    /// Stamps an unchanged document as re-extracted during this crawl
    pub async fn mark_revalidated(
        &self,
        site: &SiteRecord,
        content: &ContentRecord,
    ) -> StorageResult<()> {
        let mut content = content.clone();
        content.last_parsed = self.crawl_time;
        self.metadata.save_content_record(&content).await?;

        let mut site = site.clone();
        site.crawl_date = self.crawl_time;
        self.metadata.save_site_record(&site).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn store(dir: &std::path::Path, crawl_millis: i64) -> DocumentStore {
        DocumentStore::new(
            Arc::new(SqliteStore::open_in_memory().unwrap()),
            BlobStore::new(dir),
            Utc.timestamp_millis_opt(crawl_millis).single().unwrap(),
        )
    }

    #[tokio::test]
    async fn test_identical_bodies_share_one_blob() {
        let dir = tempdir().unwrap();
        let docs = store(dir.path(), 1_000);
        let body = b"<html><body>same</body></html>";

        let a = CanonicalUrl::parse("http://example.com/a").unwrap();
        let b = CanonicalUrl::parse("http://example.com/b").unwrap();
        let first = docs.deposit(&a, body).await.unwrap();
        let second = docs.deposit(&b, body).await.unwrap();

        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(first.storage_path, second.storage_path);
        assert_eq!(docs.blobs().list().await.unwrap().len(), 1);

        let site_a = docs.site_record(&a).await.unwrap().unwrap();
        let site_b = docs.site_record(&b).await.unwrap().unwrap();
        assert_eq!(site_a.fingerprint, site_b.fingerprint);
        assert_eq!(docs.read_body(&first).await.unwrap(), body.to_vec());
    }

    #[tokio::test]
    async fn test_content_records_carry_53_bit_fingerprints() {
        let dir = tempdir().unwrap();
        let docs = store(dir.path(), 1_000);

        for i in 0..32u8 {
            let url = CanonicalUrl::parse(&format!("http://example.com/{}", i)).unwrap();
            let body: Vec<u8> = (0..512).map(|j| (j as u8).wrapping_mul(i | 1)).collect();
            let record = docs.deposit(&url, &body).await.unwrap();

            assert!(record.fingerprint < 1 << 53);
            assert_eq!(record.fingerprint, fingerprint(&body));
            assert!(record.storage_path.starts_with("00"));
        }
    }

    #[tokio::test]
    async fn test_deposit_stamps_crawl_time() {
        let dir = tempdir().unwrap();
        let docs = store(dir.path(), 5_000);
        let url = CanonicalUrl::parse("http://example.com/").unwrap();

        let record = docs.deposit(&url, b"body").await.unwrap();
        assert_eq!(record.last_parsed, docs.crawl_time());
        assert_eq!(
            docs.site_record(&url).await.unwrap().unwrap().crawl_date,
            docs.crawl_time()
        );
    }

    #[tokio::test]
    async fn test_mark_revalidated() {
        let dir = tempdir().unwrap();
        let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteStore::open_in_memory().unwrap());
        let old = DocumentStore::new(
            metadata.clone(),
            BlobStore::new(dir.path()),
            Utc.timestamp_millis_opt(1_000).single().unwrap(),
        );
        let url = CanonicalUrl::parse("http://example.com/").unwrap();
        let content = old.deposit(&url, b"body").await.unwrap();

        let current = DocumentStore::new(
            metadata,
            BlobStore::new(dir.path()),
            Utc.timestamp_millis_opt(9_000).single().unwrap(),
        );
        let site = current.site_record(&url).await.unwrap().unwrap();
        current.mark_revalidated(&site, &content).await.unwrap();

        let content = current
            .content_record(content.fingerprint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(content.last_parsed, current.crawl_time());
        assert_eq!(
            current.site_record(&url).await.unwrap().unwrap().crawl_date,
            current.crawl_time()
        );
    }
}
