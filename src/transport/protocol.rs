//! Channel names and message bodies exchanged between master and workers

use chrono::{DateTime, TimeZone, Utc};
use std::fmt;
use std::path::PathBuf;

/// Worker registrations (`qnode:<worker-channel>`)
pub const MASTER_RECEIVE: &str = "master-receive";
/// Crawl announcements and lifecycle commands for all workers
pub const MASTER_ANNOUNCE: &str = "master-announce";
/// Discovered URLs awaiting partitioning
pub const TODO: &str = "todo";
/// Completion acknowledgements
pub const DONE: &str = "done";
/// Domain origins to add to the crawl whitelist
pub const WHITELIST: &str = "whitelist";

/// A fresh, unique assignment channel name for a worker process
pub fn worker_channel_name() -> String {
    format!("worker-{}", uuid::Uuid::new_v4().simple())
}

/// Control messages on the registration and announcement channels
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// A worker announcing its assignment channel
    Register(String),
    /// Crawl start time; identifies the crawl run
    CrawlTime(DateTime<Utc>),
    /// Directory workers store document bodies in
    StoragePath(PathBuf),
    Shutdown,
}

impl ControlMessage {
    pub fn decode(body: &str) -> Option<Self> {
        let body = body.trim();
        if let Some(channel) = body.strip_prefix("qnode:") {
            let channel = channel.trim();
            return (!channel.is_empty()).then(|| Self::Register(channel.to_string()));
        }
        if let Some(millis) = body.strip_prefix("qtime:") {
            let millis: i64 = millis.trim().parse().ok()?;
            return Utc.timestamp_millis_opt(millis).single().map(Self::CrawlTime);
        }
        if let Some(path) = body.strip_prefix("qpath:") {
            let path = path.trim();
            return (!path.is_empty()).then(|| Self::StoragePath(PathBuf::from(path)));
        }
        if body == "qecmd:shutdown" {
            return Some(Self::Shutdown);
        }
        None
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Register(channel) => write!(f, "qnode:{}", channel),
            Self::CrawlTime(time) => write!(f, "qtime:{}", time.timestamp_millis()),
            Self::StoragePath(path) => write!(f, "qpath:{}", path.display()),
            Self::Shutdown => write!(f, "qecmd:shutdown"),
        }
    }
}

/// Percent-encodes each URL and joins them with `;`
pub fn encode_url_batch<S: AsRef<str>>(urls: &[S]) -> String {
    urls.iter()
        .map(|u| urlencoding::encode(u.as_ref()).into_owned())
        .collect::<Vec<_>>()
        .join(";")
}

/// Splits a `;`-joined batch and percent-decodes each entry
///
/// Entries that fail to decode are skipped.
pub fn decode_url_batch(body: &str) -> Vec<String> {
    body.split(';')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .filter_map(|part| match urlencoding::decode(part) {
            Ok(decoded) => Some(decoded.into_owned()),
            Err(e) => {
                tracing::debug!("Dropping undecodable batch entry {}: {}", part, e);
                None
            }
        })
        .collect()
}

/// Encodes URLs into message bodies of at most `batch_size` entries each
pub fn chunk_url_batches<S: AsRef<str>>(urls: &[S], batch_size: usize) -> Vec<String> {
    urls.chunks(batch_size.max(1))
        .map(encode_url_batch)
        .collect()
}
