use serde::Deserialize;

/// Main configuration structure for Sumi-Swarm
///
/// One file is shared by the master and every worker; each role reads the
/// sections it needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub transport: TransportConfig,
    pub store: StoreConfig,
    pub master: MasterConfig,
    #[serde(default)]
    pub whitelist: Vec<WhitelistEntry>,
}

/// Worker-side crawler behavior
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Number of fetch tasks per worker (I/O bound)
    #[serde(rename = "fetch-threads", default = "default_fetch_threads")]
    pub fetch_threads: u32,

    /// Number of link extraction tasks per worker (CPU bound)
    #[serde(rename = "extract-threads", default = "default_extract_threads")]
    pub extract_threads: u32,

    /// Sleep applied by a consumer that found no ready work (milliseconds)
    #[serde(rename = "idle-backoff-ms", default = "default_idle_backoff_ms")]
    pub idle_backoff_ms: u64,

    /// Bodies larger than this are rejected before persistence
    #[serde(rename = "max-content-bytes", default = "default_max_content_bytes")]
    pub max_content_bytes: u64,

    /// Redirect hops followed by the fetcher before giving up
    #[serde(rename = "max-redirects", default = "default_max_redirects")]
    pub max_redirects: u32,

    /// Whole-request timeout (seconds)
    #[serde(rename = "request-timeout-secs", default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum number of URLs joined into one transport message
    #[serde(rename = "link-batch-size", default = "default_link_batch_size")]
    pub link_batch_size: usize,
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler, also the identifier matched in robots.txt
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Formats the User-Agent header: `Name/Version (+ContactURL; ContactEmail)`
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Message transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    /// Path to the shared SQLite queue database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// How long a received but unacknowledged message stays hidden
    #[serde(rename = "visibility-timeout-secs", default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Maximum messages returned by a single receive
    #[serde(rename = "receive-batch-size", default = "default_receive_batch_size")]
    pub receive_batch_size: usize,

    /// Consecutive receive failures after which the transport is considered gone
    #[serde(rename = "max-consecutive-failures", default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,
}

/// Site/content metadata store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite metadata database
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Fixed backoff between retries of an overloaded store (milliseconds)
    #[serde(rename = "overload-backoff-ms", default = "default_overload_backoff_ms")]
    pub overload_backoff_ms: u64,
}

/// Master coordinator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MasterConfig {
    /// Root directory announced to workers for blob storage; checkpoints go under `state/`
    pub mountpath: String,

    /// Interval between SeenState checkpoints (seconds)
    #[serde(rename = "checkpoint-interval-secs", default = "default_checkpoint_interval_secs")]
    pub checkpoint_interval_secs: u64,

    /// Interval between progress log lines (seconds)
    #[serde(rename = "progress-interval-secs", default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,
}

/// Domain admitted to the crawl (e.g. "http://example.com/")
#[derive(Debug, Clone, Deserialize)]
pub struct WhitelistEntry {
    pub domain: String,
}

fn default_fetch_threads() -> u32 {
    10
}

fn default_extract_threads() -> u32 {
    4
}

fn default_idle_backoff_ms() -> u64 {
    200
}

fn default_max_content_bytes() -> u64 {
    5_000_000
}

fn default_max_redirects() -> u32 {
    3
}

fn default_request_timeout_secs() -> u64 {
    6
}

fn default_link_batch_size() -> usize {
    100
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_receive_batch_size() -> usize {
    10
}

fn default_max_consecutive_failures() -> u32 {
    10
}

fn default_overload_backoff_ms() -> u64 {
    1000
}

fn default_checkpoint_interval_secs() -> u64 {
    60
}

fn default_progress_interval_secs() -> u64 {
    30
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            fetch_threads: default_fetch_threads(),
            extract_threads: default_extract_threads(),
            idle_backoff_ms: default_idle_backoff_ms(),
            max_content_bytes: default_max_content_bytes(),
            max_redirects: default_max_redirects(),
            request_timeout_secs: default_request_timeout_secs(),
            link_batch_size: default_link_batch_size(),
        }
    }
}
