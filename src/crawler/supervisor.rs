//! Worker process lifecycle
//!
//! A worker registers its assignment channel with the master, waits for the
//! crawl time and storage directory announcements (in either order), then
//! runs its long-lived tasks until a shutdown command arrives:
//!
//! - announcement watcher (shutdown)
//! - assignment receiver, feeding [`WorkerSupervisor::add_new_links`]
//! - robots.txt loader for newly seen domains
//! - fetch tasks and extraction tasks from [`crate::crawler::pipeline`]

use crate::config::Config;
use crate::crawler::pipeline::{run_extract_task, run_fetch_task, CrawlContext};
use crate::crawler::reporter::Reporter;
use crate::crawler::scheduler::DomainRotation;
use crate::crawler::Fetcher;
use crate::robots::{collect_sitemap_paths, fetch_policy, RobotsPolicy};
use crate::state::DomainRecord;
use crate::storage::{BlobStore, DocumentStore, MetadataStore};
use crate::transport::{
    decode_url_batch, worker_channel_name, ChannelPoller, ControlMessage, Transport,
    MASTER_ANNOUNCE, MASTER_RECEIVE,
};
use crate::url::{CanonicalUrl, DomainKey};
use crate::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

/// robots.txt fetches in flight at once per worker
const POLICY_CONCURRENCY: usize = 16;

/// What a worker needs from the master before it may fetch anything
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlAnnouncement {
    pub crawl_time: DateTime<Utc>,
    pub storage_dir: PathBuf,
}

/// Owns a worker's domains, channels and tasks
pub struct WorkerSupervisor {
    config: Config,
    transport: Arc<dyn Transport>,
    fetcher: Arc<dyn Fetcher>,
    metadata: Arc<dyn MetadataStore>,
    channel: String,
    domains: DashMap<DomainKey, Arc<DomainRecord>>,
    rotation: Arc<DomainRotation>,
    policy_tx: mpsc::UnboundedSender<Arc<DomainRecord>>,
    policy_rx: Mutex<Option<mpsc::UnboundedReceiver<Arc<DomainRecord>>>>,
    shutdown: CancellationToken,
}

impl WorkerSupervisor {
    /// Creates a supervisor on a fresh assignment channel without registering it
    pub fn new(
        config: Config,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn Fetcher>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Self {
        let (policy_tx, policy_rx) = mpsc::unbounded_channel();
        Self {
            config,
            transport,
            fetcher,
            metadata,
            channel: worker_channel_name(),
            domains: DashMap::new(),
            rotation: Arc::new(DomainRotation::new()),
            policy_tx,
            policy_rx: Mutex::new(Some(policy_rx)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Creates a supervisor and registers its channel with the master
    pub async fn start(
        config: Config,
        transport: Arc<dyn Transport>,
        fetcher: Arc<dyn Fetcher>,
        metadata: Arc<dyn MetadataStore>,
    ) -> Result<Arc<Self>> {
        let supervisor = Self::new(config, transport, fetcher, metadata);
        let registration = ControlMessage::Register(supervisor.channel.clone());
        supervisor
            .transport
            .send(MASTER_RECEIVE, &registration.to_string())
            .await?;
        tracing::info!(channel = %supervisor.channel, "Registered with master");
        Ok(Arc::new(supervisor))
    }

    /// This worker's assignment channel
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    fn poller(&self, channel: &str) -> ChannelPoller {
        ChannelPoller::new(
            self.transport.clone(),
            channel,
            self.config.transport.max_consecutive_failures,
            Duration::from_millis(self.config.crawler.idle_backoff_ms),
            self.shutdown.clone(),
        )
    }

    /// Waits for both the crawl time and the storage directory
    ///
    /// Only the first copy of each is consumed; copies meant for other
    /// workers are left on the channel. Returns `Ok(None)` if shutdown
    /// arrives first.
    pub async fn await_announcements(&self) -> Result<Option<CrawlAnnouncement>> {
        let mut poller = self.poller(MASTER_ANNOUNCE);
        let mut crawl_time = None;
        let mut storage_dir = None;

        while crawl_time.is_none() || storage_dir.is_none() {
            let Some(batch) = poller.next_batch().await? else {
                return Ok(None);
            };

            let mut consumed = Vec::new();
            for message in batch {
                match ControlMessage::decode(&message.body) {
                    Some(ControlMessage::CrawlTime(time)) if crawl_time.is_none() => {
                        tracing::info!(crawl_time = %time, "Received crawl time");
                        crawl_time = Some(time);
                        consumed.push(message);
                    }
                    Some(ControlMessage::StoragePath(dir)) if storage_dir.is_none() => {
                        tracing::info!(storage = %dir.display(), "Received storage directory");
                        storage_dir = Some(dir);
                        consumed.push(message);
                    }
                    Some(ControlMessage::Shutdown) => {
                        poller.ack(std::slice::from_ref(&message)).await;
                        tracing::info!("Shutdown received before crawl start");
                        self.shutdown.cancel();
                        return Ok(None);
                    }
                    Some(_) => {}
                    None => tracing::debug!("Ignoring unknown announcement '{}'", message.body),
                }
            }
            poller.ack(&consumed).await;
        }

        match (crawl_time, storage_dir) {
            (Some(crawl_time), Some(storage_dir)) => Ok(Some(CrawlAnnouncement {
                crawl_time,
                storage_dir,
            })),
            _ => Ok(None),
        }
    }

    /// Returns the domain record for `url`, creating it on first sight
    ///
    /// A new domain joins the rotation and is queued for robots.txt loading.
    pub fn domain(&self, url: &CanonicalUrl) -> Arc<DomainRecord> {
        let key = url.domain();
        if let Some(existing) = self.domains.get(&key) {
            return existing.clone();
        }

        let mut created = false;
        let record = self
            .domains
            .entry(key)
            .or_insert_with(|| {
                created = true;
                Arc::new(DomainRecord::new(url))
            })
            .clone();

        if created {
            tracing::debug!(domain = %record.origin(), "New domain");
            self.rotation.push(record.clone());
            if self.policy_tx.send(record.clone()).is_err() {
                tracing::warn!(domain = %record.origin(), "Policy loader gone, resolving unrestricted");
                record.resolve_policy(RobotsPolicy::empty());
            }
        }
        record
    }

    /// Queues assigned URLs as probes on their domains
    ///
    /// Malformed URLs are dropped. Returns the number of paths newly queued.
    pub fn add_new_links<S: AsRef<str>>(&self, urls: &[S]) -> usize {
        let mut queued = 0;
        for raw in urls {
            let url = match CanonicalUrl::parse(raw.as_ref()) {
                Ok(url) => url,
                Err(e) => {
                    tracing::debug!("Dropping assigned URL '{}': {}", raw.as_ref(), e);
                    continue;
                }
            };
            if self.domain(&url).enqueue_probe(url.path()) {
                queued += 1;
            }
        }
        queued
    }

    /// Number of domains this worker has seen
    pub fn domain_count(&self) -> usize {
        self.domains.len()
    }

    /// Runs every worker task until shutdown or a fatal transport failure
    pub async fn run(self: Arc<Self>, announcement: CrawlAnnouncement) -> Result<()> {
        tokio::fs::create_dir_all(&announcement.storage_dir).await?;

        let documents = DocumentStore::new(
            self.metadata.clone(),
            BlobStore::new(&announcement.storage_dir),
            announcement.crawl_time,
        );
        let reporter = Reporter::new(self.transport.clone(), self.config.crawler.link_batch_size);
        let ctx = Arc::new(CrawlContext::new(
            self.fetcher.clone(),
            documents,
            self.rotation.clone(),
            reporter,
            &self.config.crawler,
            self.shutdown.clone(),
        ));

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        tasks.spawn(self.clone().watch_announcements());
        tasks.spawn(self.clone().receive_assignments());
        let policy_rx = self.policy_rx.lock().take();
        if let Some(rx) = policy_rx {
            tasks.spawn(self.clone().load_policies(rx));
        }
        for id in 0..self.config.crawler.fetch_threads as usize {
            let ctx = ctx.clone();
            tasks.spawn(async move {
                run_fetch_task(ctx, id).await;
                Ok(())
            });
        }
        for id in 0..self.config.crawler.extract_threads as usize {
            let ctx = ctx.clone();
            tasks.spawn(async move {
                run_extract_task(ctx, id).await;
                Ok(())
            });
        }

        tracing::info!(
            channel = %self.channel,
            fetch_tasks = self.config.crawler.fetch_threads,
            extract_tasks = self.config.crawler.extract_threads,
            "Worker running"
        );

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Worker task failed: {}", e);
                    self.shutdown.cancel();
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
                Err(e) => {
                    tracing::error!("Worker task panicked: {}", e);
                    self.shutdown.cancel();
                }
            }
        }

        tracing::info!(domains = self.domains.len(), "Worker stopped");
        outcome
    }

    /// Waits for the shutdown command
    async fn watch_announcements(self: Arc<Self>) -> Result<()> {
        let mut poller = self.poller(MASTER_ANNOUNCE);
        while let Some(batch) = poller.next_batch().await? {
            if let Some(message) = batch
                .into_iter()
                .find(|m| ControlMessage::decode(&m.body) == Some(ControlMessage::Shutdown))
            {
                poller.ack(std::slice::from_ref(&message)).await;
                tracing::info!("Shutdown command received");
                self.shutdown.cancel();
            }
        }
        Ok(())
    }

    /// Drains the assignment channel into the domain queues
    async fn receive_assignments(self: Arc<Self>) -> Result<()> {
        let mut poller = self.poller(&self.channel);
        while let Some(batch) = poller.next_batch().await? {
            for message in &batch {
                let urls = decode_url_batch(&message.body);
                let queued = self.add_new_links(&urls);
                tracing::trace!(received = urls.len(), queued, "Assignment batch");
            }
            poller.ack(&batch).await;
        }
        Ok(())
    }

    /// Resolves robots.txt for new domains, a bounded number at a time
    async fn load_policies(
        self: Arc<Self>,
        rx: mpsc::UnboundedReceiver<Arc<DomainRecord>>,
    ) -> Result<()> {
        let shutdown = self.shutdown.clone();
        UnboundedReceiverStream::new(rx)
            .take_until(shutdown.cancelled())
            .for_each_concurrent(POLICY_CONCURRENCY, |domain| {
                let this = self.clone();
                async move { this.load_policy(&domain).await }
            })
            .await;
        Ok(())
    }

    async fn load_policy(&self, domain: &DomainRecord) {
        let policy = fetch_policy(
            self.fetcher.as_ref(),
            domain.origin(),
            &self.config.user_agent.crawler_name,
        )
        .await;
        let sitemaps = policy.sitemaps().to_vec();
        domain.resolve_policy(policy);

        if sitemaps.is_empty() {
            return;
        }
        let paths = tokio::select! {
            _ = self.shutdown.cancelled() => return,
            paths = collect_sitemap_paths(self.fetcher.as_ref(), domain, &sitemaps) => paths,
        };
        let queued = paths.iter().filter(|p| domain.enqueue_probe(p)).count();
        tracing::debug!(domain = %domain.origin(), listed = paths.len(), queued, "Seeded from sitemaps");
    }
}
