//! Master coordinator
//!
//! The master owns the crawl frontier. It collects worker registrations,
//! announces the crawl, then runs until shutdown:
//!
//! - receivers for the discovery, completion and whitelist channels
//! - the transmit loop, partitioning new discoveries across workers
//! - the done loop, marking completions in the seen ledger
//! - checkpoint and progress timers
//!
//! Phases only move forward:
//! `Bootstrapping -> Running -> ShuttingDown -> Terminated`.

mod checkpoint;
mod partition;
mod progress;

pub use checkpoint::{
    checkpoint_dir, checkpoint_path, load_latest, Checkpoint, CheckpointError, CheckpointWriter,
};
pub use partition::Partitioner;
pub use progress::{print_checkpoint_summary, CrawlProgress};

use crate::config::Config;
use crate::state::SeenState;
use crate::transport::{
    chunk_url_batches, decode_url_batch, encode_url_batch, ChannelPoller, ControlMessage, Message,
    Transport, DONE, MASTER_ANNOUNCE, MASTER_RECEIVE, TODO, WHITELIST,
};
use crate::url::CanonicalUrl;
use crate::{Result, SwarmError};
use chrono::{DateTime, TimeZone, Utc};
use crossbeam_queue::SegQueue;
use dashmap::DashSet;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Lifecycle of one master run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MasterPhase {
    Bootstrapping,
    Running,
    ShuttingDown,
    Terminated,
}

impl MasterPhase {
    pub fn can_advance_to(self, next: MasterPhase) -> bool {
        next > self
    }
}

/// A URL waiting in the transmit loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// Reported by a worker or a seed submission; subject to whitelist and dedup
    Fresh(String),
    /// Already in the ledger (resume or a failed send); dispatched as is
    Resumed(CanonicalUrl),
}

/// Pushes seed URLs onto the discovery channel
pub async fn submit_seeds<S: AsRef<str>>(
    transport: &dyn Transport,
    urls: &[S],
    batch_size: usize,
) -> Result<usize> {
    let batches = chunk_url_batches(urls, batch_size);
    for body in &batches {
        transport.send(TODO, body).await?;
    }
    Ok(batches.len())
}

/// Pushes domains onto the whitelist channel
pub async fn submit_whitelist<S: AsRef<str>>(transport: &dyn Transport, domains: &[S]) -> Result<()> {
    if domains.is_empty() {
        return Ok(());
    }
    transport.send(WHITELIST, &encode_url_batch(domains)).await?;
    Ok(())
}

/// Reduces a URL to the origin string used as its ledger and whitelist key
fn domain_key(raw: &str) -> Option<String> {
    match CanonicalUrl::parse(raw) {
        Ok(url) => Some(url.domain().to_string()),
        Err(e) => {
            tracing::debug!("Ignoring whitelist entry '{}': {}", raw, e);
            None
        }
    }
}

fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    Utc.timestamp_millis_opt(now.timestamp_millis())
        .single()
        .unwrap_or(now)
}

/// The frontier owner for one crawl run
pub struct MasterCoordinator {
    config: Config,
    transport: Arc<dyn Transport>,
    workers: Vec<String>,
    partitioner: Partitioner,
    crawl_time: DateTime<Utc>,
    mountpath: PathBuf,
    seen: SeenState,
    whitelist: DashSet<String>,
    pending: SegQueue<Discovery>,
    acks: SegQueue<String>,
    dispatched: AtomicU64,
    phase: Mutex<MasterPhase>,
    checkpoints: tokio::sync::Mutex<CheckpointWriter>,
    shutdown: CancellationToken,
}

impl MasterCoordinator {
    /// Collects registrations and announces the crawl to every worker
    ///
    /// With `resume`, the ledger is rebuilt from the checkpoint, its crawl
    /// time is reused and every unfinished path is queued for dispatch; the
    /// discovery and completion channels are kept. A fresh crawl purges them.
    pub async fn bootstrap(
        config: Config,
        transport: Arc<dyn Transport>,
        resume: Option<Checkpoint>,
    ) -> Result<Self> {
        let workers = Self::drain_registrations(transport.as_ref()).await?;
        if workers.is_empty() {
            tracing::error!("No workers registered");
            return Err(SwarmError::NoWorkers);
        }

        let mountpath = PathBuf::from(&config.master.mountpath);
        let (crawl_time, seen, checkpoints, resumed) = match &resume {
            Some(checkpoint) => (
                checkpoint.crawl_time,
                checkpoint.restore(),
                CheckpointWriter::resuming(&mountpath, checkpoint),
                checkpoint.resume_targets(),
            ),
            None => {
                let crawl_time = now_millis();
                (
                    crawl_time,
                    SeenState::new(),
                    CheckpointWriter::new(&mountpath, crawl_time),
                    Vec::new(),
                )
            }
        };

        if resume.is_none() {
            transport.purge(TODO).await?;
            transport.purge(DONE).await?;
        }
        transport.purge(MASTER_ANNOUNCE).await?;

        let announce_time = ControlMessage::CrawlTime(crawl_time).to_string();
        let announce_path = ControlMessage::StoragePath(mountpath.clone()).to_string();
        for _ in &workers {
            transport.send(MASTER_ANNOUNCE, &announce_time).await?;
            transport.send(MASTER_ANNOUNCE, &announce_path).await?;
        }

        let whitelist = DashSet::new();
        for entry in &config.whitelist {
            if let Some(key) = domain_key(&entry.domain) {
                whitelist.insert(key);
            }
        }

        let pending = SegQueue::new();
        let resumed_count = resumed.len();
        for url in resumed {
            pending.push(Discovery::Resumed(url));
        }

        tracing::info!(
            workers = workers.len(),
            crawl_time = crawl_time.timestamp_millis(),
            whitelisted = whitelist.len(),
            resumed = resumed_count,
            "Crawl announced"
        );

        let master = Self {
            partitioner: Partitioner::new(workers.len()),
            config,
            transport,
            workers,
            crawl_time,
            mountpath,
            seen,
            whitelist,
            pending,
            acks: SegQueue::new(),
            dispatched: AtomicU64::new(0),
            phase: Mutex::new(MasterPhase::Bootstrapping),
            checkpoints: tokio::sync::Mutex::new(checkpoints),
            shutdown: CancellationToken::new(),
        };
        master.advance(MasterPhase::Running)?;
        Ok(master)
    }

    /// Reads registrations until the channel has nothing more to give
    async fn drain_registrations(transport: &dyn Transport) -> Result<Vec<String>> {
        let mut workers: Vec<String> = Vec::new();
        loop {
            let batch = transport.receive(MASTER_RECEIVE).await?;
            if batch.is_empty() {
                break;
            }

            let mut handles = Vec::new();
            for message in batch {
                match ControlMessage::decode(&message.body) {
                    Some(ControlMessage::Register(channel)) => {
                        if !workers.contains(&channel) {
                            tracing::info!(channel = %channel, "Worker registered");
                            workers.push(channel);
                        }
                        handles.push(message.handle);
                    }
                    _ => tracing::debug!("Ignoring '{}' on registration channel", message.body),
                }
            }
            if !handles.is_empty() {
                transport.delete(MASTER_RECEIVE, &handles).await?;
            }
        }
        Ok(workers)
    }

    pub fn phase(&self) -> MasterPhase {
        *self.phase.lock()
    }

    fn advance(&self, next: MasterPhase) -> Result<()> {
        let mut phase = self.phase.lock();
        if !phase.can_advance_to(next) {
            return Err(SwarmError::InvalidPhase { from: *phase, to: next });
        }
        tracing::debug!(from = ?*phase, to = ?next, "Master phase change");
        *phase = next;
        Ok(())
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    pub fn crawl_time(&self) -> DateTime<Utc> {
        self.crawl_time
    }

    /// Storage root announced to workers
    pub fn mountpath(&self) -> &Path {
        &self.mountpath
    }

    pub fn seen(&self) -> &SeenState {
        &self.seen
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Asks [`run`](Self::run) to stop its loops and shut the crawl down
    pub fn request_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Admits a domain to the crawl; returns false if it was already admitted
    pub fn allow_domain(&self, raw: &str) -> bool {
        match domain_key(raw) {
            Some(key) => {
                let added = self.whitelist.insert(key.clone());
                if added {
                    tracing::info!(domain = %key, "Domain whitelisted");
                }
                added
            }
            None => false,
        }
    }

    pub fn is_whitelisted(&self, url: &CanonicalUrl) -> bool {
        self.whitelist.contains(&url.domain().to_string())
    }

    /// Queues a discovered URL for the transmit loop
    pub fn submit(&self, raw: impl Into<String>) {
        self.pending.push(Discovery::Fresh(raw.into()));
    }

    /// Queues a completion for the done loop
    pub fn acknowledge(&self, raw: impl Into<String>) {
        self.acks.push(raw.into());
    }

    pub fn progress(&self) -> CrawlProgress {
        CrawlProgress::new(
            self.seen.counts(),
            self.pending.len(),
            self.dispatched.load(Ordering::Relaxed),
        )
    }

    /// Drains the discoveries queued so far; returns how many were taken
    ///
    /// Discoveries whose send fails are queued again for a later pass.
    pub async fn transmit_pending(&self) -> usize {
        let queued = self.pending.len();
        let mut taken = 0;
        while taken < queued {
            let Some(discovery) = self.pending.pop() else {
                break;
            };
            taken += 1;
            self.dispatch(discovery).await;
        }
        taken
    }

    /// Sends one discovery to its owning worker; returns true if sent
    async fn dispatch(&self, discovery: Discovery) -> bool {
        let url = match discovery {
            Discovery::Fresh(raw) => {
                let url = match CanonicalUrl::parse(&raw) {
                    Ok(url) => url,
                    Err(e) => {
                        tracing::debug!("Dropping discovery '{}': {}", raw, e);
                        return false;
                    }
                };
                let domain = url.domain().to_string();
                if !self.whitelist.contains(&domain) {
                    tracing::trace!(url = %url, "Not whitelisted");
                    return false;
                }
                if !self.seen.assign(&domain, url.path()) {
                    return false;
                }
                url
            }
            Discovery::Resumed(url) => url,
        };

        let owner = self.partitioner.owner_of(url.host());
        let channel = &self.workers[owner];
        match self
            .transport
            .send(channel, &encode_url_batch(&[url.as_str()]))
            .await
        {
            Ok(()) => {
                self.dispatched.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(url = %url, worker = owner, "Dispatched");
                true
            }
            Err(e) => {
                tracing::warn!(url = %url, worker = %channel, "Dispatch failed, will retry: {}", e);
                self.pending.push(Discovery::Resumed(url));
                false
            }
        }
    }

    /// Applies the completions queued so far; returns how many were taken
    pub fn process_acks(&self) -> usize {
        let mut taken = 0;
        while let Some(raw) = self.acks.pop() {
            taken += 1;
            match CanonicalUrl::parse(&raw) {
                Ok(url) => {
                    self.seen.mark_done(&url.domain().to_string(), url.path());
                }
                Err(e) => tracing::debug!("Dropping completion '{}': {}", raw, e),
            }
        }
        taken
    }

    /// Writes a checkpoint of the ledger now
    pub async fn checkpoint(&self) -> Result<PathBuf> {
        let mut writer = self.checkpoints.lock().await;
        Ok(writer.write(&self.seen).await?)
    }

    fn idle(&self) -> Duration {
        Duration::from_millis(self.config.crawler.idle_backoff_ms)
    }

    fn poller(&self, channel: &str) -> ChannelPoller {
        ChannelPoller::new(
            self.transport.clone(),
            channel,
            self.config.transport.max_consecutive_failures,
            self.idle(),
            self.shutdown.clone(),
        )
    }

    /// Sleeps for the idle backoff; returns false if shutdown was requested
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Runs every master loop until shutdown, then shuts the crawl down
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        tasks.spawn(self.clone().receive_loop(TODO));
        tasks.spawn(self.clone().receive_loop(DONE));
        tasks.spawn(self.clone().receive_loop(WHITELIST));
        tasks.spawn(self.clone().transmit_loop());
        tasks.spawn(self.clone().done_loop());
        tasks.spawn(self.clone().checkpoint_loop());
        tasks.spawn(self.clone().progress_loop());

        let mut outcome = Ok(());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!("Master task failed: {}", e);
                    self.shutdown.cancel();
                    if outcome.is_ok() {
                        outcome = Err(e);
                    }
                }
                Err(e) => {
                    tracing::error!("Master task panicked: {}", e);
                    self.shutdown.cancel();
                }
            }
        }

        self.finish().await?;
        outcome
    }

    /// Final checkpoint and shutdown broadcast
    async fn finish(&self) -> Result<()> {
        self.advance(MasterPhase::ShuttingDown)?;
        self.process_acks();

        match self.checkpoint().await {
            Ok(path) => tracing::info!(path = %path.display(), "Final checkpoint written"),
            Err(e) => tracing::error!("Final checkpoint failed: {}", e),
        }

        let command = ControlMessage::Shutdown.to_string();
        for _ in &self.workers {
            if let Err(e) = self.transport.send(MASTER_ANNOUNCE, &command).await {
                tracing::warn!("Failed to send shutdown command: {}", e);
            }
        }

        tracing::info!(progress = %self.progress(), "Crawl stopped");
        self.advance(MasterPhase::Terminated)
    }

    /// Feeds one inbound channel into the matching local queue
    async fn receive_loop(self: Arc<Self>, channel: &'static str) -> Result<()> {
        let mut poller = self.poller(channel);
        while let Some(batch) = poller.next_batch().await? {
            for message in &batch {
                self.accept(channel, message);
            }
            poller.ack(&batch).await;
        }
        Ok(())
    }

    fn accept(&self, channel: &str, message: &Message) {
        match channel {
            TODO => {
                for url in decode_url_batch(&message.body) {
                    self.submit(url);
                }
            }
            DONE => self.acknowledge(message.body.trim()),
            WHITELIST => {
                for domain in decode_url_batch(&message.body) {
                    self.allow_domain(&domain);
                }
            }
            other => tracing::debug!(channel = other, "Unexpected channel"),
        }
    }

    async fn transmit_loop(self: Arc<Self>) -> Result<()> {
        while !self.shutdown.is_cancelled() {
            if self.transmit_pending().await == 0 && !self.pause(self.idle()).await {
                break;
            }
        }
        Ok(())
    }

    async fn done_loop(self: Arc<Self>) -> Result<()> {
        while !self.shutdown.is_cancelled() {
            if self.process_acks() == 0 && !self.pause(self.idle()).await {
                break;
            }
        }
        Ok(())
    }

    async fn checkpoint_loop(self: Arc<Self>) -> Result<()> {
        let interval = Duration::from_secs(self.config.master.checkpoint_interval_secs);
        while self.pause(interval).await {
            if let Err(e) = self.checkpoint().await {
                tracing::warn!("Checkpoint failed: {}", e);
            }
        }
        Ok(())
    }

    async fn progress_loop(self: Arc<Self>) -> Result<()> {
        let interval = Duration::from_secs(self.config.master.progress_interval_secs);
        while self.pause(interval).await {
            tracing::info!("Progress: {}", self.progress());
        }
        Ok(())
    }
}
