//! Worker-side crawling
//!
//! This module contains everything a worker process runs, including:
//! - The HTTP fetch collaborator (conditional HEAD probes and GETs)
//! - Link extraction from fetched documents
//! - Round-robin scheduling over live domains
//! - The fetch/extract pipeline and result reporting
//! - The supervisor tying a worker's tasks to the master's channels

mod fetcher;
mod parser;
mod pipeline;
mod reporter;
mod scheduler;
mod supervisor;

pub use fetcher::{
    build_http_client, http_date, FetchError, FetchResponse, Fetcher, HttpFetcher, Method,
};
pub use parser::extract_links;
pub use pipeline::{
    crawl_step, extract_job, fetch_document, probe_document, run_extract_task, run_fetch_task,
    CrawlContext, ExtractJob, FetchOutcome, ProbeOutcome, RejectReason, StepOutcome,
};
pub use reporter::Reporter;
pub use scheduler::{DomainRotation, IdleTracker};
pub use supervisor::{CrawlAnnouncement, WorkerSupervisor};

use crate::config::Config;
use crate::storage::SqliteStore;
use crate::transport::Transport;
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Runs a complete worker process
///
/// Registers with the master, waits for the crawl announcements and crawls
/// until a shutdown command arrives or the transport becomes unreachable.
pub async fn run_worker(config: Config, transport: Arc<dyn Transport>) -> Result<()> {
    let fetcher = Arc::new(HttpFetcher::new(&config)?);
    let metadata = Arc::new(SqliteStore::new(
        Path::new(&config.store.database_path),
        Duration::from_millis(config.store.overload_backoff_ms),
    )?);

    let supervisor = WorkerSupervisor::start(config, transport, fetcher, metadata).await?;
    let shutdown = supervisor.shutdown_token();

    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, stopping worker");
            ctrl_c.cancel();
        }
    });

    match supervisor.await_announcements().await? {
        Some(announcement) => supervisor.run(announcement).await,
        None => {
            tracing::info!("Worker stopped before the crawl started");
            Ok(())
        }
    }
}
