//! Fetch and extraction loops
//!
//! Fetch tasks take turns over the domain rotation. Each turn does at most
//! one unit of work on one domain: a GET from its fetch queue if the crawl
//! delay allows, otherwise a conditional HEAD probe from its probe queue.
//! Fetched bodies go to the shared extraction queue, drained by the
//! extraction tasks.

use crate::config::CrawlerConfig;
use crate::crawler::parser::extract_links;
use crate::crawler::reporter::Reporter;
use crate::crawler::scheduler::{DomainRotation, IdleTracker};
use crate::crawler::{FetchError, FetchResponse, Fetcher, Method};
use crate::state::DomainRecord;
use crate::storage::{DocumentStore, SiteRecord, StorageError};
use crate::url::CanonicalUrl;
use crossbeam_queue::SegQueue;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// A fetched body waiting for link extraction
#[derive(Debug, Clone)]
pub struct ExtractJob {
    /// URL the body was served from; relative links resolve against it
    pub url: CanonicalUrl,
    pub body: Vec<u8>,
}

/// Why a document was dropped without being stored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Status(u16),
    TooLarge,
    NotMarkup,
}

/// Result of a GET
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Stored (or store failure logged) and queued for extraction
    Extracted,
    /// Answered with a redirect; the target went to the master
    Redirected(CanonicalUrl),
    Rejected(RejectReason),
    /// Network failure; the URL is skipped for this crawl
    Failed,
}

/// Result of a HEAD probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Worth fetching; queued on the domain's fetch queue
    QueuedForFetch,
    /// 304 and the content was already re-extracted in this crawl
    Fresh,
    /// 304 and the stored body was queued for extraction again
    Reextracted,
    /// Redirected within the domain; the target is queued for fetch
    RedirectQueued(CanonicalUrl),
    /// Redirected off the domain; the target went to the master
    RedirectForwarded(CanonicalUrl),
    Rejected(RejectReason),
    Failed,
}

impl ProbeOutcome {
    /// Every outcome except a pending GET finishes the probed URL
    pub fn finishes_url(&self) -> bool {
        !matches!(self, Self::QueuedForFetch)
    }
}

/// What one turn on a domain did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Idle,
    Fetched(FetchOutcome),
    Probed(ProbeOutcome),
}

impl StepOutcome {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

/// Everything the fetch and extraction tasks share for one crawl
pub struct CrawlContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub documents: DocumentStore,
    pub rotation: Arc<DomainRotation>,
    pub extraction: SegQueue<ExtractJob>,
    pub reporter: Reporter,
    pub max_content_bytes: u64,
    pub idle_backoff: Duration,
    pub shutdown: CancellationToken,
}

impl CrawlContext {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        documents: DocumentStore,
        rotation: Arc<DomainRotation>,
        reporter: Reporter,
        config: &CrawlerConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            documents,
            rotation,
            extraction: SegQueue::new(),
            reporter,
            max_content_bytes: config.max_content_bytes,
            idle_backoff: Duration::from_millis(config.idle_backoff_ms),
            shutdown,
        }
    }

    /// Sleeps for the idle backoff; returns false if shutdown was requested
    async fn pause(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.idle_backoff) => true,
        }
    }
}

/// Fetch task body: rotates over domains until shutdown
pub async fn run_fetch_task(ctx: Arc<CrawlContext>, id: usize) {
    tracing::debug!(task = id, "Fetch task started");
    let mut idle = IdleTracker::default();

    while !ctx.shutdown.is_cancelled() {
        let did_work = match ctx.rotation.pop() {
            Some(domain) => {
                let outcome = crawl_step(&ctx, &domain).await;
                ctx.rotation.push(domain);
                !outcome.is_idle()
            }
            None => false,
        };

        if idle.record(did_work, ctx.rotation.len()) && !ctx.pause().await {
            break;
        }
    }
    tracing::debug!(task = id, "Fetch task stopped");
}

/// One unit of work on one domain: a GET if allowed, else a probe
pub async fn crawl_step(ctx: &CrawlContext, domain: &DomainRecord) -> StepOutcome {
    if let Some(url) = domain.dequeue_fetch(Instant::now()) {
        return StepOutcome::Fetched(fetch_document(ctx, &url).await);
    }
    if let Some(url) = domain.dequeue_probe() {
        return StepOutcome::Probed(probe_document(ctx, domain, &url).await);
    }
    StepOutcome::Idle
}

/// GETs `url`, deposits the body and queues it for extraction
///
/// Redirects are not followed. The target is handed to the master so it is
/// deduplicated and screened by robots like any other discovery, and the body
/// stored under `url` is always the one `url` itself served. The URL is
/// reported done whatever happens.
pub async fn fetch_document(ctx: &CrawlContext, url: &CanonicalUrl) -> FetchOutcome {
    let outcome = match ctx.fetcher.fetch_once(url, Method::Get, None).await {
        Ok(response) => match response.redirect_target() {
            Some(target) => {
                ctx.reporter
                    .send_discoveries(std::slice::from_ref(&target))
                    .await;
                FetchOutcome::Redirected(target)
            }
            None => store_document(ctx, url, response).await,
        },
        Err(FetchError::TooLarge { .. }) => FetchOutcome::Rejected(RejectReason::TooLarge),
        Err(e) => {
            tracing::debug!(url = %url, "Fetch failed: {}", e);
            FetchOutcome::Failed
        }
    };

    tracing::debug!(url = %url, outcome = ?outcome, "Fetched");
    ctx.reporter.report_done(url).await;
    outcome
}

async fn store_document(
    ctx: &CrawlContext,
    url: &CanonicalUrl,
    response: FetchResponse,
) -> FetchOutcome {
    if !response.is_ok() {
        return FetchOutcome::Rejected(RejectReason::Status(response.status));
    }
    if !response.is_markup() {
        return FetchOutcome::Rejected(RejectReason::NotMarkup);
    }

    let body = response.body.unwrap_or_default();
    if let Err(e) = ctx.documents.deposit(url, &body).await {
        tracing::warn!(url = %url, "Failed to store document: {}", e);
    }
    ctx.extraction.push(ExtractJob {
        url: response.final_url,
        body,
    });
    FetchOutcome::Extracted
}

/// Issues a conditional HEAD for `url` and decides what happens next
pub async fn probe_document(
    ctx: &CrawlContext,
    domain: &DomainRecord,
    url: &CanonicalUrl,
) -> ProbeOutcome {
    let site = match ctx.documents.site_record(url).await {
        Ok(site) => site,
        Err(e) => {
            tracing::warn!(url = %url, "Site record lookup failed: {}", e);
            None
        }
    };
    let since = site.as_ref().map(|s| s.crawl_date);

    let outcome = match ctx.fetcher.fetch(url, Method::Head, since).await {
        Ok(response) if response.final_url != *url => {
            let target = response.final_url.clone();
            if let Some(reason) = screen(&response, ctx.max_content_bytes) {
                ProbeOutcome::Rejected(reason)
            } else if target.same_domain(url) {
                if domain.approved(target.path()) {
                    domain.enqueue_fetch(target.path());
                }
                ProbeOutcome::RedirectQueued(target)
            } else {
                ctx.reporter
                    .send_discoveries(std::slice::from_ref(&target))
                    .await;
                ProbeOutcome::RedirectForwarded(target)
            }
        }
        Ok(response) if response.is_not_modified() => revalidate(ctx, domain, url, site).await,
        Ok(response) => match screen(&response, ctx.max_content_bytes) {
            Some(reason) => ProbeOutcome::Rejected(reason),
            None => {
                domain.enqueue_fetch(url.path());
                ProbeOutcome::QueuedForFetch
            }
        },
        Err(e) => {
            tracing::debug!(url = %url, "Probe failed: {}", e);
            ProbeOutcome::Failed
        }
    };

    tracing::debug!(url = %url, outcome = ?outcome, "Probed");
    if outcome.finishes_url() {
        ctx.reporter.report_done(url).await;
    }
    outcome
}

/// Checks a probe response against what is worth fetching
fn screen(response: &FetchResponse, max_bytes: u64) -> Option<RejectReason> {
    if !response.is_ok() {
        Some(RejectReason::Status(response.status))
    } else if !response.within_size(max_bytes) {
        Some(RejectReason::TooLarge)
    } else if !response.is_markup() {
        Some(RejectReason::NotMarkup)
    } else {
        None
    }
}

/// Handles a 304: re-extracts the stored body unless already done this crawl
async fn revalidate(
    ctx: &CrawlContext,
    domain: &DomainRecord,
    url: &CanonicalUrl,
    site: Option<SiteRecord>,
) -> ProbeOutcome {
    let Some(site) = site else {
        return ProbeOutcome::Rejected(RejectReason::Status(304));
    };

    let content = match ctx.documents.content_record(site.fingerprint).await {
        Ok(Some(content)) => content,
        Ok(None) => {
            tracing::debug!(url = %url, "No content record behind site record, refetching");
            domain.enqueue_fetch(url.path());
            return ProbeOutcome::QueuedForFetch;
        }
        Err(e) => {
            tracing::warn!(url = %url, "Content record lookup failed: {}", e);
            return ProbeOutcome::Failed;
        }
    };

    if content.last_parsed >= ctx.documents.crawl_time() {
        return ProbeOutcome::Fresh;
    }

    match ctx.documents.read_body(&content).await {
        Ok(body) => {
            if let Err(e) = ctx.documents.mark_revalidated(&site, &content).await {
                tracing::warn!(url = %url, "Failed to mark document revalidated: {}", e);
            }
            ctx.extraction.push(ExtractJob {
                url: url.clone(),
                body,
            });
            ProbeOutcome::Reextracted
        }
        Err(StorageError::BlobNotFound(name)) => {
            tracing::debug!(url = %url, blob = %name, "Stored body missing locally, refetching");
            domain.enqueue_fetch(url.path());
            ProbeOutcome::QueuedForFetch
        }
        Err(e) => {
            tracing::warn!(url = %url, "Failed to read stored body: {}", e);
            ProbeOutcome::Failed
        }
    }
}

/// Extraction task body: drains the extraction queue until shutdown
pub async fn run_extract_task(ctx: Arc<CrawlContext>, id: usize) {
    tracing::debug!(task = id, "Extraction task started");
    while !ctx.shutdown.is_cancelled() {
        match ctx.extraction.pop() {
            Some(job) => {
                extract_job(&ctx, job).await;
            }
            None => {
                if !ctx.pause().await {
                    break;
                }
            }
        }
    }
    tracing::debug!(task = id, "Extraction task stopped");
}

/// Parses one body off the async runtime and forwards its links
///
/// Returns the number of links found.
pub async fn extract_job(ctx: &CrawlContext, job: ExtractJob) -> usize {
    let ExtractJob { url, body } = job;
    let base = url.clone();

    let links = match tokio::task::spawn_blocking(move || extract_links(&body, &base)).await {
        Ok(links) => links,
        Err(e) => {
            tracing::warn!(url = %url, "Link extraction task failed: {}", e);
            return 0;
        }
    };

    tracing::trace!(url = %url, links = links.len(), "Extracted links");
    ctx.reporter.send_discoveries(&links).await;
    links.len()
}
