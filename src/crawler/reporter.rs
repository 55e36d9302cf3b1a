use crate::transport::{chunk_url_batches, Transport, DONE, TODO};
use crate::url::CanonicalUrl;
use std::sync::Arc;

/// Sends a worker's results back to the master
///
/// Send failures are logged and dropped; the master recovers lost
/// completions on resume and lost discoveries on re-discovery.
#[derive(Clone)]
pub struct Reporter {
    transport: Arc<dyn Transport>,
    batch_size: usize,
}

impl Reporter {
    pub fn new(transport: Arc<dyn Transport>, batch_size: usize) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
        }
    }

    /// Acknowledges that `url` needs no further work in this crawl
    pub async fn report_done(&self, url: &CanonicalUrl) {
        if let Err(e) = self.transport.send(DONE, url.as_str()).await {
            tracing::warn!(url = %url, "Failed to report completion: {}", e);
        }
    }

    /// Forwards discovered URLs to the master's frontier in batches
    pub async fn send_discoveries(&self, urls: &[CanonicalUrl]) -> usize {
        if urls.is_empty() {
            return 0;
        }
        let raw: Vec<&str> = urls.iter().map(|u| u.as_str()).collect();
        let mut sent = 0;
        for body in chunk_url_batches(&raw, self.batch_size) {
            match self.transport.send(TODO, &body).await {
                Ok(()) => sent += 1,
                Err(e) => tracing::warn!("Failed to send discovery batch: {}", e),
            }
        }
        sent
    }
}
