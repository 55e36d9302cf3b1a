//! Robots.txt handling module
//!
//! This module fetches and parses robots.txt into a [`RobotsPolicy`] and
//! collects sitemap links advertised there.

mod parser;
mod sitemap;

pub use parser::RobotsPolicy;
pub use sitemap::{collect_sitemap_paths, parse_sitemap, resolve_sitemap_ref, SitemapEntries};

use crate::crawler::{Fetcher, Method};
use crate::url::CanonicalUrl;

/// Fetches and parses `/robots.txt` for a domain
///
/// Never fails: a network error, a non-200 status or an unreadable body all
/// resolve to [`RobotsPolicy::empty`].
pub async fn fetch_policy(
    fetcher: &dyn Fetcher,
    origin: &CanonicalUrl,
    crawler_name: &str,
) -> RobotsPolicy {
    let robots_url = origin.with_path("/robots.txt");

    match fetcher.fetch(&robots_url, Method::Get, None).await {
        Ok(response) if response.status == 200 => {
            let body = response.body.unwrap_or_default();
            let policy = RobotsPolicy::parse(&String::from_utf8_lossy(&body), crawler_name);
            tracing::debug!(
                domain = %origin,
                disallowed = policy.disallowed().len(),
                delay_ms = policy.crawl_delay().as_millis() as u64,
                "Loaded robots.txt"
            );
            policy
        }
        Ok(response) => {
            tracing::debug!(domain = %origin, status = response.status, "No robots.txt, crawling unrestricted");
            RobotsPolicy::empty()
        }
        Err(e) => {
            tracing::info!(domain = %origin, "robots.txt unreachable ({}), crawling unrestricted", e);
            RobotsPolicy::empty()
        }
    }
}
