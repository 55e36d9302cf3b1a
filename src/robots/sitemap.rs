//! Sitemap link collection
//!
//! Sitemaps named in robots.txt are fetched once the policy resolves; their
//! `<loc>` entries on the same domain become probe candidates. One level of
//! sitemap index nesting is followed. Sitemaps hosted on another domain are
//! never requested.

use crate::crawler::{Fetcher, Method};
use crate::state::DomainRecord;
use crate::url::CanonicalUrl;
use sitemap::reader::{SiteMapEntity, SiteMapReader};
use std::io::Cursor;
use std::time::Instant;

/// Maximum sitemap index nesting followed
const MAX_SITEMAP_DEPTH: usize = 2;

const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

/// Locations listed in one sitemap document
#[derive(Debug, Default, PartialEq)]
pub struct SitemapEntries {
    /// `<loc>` values of a `<urlset>`
    pub pages: Vec<String>,
    /// `<loc>` values of a `<sitemapindex>`
    pub sitemaps: Vec<String>,
}

/// Parses a sitemap or sitemap index document
///
/// Entries whose `<loc>` is not an absolute URL are skipped.
pub fn parse_sitemap(content: &str) -> SitemapEntries {
    let mut entries = SitemapEntries::default();
    let reader = SiteMapReader::new(Cursor::new(expand_cdata(content).into_bytes()));

    for entity in reader {
        match entity {
            SiteMapEntity::Url(url_entry) => {
                if let Some(url) = url_entry.loc.get_url() {
                    entries.pages.push(url.to_string());
                }
            }
            SiteMapEntity::SiteMap(sitemap_entry) => {
                if let Some(url) = sitemap_entry.loc.get_url() {
                    entries.sitemaps.push(url.to_string());
                }
            }
            SiteMapEntity::Err(e) => {
                tracing::debug!("Malformed sitemap: {:?}", e);
                break;
            }
        }
    }
    entries
}

/// Rewrites CDATA sections as escaped character data
///
/// The sitemap reader only collects plain text inside `<loc>`.
fn expand_cdata(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut rest = content;

    while let Some(start) = rest.find(CDATA_OPEN) {
        out.push_str(&rest[..start]);
        let inner = &rest[start + CDATA_OPEN.len()..];
        let Some(end) = inner.find(CDATA_CLOSE) else {
            // Unterminated; leave it for the reader to reject
            out.push_str(&rest[start..]);
            return out;
        };
        for c in inner[..end].chars() {
            match c {
                '&' => out.push_str("&amp;"),
                '<' => out.push_str("&lt;"),
                '>' => out.push_str("&gt;"),
                _ => out.push(c),
            }
        }
        rest = &inner[end + CDATA_CLOSE.len()..];
    }
    out.push_str(rest);
    out
}

/// Resolves a `Sitemap:` value against the domain root
///
/// Absolute URLs are taken as-is; anything else is treated as a path on the
/// domain.
pub fn resolve_sitemap_ref(origin: &CanonicalUrl, reference: &str) -> Option<CanonicalUrl> {
    if reference.starts_with("http://") || reference.starts_with("https://") {
        return CanonicalUrl::parse(reference).ok();
    }
    if reference.starts_with('/') {
        Some(origin.with_path(reference))
    } else {
        Some(origin.relative_to(reference))
    }
}

/// Resolves `reference`, keeping it only if it lives on `origin`'s domain
fn same_domain_sitemap(origin: &CanonicalUrl, reference: &str) -> Option<CanonicalUrl> {
    let url = resolve_sitemap_ref(origin, reference)?;
    if url.same_domain(origin) {
        Some(url)
    } else {
        tracing::debug!(domain = %origin, sitemap = %url, "Skipping sitemap on another domain");
        None
    }
}

/// Fetches the given sitemaps and returns the same-domain page paths they list
///
/// Each download waits out the domain's crawl delay like a page GET.
pub async fn collect_sitemap_paths(
    fetcher: &dyn Fetcher,
    domain: &DomainRecord,
    references: &[String],
) -> Vec<String> {
    let origin = domain.origin();
    let mut paths = Vec::new();
    let mut frontier: Vec<(CanonicalUrl, usize)> = references
        .iter()
        .filter_map(|r| same_domain_sitemap(origin, r))
        .map(|url| (url, 1))
        .collect();

    while let Some((sitemap_url, depth)) = frontier.pop() {
        while let Some(wait) = domain.reserve_fetch(Instant::now()) {
            tokio::time::sleep(wait).await;
        }

        let response = match fetcher.fetch(&sitemap_url, Method::Get, None).await {
            Ok(response) if response.status == 200 && response.final_url.same_domain(origin) => {
                response
            }
            Ok(response) => {
                tracing::debug!(url = %sitemap_url, status = response.status, "Sitemap unavailable");
                continue;
            }
            Err(e) => {
                tracing::debug!(url = %sitemap_url, "Sitemap fetch failed: {}", e);
                continue;
            }
        };

        let body = response.body.unwrap_or_default();
        let entries = parse_sitemap(&String::from_utf8_lossy(&body));

        for page in entries.pages {
            match CanonicalUrl::parse(&page) {
                Ok(url) if url.same_domain(origin) => paths.push(url.path().to_string()),
                Ok(_) => {}
                Err(e) => tracing::debug!("Skipping sitemap entry {}: {}", page, e),
            }
        }

        if depth < MAX_SITEMAP_DEPTH {
            for nested in entries.sitemaps {
                if let Some(url) = same_domain_sitemap(origin, &nested) {
                    frontier.push((url, depth + 1));
                }
            }
        }
    }

    paths
}
