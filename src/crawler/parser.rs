//! Link extraction from fetched documents
//!
//! # Link Extraction Rules
//!
//! **Include:**
//! - `<a href="...">` anywhere in the document
//! - `<link rel="canonical" href="...">`
//!
//! **Exclude:**
//! - `<a href="..." download>`
//! - `javascript:`, `mailto:`, `tel:` and `data:` links
//! - Same-page fragments (`#section`)
//! - Anything that does not resolve to an http(s) URL with a host
//!
//! Relative, absolute and protocol-relative hrefs are resolved against the
//! page's own URL. Fragments are dropped and duplicates collapsed, keeping
//! first-seen order.

use crate::url::CanonicalUrl;
use scraper::{Html, Selector};
use std::collections::HashSet;
use url::Url;

const SKIPPED_SCHEMES: [&str; 4] = ["javascript:", "mailto:", "tel:", "data:"];

/// Extracts outbound links from a document body
///
/// # Example
///
/// ```
/// use sumi_swarm::crawler::extract_links;
/// use sumi_swarm::url::CanonicalUrl;
///
/// let base = CanonicalUrl::parse("http://example.com/docs/index.html").unwrap();
/// let html = br#"<a href="intro.html">Intro</a> <a href="//cdn.example.org/x">CDN</a>"#;
/// let links: Vec<String> = extract_links(html, &base).iter().map(|u| u.to_string()).collect();
/// assert_eq!(links, vec!["http://example.com/docs/intro.html", "http://cdn.example.org/x"]);
/// ```
pub fn extract_links(body: &[u8], base: &CanonicalUrl) -> Vec<CanonicalUrl> {
    let Ok(base_url) = base.to_url() else {
        return Vec::new();
    };
    let html = String::from_utf8_lossy(body);
    let document = Html::parse_document(&html);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut push = |href: &str| {
        if let Some(url) = resolve_link(href, &base_url) {
            if seen.insert(url.as_str().to_string()) {
                links.push(url);
            }
        }
    };

    if let Ok(a_selector) = Selector::parse("a[href]") {
        for element in document.select(&a_selector) {
            if element.value().attr("download").is_some() {
                continue;
            }
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    if let Ok(canonical_selector) = Selector::parse("link[rel='canonical'][href]") {
        for element in document.select(&canonical_selector) {
            if let Some(href) = element.value().attr("href") {
                push(href);
            }
        }
    }

    links
}

/// Resolves a link href to a canonical absolute URL
///
/// Returns None if the link should be excluded.
fn resolve_link(href: &str, base_url: &Url) -> Option<CanonicalUrl> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lowered = href.to_ascii_lowercase();
    if SKIPPED_SCHEMES.iter().any(|scheme| lowered.starts_with(scheme)) {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    CanonicalUrl::parse(absolute.as_str()).ok()
}
