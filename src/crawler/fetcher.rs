//! HTTP fetcher implementation
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - Conditional HEAD probes and GET fetches
//! - Manual redirect following with a hop limit
//! - Body size capping
//! - Error classification (connectivity vs. HTTP status)

use crate::config::{Config, UserAgentConfig};
use crate::url::CanonicalUrl;
use crate::UrlError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE, IF_MODIFIED_SINCE, LOCATION};
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// HTTP method used by the crawler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Head,
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
        }
    }
}

/// Errors that prevent a response from being produced at all
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Connection failed for {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Request timed out for {url}")]
    Timeout { url: String },

    #[error("Body of {url} exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("Invalid redirect from {url} to '{location}'")]
    InvalidRedirect { url: String, location: String },

    #[error("HTTP error for {url}: {message}")]
    Http { url: String, message: String },

    #[error("URL error: {0}")]
    Url(#[from] UrlError),
}

/// A completed HTTP exchange after redirects were followed
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub headers: HeaderMap,
    /// Present for GET responses only
    pub body: Option<Vec<u8>>,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub redirect_count: u32,
    pub final_url: CanonicalUrl,
}

impl FetchResponse {
    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::OK.as_u16()
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == StatusCode::NOT_MODIFIED.as_u16()
    }

    /// Lowercased media type without parameters, e.g. `text/html`
    pub fn media_type(&self) -> Option<String> {
        self.content_type.as_deref().map(|ct| {
            ct.split(';')
                .next()
                .unwrap_or("")
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// True for HTML and the XML family (`text/xml`, `application/xml`, `*+xml`)
    pub fn is_markup(&self) -> bool {
        match self.media_type() {
            Some(media) => {
                media == "text/html"
                    || media == "text/xml"
                    || media == "application/xml"
                    || media.ends_with("+xml")
            }
            None => false,
        }
    }

    /// False when the declared length exceeds `limit`; unknown length passes
    pub fn within_size(&self, limit: u64) -> bool {
        self.content_length.map(|len| len <= limit).unwrap_or(true)
    }

    /// Where an unfollowed 3xx points, resolved against the URL that sent it
    pub fn redirect_target(&self) -> Option<CanonicalUrl> {
        if !is_followable(StatusCode::from_u16(self.status).ok()?) {
            return None;
        }
        let location = self.headers.get(LOCATION)?.to_str().ok()?;
        let joined = self.final_url.to_url().ok()?.join(location).ok()?;
        CanonicalUrl::parse(joined.as_str()).ok()
    }
}

/// The network fetch capability consumed by the crawl pipeline
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Requests `url`, following redirects up to the configured hop limit
    async fn fetch(
        &self,
        url: &CanonicalUrl,
        method: Method,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, FetchError>;

    /// Requests exactly `url`; a redirect comes back as the 3xx response
    async fn fetch_once(
        &self,
        url: &CanonicalUrl,
        method: Method,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, FetchError>;
}

/// Builds an HTTP client with proper configuration
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use sumi_swarm::config::UserAgentConfig;
/// use sumi_swarm::crawler::build_http_client;
///
/// let config = UserAgentConfig {
///     crawler_name: "SumiSwarm".to_string(),
///     crawler_version: "1.0".to_string(),
///     contact_url: "https://example.com/about".to_string(),
///     contact_email: "admin@example.com".to_string(),
/// };
///
/// let client = build_http_client(&config, Duration::from_secs(6)).unwrap();
/// ```
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(config.header_value())
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(Policy::none()) // Handle redirects manually
        .gzip(true)
        .brotli(true)
        .build()
}

/// Formats a timestamp as an HTTP date (IMF-fixdate)
pub fn http_date(time: DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn is_followable(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

fn classify(url: &CanonicalUrl, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else if error.is_connect() {
        FetchError::Connect {
            url: url.to_string(),
            message: error.to_string(),
        }
    } else {
        FetchError::Http {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

/// [`Fetcher`] backed by `reqwest`
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_redirects: u32,
    max_content_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = build_http_client(
            &config.user_agent,
            Duration::from_secs(config.crawler.request_timeout_secs),
        )?;
        Ok(Self::from_client(
            client,
            config.crawler.max_redirects,
            config.crawler.max_content_bytes,
        ))
    }

    pub fn from_client(client: Client, max_redirects: u32, max_content_bytes: u64) -> Self {
        Self {
            client,
            max_redirects,
            max_content_bytes,
        }
    }

    async fn finish(
        &self,
        mut response: reqwest::Response,
        method: Method,
        final_url: CanonicalUrl,
        redirect_count: u32,
    ) -> Result<FetchResponse, FetchError> {
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let body = match method {
            Method::Head => None,
            Method::Get => {
                if content_length.map(|len| len > self.max_content_bytes).unwrap_or(false) {
                    return Err(FetchError::TooLarge {
                        url: final_url.to_string(),
                        limit: self.max_content_bytes,
                    });
                }

                let mut body = Vec::new();
                while let Some(chunk) = response.chunk().await.map_err(|e| classify(&final_url, e))? {
                    if (body.len() + chunk.len()) as u64 > self.max_content_bytes {
                        return Err(FetchError::TooLarge {
                            url: final_url.to_string(),
                            limit: self.max_content_bytes,
                        });
                    }
                    body.extend_from_slice(&chunk);
                }
                Some(body)
            }
        };

        Ok(FetchResponse {
            status,
            headers,
            body,
            content_type,
            content_length,
            redirect_count,
            final_url,
        })
    }
}

impl HttpFetcher {
    async fn request(
        &self,
        url: &CanonicalUrl,
        method: Method,
        if_modified_since: Option<DateTime<Utc>>,
        max_redirects: u32,
    ) -> Result<FetchResponse, FetchError> {
        let mut current = url.clone();
        let mut redirects = 0;

        loop {
            let target = current.to_url()?;
            let mut request = self.client.request(method.into(), target.clone());
            if let Some(since) = if_modified_since {
                request = request.header(IF_MODIFIED_SINCE, http_date(since));
            }

            let response = request.send().await.map_err(|e| classify(&current, e))?;
            let status = response.status();

            if is_followable(status) && redirects < max_redirects {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);

                if let Some(location) = location {
                    let next = target
                        .join(&location)
                        .ok()
                        .and_then(|joined| CanonicalUrl::parse(joined.as_str()).ok())
                        .ok_or_else(|| FetchError::InvalidRedirect {
                            url: current.to_string(),
                            location: location.clone(),
                        })?;

                    tracing::trace!(from = %current, to = %next, "Following redirect");
                    redirects += 1;
                    current = next;
                    continue;
                }
            }

            return self.finish(response, method, current, redirects).await;
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        url: &CanonicalUrl,
        method: Method,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, FetchError> {
        self.request(url, method, if_modified_since, self.max_redirects)
            .await
    }

    async fn fetch_once(
        &self,
        url: &CanonicalUrl,
        method: Method,
        if_modified_since: Option<DateTime<Utc>>,
    ) -> Result<FetchResponse, FetchError> {
        self.request(url, method, if_modified_since, 0).await
    }
}
