use crate::url::domain::DomainKey;
use crate::{UrlError, UrlResult};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use url::Url;

/// Canonical identity of a crawlable URL
///
/// The string form is `scheme://host[:port]path` with a lowercased host, the
/// default port (80/443) omitted, the query kept as part of the path and the
/// fragment dropped. Equality and hashing use that string form only.
#[derive(Debug, Clone)]
pub struct CanonicalUrl {
    secure: bool,
    host: String,
    port: u16,
    path: String,
    repr: String,
}

impl CanonicalUrl {
    /// Parses a scheme-qualified URL string
    ///
    /// # Errors
    ///
    /// * `UrlError::Empty` - blank input
    /// * `UrlError::InvalidScheme` - scheme other than `http`/`https`
    /// * `UrlError::MissingDomain` - no hostname could be extracted
    /// * `UrlError::Parse` - anything else the URL parser rejects
    ///
    /// # Examples
    ///
    /// ```
    /// use sumi_swarm::url::CanonicalUrl;
    ///
    /// let url = CanonicalUrl::parse("HTTP://Example.COM:80/a/b?x=1#top").unwrap();
    /// assert_eq!(url.as_str(), "http://example.com/a/b?x=1");
    /// assert_eq!(url.path(), "/a/b?x=1");
    /// ```
    pub fn parse(input: &str) -> UrlResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(UrlError::Empty);
        }

        let url = Url::parse(trimmed).map_err(|e| match e {
            url::ParseError::EmptyHost => UrlError::MissingDomain,
            other => UrlError::Parse(other.to_string()),
        })?;

        let secure = match url.scheme() {
            "http" => false,
            "https" => true,
            other => return Err(UrlError::InvalidScheme(other.to_string())),
        };

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(UrlError::MissingDomain)?;
        let port = url
            .port_or_known_default()
            .unwrap_or(if secure { 443 } else { 80 });

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Self::from_parts(secure, host, port, &path)
    }

    /// Builds a URL from its components
    ///
    /// The host is lowercased and a leading `/` is added to the path when
    /// missing. Fails only when the host is empty.
    pub fn from_parts(secure: bool, host: &str, port: u16, path: &str) -> UrlResult<Self> {
        let host = host.trim().trim_end_matches('/').to_lowercase();
        if host.is_empty() {
            return Err(UrlError::MissingDomain);
        }
        Ok(Self::build(secure, host, port, path))
    }

    fn build(secure: bool, host: String, port: u16, path: &str) -> Self {
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };

        let mut repr = String::with_capacity(host.len() + path.len() + 14);
        repr.push_str(if secure { "https://" } else { "http://" });
        repr.push_str(&host);
        if port != default_port(secure) {
            repr.push(':');
            repr.push_str(&port.to_string());
        }
        repr.push_str(&path);

        Self {
            secure,
            host,
            port,
            path,
            repr,
        }
    }

    /// Same scheme, host and port with a different path
    pub fn with_path(&self, new_path: &str) -> Self {
        Self::build(self.secure, self.host.clone(), self.port, new_path)
    }

    /// Resolves a sibling path by trimming the last segment of this URL's path
    ///
    /// ```
    /// use sumi_swarm::url::CanonicalUrl;
    ///
    /// let base = CanonicalUrl::parse("http://example.com/docs/intro.html?v=2").unwrap();
    /// assert_eq!(base.relative_to("setup.html").path(), "/docs/setup.html");
    /// ```
    pub fn relative_to(&self, segment: &str) -> Self {
        let without_query = self.path.split('?').next().unwrap_or("");
        let dir = match without_query.rfind('/') {
            Some(idx) => &without_query[..idx],
            None => "",
        };

        let path = if segment.starts_with('/') {
            format!("{}{}", dir, segment)
        } else {
            format!("{}/{}", dir, segment)
        };
        self.with_path(&path)
    }

    /// The domain root of this URL (`scheme://host[:port]/`)
    pub fn origin(&self) -> Self {
        self.with_path("/")
    }

    /// The (host, port, secure) identity used for politeness
    pub fn domain(&self) -> DomainKey {
        DomainKey::new(&self.host, self.port, self.secure)
    }

    /// Domain equality: same host, port and scheme, any path
    pub fn same_domain(&self, other: &CanonicalUrl) -> bool {
        self.host == other.host && self.port == other.port && self.secure == other.secure
    }

    pub fn as_str(&self) -> &str {
        &self.repr
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Path including any query string, always starting with `/`
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn scheme(&self) -> &'static str {
        if self.secure {
            "https"
        } else {
            "http"
        }
    }

    /// Converts to a `url::Url` for the HTTP client
    pub fn to_url(&self) -> UrlResult<Url> {
        Url::parse(&self.repr).map_err(|e| UrlError::Parse(e.to_string()))
    }
}

fn default_port(secure: bool) -> u16 {
    if secure {
        443
    } else {
        80
    }
}

impl PartialEq for CanonicalUrl {
    fn eq(&self, other: &Self) -> bool {
        self.repr == other.repr
    }
}

impl Eq for CanonicalUrl {}

impl Hash for CanonicalUrl {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.repr.hash(state);
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl FromStr for CanonicalUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
