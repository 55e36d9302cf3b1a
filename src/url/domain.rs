use std::fmt;

/// Identity of a politeness domain: (host, port, secure)
///
/// Displays as the domain's origin string, e.g. `http://example.com/`, which
/// is also the key used by the master's SeenState and the worker's domain map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainKey {
    host: String,
    port: u16,
    secure: bool,
}

impl DomainKey {
    pub fn new(host: &str, port: u16, secure: bool) -> Self {
        Self {
            host: host.to_lowercase(),
            port,
            secure,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }
}

impl fmt::Display for DomainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scheme = if self.secure { "https" } else { "http" };
        let default = if self.secure { 443 } else { 80 };
        if self.port == default {
            write!(f, "{}://{}/", scheme, self.host)
        } else {
            write!(f, "{}://{}:{}/", scheme, self.host, self.port)
        }
    }
}
