use crate::robots::RobotsPolicy;
use crate::url::{CanonicalUrl, DomainKey};
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

/// Where a domain's robots policy stands
#[derive(Debug, Clone)]
pub enum PolicyState {
    /// robots.txt not resolved yet; nothing may be fetched
    Loading,
    /// Policy resolved; this never changes again
    Ready(RobotsPolicy),
}

/// FIFO of paths with O(1) membership
#[derive(Debug, Default)]
struct PathQueue {
    order: VecDeque<String>,
    members: HashSet<String>,
}

impl PathQueue {
    fn push(&mut self, path: &str) -> bool {
        if !self.members.insert(path.to_string()) {
            return false;
        }
        self.order.push_back(path.to_string());
        true
    }

    fn pop(&mut self) -> Option<String> {
        let path = self.order.pop_front()?;
        self.members.remove(&path);
        Some(path)
    }

    fn contains(&self, path: &str) -> bool {
        self.members.contains(path)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn retain(&mut self, mut keep: impl FnMut(&str) -> bool) -> usize {
        let before = self.order.len();
        let members = &mut self.members;
        self.order.retain(|path| {
            let kept = keep(path);
            if !kept {
                members.remove(path);
            }
            kept
        });
        before - self.order.len()
    }
}

#[derive(Debug)]
struct DomainInner {
    policy: PolicyState,
    probe: PathQueue,
    fetch: PathQueue,
    last_fetch: Option<Instant>,
}

/// Per-domain politeness state on a worker
///
/// Holds the robots policy, the probe (HEAD) and fetch (GET) queues and the
/// time of the last GET. Every operation takes the record's lock, so a
/// fetch-task dequeue and an assignment-receiver enqueue never interleave.
#[derive(Debug)]
pub struct DomainRecord {
    origin: CanonicalUrl,
    inner: Mutex<DomainInner>,
}

impl DomainRecord {
    /// Creates a record in the `Loading` state for the domain of `url`
    pub fn new(url: &CanonicalUrl) -> Self {
        Self {
            origin: url.origin(),
            inner: Mutex::new(DomainInner {
                policy: PolicyState::Loading,
                probe: PathQueue::default(),
                fetch: PathQueue::default(),
                last_fetch: None,
            }),
        }
    }

    /// The domain root, e.g. `http://example.com/`
    pub fn origin(&self) -> &CanonicalUrl {
        &self.origin
    }

    pub fn key(&self) -> DomainKey {
        self.origin.domain()
    }

    /// Absolute URL for a path on this domain
    pub fn url_for(&self, path: &str) -> CanonicalUrl {
        self.origin.with_path(path)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.lock().policy, PolicyState::Ready(_))
    }

    pub fn policy(&self) -> Option<RobotsPolicy> {
        match &self.inner.lock().policy {
            PolicyState::Ready(policy) => Some(policy.clone()),
            PolicyState::Loading => None,
        }
    }

    /// Installs the robots policy, transitioning `Loading -> Ready`
    ///
    /// Probe paths queued while loading that the policy disallows are
    /// dropped. Returns false if the policy was already resolved; the first
    /// resolution wins.
    pub fn resolve_policy(&self, policy: RobotsPolicy) -> bool {
        let mut inner = self.inner.lock();
        if matches!(inner.policy, PolicyState::Ready(_)) {
            return false;
        }

        let purged = inner.probe.retain(|path| policy.approved(path));
        if purged > 0 {
            tracing::debug!(domain = %self.origin, purged, "Dropped queued paths disallowed by robots.txt");
        }
        inner.policy = PolicyState::Ready(policy);
        true
    }

    /// Robots approval for `path`; optimistic while the policy is loading
    pub fn approved(&self, path: &str) -> bool {
        match &self.inner.lock().policy {
            PolicyState::Ready(policy) => policy.approved(path),
            PolicyState::Loading => true,
        }
    }

    /// Queues `path` for a HEAD probe
    ///
    /// Rejected when it is already queued on either queue or when a resolved
    /// policy disallows it.
    pub fn enqueue_probe(&self, path: &str) -> bool {
        let mut inner = self.inner.lock();
        if inner.probe.contains(path) || inner.fetch.contains(path) {
            return false;
        }
        if let PolicyState::Ready(policy) = &inner.policy {
            if !policy.approved(path) {
                return false;
            }
        }
        inner.probe.push(path)
    }

    /// Queues `path` for a GET; duplicates are ignored
    pub fn enqueue_fetch(&self, path: &str) -> bool {
        self.inner.lock().fetch.push(path)
    }

    /// Next probe URL, available only once the policy is resolved
    pub fn dequeue_probe(&self) -> Option<CanonicalUrl> {
        let mut inner = self.inner.lock();
        if !matches!(inner.policy, PolicyState::Ready(_)) {
            return None;
        }
        let path = inner.probe.pop()?;
        Some(self.url_for(&path))
    }

    /// Next fetch URL if the crawl delay since the last GET has elapsed
    ///
    /// Taking a URL stamps `now` as the last fetch time, so the check and the
    /// stamp are one atomic step.
    pub fn dequeue_fetch(&self, now: Instant) -> Option<CanonicalUrl> {
        let mut inner = self.inner.lock();
        let delay = match &inner.policy {
            PolicyState::Ready(policy) => policy.crawl_delay(),
            PolicyState::Loading => return None,
        };
        if inner.fetch.is_empty() {
            return None;
        }
        if let Some(last) = inner.last_fetch {
            if now.saturating_duration_since(last) < delay {
                return None;
            }
        }

        let path = inner.fetch.pop()?;
        inner.last_fetch = Some(now);
        Some(self.url_for(&path))
    }

    /// Claims the crawl-delay slot for a GET outside the fetch queue
    ///
    /// Returns `None` and stamps `now` as the last fetch when a GET may go
    /// out immediately, otherwise the time left to wait. Sitemap downloads
    /// go through here so they share the spacing of page fetches.
    pub fn reserve_fetch(&self, now: Instant) -> Option<Duration> {
        let mut inner = self.inner.lock();
        let delay = match &inner.policy {
            PolicyState::Ready(policy) => policy.crawl_delay(),
            PolicyState::Loading => Duration::ZERO,
        };
        if let Some(last) = inner.last_fetch {
            let elapsed = now.saturating_duration_since(last);
            if elapsed < delay {
                return Some(delay - elapsed);
            }
        }
        inner.last_fetch = Some(now);
        None
    }

    /// Time until the next GET is allowed; `None` when allowed now
    pub fn time_until_next_fetch(&self, now: Instant) -> Option<Duration> {
        let inner = self.inner.lock();
        let PolicyState::Ready(policy) = &inner.policy else {
            return None;
        };
        let last = inner.last_fetch?;
        let elapsed = now.saturating_duration_since(last);
        let delay = policy.crawl_delay();
        if elapsed < delay {
            Some(delay - elapsed)
        } else {
            None
        }
    }

    /// (probe, fetch) queue lengths
    pub fn queued(&self) -> (usize, usize) {
        let inner = self.inner.lock();
        (inner.probe.len(), inner.fetch.len())
    }
}
