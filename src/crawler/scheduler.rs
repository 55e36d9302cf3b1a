//! Round-robin scheduling over a worker's live domains
//!
//! Fetch tasks pop a domain, try one unit of work on it and push it back,
//! so every domain gets a turn and no domain is polled continuously.

use crate::state::DomainRecord;
use crossbeam_queue::SegQueue;
use std::sync::Arc;

/// Lock-free rotation of domain records
#[derive(Debug, Default)]
pub struct DomainRotation {
    queue: SegQueue<Arc<DomainRecord>>,
}

impl DomainRotation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a domain to the back of the rotation
    pub fn push(&self, domain: Arc<DomainRecord>) {
        self.queue.push(domain);
    }

    /// Takes the domain at the front; the caller must push it back
    pub fn pop(&self) -> Option<Arc<DomainRecord>> {
        self.queue.pop()
    }

    /// Domains currently in rotation (excludes those taken by a task)
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Counts consecutive idle turns to decide when a fetch task should sleep
///
/// A task sleeps only after a full lap over the rotation found no work.
#[derive(Debug, Default)]
pub struct IdleTracker {
    misses: usize,
}

impl IdleTracker {
    /// Records the outcome of one turn; returns true when the task should back off
    pub fn record(&mut self, did_work: bool, rotation_len: usize) -> bool {
        if did_work {
            self.misses = 0;
            return false;
        }
        self.misses += 1;
        if self.misses >= rotation_len {
            self.misses = 0;
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url::CanonicalUrl;

    fn domain(raw: &str) -> Arc<DomainRecord> {
        Arc::new(DomainRecord::new(&CanonicalUrl::parse(raw).unwrap()))
    }

    #[test]
    fn test_rotation_round_robin() {
        let rotation = DomainRotation::new();
        rotation.push(domain("http://a.com/"));
        rotation.push(domain("http://b.com/"));

        let mut order = Vec::new();
        for _ in 0..4 {
            let next = rotation.pop().unwrap();
            order.push(next.origin().host().to_string());
            rotation.push(next);
        }
        assert_eq!(order, vec!["a.com", "b.com", "a.com", "b.com"]);
        assert_eq!(rotation.len(), 2);
    }

    #[test]
    fn test_idle_tracker_waits_for_full_lap() {
        let mut tracker = IdleTracker::default();
        assert!(!tracker.record(false, 2));
        assert!(tracker.record(false, 2));

        assert!(!tracker.record(false, 2));
        assert!(!tracker.record(true, 2));
        assert!(!tracker.record(false, 2));
    }

    #[test]
    fn test_idle_tracker_empty_rotation() {
        let mut tracker = IdleTracker::default();
        assert!(tracker.record(false, 0));
    }
}
