//! Crawl progress summaries
//!
//! The master logs a [`CrawlProgress`] line periodically; the `stats`
//! command prints the same figures for a saved checkpoint.

use crate::master::checkpoint::Checkpoint;
use crate::state::SeenCounts;
use std::fmt;

/// Frontier totals at one point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlProgress {
    pub domains: usize,
    /// Dispatched to a worker, not yet reported done
    pub assigned: usize,
    pub done: usize,
    /// Discoveries received but not yet partitioned
    pub pending_discoveries: usize,
    /// URLs sent to workers since this master started
    pub dispatched: u64,
}

impl CrawlProgress {
    pub fn new(counts: SeenCounts, pending_discoveries: usize, dispatched: u64) -> Self {
        Self {
            domains: counts.domains,
            assigned: counts.assigned,
            done: counts.done,
            pending_discoveries,
            dispatched,
        }
    }

    /// Figures recorded in a checkpoint; live-only counters are zero
    pub fn from_checkpoint(checkpoint: &Checkpoint) -> Self {
        let mut progress = Self {
            domains: checkpoint.seen.len(),
            ..Self::default()
        };
        for paths in checkpoint.seen.values() {
            for done in paths.values() {
                if *done {
                    progress.done += 1;
                } else {
                    progress.assigned += 1;
                }
            }
        }
        progress
    }

    pub fn total(&self) -> usize {
        self.assigned + self.done
    }

    /// Share of seen paths that are done, in percent
    pub fn completion(&self) -> f64 {
        if self.total() == 0 {
            0.0
        } else {
            (self.done as f64 / self.total() as f64) * 100.0
        }
    }
}

impl fmt::Display for CrawlProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} domains, {} paths seen, {} done ({:.1}%), {} in flight, {} awaiting partition",
            self.domains,
            self.total(),
            self.done,
            self.completion(),
            self.assigned,
            self.pending_discoveries
        )
    }
}

/// Prints a checkpoint summary to stdout
pub fn print_checkpoint_summary(checkpoint: &Checkpoint) {
    let progress = CrawlProgress::from_checkpoint(checkpoint);

    println!("=== Crawl Checkpoint ===\n");
    println!("Overview:");
    println!("  Crawl started: {}", checkpoint.crawl_time.to_rfc3339());
    println!("  Saved at: {}", checkpoint.saved_at.to_rfc3339());
    println!("  Generation: {}", checkpoint.generation);
    println!();

    println!("Frontier:");
    println!("  Domains: {}", progress.domains);
    println!("  Paths seen: {}", progress.total());
    println!("  Done: {} ({:.1}%)", progress.done, progress.completion());
    println!("  Still assigned: {}", progress.assigned);
    println!();

    // Busiest domains first
    let mut by_domain: Vec<(&String, usize, usize)> = checkpoint
        .seen
        .iter()
        .map(|(domain, paths)| {
            let done = paths.values().filter(|d| **d).count();
            (domain, paths.len(), done)
        })
        .collect();
    by_domain.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    if !by_domain.is_empty() {
        println!("Domains:");
        for (domain, seen, done) in by_domain.iter().take(20) {
            println!("  {}: {}/{} done", domain, done, seen);
        }
        if by_domain.len() > 20 {
            println!("  ... and {} more", by_domain.len() - 20);
        }
        println!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::SeenState;
    use chrono::Utc;

    #[test]
    fn test_progress_from_checkpoint() {
        let seen = SeenState::new();
        seen.assign("http://a.com/", "/");
        seen.assign("http://a.com/", "/x");
        seen.mark_done("http://a.com/", "/");
        seen.assign("http://b.com/", "/");

        let progress = CrawlProgress::from_checkpoint(&Checkpoint::capture(&seen, Utc::now(), 1));
        assert_eq!(progress.domains, 2);
        assert_eq!(progress.done, 1);
        assert_eq!(progress.assigned, 2);
        assert!((progress.completion() - 33.33).abs() < 0.1);
    }

    #[test]
    fn test_display() {
        let progress = CrawlProgress {
            domains: 2,
            assigned: 1,
            done: 3,
            pending_discoveries: 5,
            dispatched: 4,
        };
        assert_eq!(
            progress.to_string(),
            "2 domains, 4 paths seen, 3 done (75.0%), 1 in flight, 5 awaiting partition"
        );
    }

    #[test]
    fn test_empty_completion() {
        assert_eq!(CrawlProgress::default().completion(), 0.0);
    }
}
