use crate::state::PathState;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Serializable form of the ledger: domain origin -> path -> done flag
pub type SeenSnapshot = BTreeMap<String, BTreeMap<String, bool>>;

/// The master's ledger of every path ever dispatched, keyed by domain
///
/// Both levels are concurrent maps so the transmit and done loops can update
/// it without a global lock. Creating the per-domain map is an atomic
/// get-or-create, so two discoveries racing on a new domain share one map.
#[derive(Debug, Default)]
pub struct SeenState {
    domains: DashMap<String, Arc<DashMap<String, PathState>>>,
}

/// Ledger totals for progress reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeenCounts {
    pub domains: usize,
    pub assigned: usize,
    pub done: usize,
}

impl SeenState {
    pub fn new() -> Self {
        Self::default()
    }

    fn paths_for(&self, domain: &str) -> Arc<DashMap<String, PathState>> {
        if let Some(paths) = self.domains.get(domain) {
            return paths.value().clone();
        }
        self.domains
            .entry(domain.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Records `path` as assigned unless it has been seen before
    ///
    /// Returns true exactly once per (domain, path); the caller that gets
    /// `true` is the one that dispatches it.
    pub fn assign(&self, domain: &str, path: &str) -> bool {
        let paths = self.paths_for(domain);
        let assigned = match paths.entry(path.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(PathState::Assigned);
                true
            }
            Entry::Occupied(_) => false,
        };
        assigned
    }

    /// Marks `path` done
    ///
    /// A completion for a path never assigned (e.g. a redirect source
    /// reported by a worker) is recorded as done directly. Returns false when
    /// the path was already done.
    pub fn mark_done(&self, domain: &str, path: &str) -> bool {
        let paths = self.paths_for(domain);
        let changed = match paths.entry(path.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(PathState::Done);
                true
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().can_transition_to(PathState::Done) {
                    occupied.insert(PathState::Done);
                    true
                } else {
                    false
                }
            }
        };
        changed
    }

    pub fn state_of(&self, domain: &str, path: &str) -> Option<PathState> {
        self.domains
            .get(domain)
            .and_then(|paths| paths.get(path).map(|state| *state))
    }

    /// (domain, path) pairs still awaiting completion, in sorted order
    pub fn pending(&self) -> Vec<(String, String)> {
        let mut pending: Vec<(String, String)> = self
            .domains
            .iter()
            .flat_map(|domain| {
                let origin = domain.key().clone();
                domain
                    .value()
                    .iter()
                    .filter(|entry| !entry.value().is_done())
                    .map(|entry| (origin.clone(), entry.key().clone()))
                    .collect::<Vec<_>>()
            })
            .collect();
        pending.sort();
        pending
    }

    pub fn counts(&self) -> SeenCounts {
        let mut counts = SeenCounts {
            domains: self.domains.len(),
            ..SeenCounts::default()
        };
        for domain in self.domains.iter() {
            for entry in domain.value().iter() {
                if entry.value().is_done() {
                    counts.done += 1;
                } else {
                    counts.assigned += 1;
                }
            }
        }
        counts
    }

    /// Point-in-time copy for checkpointing
    pub fn snapshot(&self) -> SeenSnapshot {
        self.domains
            .iter()
            .map(|domain| {
                let paths = domain
                    .value()
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().as_flag()))
                    .collect();
                (domain.key().clone(), paths)
            })
            .collect()
    }

    pub fn from_snapshot(snapshot: &SeenSnapshot) -> Self {
        let state = Self::new();
        for (domain, paths) in snapshot {
            let map: DashMap<String, PathState> = paths
                .iter()
                .map(|(path, done)| (path.clone(), PathState::from_flag(*done)))
                .collect();
            state.domains.insert(domain.clone(), Arc::new(map));
        }
        state
    }
}
