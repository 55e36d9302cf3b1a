/// Path state definitions for the master's crawl ledger
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a discovered path stands in the crawl
///
/// Transitions only go forward: `Assigned -> Done`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathState {
    /// Handed to a worker, no completion reported yet
    Assigned,

    /// A worker reported the probe for this path as finished
    Done,
}

impl PathState {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }

    /// Returns true if moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: PathState) -> bool {
        matches!((self, next), (Self::Assigned, Self::Done))
    }

    /// Checkpoint encoding: `true` for done, `false` for assigned
    pub fn as_flag(&self) -> bool {
        self.is_done()
    }

    pub fn from_flag(done: bool) -> Self {
        if done {
            Self::Done
        } else {
            Self::Assigned
        }
    }
}

impl fmt::Display for PathState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assigned => write!(f, "assigned"),
            Self::Done => write!(f, "done"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions_only_forward() {
        assert!(PathState::Assigned.can_transition_to(PathState::Done));
        assert!(!PathState::Done.can_transition_to(PathState::Assigned));
        assert!(!PathState::Done.can_transition_to(PathState::Done));
        assert!(!PathState::Assigned.can_transition_to(PathState::Assigned));
    }

    #[test]
    fn test_flag_roundtrip() {
        assert!(!PathState::Assigned.as_flag());
        assert!(PathState::Done.as_flag());
        assert_eq!(PathState::from_flag(true), PathState::Done);
        assert_eq!(PathState::from_flag(false), PathState::Assigned);
    }

    #[test]
    fn test_display() {
        assert_eq!(PathState::Assigned.to_string(), "assigned");
        assert_eq!(PathState::Done.to_string(), "done");
    }
}
