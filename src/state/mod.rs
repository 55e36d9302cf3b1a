//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `SeenState`: the master's ledger of dispatched paths and their completion
//! - `PathState`: the state of one dispatched path (assigned or done)
//! - `DomainRecord`: a worker's per-domain politeness queues and robots policy

mod domain_state;
mod path_state;
mod seen_state;

pub use domain_state::{DomainRecord, PolicyState};
pub use path_state::PathState;
pub use seen_state::{SeenCounts, SeenSnapshot, SeenState};
