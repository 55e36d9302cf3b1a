//! URL identity for Sumi-Swarm
//!
//! Every URL that crosses a task or process boundary is a [`CanonicalUrl`];
//! its string form is the hash and equality key everywhere else.

mod canonical;
mod domain;

pub use canonical::CanonicalUrl;
pub use domain::DomainKey;
