//! Durable snapshots of the master's seen ledger
//!
//! Checkpoints live under `<mountpath>/state/` as
//! `state-saved-<crawl-millis>-<slot>`, alternating between slots 1 and 2
//! so an interrupted write never clobbers the last good snapshot. Each file
//! is written to a temporary sibling and renamed into place.

use crate::state::{SeenSnapshot, SeenState};
use crate::url::CanonicalUrl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

const SLOTS: [u8; 2] = [1, 2];

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("No checkpoint for crawl {crawl_millis} under {}", .dir.display())]
    NotFound { dir: PathBuf, crawl_millis: i64 },

    #[error("Checkpoint IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed checkpoint: {0}")]
    Serde(#[from] serde_json::Error),
}

/// A saved copy of the seen ledger for one crawl
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub crawl_time: DateTime<Utc>,
    /// Increases with every write; picks the newer of the two slots
    pub generation: u64,
    pub saved_at: DateTime<Utc>,
    pub seen: SeenSnapshot,
}

impl Checkpoint {
    pub fn capture(seen: &SeenState, crawl_time: DateTime<Utc>, generation: u64) -> Self {
        Self {
            crawl_time,
            generation,
            saved_at: Utc::now(),
            seen: seen.snapshot(),
        }
    }

    pub async fn load(path: &Path) -> Result<Self, CheckpointError> {
        let bytes = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Rebuilds the live ledger from this snapshot
    pub fn restore(&self) -> SeenState {
        SeenState::from_snapshot(&self.seen)
    }

    /// URLs assigned before the checkpoint but never reported done
    ///
    /// Entries whose domain or path no longer parse are skipped.
    pub fn resume_targets(&self) -> Vec<CanonicalUrl> {
        self.seen
            .iter()
            .filter_map(|(domain, paths)| match CanonicalUrl::parse(domain) {
                Ok(origin) => Some((origin, paths)),
                Err(e) => {
                    tracing::warn!("Skipping checkpointed domain '{}': {}", domain, e);
                    None
                }
            })
            .flat_map(|(origin, paths)| {
                paths
                    .iter()
                    .filter(|(_, done)| !**done)
                    .map(move |(path, _)| origin.with_path(path))
            })
            .collect()
    }
}

/// `<mountpath>/state`
pub fn checkpoint_dir(mountpath: &Path) -> PathBuf {
    mountpath.join("state")
}

pub fn checkpoint_path(mountpath: &Path, crawl_millis: i64, slot: u8) -> PathBuf {
    checkpoint_dir(mountpath).join(format!("state-saved-{}-{}", crawl_millis, slot))
}

/// Loads the newest readable checkpoint of a crawl
///
/// A slot that is missing or unreadable is skipped; if neither slot yields
/// a checkpoint the result is [`CheckpointError::NotFound`].
pub async fn load_latest(mountpath: &Path, crawl_millis: i64) -> Result<Checkpoint, CheckpointError> {
    let mut latest: Option<Checkpoint> = None;

    for slot in SLOTS {
        let path = checkpoint_path(mountpath, crawl_millis, slot);
        match Checkpoint::load(&path).await {
            Ok(checkpoint) => {
                if latest
                    .as_ref()
                    .map(|l| checkpoint.generation > l.generation)
                    .unwrap_or(true)
                {
                    latest = Some(checkpoint);
                }
            }
            Err(CheckpointError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), "Ignoring unreadable checkpoint: {}", e),
        }
    }

    latest.ok_or_else(|| CheckpointError::NotFound {
        dir: checkpoint_dir(mountpath),
        crawl_millis,
    })
}

/// Writes successive checkpoints of one crawl, alternating slots
#[derive(Debug)]
pub struct CheckpointWriter {
    mountpath: PathBuf,
    crawl_time: DateTime<Utc>,
    generation: u64,
}

impl CheckpointWriter {
    pub fn new(mountpath: impl Into<PathBuf>, crawl_time: DateTime<Utc>) -> Self {
        Self {
            mountpath: mountpath.into(),
            crawl_time,
            generation: 0,
        }
    }

    /// Continues the generation sequence of a resumed crawl
    pub fn resuming(mountpath: impl Into<PathBuf>, previous: &Checkpoint) -> Self {
        Self {
            mountpath: mountpath.into(),
            crawl_time: previous.crawl_time,
            generation: previous.generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn next_slot(&self) -> u8 {
        SLOTS[(self.generation % 2) as usize]
    }

    /// Snapshots `seen` into the next slot and returns the file written
    pub async fn write(&mut self, seen: &SeenState) -> Result<PathBuf, CheckpointError> {
        let generation = self.generation + 1;
        let checkpoint = Checkpoint::capture(seen, self.crawl_time, generation);
        let bytes = serde_json::to_vec(&checkpoint)?;

        let target = checkpoint_path(
            &self.mountpath,
            self.crawl_time.timestamp_millis(),
            self.next_slot(),
        );
        let dir = checkpoint_dir(&self.mountpath);
        tokio::fs::create_dir_all(&dir).await?;

        let temp = dir.join(format!(".checkpoint-{}.tmp", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&temp, &bytes).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }

        self.generation = generation;
        tracing::debug!(
            path = %target.display(),
            generation,
            bytes = bytes.len(),
            "Checkpoint written"
        );
        Ok(target)
    }
}
