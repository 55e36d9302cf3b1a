use crate::storage::traits::{StorageError, StorageResult};
use std::path::{Path, PathBuf};

/// Content-addressed body storage in a directory shared by all workers
///
/// Blobs are written to a temporary sibling and renamed into place, so a
/// reader never observes a partial body.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub async fn contains(&self, name: &str) -> bool {
        tokio::fs::try_exists(self.path_of(name))
            .await
            .unwrap_or(false)
    }

    /// Stores `body` under `name`; an existing blob is left untouched
    pub async fn put(&self, name: &str, body: &[u8]) -> StorageResult<()> {
        let target = self.path_of(name);
        if self.contains(name).await {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.root).await?;
        let temp = self
            .root
            .join(format!(".{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&temp, body).await?;
        if let Err(e) = tokio::fs::rename(&temp, &target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn get(&self, name: &str) -> StorageResult<Vec<u8>> {
        match tokio::fs::read(self.path_of(name)).await {
            Ok(body) => Ok(body),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::BlobNotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Names of all stored blobs, sorted; subdirectories are skipped
    pub async fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') && entry.file_type().await?.is_file() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}
