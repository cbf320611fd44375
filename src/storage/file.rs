//! File-backed storage provider.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use async_trait::async_trait;

use super::HistoryStorage;

/// Stores each owner slot as one JSON file under a data directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    data_dir: PathBuf,
}

impl FileStorage {
    /// Create a provider rooted at `data_dir`. The directory is created
    /// lazily on first write.
    #[must_use]
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    /// File path for an owner slot. Owner ids come from an external
    /// identity provider, so path-relevant characters are flattened.
    fn slot_path(&self, owner_key: &str) -> PathBuf {
        let safe: String = owner_key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.data_dir.join(format!("{safe}.json"))
    }
}

#[async_trait]
impl HistoryStorage for FileStorage {
    async fn read(&self, owner_key: &str) -> Result<Option<String>> {
        let path = self.slot_path(owner_key);
        match tokio::fs::read_to_string(&path).await {
            Ok(payload) => Ok(Some(payload)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("reading {}", path.display())),
        }
    }

    async fn write(&self, owner_key: &str, payload: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .with_context(|| format!("creating {}", self.data_dir.display()))?;
        let path = self.slot_path(owner_key);
        tokio::fs::write(&path, payload)
            .await
            .with_context(|| format!("writing {}", path.display()))
    }

    async fn clear(&self, owner_key: &str) -> Result<()> {
        let path = self.slot_path(owner_key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}
