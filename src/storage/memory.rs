//! In-memory storage provider.
//!
//! Backs tests and ephemeral deployments where history should not outlive
//! the process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;

use super::HistoryStorage;

/// Keeps owner slots in a process-local map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slots: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStorage {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStorage for MemoryStorage {
    async fn read(&self, owner_key: &str) -> Result<Option<String>> {
        Ok(self.slots.read().unwrap().get(owner_key).cloned())
    }

    async fn write(&self, owner_key: &str, payload: &str) -> Result<()> {
        self.slots
            .write()
            .unwrap()
            .insert(owner_key.to_string(), payload.to_string());
        Ok(())
    }

    async fn clear(&self, owner_key: &str) -> Result<()> {
        self.slots.write().unwrap().remove(owner_key);
        Ok(())
    }
}
