//! Durable key-value storage for history snapshots.
//!
//! The store treats persistence as an opaque slot per owner: a serialized
//! [`HistorySnapshot`](crate::history::HistorySnapshot) goes in, the last
//! written payload (or nothing) comes out. Parsing and recovery from
//! malformed payloads happen in the history layer, not here.

use anyhow::Result;
use async_trait::async_trait;

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

/// Namespace prefix for owner slots, kept stable so existing histories
/// keep resolving to the same key.
const OWNER_KEY_PREFIX: &str = "chat_history_";

/// Derive the storage key for an owner.
#[must_use]
pub fn owner_key(owner_id: &str) -> String {
    format!("{OWNER_KEY_PREFIX}{owner_id}")
}

/// Durable key-value storage scoped by owner key.
///
/// Writes are fire-and-forget from the history store's perspective; the
/// model assumes a single active writer per owner and last-write-wins on
/// the slot.
#[async_trait]
pub trait HistoryStorage: Send + Sync + std::fmt::Debug {
    /// Read the last serialized snapshot written for `owner_key`, if any.
    async fn read(&self, owner_key: &str) -> Result<Option<String>>;

    /// Replace the slot for `owner_key` with `payload`.
    async fn write(&self, owner_key: &str, payload: &str) -> Result<()>;

    /// Remove the slot for `owner_key`. Clearing an absent slot succeeds.
    async fn clear(&self, owner_key: &str) -> Result<()>;
}
