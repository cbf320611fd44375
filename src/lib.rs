//! CodeFlow Chat
//!
//! Server-side front-end for the CodeFlow AI assistant: it accepts chat UI
//! events over HTTP, forwards user messages to the inference backend, and
//! keeps each user's conversation history in a durable per-user snapshot.
//!
//! # Architecture
//!
//! - **Server**: Axum-based HTTP API, one route per UI event
//! - **History**: Per-user session store with buffer reconciliation
//! - **Storage**: Key-value snapshot slots (file-backed or in-memory)
//! - **Dispatch**: Single request/response call to the inference backend
//!
//! # Modules
//!
//! - [`chat`]: Per-owner service tying the pieces together
//! - [`history`]: Session store and durable snapshot format
//! - [`storage`]: Persistence adapters
//! - [`dispatch`]: Backend dispatcher
//! - [`server`]: HTTP routes and the owner registry

// Allow pedantic clippy warnings that don't add value for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::default_trait_access)]
#![allow(clippy::unused_async)]

pub mod chat;
pub mod config;
pub mod dispatch;
pub mod history;
pub mod server;
pub mod storage;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::server::ChatRegistry;

/// Application state shared across all handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Per-owner chat services.
    pub chats: Arc<ChatRegistry>,
    /// Global Configuration
    pub config: Arc<AppConfig>,
}
