//! Per-user conversation history management.
//!
//! This module provides the state container for a user's chat history:
//! multiple named sessions, an active session pointer, and the working
//! message buffer that is reconciled into the active session after every
//! mutation.
//!
//! # Architecture
//!
//! - [`Message`]: A single user or assistant message
//! - [`ChatSession`]: One named conversation with its message log
//! - [`HistorySnapshot`]: The durable per-user unit written to storage
//! - [`HistoryStore`]: The state machine owning sessions and the active buffer
//!
//! # Example
//!
//! ```rust
//! use codeflow_chat::history::{HistoryStore, Message};
//!
//! let mut store = HistoryStore::restore("user_42", None);
//! store.append(Message::user("Hello!"));
//!
//! assert_eq!(store.active_session().unwrap().title, "Hello!");
//! ```

mod store;

pub use store::{ChatSession, HistorySnapshot, HistoryStore, Message, MessageRole, NEW_CHAT_TITLE};
