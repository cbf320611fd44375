//! Message dispatch to the inference backend.
//!
//! The backend is an opaque collaborator: one outgoing message plus the
//! conversation context goes out, one assistant reply comes back. Transport
//! details, retries, and backend internals are out of scope here; a failed
//! dispatch surfaces in-band as the fixed [`FALLBACK_NOTICE`] appended by
//! the chat service, never as an error to the user.

use anyhow::Result;
use async_trait::async_trait;

use crate::history::Message;

mod http;

pub use http::HttpDispatcher;

/// Assistant text used in place of a reply when a dispatch fails.
pub const FALLBACK_NOTICE: &str =
    "Sorry, there was an error connecting to the AI agent. Please make sure the backend is running.";

/// Sends one user message to the inference backend and returns the
/// assistant's reply text.
#[async_trait]
pub trait MessageDispatcher: Send + Sync + std::fmt::Debug {
    /// Dispatch `message` for `owner_id` with `history` as context.
    ///
    /// `history` is the conversation *before* the message being sent.
    ///
    /// # Errors
    ///
    /// Any transport or protocol failure. Callers map errors to
    /// [`FALLBACK_NOTICE`] rather than propagating them.
    async fn dispatch(&self, message: &str, owner_id: &str, history: &[Message]) -> Result<String>;
}
