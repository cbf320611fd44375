//! Conversation sessions and the per-user history store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder title for a session that has not received its first message.
///
/// Title derivation only applies while a session's title equals this value;
/// an explicit rename permanently opts the session out of derivation.
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// Maximum number of characters taken from the first message when deriving
/// a session title. Longer content is truncated and marked with `...`.
const TITLE_MAX_CHARS: usize = 50;

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// User message.
    User,
    /// Assistant response.
    Assistant,
}

/// A single message within a conversation.
///
/// Messages are immutable once created; ordering within a session is
/// append-only and significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message author.
    pub role: MessageRole,
    /// Message content.
    pub content: String,
}

impl Message {
    /// Create a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// One named conversation.
///
/// `timestamp` is refreshed every time the session's messages change.
/// Field names are part of the durable snapshot format and must stay
/// stable across versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSession {
    /// Opaque unique identifier.
    pub id: String,
    /// Display title. Starts as [`NEW_CHAT_TITLE`] until derived or renamed.
    pub title: String,
    /// Ordered message log.
    pub messages: Vec<Message>,
    /// Last modification time.
    pub timestamp: DateTime<Utc>,
}

impl ChatSession {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title: NEW_CHAT_TITLE.to_string(),
            messages: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    /// Refresh the modification time and, while the title is still the
    /// sentinel, derive it from the first message.
    fn touch(&mut self) {
        self.timestamp = Utc::now();
        if self.title == NEW_CHAT_TITLE
            && let Some(first) = self.messages.first()
        {
            self.title = derive_title(&first.content);
        }
    }
}

/// Derive a display title from the first message of a conversation.
fn derive_title(content: &str) -> String {
    if content.chars().count() > TITLE_MAX_CHARS {
        let mut title: String = content.chars().take(TITLE_MAX_CHARS).collect();
        title.push_str("...");
        title
    } else {
        content.to_string()
    }
}

/// The durable per-user history unit.
///
/// Serialized field names (`userId`, `sessions`, `currentSessionId`, and the
/// fields of [`ChatSession`] and [`Message`]) are the stable wire format;
/// older snapshots must keep restoring across versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistorySnapshot {
    /// Owner of this history.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// All sessions, newest first.
    pub sessions: Vec<ChatSession>,
    /// Id of the active session, or the empty string when unset.
    #[serde(rename = "currentSessionId", default)]
    pub current_session_id: String,
}

/// State container for one user's chat history.
///
/// Owns the session list (newest first), the active session pointer, and
/// the active message buffer. The buffer never aliases a stored session's
/// message vector: it is copied on select and copied back on reconcile, so
/// mutations on one side are invisible to the other until reconciliation
/// runs.
#[derive(Debug)]
pub struct HistoryStore {
    owner_id: String,
    sessions: Vec<ChatSession>,
    active_session_id: Option<String>,
    active_messages: Vec<Message>,
}

impl HistoryStore {
    /// Restore a store from a raw serialized snapshot, if any.
    ///
    /// Missing or malformed data is treated as "no history": the store
    /// falls back to a single fresh session and logs a diagnostic. A
    /// snapshot whose `currentSessionId` no longer names a session is
    /// restored with an empty buffer; that inconsistency is recoverable.
    #[must_use]
    pub fn restore(owner_id: impl Into<String>, raw: Option<&str>) -> Self {
        let mut store = Self {
            owner_id: owner_id.into(),
            sessions: Vec::new(),
            active_session_id: None,
            active_messages: Vec::new(),
        };

        match raw.map(serde_json::from_str::<HistorySnapshot>) {
            Some(Ok(snapshot)) if !snapshot.sessions.is_empty() => {
                store.sessions = snapshot.sessions;
                if !snapshot.current_session_id.is_empty() {
                    store.active_messages = store
                        .sessions
                        .iter()
                        .find(|s| s.id == snapshot.current_session_id)
                        .map(|s| s.messages.clone())
                        .unwrap_or_default();
                    store.active_session_id = Some(snapshot.current_session_id);
                }
            }
            Some(Ok(_)) | None => {
                store.create();
            }
            Some(Err(err)) => {
                tracing::warn!(
                    owner_id = %store.owner_id,
                    error = %err,
                    "Discarding unreadable history snapshot"
                );
                store.create();
            }
        }

        store
    }

    /// Owner this store belongs to.
    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// All sessions, newest first.
    #[must_use]
    pub fn sessions(&self) -> &[ChatSession] {
        &self.sessions
    }

    /// Id of the active session.
    #[must_use]
    pub fn active_session_id(&self) -> Option<&str> {
        self.active_session_id.as_deref()
    }

    /// The active session, if the pointer resolves.
    #[must_use]
    pub fn active_session(&self) -> Option<&ChatSession> {
        let id = self.active_session_id.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }

    /// The working message buffer.
    #[must_use]
    pub fn active_messages(&self) -> &[Message] {
        &self.active_messages
    }

    /// Look up a session by id.
    #[must_use]
    pub fn session(&self, session_id: &str) -> Option<&ChatSession> {
        self.sessions.iter().find(|s| s.id == session_id)
    }

    /// Create a fresh session, prepend it (newest-first display order),
    /// make it active, and clear the buffer. Always succeeds.
    pub fn create(&mut self) -> &ChatSession {
        let session = ChatSession::new();
        self.active_session_id = Some(session.id.clone());
        self.active_messages.clear();
        self.sessions.insert(0, session);
        &self.sessions[0]
    }

    /// Make `session_id` active and replace the buffer with a copy of its
    /// messages. Unknown ids are a no-op.
    pub fn select(&mut self, session_id: &str) {
        if let Some(session) = self.sessions.iter().find(|s| s.id == session_id) {
            self.active_messages = session.messages.clone();
            self.active_session_id = Some(session_id.to_string());
        }
    }

    /// Append a message to the buffer and reconcile it into the active
    /// session.
    pub fn append(&mut self, message: Message) {
        self.active_messages.push(message);
        self.reconcile();
    }

    /// Append a message to a specific session.
    ///
    /// When `session_id` is the active session this goes through the buffer
    /// like [`append`](Self::append); otherwise the message lands directly
    /// in the stored session. Returns whether the session still exists.
    pub fn append_to_session(&mut self, session_id: &str, message: Message) -> bool {
        if self.active_session_id.as_deref() == Some(session_id) {
            self.append(message);
            return true;
        }
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) {
            session.messages.push(message);
            session.touch();
            true
        } else {
            false
        }
    }

    /// Set a session's title to the trimmed `new_title`.
    ///
    /// A no-op when the trimmed title is empty or the id is unknown. A
    /// rename permanently overrides first-message derivation.
    pub fn rename(&mut self, session_id: &str, new_title: &str) {
        let trimmed = new_title.trim();
        if trimmed.is_empty() {
            return;
        }
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == session_id) {
            session.title = trimmed.to_string();
        }
    }

    /// Remove a session. Deleting the active session immediately creates a
    /// replacement so the active pointer never dangles. Returns whether the
    /// session existed.
    pub fn delete(&mut self, session_id: &str) -> bool {
        let before = self.sessions.len();
        self.sessions.retain(|s| s.id != session_id);
        let removed = self.sessions.len() != before;
        if removed && self.active_session_id.as_deref() == Some(session_id) {
            self.create();
        }
        removed
    }

    /// Drop every session and start over with one fresh empty session.
    ///
    /// Clearing the owner's persisted slot is the caller's responsibility;
    /// this only resets in-memory state.
    pub fn clear_all(&mut self) {
        self.sessions.clear();
        self.create();
    }

    /// Empty the buffer and the active session's messages without deleting
    /// the session. The title is left alone: a cleared "New Chat" can still
    /// derive a title from its next first message.
    pub fn clear_active_messages(&mut self) {
        self.active_messages.clear();
        self.reconcile();
    }

    /// Project the buffer back into the active session.
    ///
    /// Replaces the session's messages with a fresh copy of the buffer,
    /// refreshes its timestamp, and derives the title from the first
    /// message while the title is still the sentinel. Idempotent up to the
    /// timestamp.
    fn reconcile(&mut self) {
        let Some(active_id) = self.active_session_id.as_deref() else {
            return;
        };
        if let Some(session) = self.sessions.iter_mut().find(|s| s.id == active_id) {
            session.messages = self.active_messages.clone();
            session.touch();
        }
    }

    /// Build the durable snapshot of the current state.
    #[must_use]
    pub fn snapshot(&self) -> HistorySnapshot {
        HistorySnapshot {
            user_id: self.owner_id.clone(),
            sessions: self.sessions.clone(),
            current_session_id: self.active_session_id.clone().unwrap_or_default(),
        }
    }
}
