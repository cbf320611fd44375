//! Chat service for one owner: the send pipeline and history operations.
//!
//! Wraps a [`HistoryStore`] with the collaborators the UI events need:
//! durable storage and the message dispatcher. All mutations run through
//! here so every change is followed by a persist of the owner's snapshot.
//!
//! At most one dispatch is outstanding per owner. The `busy` flag is an
//! atomic so it can be checked without the store lock; overlapping sends
//! are rejected, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tokio::sync::Mutex;

use crate::dispatch::{FALLBACK_NOTICE, MessageDispatcher};
use crate::history::{ChatSession, HistorySnapshot, HistoryStore, Message};
use crate::storage::{HistoryStorage, owner_key};

/// Errors surfaced by the send pipeline.
#[derive(Debug, Error)]
pub enum ChatError {
    /// A dispatch is already in flight for this owner.
    #[error("a message dispatch is already in flight")]
    Busy,
}

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct ChatReply {
    /// Session the exchange belongs to.
    pub session_id: String,
    /// The appended assistant message (reply or fallback notice).
    pub message: Message,
}

/// Clears the busy flag when the send pipeline unwinds.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Chat state and collaborators for a single owner.
#[derive(Debug)]
pub struct ChatService {
    store: Mutex<HistoryStore>,
    storage: Arc<dyn HistoryStorage>,
    dispatcher: Arc<dyn MessageDispatcher>,
    busy: AtomicBool,
}

impl ChatService {
    /// Load the owner's history from storage.
    ///
    /// A failed read is treated like an absent snapshot: the owner starts
    /// over with one fresh session and only a diagnostic is logged.
    pub async fn load(
        owner_id: impl Into<String>,
        storage: Arc<dyn HistoryStorage>,
        dispatcher: Arc<dyn MessageDispatcher>,
    ) -> Self {
        let owner_id = owner_id.into();
        let raw = match storage.read(&owner_key(&owner_id)).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(
                    owner_id = %owner_id,
                    error = %err,
                    "Failed to read history slot, starting fresh"
                );
                None
            }
        };
        let store = HistoryStore::restore(owner_id, raw.as_deref());

        Self {
            store: Mutex::new(store),
            storage,
            dispatcher,
            busy: AtomicBool::new(false),
        }
    }

    /// Whether a dispatch is currently outstanding.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Send a user message and append exactly one assistant message.
    ///
    /// Blank or whitespace-only input is a no-op (`Ok(None)`). While a
    /// dispatch is outstanding further sends return [`ChatError::Busy`].
    /// The reply is attributed to the session that was active when the
    /// dispatch started; if that session is gone by the time the backend
    /// answers, the reply is discarded.
    ///
    /// # Errors
    ///
    /// [`ChatError::Busy`] when a dispatch is already in flight.
    pub async fn send(&self, content: &str) -> Result<Option<ChatReply>, ChatError> {
        if content.trim().is_empty() {
            return Ok(None);
        }
        if self.busy.swap(true, Ordering::SeqCst) {
            return Err(ChatError::Busy);
        }
        let _guard = BusyGuard(&self.busy);

        let (owner_id, origin_id, history) = {
            let mut store = self.store.lock().await;
            let history = store.active_messages().to_vec();
            store.append(Message::user(content));
            (
                store.owner_id().to_string(),
                store.active_session_id().map(ToString::to_string),
                history,
            )
        };
        self.persist().await;

        tracing::debug!(
            owner_id = %owner_id,
            session_id = ?origin_id,
            history_len = history.len(),
            "Dispatching user message"
        );

        let reply = match self.dispatcher.dispatch(content, &owner_id, &history).await {
            Ok(text) => Message::assistant(text),
            Err(err) => {
                tracing::error!(
                    owner_id = %owner_id,
                    error = %err,
                    "Dispatch failed, appending fallback notice"
                );
                Message::assistant(FALLBACK_NOTICE)
            }
        };

        let Some(origin_id) = origin_id else {
            tracing::warn!(owner_id = %owner_id, "No active session at dispatch start, reply discarded");
            return Ok(None);
        };

        let appended = {
            let mut store = self.store.lock().await;
            store.append_to_session(&origin_id, reply.clone())
        };
        if appended {
            self.persist().await;
            Ok(Some(ChatReply {
                session_id: origin_id,
                message: reply,
            }))
        } else {
            tracing::warn!(
                owner_id = %owner_id,
                session_id = %origin_id,
                "Originating session gone, reply discarded"
            );
            Ok(None)
        }
    }

    /// Start a new chat and make it active.
    pub async fn new_chat(&self) -> ChatSession {
        let session = {
            let mut store = self.store.lock().await;
            store.create().clone()
        };
        self.persist().await;
        session
    }

    /// Switch the active session. Returns the now-active messages, or
    /// `None` when the id is unknown (the store treats that as a no-op).
    pub async fn select(&self, session_id: &str) -> Option<Vec<Message>> {
        let selected = {
            let mut store = self.store.lock().await;
            store.select(session_id);
            (store.active_session_id() == Some(session_id))
                .then(|| store.active_messages().to_vec())
        };
        if selected.is_some() {
            self.persist().await;
        }
        selected
    }

    /// Rename a session. Blank titles and unknown ids are no-ops.
    pub async fn rename(&self, session_id: &str, new_title: &str) {
        {
            let mut store = self.store.lock().await;
            store.rename(session_id, new_title);
        }
        self.persist().await;
    }

    /// Delete a session. Returns whether it existed.
    pub async fn delete(&self, session_id: &str) -> bool {
        let removed = {
            let mut store = self.store.lock().await;
            store.delete(session_id)
        };
        if removed {
            self.persist().await;
        }
        removed
    }

    /// Clear the active session's messages without deleting it.
    pub async fn clear_active_messages(&self) {
        {
            let mut store = self.store.lock().await;
            store.clear_active_messages();
        }
        self.persist().await;
    }

    /// Drop all history for this owner: clear the persisted slot, reset to
    /// a single fresh session, and persist the new state.
    pub async fn clear_all(&self) {
        let key = {
            let store = self.store.lock().await;
            owner_key(store.owner_id())
        };
        if let Err(err) = self.storage.clear(&key).await {
            tracing::warn!(error = %err, "Failed to clear history slot");
        }
        {
            let mut store = self.store.lock().await;
            store.clear_all();
        }
        self.persist().await;
    }

    /// Current snapshot of the owner's history.
    pub async fn snapshot(&self) -> HistorySnapshot {
        self.store.lock().await.snapshot()
    }

    /// Write the current snapshot to storage.
    ///
    /// Skipped while the session list is empty so a transient empty state
    /// can never overwrite good history. Write failures are logged and
    /// swallowed; persistence is fire-and-forget from the store's view.
    async fn persist(&self) {
        let (key, payload) = {
            let store = self.store.lock().await;
            if store.sessions().is_empty() {
                return;
            }
            let payload = match serde_json::to_string(&store.snapshot()) {
                Ok(payload) => payload,
                Err(err) => {
                    tracing::warn!(error = %err, "Failed to serialize history snapshot");
                    return;
                }
            };
            (owner_key(store.owner_id()), payload)
        };
        if let Err(err) = self.storage.write(&key, &payload).await {
            tracing::warn!(error = %err, "Failed to persist history snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{MessageRole, NEW_CHAT_TITLE};
    use crate::storage::MemoryStorage;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Scripted dispatcher: answers with a canned reply or fails, and can
    /// hold the dispatch open until released.
    #[derive(Debug, Default)]
    struct ScriptedDispatcher {
        reply: Option<String>,
        hold: Option<Arc<Notify>>,
    }

    impl ScriptedDispatcher {
        fn replying(text: &str) -> Self {
            Self {
                reply: Some(text.to_string()),
                ..Self::default()
            }
        }

        fn failing() -> Self {
            Self::default()
        }

        fn held(text: &str, hold: Arc<Notify>) -> Self {
            Self {
                reply: Some(text.to_string()),
                hold: Some(hold),
            }
        }
    }

    #[async_trait]
    impl MessageDispatcher for ScriptedDispatcher {
        async fn dispatch(
            &self,
            _message: &str,
            _owner_id: &str,
            _history: &[Message],
        ) -> anyhow::Result<String> {
            if let Some(hold) = &self.hold {
                hold.notified().await;
            }
            self.reply
                .clone()
                .ok_or_else(|| anyhow!("simulated transport error"))
        }
    }

    async fn service_with(dispatcher: ScriptedDispatcher) -> (ChatService, Arc<MemoryStorage>) {
        let storage = Arc::new(MemoryStorage::new());
        let service = ChatService::load(
            "user_1",
            Arc::clone(&storage) as Arc<dyn HistoryStorage>,
            Arc::new(dispatcher),
        )
        .await;
        (service, storage)
    }

    #[tokio::test]
    async fn test_send_hello_scenario() {
        let (service, _) = service_with(ScriptedDispatcher::replying("Hi there")).await;

        let reply = service.send("Hello").await.unwrap().unwrap();
        assert_eq!(reply.message.content, "Hi there");
        assert_eq!(reply.message.role, MessageRole::Assistant);

        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].title, "Hello");
        assert_eq!(snapshot.sessions[0].messages.len(), 2);
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn test_blank_input_is_noop() {
        let (service, _) = service_with(ScriptedDispatcher::replying("unused")).await;

        assert!(service.send("   ").await.unwrap().is_none());
        assert!(service.send("").await.unwrap().is_none());

        let snapshot = service.snapshot().await;
        assert!(snapshot.sessions[0].messages.is_empty());
        assert_eq!(snapshot.sessions[0].title, NEW_CHAT_TITLE);
    }

    #[tokio::test]
    async fn test_dispatch_failure_appends_fallback_and_clears_busy() {
        let (service, _) = service_with(ScriptedDispatcher::failing()).await;

        let reply = service.send("Hello").await.unwrap().unwrap();
        assert_eq!(reply.message.content, FALLBACK_NOTICE);

        let snapshot = service.snapshot().await;
        // Exactly one assistant message per user message, failure included.
        assert_eq!(snapshot.sessions[0].messages.len(), 2);
        assert_eq!(
            snapshot.sessions[0].messages[1].role,
            MessageRole::Assistant
        );
        assert!(!service.is_busy());

        // The busy flag cleared, so the next send goes through.
        assert!(service.send("again").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_send_rejected_while_busy() {
        let hold = Arc::new(Notify::new());
        let (service, _) =
            service_with(ScriptedDispatcher::held("slow reply", Arc::clone(&hold))).await;
        let service = Arc::new(service);

        let first = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.send("first").await })
        };

        // Wait until the pipeline has marked itself busy.
        while !service.is_busy() {
            tokio::task::yield_now().await;
        }

        assert!(matches!(service.send("second").await, Err(ChatError::Busy)));

        hold.notify_one();
        let reply = first.await.unwrap().unwrap().unwrap();
        assert_eq!(reply.message.content, "slow reply");
        assert!(!service.is_busy());
    }

    #[tokio::test]
    async fn test_late_reply_lands_in_originating_session() {
        let hold = Arc::new(Notify::new());
        let (service, _) =
            service_with(ScriptedDispatcher::held("late reply", Arc::clone(&hold))).await;
        let service = Arc::new(service);

        let send = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.send("question").await })
        };
        while !service.is_busy() {
            tokio::task::yield_now().await;
        }
        let origin_id = service.snapshot().await.current_session_id.clone();

        // User moves on to a new chat before the backend answers.
        let fresh = service.new_chat().await;

        hold.notify_one();
        let reply = send.await.unwrap().unwrap().unwrap();
        assert_eq!(reply.session_id, origin_id);

        let snapshot = service.snapshot().await;
        let origin = snapshot
            .sessions
            .iter()
            .find(|s| s.id == origin_id)
            .unwrap();
        assert_eq!(origin.messages.len(), 2);
        assert_eq!(origin.messages[1].content, "late reply");

        // The now-active chat never saw the reply.
        let current = snapshot.sessions.iter().find(|s| s.id == fresh.id).unwrap();
        assert!(current.messages.is_empty());
    }

    #[tokio::test]
    async fn test_late_reply_discarded_when_session_deleted() {
        let hold = Arc::new(Notify::new());
        let (service, _) =
            service_with(ScriptedDispatcher::held("orphan reply", Arc::clone(&hold))).await;
        let service = Arc::new(service);

        let send = {
            let service = Arc::clone(&service);
            tokio::spawn(async move { service.send("question").await })
        };
        while !service.is_busy() {
            tokio::task::yield_now().await;
        }
        let origin_id = service.snapshot().await.current_session_id.clone();

        assert!(service.delete(&origin_id).await);

        hold.notify_one();
        assert!(send.await.unwrap().unwrap().is_none());

        let snapshot = service.snapshot().await;
        assert!(snapshot.sessions.iter().all(|s| s.messages.is_empty()));
    }

    #[tokio::test]
    async fn test_persistence_roundtrip_across_loads() {
        let storage = Arc::new(MemoryStorage::new());
        {
            let service = ChatService::load(
                "user_1",
                Arc::clone(&storage) as Arc<dyn HistoryStorage>,
                Arc::new(ScriptedDispatcher::replying("Hi there")),
            )
            .await;
            service.send("Hello").await.unwrap();
            let session_id = service.snapshot().await.current_session_id;
            service.rename(&session_id, "Greetings").await;
        }

        let reloaded = ChatService::load(
            "user_1",
            Arc::clone(&storage) as Arc<dyn HistoryStorage>,
            Arc::new(ScriptedDispatcher::replying("unused")),
        )
        .await;
        let snapshot = reloaded.snapshot().await;
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].title, "Greetings");
        assert_eq!(snapshot.sessions[0].messages.len(), 2);
        assert!(!snapshot.current_session_id.is_empty());
    }

    #[tokio::test]
    async fn test_clear_all_resets_slot_and_state() {
        let (service, storage) = service_with(ScriptedDispatcher::replying("Hi")).await;
        service.send("Hello").await.unwrap();

        service.clear_all().await;

        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.sessions.len(), 1);
        assert!(snapshot.sessions[0].messages.is_empty());
        assert_eq!(snapshot.sessions[0].title, NEW_CHAT_TITLE);

        // The slot holds the fresh single-session state, not the old chat.
        let raw = storage.read(&owner_key("user_1")).await.unwrap().unwrap();
        assert!(!raw.contains("Hello"));
    }

    #[tokio::test]
    async fn test_select_unknown_returns_none() {
        let (service, _) = service_with(ScriptedDispatcher::replying("Hi")).await;
        service.send("Hello").await.unwrap();

        assert!(service.select("no-such-id").await.is_none());

        // Active session unchanged.
        let snapshot = service.snapshot().await;
        assert_eq!(snapshot.sessions[0].id, snapshot.current_session_id);
    }
}
