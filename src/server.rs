//! HTTP surface for the chat UI.
//!
//! Every route maps to one UI event from the chat front-end: sending a
//! message, starting a new chat, switching, renaming, deleting or clearing
//! conversations. Handlers stay thin; the semantics live in
//! [`ChatService`](crate::chat::ChatService) and the history store.
//! Confirmation prompts ("Delete this chat?") belong to the UI and are not
//! re-checked here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post, put},
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::AppState;
use crate::chat::{ChatError, ChatService};
use crate::config::AppConfig;
use crate::dispatch::{HttpDispatcher, MessageDispatcher};
use crate::history::{ChatSession, HistorySnapshot, Message};
use crate::storage::{FileStorage, HistoryStorage};

/// Per-owner chat services, loaded lazily from storage.
///
/// One service per owner for the lifetime of the process; the first event
/// for an owner restores their history, later events reuse the instance so
/// the busy flag and active session survive across requests.
#[derive(Debug)]
pub struct ChatRegistry {
    services: RwLock<HashMap<String, Arc<ChatService>>>,
    storage: Arc<dyn HistoryStorage>,
    dispatcher: Arc<dyn MessageDispatcher>,
}

impl ChatRegistry {
    /// Create a registry over the given collaborators.
    #[must_use]
    pub fn new(storage: Arc<dyn HistoryStorage>, dispatcher: Arc<dyn MessageDispatcher>) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            storage,
            dispatcher,
        }
    }

    /// Get the owner's service, loading their history on first touch.
    pub async fn get_or_load(&self, owner_id: &str) -> Arc<ChatService> {
        {
            let services = self.services.read().await;
            if let Some(service) = services.get(owner_id) {
                return Arc::clone(service);
            }
        }

        let loaded = Arc::new(
            ChatService::load(
                owner_id,
                Arc::clone(&self.storage),
                Arc::clone(&self.dispatcher),
            )
            .await,
        );

        let mut services = self.services.write().await;
        // Another request may have loaded the same owner meanwhile.
        Arc::clone(
            services
                .entry(owner_id.to_string())
                .or_insert(loaded),
        )
    }
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", post(send_message))
        .route("/api/chat/busy", get(chat_busy))
        .route("/api/history", get(get_history).delete(clear_history))
        .route("/api/messages", delete(clear_active_messages))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/{id}", delete(delete_session))
        .route("/api/sessions/{id}/select", post(select_session))
        .route("/api/sessions/{id}/title", put(rename_session))
        .route("/api/sessions/{id}/messages", get(get_messages))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the server with the provided configuration.
///
/// # Errors
///
/// Returns an error when the listen address cannot be bound.
pub async fn start_server(config: Arc<AppConfig>) -> anyhow::Result<()> {
    let storage: Arc<dyn HistoryStorage> =
        Arc::new(FileStorage::new(config.storage.data_dir.clone()));
    let dispatcher: Arc<dyn MessageDispatcher> = Arc::new(HttpDispatcher::new(
        config.backend.base_url.clone(),
        Duration::from_secs(config.backend.timeout_secs),
    ));

    info!(
        name: "backend.config.loaded",
        base_url = %config.backend.base_url,
        "Backend configuration loaded"
    );

    let state = AppState {
        chats: Arc::new(ChatRegistry::new(storage, dispatcher)),
        config: Arc::clone(&config),
    };

    let app = router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!(
        name: "server.started",
        address = %addr,
        "Server started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// API Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Owner identification for GET/DELETE routes.
#[derive(Debug, Deserialize)]
struct OwnerQuery {
    user_id: String,
}

/// Request body for the chat endpoint.
#[derive(Debug, Deserialize)]
struct SendRequest {
    user_id: String,
    message: String,
}

/// Response from the chat endpoint.
#[derive(Debug, Serialize)]
struct SendResponse {
    session_id: String,
    response: String,
}

/// Busy flag for the owner.
#[derive(Debug, Serialize)]
struct BusyResponse {
    busy: bool,
}

/// Session info for listings.
#[derive(Debug, Serialize)]
struct SessionInfo {
    id: String,
    title: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    message_count: usize,
}

impl From<&ChatSession> for SessionInfo {
    fn from(session: &ChatSession) -> Self {
        Self {
            id: session.id.clone(),
            title: session.title.clone(),
            timestamp: session.timestamp,
            message_count: session.messages.len(),
        }
    }
}

/// Request body for renaming a session.
#[derive(Debug, Deserialize)]
struct RenameRequest {
    user_id: String,
    title: String,
}

/// POST /api/chat - Send a message in the owner's active session.
///
/// Blank input is a no-op (204); an overlapping send is rejected (409).
async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendRequest>,
) -> Result<Json<SendResponse>, StatusCode> {
    let service = state.chats.get_or_load(&req.user_id).await;

    match service.send(&req.message).await {
        Ok(Some(reply)) => {
            info!(
                user_id = %req.user_id,
                session_id = %reply.session_id,
                "Chat message answered"
            );
            Ok(Json(SendResponse {
                session_id: reply.session_id,
                response: reply.message.content,
            }))
        }
        Ok(None) => Err(StatusCode::NO_CONTENT),
        Err(ChatError::Busy) => Err(StatusCode::CONFLICT),
    }
}

/// GET /api/chat/busy - Whether a dispatch is outstanding for the owner.
async fn chat_busy(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Json<BusyResponse> {
    let service = state.chats.get_or_load(&query.user_id).await;
    Json(BusyResponse {
        busy: service.is_busy(),
    })
}

/// GET /api/history - The owner's full history snapshot.
async fn get_history(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Json<HistorySnapshot> {
    let service = state.chats.get_or_load(&query.user_id).await;
    Json(service.snapshot().await)
}

/// DELETE /api/history - Clear all history for the owner.
async fn clear_history(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> StatusCode {
    let service = state.chats.get_or_load(&query.user_id).await;
    service.clear_all().await;
    info!(user_id = %query.user_id, "History cleared");
    StatusCode::NO_CONTENT
}

/// DELETE /api/messages - Clear the active session's messages.
async fn clear_active_messages(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> StatusCode {
    let service = state.chats.get_or_load(&query.user_id).await;
    service.clear_active_messages().await;
    StatusCode::NO_CONTENT
}

/// GET /api/sessions - List the owner's sessions, newest first.
async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Json<Vec<SessionInfo>> {
    let service = state.chats.get_or_load(&query.user_id).await;
    let snapshot = service.snapshot().await;
    Json(snapshot.sessions.iter().map(SessionInfo::from).collect())
}

/// POST /api/sessions - Start a new chat.
async fn create_session(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Json<SessionInfo> {
    let service = state.chats.get_or_load(&query.user_id).await;
    let session = service.new_chat().await;
    Json(SessionInfo::from(&session))
}

/// POST /api/sessions/:id/select - Switch the active session.
async fn select_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let service = state.chats.get_or_load(&query.user_id).await;
    match service.select(&id).await {
        Some(messages) => Ok(Json(messages)),
        None => Err(StatusCode::NOT_FOUND),
    }
}

/// PUT /api/sessions/:id/title - Rename a session.
async fn rename_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<RenameRequest>,
) -> StatusCode {
    let service = state.chats.get_or_load(&req.user_id).await;
    service.rename(&id, &req.title).await;
    StatusCode::NO_CONTENT
}

/// DELETE /api/sessions/:id - Delete a session.
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> StatusCode {
    let service = state.chats.get_or_load(&query.user_id).await;
    if service.delete(&id).await {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

/// GET /api/sessions/:id/messages - Messages of one session (read-only).
async fn get_messages(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let service = state.chats.get_or_load(&query.user_id).await;
    let snapshot = service.snapshot().await;
    snapshot
        .sessions
        .iter()
        .find(|s| s.id == id)
        .map(|s| Json(s.messages.clone()))
        .ok_or(StatusCode::NOT_FOUND)
}
