//! HTTP dispatcher for the CodeFlow inference backend.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::history::Message;

use super::MessageDispatcher;

/// Request body for the backend's `/api/chat` endpoint.
///
/// Field names are the backend's wire format.
#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(rename = "userId")]
    user_id: &'a str,
    history: &'a [Message],
}

/// Response body from the backend.
#[derive(Debug, Deserialize)]
struct ChatResponse {
    response: String,
}

/// Dispatcher that POSTs to the inference backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpDispatcher {
    /// Create a dispatcher for the backend at `base_url`.
    ///
    /// `timeout` bounds the whole request; a timed-out dispatch counts as
    /// a failure like any other.
    #[must_use]
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl MessageDispatcher for HttpDispatcher {
    async fn dispatch(&self, message: &str, owner_id: &str, history: &[Message]) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url.trim_end_matches('/'));

        let body = ChatRequest {
            message,
            user_id: owner_id,
            history,
        };

        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("sending chat request to {url}"))?
            .error_for_status()
            .context("backend rejected chat request")?;

        let parsed: ChatResponse = resp
            .json()
            .await
            .context("decoding backend chat response")?;
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, http::StatusCode, routing::post};

    async fn spawn_backend(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_dispatch_success() {
        let router = Router::new().route(
            "/api/chat",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["message"], "Hello");
                assert_eq!(body["userId"], "user_1");
                assert_eq!(body["history"][0]["role"], "user");
                Json(serde_json::json!({"response": "Hi there"}))
            }),
        );
        let base = spawn_backend(router).await;

        let dispatcher = HttpDispatcher::new(&base, Duration::from_secs(5));
        let history = vec![Message::user("earlier")];
        let reply = dispatcher
            .dispatch("Hello", "user_1", &history)
            .await
            .unwrap();
        assert_eq!(reply, "Hi there");
    }

    #[tokio::test]
    async fn test_dispatch_maps_server_error_to_failure() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let base = spawn_backend(router).await;

        let dispatcher = HttpDispatcher::new(&base, Duration::from_secs(5));
        assert!(dispatcher.dispatch("Hello", "user_1", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_maps_bad_payload_to_failure() {
        let router = Router::new().route(
            "/api/chat",
            post(|| async { Json(serde_json::json!({"unexpected": true})) }),
        );
        let base = spawn_backend(router).await;

        let dispatcher = HttpDispatcher::new(&base, Duration::from_secs(5));
        assert!(dispatcher.dispatch("Hello", "user_1", &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_dispatch_maps_unreachable_backend_to_failure() {
        // Bind then drop to get a port nothing listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let dispatcher = HttpDispatcher::new(format!("http://{addr}"), Duration::from_secs(1));
        assert!(dispatcher.dispatch("Hello", "user_1", &[]).await.is_err());
    }
}
