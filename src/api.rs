use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::{Message, Update, User};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

/// Extra time granted on top of the long-poll hold before the HTTP request
/// itself is abandoned.
const REQUEST_TIMEOUT_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to {method} failed: {source}")]
    Http {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("Bot API error ({code}): {description}")]
    Api { code: i32, description: String },

    #[error("malformed response from {method}: {reason}")]
    MalformedResponse { method: &'static str, reason: String },
}

/// The envelope every Bot API method answers with.
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    error_code: i32,
}

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct ForwardMessageRequest {
    chat_id: i64,
    from_chat_id: i64,
    message_id: i32,
}

/// Anything the poller can pull updates from.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    /// Fetch updates with `update_id >= offset`, holding the request open for
    /// up to `timeout` seconds when nothing is pending.
    async fn fetch_updates(&self, timeout: u64, offset: i64) -> Result<Vec<Update>, ApiError>;
}

#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    /// `{api_url}/bot{token}`, never logged.
    base_url: String,
}

impl std::fmt::Debug for TelegramClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramClient").finish_non_exhaustive()
    }
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_api_url(token, DEFAULT_API_URL)
    }

    /// Point the client at a different Bot API server (self-hosted or a mock).
    pub fn with_api_url(token: &str, api_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("{}/bot{}", api_url.trim_end_matches('/'), token),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    pub async fn get_me(&self) -> Result<User, ApiError> {
        let response = self
            .client
            .get(self.method_url("getMe"))
            .send()
            .await
            .map_err(|source| ApiError::Http {
                method: "getMe",
                source,
            })?;
        decode("getMe", response).await
    }

    pub async fn get_updates(&self, timeout: u64, offset: i64) -> Result<Vec<Update>, ApiError> {
        debug!("getUpdates offset={} timeout={}s", offset, timeout);

        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[("timeout", timeout.to_string()), ("offset", offset.to_string())])
            .timeout(Duration::from_secs(timeout) + REQUEST_TIMEOUT_SLACK)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                method: "getUpdates",
                source,
            })?;
        decode("getUpdates", response).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, ApiError> {
        let response = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&SendMessageRequest { chat_id, text })
            .send()
            .await
            .map_err(|source| ApiError::Http {
                method: "sendMessage",
                source,
            })?;
        decode("sendMessage", response).await
    }

    /// Forward `message` from the chat it was posted in to `chat_id`.
    pub async fn forward_message(
        &self,
        chat_id: i64,
        message: &Message,
    ) -> Result<Message, ApiError> {
        let request = ForwardMessageRequest {
            chat_id,
            from_chat_id: message.chat.id,
            message_id: message.message_id,
        };
        let response = self
            .client
            .post(self.method_url("forwardMessage"))
            .json(&request)
            .send()
            .await
            .map_err(|source| ApiError::Http {
                method: "forwardMessage",
                source,
            })?;
        decode("forwardMessage", response).await
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn fetch_updates(&self, timeout: u64, offset: i64) -> Result<Vec<Update>, ApiError> {
        self.get_updates(timeout, offset).await
    }
}

/// Unwrap the envelope. The Bot API reports failures with a non-2xx status
/// *and* an `ok: false` body, so the body is decoded before the status is
/// looked at.
async fn decode<T: DeserializeOwned>(
    method: &'static str,
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response
        .bytes()
        .await
        .map_err(|source| ApiError::Http { method, source })?;

    let envelope: ApiResponse =
        serde_json::from_slice(&body).map_err(|e| ApiError::MalformedResponse {
            method,
            reason: format!("HTTP {}: {}", status, e),
        })?;

    if !envelope.ok {
        return Err(ApiError::Api {
            code: envelope.error_code,
            description: envelope.description,
        });
    }

    let result = envelope
        .result
        .ok_or_else(|| ApiError::MalformedResponse {
            method,
            reason: "missing result".to_string(),
        })?;

    serde_json::from_value(result).map_err(|e| ApiError::MalformedResponse {
        method,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::Query,
        http::StatusCode,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    const TOKEN: &str = "123:test";

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn route(method: &str) -> String {
        format!("/bot{}/{}", TOKEN, method)
    }

    async fn get_updates(Query(params): Query<HashMap<String, String>>) -> Json<Value> {
        let offset: i64 = params["offset"].parse().unwrap();
        Json(json!({
            "ok": true,
            "result": [
                {"update_id": offset, "message": {"message_id": 1, "chat": {"id": 10, "type": "private"}, "text": params["timeout"]}},
                {"update_id": offset + 1, "message": {"message_id": 2, "chat": {"id": 10, "type": "private"}, "text": "second"}}
            ]
        }))
    }

    async fn send_message(Json(body): Json<Value>) -> Json<Value> {
        Json(json!({
            "ok": true,
            "result": {"message_id": 99, "chat": {"id": body["chat_id"], "type": "private"}, "text": body["text"]}
        }))
    }

    async fn forward_message(Json(body): Json<Value>) -> Json<Value> {
        // Echo the source chat back as text so the test can see it.
        Json(json!({
            "ok": true,
            "result": {
                "message_id": body["message_id"],
                "chat": {"id": body["chat_id"], "type": "private"},
                "text": body["from_chat_id"].to_string()
            }
        }))
    }

    async fn unauthorized() -> (StatusCode, Json<Value>) {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"ok": false, "error_code": 401, "description": "Unauthorized"})),
        )
    }

    async fn garbage() -> (StatusCode, &'static str) {
        (StatusCode::BAD_GATEWAY, "<html>bad gateway</html>")
    }

    async fn mock_api() -> TelegramClient {
        let router = Router::new()
            .route(&route("getUpdates"), get(get_updates))
            .route(&route("sendMessage"), post(send_message))
            .route(&route("forwardMessage"), post(forward_message))
            .route(&route("getMe"), get(unauthorized))
            .route(&route("broken"), get(garbage));
        let url = serve(router).await;
        TelegramClient::with_api_url(TOKEN, &url)
    }

    #[tokio::test]
    async fn test_get_updates_sends_offset_and_timeout() {
        let client = mock_api().await;
        let updates = client.get_updates(0, 17).await.unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].update_id, 17);
        assert_eq!(updates[0].message.text, "0");
        assert_eq!(updates[1].update_id, 18);
    }

    #[tokio::test]
    async fn test_send_message_roundtrip() {
        let client = mock_api().await;
        let sent = client.send_message(10, "hello").await.unwrap();
        assert_eq!(sent.message_id, 99);
        assert_eq!(sent.chat.id, 10);
        assert_eq!(sent.text, "hello");
    }

    #[tokio::test]
    async fn test_forward_message_uses_source_chat() {
        let client = mock_api().await;
        let original = Message {
            message_id: 5,
            chat: crate::types::Chat {
                id: -200,
                ..Default::default()
            },
            ..Default::default()
        };
        let forwarded = client.forward_message(10, &original).await.unwrap();
        assert_eq!(forwarded.message_id, 5);
        assert_eq!(forwarded.chat.id, 10);
        assert_eq!(forwarded.text, "-200");
    }

    #[tokio::test]
    async fn test_api_error_is_surfaced() {
        let client = mock_api().await;
        match client.get_me().await {
            Err(ApiError::Api { code, description }) => {
                assert_eq!(code, 401);
                assert_eq!(description, "Unauthorized");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_json_body_is_malformed() {
        let client = mock_api().await;
        let response = client
            .client
            .get(client.method_url("broken"))
            .send()
            .await
            .unwrap();
        let result: Result<User, ApiError> = decode("broken", response).await;
        assert!(matches!(
            result,
            Err(ApiError::MalformedResponse { method: "broken", .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_http_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = TelegramClient::with_api_url(TOKEN, &format!("http://{}", addr));
        let result = client.fetch_updates(0, 0).await;
        assert!(matches!(
            result,
            Err(ApiError::Http {
                method: "getUpdates",
                ..
            })
        ));
    }

    #[test]
    fn test_method_url_trims_trailing_slash() {
        let client = TelegramClient::with_api_url("abc", "http://localhost:8081/");
        assert_eq!(
            client.method_url("getMe"),
            "http://localhost:8081/botabc/getMe"
        );
    }
}
