//! HTTP client for the Telegram Bot API.
//!
//! One client per managed bot. After [`TelegramClient::close`] the
//! client is poisoned permanently; restarting a bot builds a fresh one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use mb_domain::{Error, Result};

use crate::types::{Message, Update, User};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Margin added on top of the long-poll timeout so the HTTP layer does
/// not cut a healthy long poll short.
const HTTP_TIMEOUT_MARGIN_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default)]
    result: Option<T>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

pub struct TelegramClient {
    http: reqwest::Client,
    base_url: String,
    closed: AtomicBool,
}

impl TelegramClient {
    pub fn new(token: &str) -> Self {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    /// Point the client at a different API base (local test servers).
    pub fn with_api_base(token: &str, api_base: &str) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
            closed: AtomicBool::new(false),
        }
    }

    /// Close the client session. All subsequent calls fail; a stopped
    /// bot never reuses its wire client.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ── API methods ─────────────────────────────────────────────────

    pub async fn get_me(&self) -> Result<User> {
        self.call("getMe", &json!({}), Duration::from_secs(15)).await
    }

    /// Long-poll for updates. Blocks server-side for up to
    /// `timeout_secs` when no updates are pending.
    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let mut payload = json!({
            "timeout": timeout_secs,
            "limit": 100,
        });
        if let Some(offset) = offset {
            payload["offset"] = json!(offset);
        }
        self.call(
            "getUpdates",
            &payload,
            Duration::from_secs(timeout_secs + HTTP_TIMEOUT_MARGIN_SECS),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message> {
        self.call(
            "sendMessage",
            &json!({ "chat_id": chat_id, "text": text }),
            Duration::from_secs(15),
        )
        .await
    }

    pub async fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<bool> {
        let mut payload = json!({
            "callback_query_id": callback_query_id,
            "show_alert": show_alert,
        });
        if let Some(text) = text {
            payload["text"] = json!(text);
        }
        self.call("answerCallbackQuery", &payload, Duration::from_secs(15))
            .await
    }

    pub async fn set_webhook(
        &self,
        url: &str,
        secret_token: Option<&str>,
        max_connections: u32,
    ) -> Result<bool> {
        let mut payload = json!({
            "url": url,
            "max_connections": max_connections,
        });
        if let Some(secret) = secret_token {
            payload["secret_token"] = json!(secret);
        }
        self.call("setWebhook", &payload, Duration::from_secs(15))
            .await
    }

    pub async fn delete_webhook(&self) -> Result<bool> {
        self.call("deleteWebhook", &json!({}), Duration::from_secs(15))
            .await
    }

    // ── Plumbing ────────────────────────────────────────────────────

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        if self.is_closed() {
            return Err(Error::Wire("client session closed".into()));
        }

        let url = format!("{}/{}", self.base_url, method);
        let response = self
            .http
            .post(&url)
            .json(payload)
            .timeout(timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let envelope: ApiEnvelope<T> = response.json().await.map_err(map_transport_error)?;

        if envelope.ok {
            return envelope
                .result
                .ok_or_else(|| Error::Wire(format!("{method}: ok response without result")));
        }

        let description = envelope
            .description
            .unwrap_or_else(|| "unknown API error".into());
        match envelope.error_code {
            Some(429) => Err(Error::WireRateLimited {
                retry_after: envelope
                    .parameters
                    .and_then(|p| p.retry_after)
                    .unwrap_or(1),
            }),
            Some(403) => Err(Error::WireForbidden),
            Some(code) => Err(Error::Wire(format!("{method}: {code} {description}"))),
            None => Err(Error::Wire(format!("{method}: {description}"))),
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::WireTimeout
    } else {
        Error::wire(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closed_client_refuses_calls() {
        let client = TelegramClient::new("1:token");
        client.close();
        assert!(client.is_closed());
        match client.get_me().await {
            Err(Error::Wire(msg)) => assert!(msg.contains("closed")),
            other => panic!("expected wire error, got {other:?}"),
        }
    }

    #[test]
    fn envelope_error_shapes_parse() {
        let raw = r#"{"ok": false, "error_code": 429, "description": "Too Many Requests",
                      "parameters": {"retry_after": 7}}"#;
        let envelope: ApiEnvelope<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(!envelope.ok);
        assert_eq!(envelope.error_code, Some(429));
        assert_eq!(envelope.parameters.unwrap().retry_after, Some(7));
    }

    #[test]
    fn envelope_ok_parses_result() {
        let raw = r#"{"ok": true, "result": []}"#;
        let envelope: ApiEnvelope<Vec<Update>> = serde_json::from_str(raw).unwrap();
        assert!(envelope.ok);
        assert_eq!(envelope.result.unwrap().len(), 0);
    }
}
