//! Webhook receiver: one endpoint demultiplexing inbound updates to
//! the right bot's dispatcher.
//!
//! `POST /<prefix>/:bot_id` answers 404 for an unknown bot, 503 when not running, 401 on
//! secret mismatch (constant-time compare), 200 on dispatch.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;

use mb_domain::config::WebhookServerConfig;
use mb_domain::Error;
use mb_telegram::Update;

use crate::manager::BotManager;

type HmacSha256 = Hmac<Sha256>;

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

#[derive(Clone)]
pub struct WebhookState {
    pub manager: Arc<BotManager>,
    /// Global secret; per-bot secrets are derived from it.
    pub secret: String,
}

/// Per-bot webhook secret: HMAC-SHA256 of the bot id under the global
/// secret, truncated to 32 hex chars.
pub fn derive_bot_secret(global_secret: &str, bot_id: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(global_secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(bot_id.as_bytes());
    hex::encode(mac.finalize().into_bytes())[..32].to_string()
}

pub fn router(state: WebhookState, path_prefix: &str) -> Router {
    let prefix = path_prefix.trim_end_matches('/');
    Router::new()
        .route(&format!("{prefix}/:bot_id"), post(receive_update))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    state: WebhookState,
    config: &WebhookServerConfig,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, prefix = %config.path_prefix, "webhook server listening");
    axum::serve(listener, router(state, &config.path_prefix))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("webhook server stopped");
    Ok(())
}

async fn receive_update(
    State(state): State<WebhookState>,
    Path(bot_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // 1. Look up the bot; it must be running to accept updates.
    let (dispatcher, client, secret_override) = match state.manager.webhook_target(&bot_id).await
    {
        Ok(target) => target,
        Err(Error::BotNotFound(_)) => {
            tracing::warn!(bot_id = %bot_id, "webhook for unknown bot");
            return (StatusCode::NOT_FOUND, "Bot not found").into_response();
        }
        Err(Error::BotNotRunning(_)) => {
            tracing::warn!(bot_id = %bot_id, "webhook for non-running bot");
            return (StatusCode::SERVICE_UNAVAILABLE, "Bot not running").into_response();
        }
        Err(e) => {
            tracing::error!(bot_id = %bot_id, error = %e, "webhook lookup failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
        }
    };

    // 2. Verify the shared secret, constant-time.
    let expected = match (&secret_override, state.secret.as_str()) {
        (Some(secret), _) => Some(secret.clone()),
        (None, "") => None,
        (None, global) => Some(derive_bot_secret(global, &bot_id)),
    };
    if let Some(expected) = expected {
        let provided = headers
            .get(SECRET_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() != 1 {
            tracing::warn!(bot_id = %bot_id, "invalid webhook secret");
            return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
        }
    }

    // 3. Parse and dispatch.
    let update: Update = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            tracing::warn!(bot_id = %bot_id, error = %e, "malformed webhook payload");
            return (StatusCode::BAD_REQUEST, "Malformed update").into_response();
        }
    };

    match dispatcher.feed_update(&client, update).await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::error!(bot_id = %bot_id, error = %e, "webhook dispatch failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response()
        }
    }
}

/// Register webhooks with the Bot API for every running webhook-mode
/// bot (called once the webhook server is up).
pub async fn register_bot_webhooks(
    manager: &BotManager,
    config: &WebhookServerConfig,
) {
    if config.base_url.is_empty() {
        tracing::warn!("webhook base_url not set, skipping webhook registration");
        return;
    }
    let prefix = config.path_prefix.trim_end_matches('/');
    for (bot_id, client, max_connections) in manager.webhook_bots().await {
        let url = format!("{}{prefix}/{bot_id}", config.base_url.trim_end_matches('/'));
        let secret = if config.secret.is_empty() {
            None
        } else {
            Some(derive_bot_secret(&config.secret, &bot_id))
        };
        match client
            .set_webhook(&url, secret.as_deref(), max_connections)
            .await
        {
            Ok(_) => tracing::info!(bot_id = %bot_id, url = %url, "webhook registered"),
            Err(e) => tracing::error!(bot_id = %bot_id, error = %e, "failed to register webhook"),
        }
    }
}

/// Remove registered webhooks on shutdown.
pub async fn remove_bot_webhooks(manager: &BotManager) {
    for (bot_id, client, _) in manager.webhook_bots().await {
        match client.delete_webhook().await {
            Ok(_) => tracing::info!(bot_id = %bot_id, "webhook removed"),
            Err(e) => tracing::warn!(bot_id = %bot_id, error = %e, "failed to remove webhook"),
        }
    }
}
