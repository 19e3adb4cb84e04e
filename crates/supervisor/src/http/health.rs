//! Health and metrics endpoints.
//!
//! - `GET /health/live`: liveness, unconditional 200
//! - `GET /health/ready`: store healthy AND at least one bot running
//! - `GET /health/full`: component detail plus per-bot status
//! - `GET /metrics`: Prometheus text exposition

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use tokio_util::sync::CancellationToken;

use mb_store::StoreGateway;

use crate::manager::{BotManager, BotState};

#[derive(Clone)]
pub struct HealthState {
    pub manager: Arc<BotManager>,
    pub store: Option<Arc<StoreGateway>>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/health/full", get(full))
        .route("/metrics", get(metrics))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until cancelled.
pub async fn serve(
    state: HealthState,
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "health server listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    tracing::info!("health server stopped");
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn live() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}

async fn ready(State(state): State<HealthState>) -> Response {
    let mut checks = serde_json::Map::new();
    let mut is_ready = true;

    if let Some(store) = &state.store {
        let healthy = store.health_check().await;
        checks.insert(
            "database".into(),
            serde_json::json!(if healthy { "healthy" } else { "unhealthy" }),
        );
        if !healthy {
            is_ready = false;
        }
    }

    let running = state.manager.running_count().await;
    let total = state.manager.bot_count();
    checks.insert("bots".into(), serde_json::json!(format!("{running}/{total} running")));
    if running == 0 {
        is_ready = false;
    }

    let status = if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({
            "status": if is_ready { "ready" } else { "not_ready" },
            "checks": checks,
        })),
    )
        .into_response()
}

async fn full(State(state): State<HealthState>) -> impl IntoResponse {
    let statuses = state.manager.all_statuses().await;
    let running = statuses
        .iter()
        .filter(|s| s.state == BotState::Running)
        .count();
    let errors = statuses
        .iter()
        .filter(|s| s.state == BotState::Error)
        .count();

    let mut components = serde_json::Map::new();

    if let Some(store) = &state.store {
        let healthy = store.health_check().await;
        components.insert(
            "database".into(),
            serde_json::json!({
                "status": if healthy { "healthy" } else { "unhealthy" },
                "pool_size": store.pool_size(),
                "pool_free": store.pool_idle(),
            }),
        );
    }

    let bots_status = if running > 0 && errors == 0 {
        "healthy"
    } else if running > 0 {
        "degraded"
    } else {
        "unhealthy"
    };
    components.insert(
        "bots".into(),
        serde_json::json!({
            "status": bots_status,
            "total": statuses.len(),
            "running": running,
            "errors": errors,
        }),
    );

    let overall = overall_status(&components);

    let mut bots = serde_json::Map::new();
    for status in statuses {
        bots.insert(
            status.bot_id.clone(),
            serde_json::json!({
                "name": status.name,
                "status": status.state,
                "mode": status.mode,
                "uptime_seconds": status.uptime_seconds,
            }),
        );
    }

    Json(serde_json::json!({
        "status": overall,
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "components": components,
        "bots": bots,
    }))
}

fn overall_status(components: &serde_json::Map<String, serde_json::Value>) -> &'static str {
    let statuses: Vec<&str> = components
        .values()
        .filter_map(|c| c.get("status").and_then(|s| s.as_str()))
        .collect();
    if statuses.iter().all(|s| *s == "healthy") {
        "healthy"
    } else if statuses.iter().any(|s| *s == "unhealthy") {
        "unhealthy"
    } else {
        "degraded"
    }
}

async fn metrics(State(state): State<HealthState>) -> impl IntoResponse {
    let statuses = state.manager.all_statuses().await;
    let mut lines: Vec<String> = Vec::new();

    for status in &statuses {
        let running = i32::from(status.state == BotState::Running);
        lines.push(format!(
            "multibot_bot_running{{bot_id=\"{}\"}} {running}",
            status.bot_id
        ));
        if let Some(uptime) = status.uptime_seconds {
            lines.push(format!(
                "multibot_bot_uptime_seconds{{bot_id=\"{}\"}} {uptime}",
                status.bot_id
            ));
        }
    }

    let running = statuses
        .iter()
        .filter(|s| s.state == BotState::Running)
        .count();
    lines.push(format!("multibot_bots_total {}", statuses.len()));
    lines.push(format!("multibot_bots_running {running}"));

    if let Some(store) = &state.store {
        lines.push(format!("multibot_db_pool_size {}", store.pool_size()));
        lines.push(format!("multibot_db_pool_free {}", store.pool_idle()));
    }

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        lines.join("\n") + "\n",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::DispatcherFactory;
    use crate::stats::StatsCollector;
    use axum::body::Body;
    use axum::http::Request;
    use mb_plugins::PluginRegistry;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn state_with_bots() -> HealthState {
        let registry = Arc::new(PluginRegistry::new());
        registry.register_builtins().unwrap();
        let collector = Arc::new(StatsCollector::new(Duration::from_secs(60)));
        let factory = Arc::new(DispatcherFactory::new(registry, None, None, collector));
        let manager = Arc::new(BotManager::new(factory, None));

        let config: mb_domain::config::BotConfig =
            serde_yaml::from_str("id: a\nname: A\ntoken: \"1:x\"\nmode: webhook\n").unwrap();
        manager.create_bot(config).await.unwrap();

        HealthState {
            manager,
            store: None,
        }
    }

    async fn get_response(state: HealthState, path: &str) -> (StatusCode, String) {
        let response = router(state)
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn live_is_always_ok() {
        let state = state_with_bots().await;
        let (status, body) = get_response(state, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("alive"));
    }

    #[tokio::test]
    async fn ready_requires_a_running_bot() {
        let state = state_with_bots().await;
        let (status, body) = get_response(state.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(body.contains("0/1 running"));

        state.manager.start_bot("a").await.unwrap();
        let (status, body) = get_response(state, "/health/ready").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("1/1 running"));
    }

    #[tokio::test]
    async fn metrics_exposition_shape() {
        let state = state_with_bots().await;
        state.manager.start_bot("a").await.unwrap();

        let (status, body) = get_response(state, "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("multibot_bot_running{bot_id=\"a\"} 1"));
        assert!(body.contains("multibot_bot_uptime_seconds{bot_id=\"a\"}"));
        assert!(body.contains("multibot_bots_total 1"));
        assert!(body.contains("multibot_bots_running 1"));
    }

    #[tokio::test]
    async fn full_reports_per_bot_detail() {
        let state = state_with_bots().await;
        state.manager.start_bot("a").await.unwrap();

        let (status, body) = get_response(state, "/health/full").await;
        assert_eq!(status, StatusCode::OK);
        let value: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(value["bots"]["a"]["status"], "running");
        assert_eq!(value["bots"]["a"]["mode"], "webhook");
        assert!(value["bots"]["a"]["uptime_seconds"].is_i64());
    }
}
