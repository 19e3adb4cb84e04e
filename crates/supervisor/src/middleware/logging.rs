//! Request logging: tags a request id, logs entry and timed exit.

use std::time::Instant;

use async_trait::async_trait;

use mb_dispatch::{EventKind, Middleware, Next, RequestContext};
use mb_domain::Result;
use mb_telegram::Update;

const CONTENT_PREVIEW_CHARS: usize = 50;

pub struct LoggingMiddleware {
    bot_id: String,
}

impl LoggingMiddleware {
    pub fn new(bot_id: &str) -> Self {
        Self {
            bot_id: bot_id.to_string(),
        }
    }
}

fn preview(content: Option<&str>) -> String {
    match content {
        Some(text) => text.chars().take(CONTENT_PREVIEW_CHARS).collect(),
        None => "[non-text]".to_string(),
    }
}

fn event_label(event: &EventKind) -> &'static str {
    match event {
        EventKind::Message => "message",
        EventKind::Command(_) => "command",
        EventKind::Callback => "callback",
        EventKind::Other => "other",
    }
}

#[async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let request_id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        ctx.request_id = request_id.clone();

        tracing::info!(
            request_id = %request_id,
            bot_id = %self.bot_id,
            user_id = ctx.user_id.unwrap_or(0),
            event = event_label(&ctx.event),
            content = %preview(update.content()),
            "update received"
        );

        let started = Instant::now();
        let result = next.run(update, ctx).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        match &result {
            Ok(()) => {
                tracing::debug!(
                    request_id = %request_id,
                    elapsed_ms,
                    "update handled"
                );
            }
            Err(e) => {
                tracing::error!(
                    request_id = %request_id,
                    elapsed_ms,
                    error = %e,
                    "update failed"
                );
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_content() {
        let long = "x".repeat(200);
        assert_eq!(preview(Some(&long)).len(), CONTENT_PREVIEW_CHARS);
        assert_eq!(preview(Some("short")), "short");
        assert_eq!(preview(None), "[non-text]");
    }
}
