//! Records every interaction into the in-memory stats collector.
//!
//! Sits outside the error middleware so a handler failure is counted
//! before it is swallowed for the framework.

use std::sync::Arc;

use async_trait::async_trait;

use mb_dispatch::{EventKind, Middleware, Next, RequestContext};
use mb_domain::Result;
use mb_telegram::Update;

use crate::stats::StatsCollector;

pub struct StatsMiddleware {
    bot_id: String,
    collector: Arc<StatsCollector>,
}

impl StatsMiddleware {
    pub fn new(bot_id: &str, collector: Arc<StatsCollector>) -> Self {
        Self {
            bot_id: bot_id.to_string(),
            collector,
        }
    }
}

#[async_trait]
impl Middleware for StatsMiddleware {
    async fn handle(
        &self,
        update: &Update,
        ctx: &mut RequestContext,
        next: Next<'_>,
    ) -> Result<()> {
        let user_id = ctx.user_id.unwrap_or(0);
        match &ctx.event {
            EventKind::Message => self.collector.record_message(&self.bot_id, user_id),
            EventKind::Command(name) => {
                self.collector.record_command(&self.bot_id, name, user_id)
            }
            EventKind::Callback => self.collector.record_callback(&self.bot_id, user_id),
            EventKind::Other => {}
        }

        let result = next.run(update, ctx).await;
        if result.is_err() {
            self.collector.record_error(&self.bot_id);
        }
        result
    }
}
