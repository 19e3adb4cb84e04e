//! Terminal fallback for unmatched commands.
//!
//! Unhandled exceptions are the error middleware's job; this plugin
//! only answers commands no other router claimed. It is part of the
//! default plugin list and attaches last, so first-match routing lets
//! every real command win.

use std::sync::Arc;

use async_trait::async_trait;

use mb_dispatch::{Handler, RequestContext, Router, UpdateFilter};
use mb_domain::Result;
use mb_telegram::Update;

use crate::plugin::{Plugin, PluginContext, PluginDescriptor, PluginFactory};

pub const DESCRIPTOR: PluginDescriptor = PluginDescriptor {
    name: "error_handler",
    description: "Answers commands no handler claimed",
    version: "1.0.0",
    dependencies: &[],
    supports_hot_reload: true,
};

const DEFAULT_UNKNOWN: &str = "Unknown command. Use /help to see what I can do.";

pub fn factory() -> PluginFactory {
    Arc::new(|ctx: PluginContext| {
        Ok(Box::new(ErrorHandlerPlugin {
            unknown_command: ctx.config_str("unknown_command_message", DEFAULT_UNKNOWN),
        }) as Box<dyn Plugin>)
    })
}

pub struct ErrorHandlerPlugin {
    unknown_command: String,
}

impl Plugin for ErrorHandlerPlugin {
    fn descriptor(&self) -> &PluginDescriptor {
        &DESCRIPTOR
    }

    fn register(&self, router: &mut Router) {
        router.route(
            UpdateFilter::AnyCommand,
            Arc::new(UnknownCommandHandler {
                text: self.unknown_command.clone(),
            }),
        );
    }
}

struct UnknownCommandHandler {
    text: String,
}

#[async_trait]
impl Handler for UnknownCommandHandler {
    async fn handle(&self, update: &Update, ctx: &mut RequestContext) -> Result<()> {
        tracing::debug!(
            bot_id = %ctx.bot_id,
            command = update.content().unwrap_or(""),
            "unmatched command"
        );
        ctx.reply(&self.text).await
    }
}
