//! Typed per-request context, filled in by middlewares in order.

use std::sync::Arc;

use mb_domain::Result;
use mb_store::{Session, StoreGateway};
use mb_telegram::{TelegramClient, Update};

/// Classification of an inbound update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Plain (non-command) message, including media captions.
    Message,
    /// Command message; carries the command name without `/` or
    /// `@mention`.
    Command(String),
    /// Callback query from an inline keyboard.
    Callback,
    /// Update kind the core does not handle.
    Other,
}

/// Extract a command name from message text: strips the leading `/`
/// and a trailing `@bot_mention`. Returns None for non-commands.
pub fn extract_command(text: &str) -> Option<String> {
    let rest = text.trim_start().strip_prefix('/')?;
    let first = rest.split_whitespace().next()?;
    let name = first.split('@').next().unwrap_or(first);
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

/// Per-request context threaded through middlewares and handlers.
pub struct RequestContext {
    /// Short request id, tagged by the logging middleware.
    pub request_id: String,
    pub bot_id: String,
    pub client: Arc<TelegramClient>,
    pub event: EventKind,
    pub user_id: Option<i64>,
    pub chat_id: Option<i64>,

    /// Shared store gateway, when the process has one.
    pub store: Option<Arc<StoreGateway>>,
    /// Scoped transactional session, opened by the session middleware.
    pub session: Option<Session>,

    /// Filled by the token middleware when billing is active.
    pub token_balance: Option<i64>,
    pub is_new_user: bool,

    /// Set by the error middleware once a handler failure has been
    /// logged and surfaced to the user. The error still propagates so
    /// outer middlewares observe it (stats counts it, the session
    /// rolls back), but the framework treats the update as handled.
    pub handled_error: Option<String>,
}

impl RequestContext {
    pub fn new(
        bot_id: &str,
        client: Arc<TelegramClient>,
        store: Option<Arc<StoreGateway>>,
        update: &Update,
    ) -> Self {
        let event = classify(update);
        Self {
            request_id: String::new(),
            bot_id: bot_id.to_string(),
            client,
            event,
            user_id: update.from_user().map(|u| u.id),
            chat_id: update.chat_id(),
            store,
            session: None,
            token_balance: None,
            is_new_user: false,
            handled_error: None,
        }
    }

    /// Borrow the scoped session, when one is open.
    pub fn session_mut(&mut self) -> Option<&mut Session> {
        self.session.as_mut()
    }

    /// Send a plain text reply into the update's chat. No-op when the
    /// update has no chat.
    pub async fn reply(&self, text: &str) -> Result<()> {
        if let Some(chat_id) = self.chat_id {
            self.client.send_message(chat_id, text).await?;
        }
        Ok(())
    }
}

fn classify(update: &Update) -> EventKind {
    if update.callback_query.is_some() {
        return EventKind::Callback;
    }
    if let Some(message) = update.any_message() {
        if let Some(command) = message.content().and_then(extract_command) {
            return EventKind::Command(command);
        }
        return EventKind::Message;
    }
    EventKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_extraction() {
        assert_eq!(extract_command("/start"), Some("start".into()));
        assert_eq!(extract_command("/start arg1 arg2"), Some("start".into()));
        assert_eq!(extract_command("/start@MyBot hello"), Some("start".into()));
        assert_eq!(extract_command("  /help"), Some("help".into()));
        assert_eq!(extract_command("plain text"), None);
        assert_eq!(extract_command("/"), None);
        assert_eq!(extract_command("/@MyBot"), None);
        assert_eq!(extract_command(""), None);
    }

    fn message_update(text: &str) -> Update {
        serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 5, "first_name": "T"},
                "chat": {"id": 5, "type": "private"},
                "text": text
            }
        }))
        .unwrap()
    }

    #[test]
    fn classification() {
        let client = Arc::new(TelegramClient::new("1:t"));

        let cmd = RequestContext::new("b", client.clone(), None, &message_update("/ping@Bot x"));
        assert_eq!(cmd.event, EventKind::Command("ping".into()));
        assert_eq!(cmd.user_id, Some(5));
        assert_eq!(cmd.chat_id, Some(5));

        let msg = RequestContext::new("b", client.clone(), None, &message_update("hello"));
        assert_eq!(msg.event, EventKind::Message);

        let callback: Update = serde_json::from_value(serde_json::json!({
            "update_id": 2,
            "callback_query": {
                "id": "c", "from": {"id": 9, "first_name": "X"}, "data": "d"
            }
        }))
        .unwrap();
        let cb = RequestContext::new("b", client.clone(), None, &callback);
        assert_eq!(cb.event, EventKind::Callback);

        let bare: Update = serde_json::from_value(serde_json::json!({"update_id": 3})).unwrap();
        let other = RequestContext::new("b", client, None, &bare);
        assert_eq!(other.event, EventKind::Other);
    }
}
