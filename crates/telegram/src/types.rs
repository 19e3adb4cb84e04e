//! Bot API payload types, limited to the fields the core consumes.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

impl Message {
    /// Text content of the message: `text` for plain messages,
    /// `caption` for media.
    pub fn content(&self) -> Option<&str> {
        self.text.as_deref().or(self.caption.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub data: Option<String>,
}

/// One inbound update. Exactly one of the payload fields is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
    #[serde(default)]
    pub callback_query: Option<CallbackQuery>,
}

impl Update {
    /// The user who produced this update, regardless of payload kind.
    pub fn from_user(&self) -> Option<&User> {
        if let Some(cb) = &self.callback_query {
            return Some(&cb.from);
        }
        self.any_message().and_then(|m| m.from.as_ref())
    }

    /// The chat to answer into, when one exists.
    pub fn chat_id(&self) -> Option<i64> {
        if let Some(cb) = &self.callback_query {
            return cb.message.as_ref().map(|m| m.chat.id);
        }
        self.any_message().map(|m| m.chat.id)
    }

    /// The message payload (new or edited), if this is a message update.
    pub fn any_message(&self) -> Option<&Message> {
        self.message.as_ref().or(self.edited_message.as_ref())
    }

    /// Message text / caption, or callback data.
    pub fn content(&self) -> Option<&str> {
        if let Some(cb) = &self.callback_query {
            return cb.data.as_deref();
        }
        self.any_message().and_then(|m| m.content())
    }
}
