//! Thin Telegram Bot API client and the update types the supervisor
//! consumes. The wire protocol itself is out of scope; only the
//! methods the core needs are covered.

pub mod client;
pub mod types;

pub use client::TelegramClient;
pub use types::{CallbackQuery, Chat, Message, Update, User};
