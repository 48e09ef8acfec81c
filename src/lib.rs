//! A small Telegram bot framework: long-poll the Bot API, match each message
//! against an ordered list of handlers, and run the matched handler on a
//! fixed pool of workers.

pub mod api;
pub mod bot;
pub mod config;
pub mod dispatch;
pub mod handler;
pub mod poller;
pub mod types;

pub use api::{ApiError, TelegramClient, UpdateSource};
pub use bot::Bot;
pub use config::{Config, DispatchConfig};
pub use types::{Chat, Message, Update, User};
