//! Chat channels: connectors that implement the conversation layer and feed inbound messages
//! to the dispatch service.

mod inbound;
mod telegram;

pub use inbound::InboundMessage;
pub use telegram::{TelegramChannel, TelegramUpdate, TELEGRAM_API_BASE};
