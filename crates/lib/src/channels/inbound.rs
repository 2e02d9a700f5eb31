//! Inbound chat message: what a channel hands to the dispatch service.

/// A user message from a chat channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation the message arrived in (Telegram chat id, etc.).
    pub channel_id: String,
    pub message_id: String,
    pub user_id: String,
    /// Display name sent to the workflow as `user`.
    pub user_name: String,
    /// Unique handle used in logs.
    pub user_tag: String,
    pub text: String,
    /// Mentions the bot by handle or replies to one of its messages.
    pub addressed_to_bot: bool,
}
