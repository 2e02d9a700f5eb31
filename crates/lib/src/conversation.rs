//! Conversation layer: what the dispatch subsystem needs from the chat side.
//!
//! Placeholder replies, edits, plain sends and a typing indicator. Chat adapters (e.g. Telegram)
//! implement [`ConversationLayer`]; [`LogConversation`] stands in when none is configured.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConversationError {
    /// The message to edit no longer exists (deleted, or from another bot instance).
    #[error("message {0} not found")]
    MessageNotFound(String),
    #[error("{0}")]
    Transport(String),
}

/// Chat operations used by dispatch and callback handling.
#[async_trait]
pub trait ConversationLayer: Send + Sync {
    /// Show a "typing" indicator in the channel.
    async fn show_typing(&self, channel_id: &str) -> Result<(), ConversationError>;

    /// Reply to `message_id`; returns the id of the new message (used as the editable placeholder).
    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String, ConversationError>;

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), ConversationError>;

    /// Send a new message; returns its id.
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<String, ConversationError>;

    /// Post an operator trace. Default renders it as plain text.
    async fn post_trace(&self, channel_id: &str, trace: &Trace) -> Result<(), ConversationError> {
        self.send_message(channel_id, &trace.render()).await.map(|_| ())
    }
}

/// Edit the placeholder when there is one (falling back to a new message if it vanished),
/// otherwise send a new message.
pub async fn deliver(
    conversation: &dyn ConversationLayer,
    channel_id: &str,
    placeholder_id: Option<&str>,
    text: &str,
) -> Result<(), ConversationError> {
    if let Some(id) = placeholder_id {
        match conversation.edit_message(channel_id, id, text).await {
            Ok(()) => return Ok(()),
            Err(ConversationError::MessageNotFound(_)) => {
                log::debug!("conversation: placeholder {} gone, sending a new message", id);
            }
            Err(e) => return Err(e),
        }
    }
    conversation.send_message(channel_id, text).await.map(|_| ())
}

/// Short diagnostic record: a title and labelled fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trace {
    pub title: String,
    pub fields: Vec<(String, String)>,
}

const TRACE_FIELD_MAX: usize = 700;

impl Trace {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    /// Add a field; long values are truncated.
    pub fn field(mut self, name: impl Into<String>, value: impl AsRef<str>) -> Self {
        self.fields.push((
            name.into(),
            crate::notices::truncate(value.as_ref(), TRACE_FIELD_MAX),
        ));
        self
    }

    pub fn render(&self) -> String {
        let mut out = format!("**{}**", self.title);
        for (name, value) in &self.fields {
            out.push('\n');
            out.push_str(name);
            out.push_str(": ");
            out.push_str(value);
        }
        out
    }
}

/// Posts traces to the configured trace channel; a no-op without one. Never fails.
#[derive(Clone)]
pub struct Tracer {
    conversation: Arc<dyn ConversationLayer>,
    channel_id: Option<String>,
}

impl Tracer {
    pub fn new(conversation: Arc<dyn ConversationLayer>, channel_id: Option<String>) -> Self {
        Self {
            conversation,
            channel_id,
        }
    }

    pub async fn emit(&self, trace: Trace) {
        let Some(ref channel) = self.channel_id else {
            return;
        };
        if let Err(e) = self.conversation.post_trace(channel, &trace).await {
            log::debug!("conversation: trace \"{}\" not posted: {}", trace.title, e);
        }
    }
}

/// Conversation layer that only logs; used when no chat connector is configured.
#[derive(Default)]
pub struct LogConversation {
    next_id: AtomicU64,
}

impl LogConversation {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> String {
        format!("log-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl ConversationLayer for LogConversation {
    async fn show_typing(&self, channel_id: &str) -> Result<(), ConversationError> {
        log::debug!("conversation[{}]: typing", channel_id);
        Ok(())
    }

    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String, ConversationError> {
        let id = self.next();
        log::info!("conversation[{}]: reply {} to {}: {}", channel_id, id, message_id, text);
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), ConversationError> {
        log::info!("conversation[{}]: edit {}: {}", channel_id, message_id, text);
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<String, ConversationError> {
        let id = self.next();
        log::info!("conversation[{}]: send {}: {}", channel_id, id, text);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Recorded, RecordingConversation};

    #[tokio::test]
    async fn deliver_edits_placeholder() {
        let conv = RecordingConversation::new();
        deliver(&conv, "c", Some("p1"), "done").await.unwrap();
        assert_eq!(
            conv.events(),
            vec![Recorded::Edit("c".into(), "p1".into(), "done".into())]
        );
    }

    #[tokio::test]
    async fn deliver_sends_when_placeholder_missing_or_gone() {
        let conv = RecordingConversation::new();
        deliver(&conv, "c", None, "one").await.unwrap();
        conv.forget_message("p2");
        deliver(&conv, "c", Some("p2"), "two").await.unwrap();
        assert_eq!(
            conv.events(),
            vec![
                Recorded::Send("c".into(), "one".into()),
                Recorded::Send("c".into(), "two".into()),
            ]
        );
    }

    #[tokio::test]
    async fn tracer_without_channel_is_silent() {
        let conv = Arc::new(RecordingConversation::new());
        Tracer::new(conv.clone(), None).emit(Trace::new("x")).await;
        assert!(conv.events().is_empty());
        Tracer::new(conv.clone(), Some("trace".into()))
            .emit(Trace::new("Callback").field("Session", "s1"))
            .await;
        assert_eq!(
            conv.events(),
            vec![Recorded::Send("trace".into(), "**Callback**\nSession: s1".into())]
        );
    }

    #[tokio::test]
    async fn log_conversation_issues_distinct_ids() {
        let conv = LogConversation::new();
        let a = conv.reply("c", "m", "hi").await.unwrap();
        let b = conv.send_message("c", "hi").await.unwrap();
        assert_ne!(a, b);
    }
}
