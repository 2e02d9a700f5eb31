//! Callback resolution: match an engine callback to its session and update the conversation.

use crate::conversation::{deliver, ConversationLayer, Trace, Tracer};
use crate::notices;
use crate::session::SessionStore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Body of `POST /callback`. Either field may be missing, null or empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
}

impl CallbackPayload {
    pub fn response(session_id: &str, text: &str) -> Self {
        Self {
            session_id: Some(session_id.into()),
            response: Some(Value::String(text.into())),
            error: None,
        }
    }

    pub fn error(session_id: &str, text: &str) -> Self {
        Self {
            session_id: Some(session_id.into()),
            response: None,
            error: Some(Value::String(text.into())),
        }
    }

    pub fn error_text(&self) -> Option<String> {
        present(self.error.as_ref())
    }

    pub fn response_text(&self) -> Option<String> {
        present(self.response.as_ref())
    }
}

/// Null, `""` and `false` count as absent; other non-strings are rendered as JSON.
fn present(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// What a callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackOutcome {
    /// No live session under that id (expired, already resolved, or never registered).
    UnknownSession,
    Error,
    Response,
    Blank,
}

pub struct CallbackResolver {
    sessions: Arc<SessionStore>,
    conversation: Arc<dyn ConversationLayer>,
    tracer: Tracer,
    max_len: usize,
}

impl CallbackResolver {
    pub fn new(
        sessions: Arc<SessionStore>,
        conversation: Arc<dyn ConversationLayer>,
        tracer: Tracer,
        max_len: usize,
    ) -> Self {
        Self {
            sessions,
            conversation,
            tracer,
            max_len,
        }
    }

    /// Claims the session atomically, so a repeated callback for the same id is a no-op.
    pub async fn handle_callback(
        &self,
        session_id: &str,
        payload: &CallbackPayload,
    ) -> CallbackOutcome {
        let error = payload.error_text();
        let response = payload.response_text();
        self.tracer
            .emit(
                Trace::new("Callback received")
                    .field("Session", session_id)
                    .field("Has response", if response.is_some() { "yes" } else { "no" })
                    .field("Error", error.as_deref().unwrap_or("none")),
            )
            .await;

        let Some(ctx) = self.sessions.take(session_id).await else {
            log::warn!("callback: no session found for id {}", session_id);
            return CallbackOutcome::UnknownSession;
        };

        let (outcome, text) = if let Some(error) = error {
            log::error!("callback: engine reported an error for {}: {}", session_id, error);
            (
                CallbackOutcome::Error,
                notices::truncate(&notices::engine_error(&error), self.max_len),
            )
        } else if let Some(response) = response {
            (CallbackOutcome::Response, notices::truncate(&response, self.max_len))
        } else {
            log::warn!("callback: empty response for {}", session_id);
            (CallbackOutcome::Blank, notices::BLANK.to_string())
        };

        if let Err(e) = deliver(
            self.conversation.as_ref(),
            &ctx.channel_id,
            ctx.status_message_id.as_deref(),
            &text,
        )
        .await
        {
            log::error!(
                "callback: could not update conversation for {} (user {}): {}",
                session_id,
                ctx.user_tag,
                e
            );
        } else {
            log::info!("callback: resolved session {} for {}", session_id, ctx.user_tag);
        }
        outcome
    }
}
