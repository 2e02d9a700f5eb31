//! Wire payload sent to the workflow webhook and the typed result of a dispatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Body POSTed to the webhook. `sessionId` ties the eventual callback back to the chat context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchPayload {
    pub prompt: String,
    pub user: String,
    pub user_id: String,
    pub session_id: String,
    pub channel_id: String,
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message_id: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Why a dispatch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The attempt exceeded the request timeout.
    Timeout,
    /// 404 that the retry policy could not recover from.
    NotFound,
    /// 401 or 403.
    Unauthorized,
    /// Any other non-2xx status.
    Http,
    /// Connection-level failure.
    Network,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchFailure {
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub error: String,
    pub data: Option<Value>,
}

impl DispatchFailure {
    pub fn new(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            error: error.into(),
            data: None,
        }
    }

    /// Chat notice for this failure: offline (404), unauthorized (401/403), otherwise busy.
    pub fn user_notice(&self) -> &'static str {
        match self.kind {
            FailureKind::NotFound => crate::notices::OFFLINE,
            FailureKind::Unauthorized => crate::notices::UNAUTHORIZED,
            _ => crate::notices::BUSY,
        }
    }
}

/// Outcome of [`DispatchClient::dispatch`](super::DispatchClient::dispatch). Always produced, never an error.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchResult {
    Delivered { status: u16, data: Value },
    Failed(DispatchFailure),
}

impl DispatchResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, DispatchResult::Delivered { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            DispatchResult::Delivered { status, .. } => Some(*status),
            DispatchResult::Failed(f) => f.status,
        }
    }

    /// `{ok: true, status, data}` or `{ok: false, status?, error, data?}`.
    pub fn to_json(&self) -> Value {
        match self {
            DispatchResult::Delivered { status, data } => {
                json!({ "ok": true, "status": status, "data": data })
            }
            DispatchResult::Failed(f) => {
                let mut v = json!({ "ok": false, "error": f.error });
                if let Some(s) = f.status {
                    v["status"] = json!(s);
                }
                if let Some(ref d) = f.data {
                    v["data"] = d.clone();
                }
                v
            }
        }
    }
}
