//! In-flight dispatch sessions: the chat context a workflow callback must be routed back to.
//!
//! Sessions are keyed by an opaque id (a fresh UUID per dispatch) and live at most `ttl`;
//! a periodic sweep drops the ones whose callback never arrived.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;

/// Unique session identifier (opaque string).
pub type SessionId = String;

/// Default lifetime of an unresolved session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(15 * 60);

/// Default period of the expiry sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// New random session id.
pub fn new_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}

/// Conversation context captured when a prompt is dispatched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub channel_id: String,
    /// Placeholder ("thinking...") message to edit with the result; `None` when it could not be posted.
    pub status_message_id: Option<String>,
    pub user_id: String,
    pub user_tag: String,
    pub prompt: String,
}

/// A registered session: context plus registration time.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub context: SessionContext,
    pub created_at: Instant,
}

/// In-memory store for sessions (register, get, clear, sweep).
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<SessionId, Session>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Insert a session stamped with the current time. An existing entry with the same id is replaced.
    pub async fn register(&self, id: impl Into<SessionId>, context: SessionContext) {
        let id = id.into();
        let session = Session {
            id: id.clone(),
            context,
            created_at: Instant::now(),
        };
        if self.inner.write().await.insert(id.clone(), session).is_some() {
            log::warn!("sessions: session {} was registered twice; keeping the latest", id);
        }
    }

    /// Return a clone of the session context if it exists.
    pub async fn get(&self, id: &str) -> Option<SessionContext> {
        self.inner.read().await.get(id).map(|s| s.context.clone())
    }

    /// Remove a session. Missing ids are ignored.
    pub async fn clear(&self, id: &str) {
        self.inner.write().await.remove(id);
    }

    /// Remove and return a session in one step, so only one caller can ever claim it.
    pub async fn take(&self, id: &str) -> Option<SessionContext> {
        self.inner.write().await.remove(id).map(|s| s.context)
    }

    /// Drop every session older than the TTL; returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let mut g = self.inner.write().await;
        let before = g.len();
        g.retain(|_, s| now.duration_since(s.created_at) <= ttl);
        let removed = before - g.len();
        if removed > 0 {
            log::debug!("sessions: swept {} expired session(s), {} left", removed, g.len());
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
