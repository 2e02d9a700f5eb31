//! Periodic background tasks (session TTL sweep).
//!
//! Ticks on tokio's clock, so tests drive them with `start_paused` and virtual time.
//! A spawned tokio task never keeps the process alive; the handle only exists to stop it early.

use crate::session::SessionStore;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Cancellation handle for a task started with [`spawn_periodic`]. Dropping it stops the task.
pub struct PeriodicHandle {
    name: &'static str,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicHandle {
    /// Stop the task. Idempotent.
    pub fn stop(&mut self) {
        if let Some(h) = self.handle.take() {
            h.abort();
            log::debug!("{}: periodic task stopped", self.name);
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map_or(false, |h| !h.is_finished())
    }
}

impl Drop for PeriodicHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Run `tick` every `period`, first after one full period.
pub fn spawn_periodic<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> PeriodicHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handle = tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            tick().await;
        }
    });
    PeriodicHandle {
        name,
        handle: Some(handle),
    }
}

/// Start the recurring TTL sweep over `store`.
pub fn start_session_sweeper(store: Arc<SessionStore>, period: Duration) -> PeriodicHandle {
    log::debug!(
        "sessions: sweeping every {}s (ttl {}s)",
        period.as_secs(),
        store.ttl().as_secs()
    );
    spawn_periodic("sessions", period, move || {
        let store = store.clone();
        async move {
            store.sweep().await;
        }
    })
}
