//! Dispatch client: deliver a payload to the workflow webhook within the retry policy.

use super::payload::{DispatchFailure, DispatchPayload, DispatchResult, FailureKind};
use super::retry::{
    target_url, transition, AttemptOutcome, DispatchEvent, DispatchState, RetryPolicy,
};
use super::transport::{TransportError, WebhookTransport};
use crate::workflow::{WorkflowApi, WorkflowResync};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Finds an alternate webhook URL derived from the workflow's id.
pub struct FallbackResolver {
    api: Arc<dyn WorkflowApi>,
    workflow_name: String,
    webhook_path: String,
    engine_base_url: String,
}

impl FallbackResolver {
    pub fn new(
        api: Arc<dyn WorkflowApi>,
        workflow_name: impl Into<String>,
        webhook_path: impl Into<String>,
        engine_base_url: impl Into<String>,
    ) -> Self {
        Self {
            api,
            workflow_name: workflow_name.into(),
            webhook_path: webhook_path.into(),
            engine_base_url: engine_base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// `{engine}/webhook/{workflowId}/{path}` for the canonical workflow (active one preferred).
    pub async fn resolve(&self) -> Option<String> {
        let workflows = match self.api.list_workflows().await {
            Ok(w) => w,
            Err(e) => {
                log::warn!("dispatch: fallback lookup failed: {}", e);
                return None;
            }
        };
        let matches: Vec<_> = workflows
            .iter()
            .filter(|w| w.name == self.workflow_name)
            .collect();
        let Some(found) = matches.iter().find(|w| w.active).or_else(|| matches.first()) else {
            log::warn!(
                "dispatch: no workflow named \"{}\" to derive a fallback url from",
                self.workflow_name
            );
            return None;
        };
        Some(format!(
            "{}/webhook/{}/{}",
            self.engine_base_url,
            found.id,
            self.webhook_path.trim_start_matches('/')
        ))
    }
}

/// Sends prompts to the workflow webhook: at most three attempts, with provisioning resync and
/// fallback-URL recovery on 404s. Never returns an error; every outcome is a [`DispatchResult`].
pub struct DispatchClient {
    webhook_url: String,
    transport: Arc<dyn WebhookTransport>,
    resync: Option<Arc<dyn WorkflowResync>>,
    fallback: Option<FallbackResolver>,
    policy: RetryPolicy,
    fallback_url: RwLock<Option<String>>,
}

impl DispatchClient {
    /// Recoveries without a collaborator (no `resync`, no `fallback`) are switched off.
    pub fn new(
        webhook_url: impl Into<String>,
        transport: Arc<dyn WebhookTransport>,
        resync: Option<Arc<dyn WorkflowResync>>,
        fallback: Option<FallbackResolver>,
        policy: RetryPolicy,
    ) -> Self {
        let policy = RetryPolicy {
            resync_on_not_found: policy.resync_on_not_found && resync.is_some(),
            fallback_on_not_found: policy.fallback_on_not_found && fallback.is_some(),
        };
        Self {
            webhook_url: webhook_url.into(),
            transport,
            resync,
            fallback,
            policy,
            fallback_url: RwLock::new(None),
        }
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fallback URL resolved by an earlier dispatch, if any.
    pub async fn cached_fallback_url(&self) -> Option<String> {
        self.fallback_url.read().await.clone()
    }

    async fn resolve_fallback(&self) -> Option<String> {
        if let Some(url) = self.cached_fallback_url().await {
            return Some(url);
        }
        let url = self.fallback.as_ref()?.resolve().await?;
        log::info!("dispatch: resolved fallback webhook url {}", url);
        // Concurrent resolutions converge on the same value; last write wins.
        *self.fallback_url.write().await = Some(url.clone());
        Some(url)
    }

    pub async fn dispatch(&self, payload: &DispatchPayload) -> DispatchResult {
        let mut state = DispatchState::Attempting(1);
        let mut last: Option<DispatchResult> = None;
        loop {
            state = match state {
                DispatchState::Attempting(n) => {
                    let fallback = self.cached_fallback_url().await;
                    let url = target_url(n, &self.webhook_url, fallback.as_deref());
                    log::debug!(
                        "dispatch: session {} attempt {} -> {}",
                        payload.session_id,
                        n,
                        url
                    );
                    let (outcome, result) = match self.transport.post(url, payload).await {
                        Ok(res) => (
                            AttemptOutcome::Success,
                            DispatchResult::Delivered {
                                status: res.status,
                                data: res.body,
                            },
                        ),
                        Err(e) => {
                            let (outcome, failure) = classify(e);
                            log_failure(n, url, &failure);
                            (outcome, DispatchResult::Failed(failure))
                        }
                    };
                    last = Some(result);
                    transition(state, DispatchEvent::Attempted(outcome), &self.policy)
                }
                DispatchState::ResyncAndRetry(_) => {
                    log::info!("dispatch: re-provisioning workflow after 404");
                    if let Some(ref resync) = self.resync {
                        resync.resync().await;
                    }
                    transition(state, DispatchEvent::Resynced, &self.policy)
                }
                DispatchState::ResolveFallbackAndRetry(_) => {
                    let resolved = self.resolve_fallback().await.is_some();
                    transition(state, DispatchEvent::FallbackResolved(resolved), &self.policy)
                }
                DispatchState::Failed | DispatchState::Succeeded => {
                    return last.unwrap_or_else(|| {
                        DispatchResult::Failed(DispatchFailure::new(
                            FailureKind::Network,
                            "no dispatch attempt was made",
                        ))
                    });
                }
            };
        }
    }
}

fn classify(e: TransportError) -> (AttemptOutcome, DispatchFailure) {
    let error = e.to_string();
    match e {
        TransportError::Timeout => (
            AttemptOutcome::Timeout,
            DispatchFailure::new(FailureKind::Timeout, error),
        ),
        TransportError::Network(_) => (
            AttemptOutcome::Failure,
            DispatchFailure::new(FailureKind::Network, error),
        ),
        TransportError::Status { status, body } => {
            let (outcome, kind) = match status {
                404 => (AttemptOutcome::NotFound, FailureKind::NotFound),
                401 | 403 => (AttemptOutcome::Failure, FailureKind::Unauthorized),
                _ => (AttemptOutcome::Failure, FailureKind::Http),
            };
            let data = if body.is_null() { None } else { Some(body) };
            (
                outcome,
                DispatchFailure {
                    kind,
                    status: Some(status),
                    error,
                    data,
                },
            )
        }
    }
}

fn log_failure(attempt: u8, url: &str, failure: &DispatchFailure) {
    match failure.kind {
        FailureKind::Timeout => log::error!(
            "dispatch: attempt {} timed out; the workflow engine may be taking too long",
            attempt
        ),
        FailureKind::NotFound => log::warn!(
            "dispatch: attempt {} got 404 from {}; make sure the workflow is imported and active",
            attempt,
            url
        ),
        FailureKind::Unauthorized => log::error!(
            "dispatch: attempt {} unauthorized ({}); check the API key",
            attempt,
            failure.status.unwrap_or_default()
        ),
        _ => log::error!("dispatch: attempt {} failed: {}", attempt, failure.error),
    }
    if let Some(ref data) = failure.data {
        log::debug!("dispatch: error response body: {}", data);
    }
}
