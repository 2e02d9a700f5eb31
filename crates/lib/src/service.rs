//! Dispatch service: owns the session store, dispatch client, provisioner and callback resolver
//! for one gateway, and ties inbound chat messages to outbound dispatches.

use crate::callback::{CallbackOutcome, CallbackPayload, CallbackResolver};
use crate::channels::InboundMessage;
use crate::config::{self, ChatConfig, Config};
use crate::conversation::{deliver, ConversationLayer, Trace, Tracer};
use crate::dispatch::{
    DispatchClient, DispatchPayload, DispatchResult, FallbackResolver, HttpTransport, RetryPolicy,
};
use crate::notices;
use crate::session::{new_session_id, SessionContext, SessionStore};
use crate::sweep::{start_session_sweeper, PeriodicHandle};
use crate::workflow::{HttpWorkflowApi, TemplateSource, WorkflowApi, WorkflowProvisioner, WorkflowResync};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct DispatchService {
    chat: ChatConfig,
    sessions: Arc<SessionStore>,
    client: Option<Arc<DispatchClient>>,
    provisioner: Option<Arc<WorkflowProvisioner>>,
    conversation: Arc<dyn ConversationLayer>,
    tracer: Tracer,
    resolver: CallbackResolver,
    sweep_interval: Duration,
    provision_on_start: bool,
    sweeper: Mutex<Option<PeriodicHandle>>,
}

impl DispatchService {
    /// Service with dispatch disabled; add collaborators with the `with_*` builders.
    pub fn new(
        chat: ChatConfig,
        sessions: Arc<SessionStore>,
        conversation: Arc<dyn ConversationLayer>,
    ) -> Self {
        let tracer = Tracer::new(conversation.clone(), chat.trace_channel_id.clone());
        let resolver = CallbackResolver::new(
            sessions.clone(),
            conversation.clone(),
            tracer.clone(),
            chat.max_message_len,
        );
        Self {
            chat,
            sessions,
            client: None,
            provisioner: None,
            conversation,
            tracer,
            resolver,
            sweep_interval: crate::session::DEFAULT_SWEEP_INTERVAL,
            provision_on_start: false,
            sweeper: Mutex::new(None),
        }
    }

    pub fn with_client(mut self, client: Arc<DispatchClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_provisioner(mut self, provisioner: Arc<WorkflowProvisioner>, on_start: bool) -> Self {
        self.provisioner = Some(provisioner);
        self.provision_on_start = on_start;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Wire the HTTP clients from config. A missing webhook URL disables dispatch; a missing
    /// API key disables provisioning and fallback discovery. Both are logged here, once.
    pub fn from_config(
        config: &Config,
        config_path: &Path,
        conversation: Arc<dyn ConversationLayer>,
    ) -> Self {
        let workflow = &config.workflow;
        let webhook_url = config::resolve_webhook_url(config);
        let api_key = config::resolve_api_key(config);
        let api_base = config::resolve_api_base_url(workflow, webhook_url.as_deref());

        let api: Option<Arc<dyn WorkflowApi>> = match (api_base, api_key.clone()) {
            (Some(base), Some(key)) => Some(Arc::new(HttpWorkflowApi::new(
                base,
                key,
                workflow.api_key_header.clone(),
            ))),
            _ => {
                log::warn!(
                    "provision: workflow api key or base url not configured (workflow.apiKey or N8N_API_KEY); provisioning and fallback discovery disabled"
                );
                None
            }
        };

        let provisioner = api.clone().map(|api| {
            Arc::new(WorkflowProvisioner::new(
                api,
                workflow.name.clone(),
                workflow.webhook_path.clone(),
                TemplateSource::File(config::resolve_template_path(config, config_path)),
            ))
        });

        let sessions = Arc::new(SessionStore::new(config.sessions.ttl()));
        let mut service = DispatchService::new(config.chat.clone(), sessions, conversation)
            .with_sweep_interval(config.sessions.sweep_interval());

        match webhook_url {
            Some(url) => {
                let transport = HttpTransport::new(
                    workflow.request_timeout(),
                    api_key.map(|k| (workflow.api_key_header.clone(), k)),
                );
                let fallback = api.map(|api| {
                    FallbackResolver::new(
                        api,
                        workflow.name.clone(),
                        workflow.webhook_path.clone(),
                        config::engine_base_url(&url),
                    )
                });
                let resync = provisioner
                    .clone()
                    .map(|p| p as Arc<dyn WorkflowResync>);
                log::info!("dispatch: webhook url {}", url);
                service = service.with_client(Arc::new(DispatchClient::new(
                    url,
                    Arc::new(transport),
                    resync,
                    fallback,
                    RetryPolicy::from(workflow.retry),
                )));
            }
            None => log::warn!(
                "dispatch: no webhook url configured (workflow.webhookUrl or N8N_WEBHOOK_URL); dispatch disabled"
            ),
        }
        if let Some(p) = provisioner {
            service = service.with_provisioner(p, workflow.provision_on_start);
        }
        service
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn client(&self) -> Option<&Arc<DispatchClient>> {
        self.client.as_ref()
    }

    pub fn provisioner(&self) -> Option<&Arc<WorkflowProvisioner>> {
        self.provisioner.as_ref()
    }

    pub fn dispatch_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Start the session sweep and, when configured, a background provisioning run.
    pub fn start(&self) {
        let mut sweeper = self.sweeper.lock().unwrap_or_else(|e| e.into_inner());
        if sweeper.is_none() {
            *sweeper = Some(start_session_sweeper(self.sessions.clone(), self.sweep_interval));
        }
        drop(sweeper);
        if self.provision_on_start {
            if let Some(ref p) = self.provisioner {
                let p = p.clone();
                tokio::spawn(async move {
                    p.ensure_workflow_exists().await;
                });
            }
        }
    }

    /// Stop the session sweep. In-flight sessions stay until resolved.
    pub fn stop(&self) {
        let handle = self.sweeper.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut h) = handle {
            h.stop();
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .map(|s| s.as_ref().map_or(false, PeriodicHandle::is_running))
            .unwrap_or(false)
    }

    /// Trigger word present (case-insensitive) or the bot addressed directly, and, when
    /// restricted, the right channel.
    pub fn should_dispatch(&self, msg: &InboundMessage) -> bool {
        if let Some(ref only) = self.chat.channel_id {
            if &msg.channel_id != only {
                return false;
            }
        }
        if msg.addressed_to_bot {
            return true;
        }
        let trigger = self.chat.trigger_word.trim().to_lowercase();
        !trigger.is_empty() && msg.text.to_lowercase().contains(&trigger)
    }

    /// Entry point for chat connectors: dispatch triggered messages, ignore the rest.
    pub async fn handle_inbound(&self, msg: InboundMessage) -> Option<DispatchResult> {
        if !self.should_dispatch(&msg) {
            return None;
        }
        self.submit(msg).await
    }

    /// Placeholder, session, dispatch. A failed dispatch is reported in chat right away and its
    /// session cleared. `None` when dispatch is disabled.
    pub async fn submit(&self, msg: InboundMessage) -> Option<DispatchResult> {
        let Some(ref client) = self.client else {
            log::debug!("dispatch: disabled, ignoring message {}", msg.message_id);
            return None;
        };

        if let Err(e) = self.conversation.show_typing(&msg.channel_id).await {
            log::debug!("dispatch: typing indicator failed: {}", e);
        }
        let placeholder = match self
            .conversation
            .reply(&msg.channel_id, &msg.message_id, notices::THINKING)
            .await
        {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("dispatch: could not post placeholder: {}", e);
                None
            }
        };

        let session_id = new_session_id();
        self.sessions
            .register(
                session_id.clone(),
                SessionContext {
                    channel_id: msg.channel_id.clone(),
                    status_message_id: placeholder.clone(),
                    user_id: msg.user_id.clone(),
                    user_tag: msg.user_tag.clone(),
                    prompt: msg.text.clone(),
                },
            )
            .await;

        let payload = DispatchPayload {
            prompt: msg.text.clone(),
            user: msg.user_name.clone(),
            user_id: msg.user_id.clone(),
            session_id: session_id.clone(),
            channel_id: msg.channel_id.clone(),
            message_id: msg.message_id.clone(),
            status_message_id: placeholder.clone(),
            timestamp: chrono::Utc::now(),
        };
        log::info!(
            "dispatch: sending prompt from {} (session {})",
            msg.user_tag,
            session_id
        );
        self.tracer
            .emit(
                Trace::new("Sending to workflow")
                    .field("Session", &session_id)
                    .field("User", &msg.user_tag)
                    .field("Prompt", &msg.text),
            )
            .await;

        let result = client.dispatch(&payload).await;

        self.tracer
            .emit(
                Trace::new("Workflow response")
                    .field(
                        "Status",
                        result.status().map_or("none".to_string(), |s| s.to_string()),
                    )
                    .field("Body", result.to_json().to_string()),
            )
            .await;

        if let DispatchResult::Failed(ref failure) = result {
            let notice = failure.user_notice();
            let shown = match placeholder {
                Some(ref id) => {
                    deliver(self.conversation.as_ref(), &msg.channel_id, Some(id), notice).await
                }
                None => self
                    .conversation
                    .reply(&msg.channel_id, &msg.message_id, notice)
                    .await
                    .map(|_| ()),
            };
            if let Err(e) = shown {
                log::error!("dispatch: could not report failure to {}: {}", msg.user_tag, e);
            }
            self.sessions.clear(&session_id).await;
        }
        Some(result)
    }

    pub async fn handle_callback(&self, session_id: &str, payload: &CallbackPayload) -> CallbackOutcome {
        self.resolver.handle_callback(session_id, payload).await
    }
}

impl Drop for DispatchService {
    fn drop(&mut self) {
        self.stop();
    }
}
