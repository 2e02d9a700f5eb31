//! In-memory fakes for the collaborator traits, shared by the unit tests.

use crate::conversation::{ConversationError, ConversationLayer};
use crate::dispatch::{DispatchPayload, TransportError, WebhookResponse, WebhookTransport};
use crate::workflow::{
    WorkflowApi, WorkflowApiError, WorkflowDefinition, WorkflowDetail, WorkflowResync,
    WorkflowSummary, WEBHOOK_NODE_TYPE,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub fn payload(session_id: &str) -> DispatchPayload {
    DispatchPayload {
        prompt: "what is rust".into(),
        user: "alice".into(),
        user_id: "u1".into(),
        session_id: session_id.into(),
        channel_id: "c1".into(),
        message_id: "m1".into(),
        status_message_id: Some("p1".into()),
        timestamp: chrono::Utc::now(),
    }
}

#[derive(Debug, Clone)]
pub struct FakeWorkflow {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub nodes: Value,
}

impl FakeWorkflow {
    pub fn named(id: &str, name: &str, active: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            active,
            nodes: json!([]),
        }
    }

    pub fn with_webhook(id: &str, name: &str, active: bool, path: &str) -> Self {
        Self {
            nodes: json!([{"type": WEBHOOK_NODE_TYPE, "parameters": {"path": path}}]),
            ..Self::named(id, name, active)
        }
    }
}

#[derive(Default)]
struct EngineState {
    workflows: Vec<FakeWorkflow>,
    calls: Vec<String>,
    last_upload: Option<WorkflowDefinition>,
    fail_get: HashSet<String>,
    fail_deactivate: HashSet<String>,
    fail_delete: HashSet<String>,
    unreachable: bool,
    conflict_on_activate: bool,
    next_id: usize,
}

/// Workflow engine kept in memory. Every call is recorded as `op` or `op:id`.
#[derive(Default)]
pub struct FakeWorkflowApi {
    state: Mutex<EngineState>,
}

impl FakeWorkflowApi {
    pub fn new(workflows: Vec<FakeWorkflow>) -> Self {
        Self {
            state: Mutex::new(EngineState {
                workflows,
                ..Default::default()
            }),
        }
    }

    pub fn workflows(&self) -> Vec<FakeWorkflow> {
        self.state.lock().unwrap().workflows.clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn last_upload(&self) -> Option<WorkflowDefinition> {
        self.state.lock().unwrap().last_upload.clone()
    }

    pub fn fail_get(&self, id: &str) {
        self.state.lock().unwrap().fail_get.insert(id.into());
    }

    pub fn fail_deactivate(&self, id: &str) {
        self.state.lock().unwrap().fail_deactivate.insert(id.into());
    }

    pub fn fail_delete(&self, id: &str) {
        self.state.lock().unwrap().fail_delete.insert(id.into());
    }

    pub fn set_unreachable(&self) {
        self.state.lock().unwrap().unreachable = true;
    }

    pub fn conflict_on_activate(&self) {
        self.state.lock().unwrap().conflict_on_activate = true;
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, EngineState> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

fn unreachable() -> WorkflowApiError {
    WorkflowApiError::Unreachable("connection refused".into())
}

fn not_found(id: &str) -> WorkflowApiError {
    WorkflowApiError::Status {
        status: 404,
        message: format!("workflow {} not found", id),
    }
}

fn server_error(op: &str) -> WorkflowApiError {
    WorkflowApiError::Status {
        status: 500,
        message: format!("{} failed", op),
    }
}

#[async_trait]
impl WorkflowApi for FakeWorkflowApi {
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, WorkflowApiError> {
        let state = self.record("list".into());
        if state.unreachable {
            return Err(unreachable());
        }
        Ok(state
            .workflows
            .iter()
            .map(|w| WorkflowSummary {
                id: w.id.clone(),
                name: w.name.clone(),
                active: w.active,
            })
            .collect())
    }

    async fn get_workflow(&self, id: &str) -> Result<WorkflowDetail, WorkflowApiError> {
        let state = self.record(format!("get:{}", id));
        if state.unreachable {
            return Err(unreachable());
        }
        if state.fail_get.contains(id) {
            return Err(server_error("get"));
        }
        let w = state
            .workflows
            .iter()
            .find(|w| w.id == id)
            .ok_or_else(|| not_found(id))?;
        Ok(WorkflowDetail {
            id: w.id.clone(),
            name: w.name.clone(),
            active: w.active,
            nodes: serde_json::from_value(w.nodes.clone()).unwrap_or_default(),
        })
    }

    async fn create_workflow(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowSummary, WorkflowApiError> {
        let mut state = self.record("create".into());
        if state.unreachable {
            return Err(unreachable());
        }
        state.next_id += 1;
        let id = format!("wf-new-{}", state.next_id);
        state.workflows.push(FakeWorkflow {
            id: id.clone(),
            name: definition.name.clone(),
            active: false,
            nodes: definition.nodes.clone(),
        });
        state.last_upload = Some(definition.clone());
        Ok(WorkflowSummary {
            id,
            name: definition.name.clone(),
            active: false,
        })
    }

    async fn update_workflow(
        &self,
        id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), WorkflowApiError> {
        let mut state = self.record(format!("update:{}", id));
        if state.unreachable {
            return Err(unreachable());
        }
        let w = state
            .workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| not_found(id))?;
        w.name = definition.name.clone();
        w.nodes = definition.nodes.clone();
        state.last_upload = Some(definition.clone());
        Ok(())
    }

    async fn activate_workflow(&self, id: &str) -> Result<(), WorkflowApiError> {
        let mut state = self.record(format!("activate:{}", id));
        if state.unreachable {
            return Err(unreachable());
        }
        if state.conflict_on_activate {
            return Err(WorkflowApiError::Status {
                status: 400,
                message: "There is a conflict with one of the webhooks.".into(),
            });
        }
        let w = state
            .workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| not_found(id))?;
        w.active = true;
        Ok(())
    }

    async fn deactivate_workflow(&self, id: &str) -> Result<(), WorkflowApiError> {
        let mut state = self.record(format!("deactivate:{}", id));
        if state.unreachable {
            return Err(unreachable());
        }
        if state.fail_deactivate.contains(id) {
            return Err(server_error("deactivate"));
        }
        let w = state
            .workflows
            .iter_mut()
            .find(|w| w.id == id)
            .ok_or_else(|| not_found(id))?;
        w.active = false;
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), WorkflowApiError> {
        let mut state = self.record(format!("delete:{}", id));
        if state.unreachable {
            return Err(unreachable());
        }
        if state.fail_delete.contains(id) {
            return Err(server_error("delete"));
        }
        let before = state.workflows.len();
        state.workflows.retain(|w| w.id != id);
        if state.workflows.len() == before {
            return Err(not_found(id));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingResync {
    count: AtomicUsize,
}

impl CountingResync {
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkflowResync for CountingResync {
    async fn resync(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scripted webhook: `Ok(status)` answers with `{"received": true}`, `Err(status)` with a
/// status error. Out of script means a network error.
pub struct FakeTransport {
    script: Mutex<VecDeque<Result<u16, u16>>>,
    always_timeout: bool,
    urls: Mutex<Vec<String>>,
    payloads: Mutex<Vec<DispatchPayload>>,
}

impl FakeTransport {
    pub fn new(script: Vec<Result<u16, u16>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            always_timeout: false,
            urls: Mutex::new(Vec::new()),
            payloads: Mutex::new(Vec::new()),
        }
    }

    pub fn timeouts() -> Self {
        Self {
            always_timeout: true,
            ..Self::new(vec![])
        }
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }

    pub fn payloads(&self) -> Vec<DispatchPayload> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebhookTransport for FakeTransport {
    async fn post(
        &self,
        url: &str,
        payload: &DispatchPayload,
    ) -> Result<WebhookResponse, TransportError> {
        self.urls.lock().unwrap().push(url.to_string());
        self.payloads.lock().unwrap().push(payload.clone());
        if self.always_timeout {
            return Err(TransportError::Timeout);
        }
        match self.script.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(WebhookResponse {
                status,
                body: json!({"received": true}),
            }),
            Some(Err(status)) => Err(TransportError::Status {
                status,
                body: json!({"message": "error"}),
            }),
            None => Err(TransportError::Network("connection refused".into())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recorded {
    Typing(String),
    Reply(String, String, String),
    Edit(String, String, String),
    Send(String, String),
}

#[derive(Default)]
struct ChatState {
    events: Vec<Recorded>,
    gone: HashSet<String>,
    fail_replies: bool,
    next_id: usize,
}

/// Chat that records every successful operation. Message ids are `r1`, `r2`, ...
#[derive(Default)]
pub struct RecordingConversation {
    state: Mutex<ChatState>,
}

impl RecordingConversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Recorded> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn edits(&self) -> Vec<Recorded> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Recorded::Edit(..)))
            .collect()
    }

    /// Edits of `message_id` will fail with `MessageNotFound`.
    pub fn forget_message(&self, message_id: &str) {
        self.state.lock().unwrap().gone.insert(message_id.into());
    }

    pub fn fail_replies(&self) {
        self.state.lock().unwrap().fail_replies = true;
    }
}

#[async_trait]
impl ConversationLayer for RecordingConversation {
    async fn show_typing(&self, channel_id: &str) -> Result<(), ConversationError> {
        let mut state = self.state.lock().unwrap();
        state.events.push(Recorded::Typing(channel_id.into()));
        Ok(())
    }

    async fn reply(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<String, ConversationError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_replies {
            return Err(ConversationError::Transport("reply rejected".into()));
        }
        state.next_id += 1;
        let id = format!("r{}", state.next_id);
        state
            .events
            .push(Recorded::Reply(channel_id.into(), message_id.into(), text.into()));
        Ok(id)
    }

    async fn edit_message(
        &self,
        channel_id: &str,
        message_id: &str,
        text: &str,
    ) -> Result<(), ConversationError> {
        let mut state = self.state.lock().unwrap();
        if state.gone.contains(message_id) {
            return Err(ConversationError::MessageNotFound(message_id.into()));
        }
        state
            .events
            .push(Recorded::Edit(channel_id.into(), message_id.into(), text.into()));
        Ok(())
    }

    async fn send_message(&self, channel_id: &str, text: &str) -> Result<String, ConversationError> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = format!("r{}", state.next_id);
        state.events.push(Recorded::Send(channel_id.into(), text.into()));
        Ok(id)
    }
}
