//! Workflow-management REST client (n8n public API shape).
//!
//! `GET /workflows`, `GET/PUT/DELETE /workflows/:id`, `POST /workflows`,
//! `POST /workflows/:id/activate|deactivate`, all authenticated with the API key header.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const MANAGEMENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Node type of the engine's webhook trigger.
pub const WEBHOOK_NODE_TYPE: &str = "n8n-nodes-base.webhook";

/// Upper bound on `GET /workflows` pages followed in one listing.
pub const MAX_LIST_PAGES: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowApiError {
    /// The management API could not be reached at all (connection refused, DNS, timeout).
    #[error("workflow api unreachable: {0}")]
    Unreachable(String),
    #[error("workflow api returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("workflow api request failed: {0}")]
    Request(String),
    #[error("workflow api response could not be decoded: {0}")]
    Decode(String),
}

impl WorkflowApiError {
    /// True when the engine refused an activation because another workflow holds the webhook path.
    pub fn is_conflict(&self) -> bool {
        match self {
            WorkflowApiError::Status { message, .. } => {
                message.to_lowercase().contains("conflict")
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for WorkflowApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            WorkflowApiError::Unreachable(e.to_string())
        } else if e.is_decode() {
            WorkflowApiError::Decode(e.to_string())
        } else {
            WorkflowApiError::Request(e.to_string())
        }
    }
}

/// Entry of the workflow list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
}

/// One node of a remote workflow; only type and parameters matter here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    #[serde(rename = "type", default)]
    pub typ: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl WorkflowNode {
    /// Path of this node when it is a webhook trigger.
    pub fn webhook_path(&self) -> Option<&str> {
        if self.typ != WEBHOOK_NODE_TYPE {
            return None;
        }
        self.parameters.get("path").and_then(|p| p.as_str())
    }
}

/// Full workflow as returned by `GET /workflows/:id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDetail {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
}

impl WorkflowDetail {
    pub fn uses_webhook_path(&self, path: &str) -> bool {
        self.nodes.iter().any(|n| n.webhook_path() == Some(path))
    }
}

/// Upload body for create/update: the automation graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub nodes: serde_json::Value,
    pub connections: serde_json::Value,
    #[serde(default)]
    pub settings: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListResponse {
    #[serde(default)]
    data: Vec<WorkflowSummary>,
    #[serde(default)]
    next_cursor: Option<String>,
}

/// Operations the provisioner and the fallback resolver need from the engine.
#[async_trait]
pub trait WorkflowApi: Send + Sync {
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, WorkflowApiError>;
    async fn get_workflow(&self, id: &str) -> Result<WorkflowDetail, WorkflowApiError>;
    /// Create a workflow; returns the created entry (with its new id).
    async fn create_workflow(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowSummary, WorkflowApiError>;
    async fn update_workflow(
        &self,
        id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), WorkflowApiError>;
    async fn activate_workflow(&self, id: &str) -> Result<(), WorkflowApiError>;
    async fn deactivate_workflow(&self, id: &str) -> Result<(), WorkflowApiError>;
    async fn delete_workflow(&self, id: &str) -> Result<(), WorkflowApiError>;
}

/// reqwest-backed [`WorkflowApi`].
#[derive(Clone)]
pub struct HttpWorkflowApi {
    base_url: String,
    api_key: String,
    api_key_header: String,
    client: reqwest::Client,
}

impl HttpWorkflowApi {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        api_key_header: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(MANAGEMENT_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_key_header: api_key_header.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response, WorkflowApiError> {
        let res = req
            .header(self.api_key_header.as_str(), self.api_key.as_str())
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(WorkflowApiError::Status {
                status,
                message: error_message(&body),
            });
        }
        Ok(res)
    }
}

/// `message` field of a JSON error body, else the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl WorkflowApi for HttpWorkflowApi {
    async fn list_workflows(&self) -> Result<Vec<WorkflowSummary>, WorkflowApiError> {
        let mut all = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let mut req = self.client.get(self.url("/workflows"));
            if let Some(ref c) = cursor {
                req = req.query(&[("cursor", c.as_str())]);
            }
            let page: ListResponse = self.send(req).await?.json().await?;
            all.extend(page.data);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                Some(next) => {
                    log::warn!("provision: workflow list repeated cursor {}; stopping", next);
                    return Ok(all);
                }
                None => return Ok(all),
            }
        }
        log::warn!(
            "provision: workflow list still paging after {} pages; using what was read",
            MAX_LIST_PAGES
        );
        Ok(all)
    }

    async fn get_workflow(&self, id: &str) -> Result<WorkflowDetail, WorkflowApiError> {
        let req = self.client.get(self.url(&format!("/workflows/{}", id)));
        Ok(self.send(req).await?.json().await?)
    }

    async fn create_workflow(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<WorkflowSummary, WorkflowApiError> {
        let req = self.client.post(self.url("/workflows")).json(definition);
        Ok(self.send(req).await?.json().await?)
    }

    async fn update_workflow(
        &self,
        id: &str,
        definition: &WorkflowDefinition,
    ) -> Result<(), WorkflowApiError> {
        let req = self
            .client
            .put(self.url(&format!("/workflows/{}", id)))
            .json(definition);
        self.send(req).await?;
        Ok(())
    }

    async fn activate_workflow(&self, id: &str) -> Result<(), WorkflowApiError> {
        let req = self
            .client
            .post(self.url(&format!("/workflows/{}/activate", id)))
            .json(&serde_json::json!({}));
        self.send(req).await?;
        Ok(())
    }

    async fn deactivate_workflow(&self, id: &str) -> Result<(), WorkflowApiError> {
        let req = self
            .client
            .post(self.url(&format!("/workflows/{}/deactivate", id)))
            .json(&serde_json::json!({}));
        self.send(req).await?;
        Ok(())
    }

    async fn delete_workflow(&self, id: &str) -> Result<(), WorkflowApiError> {
        let req = self.client.delete(self.url(&format!("/workflows/{}", id)));
        self.send(req).await?;
        Ok(())
    }
}
