//! Workflow provisioning: converge the engine to exactly one active, up-to-date workflow
//! under the canonical name, with no other workflow holding the same webhook path.
//!
//! Runs at gateway start and again whenever a dispatch gets a 404. Runs are serialized,
//! so concurrent callers simply reconcile one after another.

use super::api::{WorkflowApi, WorkflowApiError, WorkflowSummary};
use super::template::{self, TemplateError, TemplateSource};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a successful reconciliation did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// No workflow existed; one was created and activated.
    Created { id: String },
    /// An existing workflow was updated to the template and re-activated.
    Updated { id: String },
    /// The workflow was uploaded but the engine refused activation: another workflow holds the webhook path.
    ActivationConflict { id: String },
}

impl ProvisionOutcome {
    pub fn workflow_id(&self) -> &str {
        match self {
            ProvisionOutcome::Created { id }
            | ProvisionOutcome::Updated { id }
            | ProvisionOutcome::ActivationConflict { id } => id,
        }
    }
}

/// Failures that abort a reconciliation run.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("listing workflows failed: {0}")]
    List(#[source] WorkflowApiError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("uploading workflow failed: {0}")]
    Upload(#[source] WorkflowApiError),
    #[error("activating workflow {id} failed: {source}")]
    Activate {
        id: String,
        #[source]
        source: WorkflowApiError,
    },
}

impl ProvisionError {
    /// True when the management API could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        let source = match self {
            ProvisionError::List(e) | ProvisionError::Upload(e) => e,
            ProvisionError::Activate { source, .. } => source,
            ProvisionError::Template(_) => return false,
        };
        matches!(source, WorkflowApiError::Unreachable(_))
    }
}

/// Something that can re-provision the remote workflow on demand (used by the dispatcher after a 404).
#[async_trait]
pub trait WorkflowResync: Send + Sync {
    async fn resync(&self);
}

/// Reconciles the remote workflow definition against the local template.
pub struct WorkflowProvisioner {
    api: Arc<dyn WorkflowApi>,
    name: String,
    webhook_path: String,
    template: TemplateSource,
    run_lock: Mutex<()>,
}

impl WorkflowProvisioner {
    pub fn new(
        api: Arc<dyn WorkflowApi>,
        name: impl Into<String>,
        webhook_path: impl Into<String>,
        template: TemplateSource,
    ) -> Self {
        Self {
            api,
            name: name.into(),
            webhook_path: webhook_path.into(),
            template,
            run_lock: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run one reconciliation, logging instead of returning errors.
    pub async fn ensure_workflow_exists(&self) -> Option<ProvisionOutcome> {
        match self.reconcile().await {
            Ok(outcome) => Some(outcome),
            Err(e) if e.is_unreachable() => {
                log::error!(
                    "provision: could not connect to the workflow api; is the engine running? ({})",
                    e
                );
                None
            }
            Err(e) => {
                log::error!("provision: error during workflow setup: {}", e);
                None
            }
        }
    }

    /// Run one reconciliation. Only listing, uploading, activation and template failures abort;
    /// per-workflow inspection, deactivation and deletion failures are logged and skipped.
    pub async fn reconcile(&self) -> Result<ProvisionOutcome, ProvisionError> {
        let _guard = self.run_lock.lock().await;

        let all = self
            .api
            .list_workflows()
            .await
            .map_err(ProvisionError::List)?;
        log::info!("provision: workflow api reachable, {} workflow(s) listed", all.len());

        let name_matches: Vec<WorkflowSummary> =
            all.iter().filter(|w| w.name == self.name).cloned().collect();
        let path_conflicts = self.find_path_conflicts(&all).await;

        let candidates: Vec<WorkflowSummary> = name_matches
            .iter()
            .chain(path_conflicts.iter())
            .cloned()
            .collect();

        for w in candidates.iter().filter(|w| w.active) {
            log::info!(
                "provision: deactivating workflow \"{}\" ({}) to avoid webhook conflicts",
                w.name,
                w.id
            );
            if let Err(e) = self.api.deactivate_workflow(&w.id).await {
                log::warn!("provision: failed to deactivate workflow {}: {}", w.id, e);
            }
        }

        let canonical = name_matches
            .iter()
            .find(|w| w.active)
            .or_else(|| name_matches.first())
            .or_else(|| path_conflicts.first())
            .cloned();

        for w in &candidates {
            if canonical.as_ref().map_or(false, |c| c.id == w.id) {
                continue;
            }
            log::info!(
                "provision: deleting redundant workflow \"{}\" ({})",
                w.name,
                w.id
            );
            if let Err(e) = self.api.delete_workflow(&w.id).await {
                log::warn!("provision: failed to delete workflow {}: {}", w.id, e);
            }
        }

        let raw = self.template.read().await?;
        let mut definition = template::render(&raw)?;
        if definition.name != self.name {
            log::debug!(
                "provision: template names the workflow \"{}\", uploading as \"{}\"",
                definition.name,
                self.name
            );
            definition.name = self.name.clone();
        }

        match canonical {
            Some(existing) => {
                log::info!(
                    "provision: workflow \"{}\" exists ({}), updating to the local template",
                    self.name,
                    existing.id
                );
                self.api
                    .update_workflow(&existing.id, &definition)
                    .await
                    .map_err(ProvisionError::Upload)?;
                if self.activate(&existing.id).await? {
                    Ok(ProvisionOutcome::Updated { id: existing.id })
                } else {
                    Ok(ProvisionOutcome::ActivationConflict { id: existing.id })
                }
            }
            None => {
                log::info!("provision: workflow \"{}\" missing, creating it", self.name);
                let created = self
                    .api
                    .create_workflow(&definition)
                    .await
                    .map_err(ProvisionError::Upload)?;
                log::info!("provision: created workflow {}", created.id);
                if self.activate(&created.id).await? {
                    Ok(ProvisionOutcome::Created { id: created.id })
                } else {
                    Ok(ProvisionOutcome::ActivationConflict { id: created.id })
                }
            }
        }
    }

    /// Workflows (other than name matches) whose webhook trigger uses our path.
    async fn find_path_conflicts(&self, all: &[WorkflowSummary]) -> Vec<WorkflowSummary> {
        let mut conflicts = Vec::new();
        for w in all.iter().filter(|w| w.name != self.name) {
            match self.api.get_workflow(&w.id).await {
                Ok(detail) if detail.uses_webhook_path(&self.webhook_path) => {
                    log::warn!(
                        "provision: workflow \"{}\" ({}) also uses webhook path \"{}\"",
                        w.name,
                        w.id,
                        self.webhook_path
                    );
                    conflicts.push(w.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    log::debug!("provision: could not inspect workflow {}: {}", w.id, e);
                }
            }
        }
        conflicts
    }

    /// Activate; `Ok(false)` when the engine reports a webhook conflict.
    async fn activate(&self, id: &str) -> Result<bool, ProvisionError> {
        match self.api.activate_workflow(id).await {
            Ok(()) => {
                log::info!("provision: activated workflow {}", id);
                Ok(true)
            }
            Err(e) if e.is_conflict() => {
                log::error!(
                    "CRITICAL: webhook conflict while activating workflow {}. Another workflow is using the \"{}\" path; deactivate it in the workflow engine and restart or trigger a resync.",
                    id,
                    self.webhook_path
                );
                Ok(false)
            }
            Err(source) => Err(ProvisionError::Activate {
                id: id.to_string(),
                source,
            }),
        }
    }
}

#[async_trait]
impl WorkflowResync for WorkflowProvisioner {
    async fn resync(&self) {
        self.ensure_workflow_exists().await;
    }
}
