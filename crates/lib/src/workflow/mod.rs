//! Remote workflow definition: management API, template, and provisioning.

mod api;
mod provisioner;
mod template;

pub use api::{
    HttpWorkflowApi, WorkflowApi, WorkflowApiError, WorkflowDefinition, WorkflowDetail,
    WorkflowNode, WorkflowSummary, WEBHOOK_NODE_TYPE,
};
pub use provisioner::{ProvisionError, ProvisionOutcome, WorkflowProvisioner, WorkflowResync};
pub use template::{prefill, render, render_with, TemplateError, TemplateSource, BUNDLED_TEMPLATE};
