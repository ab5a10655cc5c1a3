//! Argo workflow templates

use std::collections::BTreeMap;

use pipelines_core::convert::{SpecParameter, model_parameters_to_api};
use pipelines_core::domain::{Job, Run};
use pipelines_core::{Error, Result};
use serde_json::Value;

use super::{RunWorkflowOptions, generate_name_prefix};
use crate::workflow::{
    ANNOTATION_ISTIO_SIDECAR_INJECT, ANNOTATION_RUN_NAME, LABEL_RUN_ID, WORKFLOW_API_VERSION,
    WORKFLOW_KIND, Workflow, WorkflowStatus,
};

const WORKFLOW_UID_PLACEHOLDER: &str = "{{workflow.uid}}";

#[derive(Debug, Clone, PartialEq)]
pub struct V1Template {
    workflow: Workflow,
}

impl V1Template {
    pub(super) fn new(value: Value) -> Result<Self> {
        let workflow: Workflow = serde_json::from_value(value)
            .map_err(|e| Error::invalid_input(format!("Failed to parse the Argo workflow: {e}")))?;
        if workflow.api_version != WORKFLOW_API_VERSION || workflow.kind != WORKFLOW_KIND {
            return Err(Error::invalid_input(format!(
                "Unexpected resource type {}/{}, expected {WORKFLOW_API_VERSION}/{WORKFLOW_KIND}",
                workflow.api_version, workflow.kind
            )));
        }
        Ok(Self { workflow })
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub(super) fn parameters_json(&self) -> Result<String> {
        let params: Vec<SpecParameter> = self
            .workflow
            .parameters()
            .into_iter()
            .map(|(name, value)| SpecParameter { name, value })
            .collect();
        if params.is_empty() {
            return Ok(String::new());
        }
        serde_json::to_string(&params)
            .map_err(|e| Error::internal(e, "Failed to marshal the workflow parameters"))
    }

    pub(super) fn bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.workflow)
            .map_err(|e| Error::internal(e, "Failed to marshal the workflow template"))
    }

    /// Copy of the template with parameters and service account applied
    fn instantiate(&self, parameters: &str, service_account: &str) -> Result<Workflow> {
        let mut workflow = self.workflow.clone();
        workflow.status = WorkflowStatus::default();
        workflow.metadata.uid = None;
        workflow.metadata.resource_version = None;
        workflow.metadata.creation_timestamp = None;

        let overrides: BTreeMap<String, String> = model_parameters_to_api(parameters)?
            .into_iter()
            .map(|p| (p.name, p.value))
            .collect();
        workflow.override_parameters(&overrides);
        if !service_account.is_empty() {
            workflow.set_service_account(service_account);
        }
        workflow.set_template_annotation_if_absent(ANNOTATION_ISTIO_SIDECAR_INJECT, "false");
        Ok(workflow)
    }

    pub(super) fn run_workflow(&self, run: &Run, options: &RunWorkflowOptions) -> Result<Workflow> {
        let mut workflow =
            self.instantiate(&run.pipeline_spec.parameters, &run.service_account)?;

        let name = workflow.metadata.name.take();
        if workflow.metadata.generate_name.is_none() {
            let base = name.as_deref().unwrap_or(&run.display_name);
            workflow.metadata.generate_name = Some(generate_name_prefix(base, "run", 50));
        }
        if !run.namespace.is_empty() {
            workflow.metadata.namespace = Some(run.namespace.clone());
        }
        workflow.set_label(LABEL_RUN_ID, options.run_id.clone());
        workflow.set_annotation(ANNOTATION_RUN_NAME, run.display_name.clone());
        replace_uid(&workflow, &options.run_id)
    }

    pub(super) fn job_workflow(&self, job: &Job) -> Result<Workflow> {
        self.instantiate(&job.pipeline_spec.parameters, &job.service_account)
    }
}

/// Substitute the run id wherever the template refers to the workflow uid
fn replace_uid(workflow: &Workflow, run_id: &str) -> Result<Workflow> {
    let text = serde_json::to_string(workflow)
        .map_err(|e| Error::internal(e, "Failed to marshal the workflow"))?;
    if !text.contains(WORKFLOW_UID_PLACEHOLDER) {
        return Ok(workflow.clone());
    }
    serde_json::from_str(&text.replace(WORKFLOW_UID_PLACEHOLDER, run_id))
        .map_err(|e| Error::internal(e, "Failed to replace the workflow uid"))
}
