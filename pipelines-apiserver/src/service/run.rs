//! Run operations

use chrono::Utc;
use pipelines_core::domain::{
    FilterContext, PipelineVersion, ResourceType, Run, RunMetric, RuntimeState, StorageState,
};
use pipelines_core::reference::{ReferenceNames, Relations};
use pipelines_core::{Error, Result, ResultExt};
use serde_json::json;
use uuid::Uuid;

use super::{ResourceManager, retry_k8s};
use crate::repository::{ListOptions, ListPage};
use crate::template::{RunWorkflowOptions, Template, TemplateType};
use crate::workflow::Workflow;

impl ResourceManager {
    /// Create a run and start the workflow that executes it
    ///
    /// The workflow is created before the row is written. If the write fails
    /// the workflow is left running without a row; the reporting path
    /// deletes it on its first report.
    pub async fn create_run(&self, mut run: Run) -> Result<Run> {
        if run.display_name.trim().is_empty() {
            return Err(Error::invalid_input("Run name cannot be empty"));
        }
        if run.experiment_id.is_empty() {
            if self.config.multi_user {
                return Err(Error::invalid_input(
                    "Failed to create a run: an experiment is required in multi-user mode",
                ));
            }
            run.experiment_id = self
                .default_experiment_id()
                .await
                .context("Failed to create a run with an empty experiment id")?;
        }
        let experiment = self
            .stores
            .experiments
            .get(&run.experiment_id)
            .await
            .context("Failed to create a run")?;
        if run.namespace.is_empty() {
            run.namespace = self
                .namespace_from_experiment_id(&run.experiment_id)
                .await
                .context("Failed to create a run")?;
        }
        if self.config.multi_user && run.namespace.is_empty() {
            return Err(Error::invalid_input(
                "Run cannot have an empty namespace in multi-user mode",
            ));
        }
        self.validate_experiment_namespace(&run.experiment_id, &run.namespace)
            .await
            .context("Failed to create a run")?;

        let version = self.resolve_spec_version(&run.pipeline_spec).await?;
        if let Some(version) = &version {
            run.pipeline_spec.pipeline_id = version.pipeline_id.clone();
            run.pipeline_spec.pipeline_version_id = version.id.clone();
            run.pipeline_spec.pipeline_name = version.name.clone();
        }
        let manifest = self
            .fetch_spec_template(&run.pipeline_spec)
            .await
            .context("Failed to create a run with an empty pipeline spec manifest")?;
        let template = Template::parse(&manifest).context("Failed to create a run")?;
        keep_manifest(&mut run.pipeline_spec, template.template_type(), manifest)?;

        if run.id.is_empty() {
            run.id = Uuid::new_v4().to_string();
        }
        let now = Utc::now();
        run.created_at = now;
        if run.service_account.is_empty() {
            run.service_account = self.config.default_service_account.clone();
        }

        let options = RunWorkflowOptions {
            run_id: run.id.clone(),
            run_at: now,
        };
        let mut workflow = template
            .run_workflow(&run, &options)
            .map_err(|e| Error::internal(e, "Failed to generate the workflow"))?;
        workflow.metadata.namespace = Some(run.namespace.clone());
        workflow.validate().map_err(|e| {
            Error::internal(e, format!("Failed to validate the workflow of run {}", run.id))
        })?;

        let created = self
            .clients
            .workflows
            .create(&run.namespace, &workflow)
            .await
            .map_err(|e| {
                Error::internal(e, format!("Failed to create a workflow for run {}", run.id))
            })?;

        run.k8s_name = created.name().to_string();
        if !created.service_account().is_empty() {
            run.service_account = created.service_account().to_string();
        }
        let state = match RuntimeState::from_condition(created.condition()) {
            RuntimeState::Unspecified => RuntimeState::Pending,
            state => state,
        };
        run.transition(state, now);
        run.conditions = state.to_v1().to_string();
        if template.template_type() == TemplateType::V1 && run.workflow_runtime_manifest.is_empty() {
            run.workflow_runtime_manifest = created.to_store_string()?;
        }
        if run.scheduled_at.is_none() {
            run.scheduled_at = Some(now);
        }
        run.storage_state = StorageState::Available;
        run.resource_references = self
            .run_references(&run, &experiment.name, version.as_ref())
            .await
            .context("Failed to create a run")?;

        let run = self
            .stores
            .runs
            .create(&run)
            .await
            .context("Failed to create a run")?;
        tracing::info!("Run created: {} ({}) workflow {}", run.display_name, run.id, run.k8s_name);
        Ok(run)
    }

    /// Version a run or job spec points at, if any
    ///
    /// Inline manifests need no version.
    pub(super) async fn resolve_spec_version(
        &self,
        spec: &pipelines_core::domain::PipelineSpec,
    ) -> Result<Option<PipelineVersion>> {
        if !spec.pipeline_version_id.is_empty() {
            let version = self
                .stores
                .pipelines
                .get_pipeline_version(&spec.pipeline_version_id)
                .await
                .with_context(|| {
                    format!("Invalid pipeline version id {}", spec.pipeline_version_id)
                })?;
            return Ok(Some(version));
        }
        if !spec.pipeline_id.is_empty() {
            return self.get_latest_pipeline_version(&spec.pipeline_id).await.map(Some);
        }
        if spec.has_manifest() {
            return Ok(None);
        }
        Err(Error::invalid_input("Pipeline spec source is missing"))
    }

    async fn run_references(
        &self,
        run: &Run,
        experiment_name: &str,
        version: Option<&PipelineVersion>,
    ) -> Result<Vec<pipelines_core::domain::ResourceReference>> {
        let mut names = ReferenceNames::new();
        names.insert(ResourceType::Experiment, &run.experiment_id, experiment_name);
        if let Some(version) = version {
            names.insert(ResourceType::PipelineVersion, &version.id, &version.name);
        }
        let resolved = Relations {
            owner_experiment: Some(run.experiment_id.clone()),
            owner_namespace: (!run.namespace.is_empty()).then(|| run.namespace.clone()),
            creator_pipeline_version: version.map(|v| v.id.clone()),
            ..Default::default()
        };
        self.normalize_references(
            &run.id,
            ResourceType::Run,
            &run.resource_references,
            resolved,
            names,
        )
        .await
    }

    pub async fn get_run(&self, id: &str) -> Result<Run> {
        self.stores
            .runs
            .get(id)
            .await
            .with_context(|| format!("Failed to fetch run {id}"))
    }

    pub async fn list_runs(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Run>> {
        self.stores
            .runs
            .list(filter, opts)
            .await
            .context("Failed to list runs")
    }

    pub async fn archive_run(&self, id: &str) -> Result<()> {
        self.stores
            .runs
            .archive(id)
            .await
            .with_context(|| format!("Failed to archive run {id}"))
    }

    /// Restore an archived run; its experiment must not be archived
    pub async fn unarchive_run(&self, id: &str) -> Result<()> {
        let run = self
            .get_run(id)
            .await
            .with_context(|| format!("Failed to unarchive run {id} as it does not exist"))?;
        let experiment_id = if run.experiment_id.is_empty() {
            self.stores
                .references
                .get_reference(id, ResourceType::Run, ResourceType::Experiment)
                .await
                .with_context(|| {
                    format!("Failed to unarchive run {id} due to resource references fetching error")
                })?
                .reference_id
        } else {
            run.experiment_id
        };
        let experiment = self
            .stores
            .experiments
            .get(&experiment_id)
            .await
            .with_context(|| format!("Failed to unarchive run {id} due to experiment fetching error"))?;
        if experiment.storage_state == StorageState::Archived {
            return Err(Error::FailedPrecondition(format!(
                "Failed to unarchive run {id} as experiment {experiment_id} must be unarchived first"
            )));
        }
        self.stores
            .runs
            .unarchive(id)
            .await
            .with_context(|| format!("Failed to unarchive run {id}"))
    }

    /// Mark a run terminating, then stop its workflow
    ///
    /// The store update is not rolled back when the patch keeps failing, so a
    /// run can end up terminating while its workflow still runs.
    pub async fn terminate_run(&self, id: &str) -> Result<()> {
        let run = self
            .get_run(id)
            .await
            .with_context(|| format!("Failed to terminate run {id} due to error fetching the run"))?;
        let namespace = self
            .namespace_from_run_id(id)
            .await
            .with_context(|| format!("Failed to terminate run {id} due to error fetching its namespace"))?;

        self.stores
            .runs
            .terminate(id)
            .await
            .with_context(|| format!("Failed to terminate run {id}"))?;

        let patch = json!({"spec": {"activeDeadlineSeconds": 0}});
        let workflows = &self.clients.workflows;
        retry_k8s(|| workflows.patch(&namespace, &run.k8s_name, &patch))
            .await
            .map_err(|e| {
                Error::internal(
                    e,
                    format!("Failed to terminate run {id} due to error terminating its workflow"),
                )
            })?;

        tracing::info!("Run terminated: {} (workflow {})", id, run.k8s_name);
        Ok(())
    }

    /// Resubmit a failed run from its recorded workflow
    ///
    /// Only runs of Argo workflow manifests can be retried. The old workflow
    /// is updated in place when it still exists and recreated otherwise.
    pub async fn retry_run(&self, id: &str) -> Result<()> {
        let mut run = self
            .get_run(id)
            .await
            .with_context(|| format!("Failed to retry run {id} due to error fetching the run"))?;
        let namespace = self
            .namespace_from_run_id(id)
            .await
            .with_context(|| format!("Failed to retry run {id} due to error fetching its namespace"))?;

        if !run.pipeline_spec.pipeline_spec_manifest.is_empty() {
            return Err(Error::invalid_input(format!(
                "Failed to retry run {id}: only runs of Argo workflow manifests can be retried"
            )));
        }
        if run.workflow_runtime_manifest.is_empty() {
            return Err(Error::invalid_input(format!(
                "Failed to retry run {id}: workflow manifest cannot be empty"
            )));
        }

        let mut workflow = Workflow::from_json(&run.workflow_runtime_manifest).map_err(|e| {
            Error::internal(e, format!("Failed to retry run {id} due to error parsing the workflow"))
        })?;
        workflow.decompress().with_context(|| {
            format!("Failed to retry run {id} due to error decompressing the workflow")
        })?;
        workflow
            .can_retry()
            .with_context(|| format!("Failed to retry run {id} as it does not allow retries"))?;
        let (mut retried, pods) = workflow
            .generate_retry()
            .with_context(|| format!("Failed to retry run {id}"))?;

        for pod in &pods {
            match self.clients.pods.delete_pod(&namespace, pod).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    return Err(Error::internal(
                        e,
                        format!("Failed to retry run {id} due to error deleting pod {pod}"),
                    ));
                }
            }
        }

        let workflows = &self.clients.workflows;
        let updated = match workflows.get(&namespace, retried.name()).await {
            Ok(latest) => {
                retried.metadata.resource_version = latest.metadata.resource_version;
                workflows.update(&namespace, &retried).await
            }
            Err(e) => Err(e),
        };
        let current = match updated {
            Ok(workflow) => workflow,
            Err(update_err) => {
                tracing::debug!(
                    "Updating workflow {} failed, creating it instead: {}",
                    retried.name(),
                    update_err
                );
                retried.metadata.resource_version = None;
                workflows.create(&namespace, &retried).await.map_err(|create_err| {
                    Error::internal(
                        create_err,
                        format!(
                            "Failed to retry run {id}: updating the old workflow failed ({update_err}) and creating a new one failed"
                        ),
                    )
                })?
            }
        };

        let state = RuntimeState::from_condition(current.condition());
        run.conditions = current.condition().to_string();
        run.k8s_name = current.name().to_string();
        run.workflow_runtime_manifest = current.to_store_string()?;
        run.finished_at = None;
        run.transition(state, Utc::now());
        self.stores
            .runs
            .update(&run)
            .await
            .map_err(|e| Error::internal(e, format!("Failed to retry run {id} due to error updating entry")))?;

        tracing::info!("Run retried: {} ({} pods deleted)", id, pods.len());
        Ok(())
    }

    /// Delete a run; its workflow is deleted on a best-effort basis
    pub async fn delete_run(&self, id: &str) -> Result<()> {
        let run = self
            .get_run(id)
            .await
            .with_context(|| format!("Failed to delete run {id} as it does not exist"))?;
        let namespace = if run.namespace.is_empty() {
            self.namespace_from_experiment_id(&run.experiment_id)
                .await
                .with_context(|| format!("Failed to delete run {id} due to namespace fetching error"))?
        } else {
            run.namespace.clone()
        };
        if !run.k8s_name.is_empty() {
            if let Err(e) = self.clients.workflows.delete(&namespace, &run.k8s_name).await {
                tracing::warn!("Failed to delete workflow {} of run {}: {}", run.k8s_name, id, e);
            }
        }
        self.stores
            .runs
            .delete(id)
            .await
            .with_context(|| format!("Failed to delete run {id}"))?;
        tracing::info!("Run deleted: {}", id);
        Ok(())
    }

    pub async fn report_metric(&self, metric: &RunMetric) -> Result<()> {
        self.stores
            .runs
            .create_metric(metric)
            .await
            .context("Failed to report a run metric")
    }

    pub async fn get_run_metrics(&self, run_id: &str) -> Result<Vec<RunMetric>> {
        let run = self
            .get_run(run_id)
            .await
            .with_context(|| format!("Failed to fetch metrics of run {run_id}"))?;
        Ok(run.metrics)
    }

    /// Bytes of an output artifact of a run node
    pub async fn read_artifact(
        &self,
        run_id: &str,
        node_id: &str,
        artifact_name: &str,
    ) -> Result<Vec<u8>> {
        let run = self.get_run(run_id).await?;
        if run.workflow_runtime_manifest.is_empty() {
            return Err(Error::invalid_input(
                "Reading artifacts of runs without a workflow manifest is not supported",
            ));
        }
        let workflow = Workflow::from_json(&run.workflow_runtime_manifest)
            .map_err(|e| Error::internal(e, format!("Failed to parse the workflow of run {run_id}")))?;
        let key = workflow.artifact_key(node_id, artifact_name).ok_or_else(|| {
            Error::resource_not_found("Artifact", artifact_path(run_id, node_id, artifact_name))
        })?;
        self.clients.object_store.get_file(&key).await
    }
}

/// Path an artifact is reported under
pub fn artifact_path(run_id: &str, node_id: &str, artifact_name: &str) -> String {
    format!("artifacts/{run_id}/{node_id}/{artifact_name}")
}

/// Record the resolved manifest on the spec under its generation
pub(super) fn keep_manifest(
    spec: &mut pipelines_core::domain::PipelineSpec,
    template_type: TemplateType,
    manifest: Vec<u8>,
) -> Result<()> {
    let manifest = String::from_utf8(manifest)
        .map_err(|e| Error::invalid_input(format!("Pipeline manifest is not UTF-8: {e}")))?;
    match template_type {
        TemplateType::V1 => {
            spec.workflow_spec_manifest = manifest;
            spec.pipeline_spec_manifest.clear();
        }
        TemplateType::V2 => {
            spec.pipeline_spec_manifest = manifest;
            spec.workflow_spec_manifest.clear();
        }
    }
    Ok(())
}
