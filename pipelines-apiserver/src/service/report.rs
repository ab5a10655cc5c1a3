//! Status reports from the persistence agent
//!
//! The agent polls live custom resources and reports each one. Errors of kind
//! `NotFound` tell it to drop the object from its queue; every other kind is
//! retried.

use chrono::Utc;
use pipelines_core::domain::{Job, ResourceType, Run, RuntimeState, StorageState};
use pipelines_core::reference::{ReferenceNames, Relations};
use pipelines_core::{Error, Result, ResultExt};
use serde_json::json;

use super::{ResourceManager, retry_k8s};
use crate::workflow::{LABEL_PERSISTED_FINAL_STATE, ScheduledWorkflow, Workflow};

impl ResourceManager {
    /// Reconcile a reported workflow into the run it executes
    ///
    /// A workflow already labelled as persisted is deleted and nothing else
    /// happens. Otherwise the run row is updated (one-shot runs) or created
    /// (runs spawned by a job), and a final workflow gets the persisted label
    /// so its next report collects it.
    pub async fn report_workflow_resource(&self, workflow: Workflow) -> Result<()> {
        let run_id = workflow.run_id().to_string();
        if run_id.is_empty() {
            return Err(Error::invalid_input(format!(
                "Workflow {} is missing the run id label",
                workflow.name()
            )));
        }
        let namespace = workflow.namespace().to_string();
        if namespace.is_empty() {
            return Err(Error::invalid_input(format!(
                "Failed to report workflow {}: namespace is empty",
                workflow.name()
            )));
        }

        if workflow.persisted_final_state() {
            self.collect_workflow(&namespace, workflow.name(), &run_id, "completed")
                .await?;
            return Ok(());
        }

        let state = if workflow.is_terminating() {
            RuntimeState::Canceling
        } else {
            RuntimeState::from_condition(workflow.condition())
        };

        match workflow.job_uid() {
            None => self.report_one_shot_run(&workflow, &run_id, state).await?,
            Some(job_id) => {
                self.report_recurring_run(&workflow, &run_id, job_id, state)
                    .await?
            }
        }

        if workflow.is_final() {
            let patch = json!({"metadata": {"labels": {LABEL_PERSISTED_FINAL_STATE: "true"}}});
            let workflows = &self.clients.workflows;
            retry_k8s(|| workflows.patch(&namespace, workflow.name(), &patch))
                .await
                .map_err(|e| {
                    e.into_error(format!(
                        "Failed to add the persisted final state label to workflow {}",
                        workflow.name()
                    ))
                })?;
            tracing::debug!("Workflow {} of run {} marked persisted", workflow.name(), run_id);
        }
        Ok(())
    }

    /// Delete a live workflow whose state no longer needs it
    ///
    /// A workflow that is already gone counts as collected.
    async fn collect_workflow(
        &self,
        namespace: &str,
        name: &str,
        run_id: &str,
        what: &str,
    ) -> Result<()> {
        match self.clients.workflows.delete(namespace, name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("Workflow {} of run {} was already deleted", name, run_id);
            }
            Err(e) => {
                return Err(
                    e.into_error(format!("Failed to delete the {what} workflow for run {run_id}"))
                );
            }
        }
        self.record_workflow_gc();
        tracing::info!("Workflow {} of run {} collected", name, run_id);
        Ok(())
    }

    async fn report_one_shot_run(
        &self,
        workflow: &Workflow,
        run_id: &str,
        state: RuntimeState,
    ) -> Result<()> {
        let existing = match self.stores.runs.get(run_id).await {
            Ok(run) => Some(run),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                return Err(e.wrap(format!("Failed to report a workflow for run {run_id}")));
            }
        };
        let updated = match existing {
            Some(run) if is_stale(&run, state) => {
                tracing::debug!(
                    "Ignoring {} report for run {} already finished as {}",
                    state,
                    run_id,
                    run.state
                );
                return Ok(());
            }
            Some(mut run) => {
                apply_status(&mut run, workflow, state)?;
                self.stores.runs.update(&run).await
            }
            None => Err(Error::resource_not_found("Run", run_id)),
        };

        match updated {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::error!(
                    "Reported workflow {} in namespace {} has no stored run {}; deleting it",
                    workflow.name(),
                    workflow.namespace(),
                    run_id
                );
                self.collect_workflow(workflow.namespace(), workflow.name(), run_id, "obsolete")
                    .await?;
                Err(e.wrap(format!(
                    "Failed to report workflow {} in namespace {}",
                    workflow.name(),
                    workflow.namespace()
                )))
            }
            Err(e) => Err(e.wrap(format!("Failed to update run {run_id} from its workflow"))),
        }
    }

    async fn report_recurring_run(
        &self,
        workflow: &Workflow,
        run_id: &str,
        job_id: &str,
        state: RuntimeState,
    ) -> Result<()> {
        let job = self.stores.jobs.get(job_id).await.with_context(|| {
            format!("Failed to report a workflow for run {run_id} due to error retrieving recurring run {job_id}")
        })?;
        let (experiment_id, namespace) = self
            .recurring_run_owner(&job, workflow)
            .await
            .with_context(|| format!("Failed to report a workflow for run {run_id}"))?;
        let experiment = self
            .stores
            .experiments
            .get(&experiment_id)
            .await
            .with_context(|| format!("Failed to report a workflow for run {run_id}"))?;

        match self.stores.runs.get(run_id).await {
            Ok(run) if is_stale(&run, state) => {
                tracing::debug!(
                    "Ignoring {} report for run {} already finished as {}",
                    state,
                    run_id,
                    run.state
                );
                return Ok(());
            }
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e.wrap(format!("Failed to report a workflow for run {run_id}")));
            }
        }

        let now = Utc::now();
        let created_at = workflow.creation_timestamp().unwrap_or(now);
        let scheduled_at = workflow.scheduled_at().unwrap_or(created_at);
        let mut pipeline_spec = job.pipeline_spec.clone();
        pipeline_spec.workflow_spec_manifest =
            serde_json::to_string(&workflow.spec).map_err(|e| {
                Error::internal(e, format!("Failed to marshal the workflow spec of run {run_id}"))
            })?;

        let mut run = Run {
            id: run_id.to_string(),
            experiment_id: experiment_id.clone(),
            recurring_run_id: Some(job.id.clone()),
            display_name: workflow.name().to_string(),
            k8s_name: workflow.name().to_string(),
            namespace,
            service_account: job.service_account.clone(),
            storage_state: StorageState::Available,
            pipeline_spec,
            created_at,
            scheduled_at: Some(scheduled_at),
            ..Default::default()
        };
        apply_status(&mut run, workflow, state)?;

        let mut names = ReferenceNames::new();
        names.insert(ResourceType::Experiment, &experiment_id, &experiment.name);
        names.insert(ResourceType::Job, &job.id, &job.display_name);
        let relations = Relations {
            owner_experiment: Some(experiment_id),
            owner_namespace: (!run.namespace.is_empty()).then(|| run.namespace.clone()),
            creator_job: Some(job.id.clone()),
            ..Default::default()
        };
        run.resource_references = relations.to_model(&run.id, ResourceType::Run, &names)?;

        self.stores
            .runs
            .create_or_update(&run)
            .await
            .with_context(|| format!("Failed to report a workflow due to error creating run {run_id}"))
    }

    /// Experiment and namespace a job's runs belong to
    ///
    /// Older jobs carry both only as reference edges; a failing experiment
    /// edge lookup is reported as an internal error.
    async fn recurring_run_owner(&self, job: &Job, workflow: &Workflow) -> Result<(String, String)> {
        let mut experiment_id = job.experiment_id.clone();
        let mut namespace = job.namespace.clone();

        if experiment_id.is_empty() {
            let reference = self
                .stores
                .references
                .get_reference(&job.id, ResourceType::Job, ResourceType::Experiment)
                .await
                .map_err(|e| {
                    Error::internal(
                        e,
                        format!("Failed to retrieve the experiment of recurring run {}", job.id),
                    )
                })?;
            experiment_id = reference.reference_id;
            if namespace.is_empty() {
                if let Ok(reference) = self
                    .stores
                    .references
                    .get_reference(&job.id, ResourceType::Job, ResourceType::Namespace)
                    .await
                {
                    namespace = reference.reference_id;
                }
            }
        }
        if experiment_id.is_empty() {
            experiment_id = self.default_experiment_id().await.with_context(|| {
                format!("Failed to fetch the default experiment for recurring run {}", job.id)
            })?;
        }
        if namespace.is_empty() {
            namespace = self.namespace_from_experiment_id(&experiment_id).await?;
        }
        if namespace.is_empty() {
            namespace = workflow.namespace().to_string();
        }
        Ok((experiment_id, namespace))
    }

    /// Reconcile a reported scheduled workflow into its job
    pub async fn report_scheduled_workflow_resource(&self, swf: ScheduledWorkflow) -> Result<()> {
        let job_id = swf.uid();
        if job_id.is_empty() {
            return Err(Error::invalid_input(format!(
                "Scheduled workflow {} has no uid",
                swf.name()
            )));
        }
        let mut job = self
            .stores
            .jobs
            .get(job_id)
            .await
            .with_context(|| format!("Failed to report scheduled workflow {}", swf.name()))?;

        job.conditions = swf.condition_summary();
        job.enabled = swf.enabled();
        job.trigger = swf.trigger();
        if let Some(max_concurrency) = swf.spec.max_concurrency {
            job.max_concurrency = max_concurrency;
        }
        if let Some(no_catchup) = swf.spec.no_catchup {
            job.no_catchup = no_catchup;
        }
        job.updated_at = Utc::now();

        self.stores
            .jobs
            .update(&job)
            .await
            .with_context(|| format!("Failed to update recurring run {job_id} from its scheduled workflow"))?;
        tracing::debug!("Recurring run {} updated: {}", job_id, job.conditions);
        Ok(())
    }
}

/// A report that would move a finished run back to a live state
fn is_stale(run: &Run, reported: RuntimeState) -> bool {
    run.state.is_final() && !reported.is_final()
}

/// Copy the reported status onto a run
fn apply_status(run: &mut Run, workflow: &Workflow, state: RuntimeState) -> Result<()> {
    run.conditions = state.to_v1().to_string();
    run.finished_at = workflow.finished_at();
    run.workflow_runtime_manifest = workflow.to_store_string()?;
    run.transition(state, Utc::now());
    Ok(())
}
