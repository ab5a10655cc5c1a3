//! Job (recurring run) operations

use chrono::Utc;
use pipelines_core::domain::{FilterContext, Job, ResourceType};
use pipelines_core::reference::{ReferenceNames, Relations};
use pipelines_core::{Error, Result, ResultExt};
use serde_json::json;

use super::ResourceManager;
use super::run::keep_manifest;
use crate::repository::{ListOptions, ListPage};
use crate::template::Template;

impl ResourceManager {
    /// Create a job and the scheduled workflow that fires it
    ///
    /// The job id is the uid Kubernetes assigns to the scheduled workflow, so
    /// the custom resource is created first and the row second.
    pub async fn create_job(&self, mut job: Job) -> Result<Job> {
        if job.display_name.trim().is_empty() {
            return Err(Error::invalid_input("Recurring run name cannot be empty"));
        }
        if job.experiment_id.is_empty() {
            if self.config.multi_user {
                return Err(Error::invalid_input(
                    "Failed to create a recurring run: an experiment is required in multi-user mode",
                ));
            }
            job.experiment_id = self
                .default_experiment_id()
                .await
                .context("Failed to create a recurring run with an empty experiment id")?;
        }
        let experiment = self
            .stores
            .experiments
            .get(&job.experiment_id)
            .await
            .context("Failed to create a recurring run")?;
        if job.namespace.is_empty() {
            job.namespace = self
                .namespace_from_experiment_id(&job.experiment_id)
                .await
                .context("Failed to create a recurring run")?;
        }
        if self.config.multi_user && job.namespace.is_empty() {
            return Err(Error::invalid_input(
                "Recurring run cannot have an empty namespace in multi-user mode",
            ));
        }
        self.validate_experiment_namespace(&job.experiment_id, &job.namespace)
            .await
            .context("Failed to create a recurring run")?;

        let version = self.resolve_spec_version(&job.pipeline_spec).await?;
        if let Some(version) = &version {
            job.pipeline_spec.pipeline_id = version.pipeline_id.clone();
            job.pipeline_spec.pipeline_version_id = version.id.clone();
            job.pipeline_spec.pipeline_name = version.name.clone();
        }
        let manifest = self
            .fetch_spec_template(&job.pipeline_spec)
            .await
            .context("Failed to create a recurring run with an invalid pipeline spec manifest")?;
        let template = Template::parse(&manifest).context("Failed to create a recurring run")?;
        keep_manifest(&mut job.pipeline_spec, template.template_type(), manifest)?;

        if job.service_account.is_empty() {
            job.service_account = self.config.default_service_account.clone();
        }
        let swf = template
            .scheduled_workflow(&job)
            .map_err(|e| Error::internal(e, "Failed to generate the scheduled workflow"))?;
        let created = self
            .clients
            .scheduled_workflows
            .create(&job.namespace, &swf)
            .await
            .map_err(|e| Error::internal(e, "Failed to create a recurring run during scheduled workflow creation"))?;

        let now = Utc::now();
        job.id = created.uid().to_string();
        job.k8s_name = created.name().to_string();
        if !created.namespace().is_empty() {
            job.namespace = created.namespace().to_string();
        }
        if !created.spec.service_account.is_empty() {
            job.service_account = created.spec.service_account.clone();
        }
        job.conditions = created.condition_summary();
        job.created_at = created.creation_timestamp().unwrap_or(now);
        job.updated_at = now;

        let mut names = ReferenceNames::new();
        names.insert(ResourceType::Experiment, &job.experiment_id, &experiment.name);
        if let Some(version) = &version {
            names.insert(ResourceType::PipelineVersion, &version.id, &version.name);
        }
        let resolved = Relations {
            owner_experiment: Some(job.experiment_id.clone()),
            owner_namespace: (!job.namespace.is_empty()).then(|| job.namespace.clone()),
            creator_pipeline_version: version.as_ref().map(|v| v.id.clone()),
            ..Default::default()
        };
        job.resource_references = self
            .normalize_references(
                &job.id,
                ResourceType::Job,
                &job.resource_references,
                resolved,
                names,
            )
            .await
            .context("Failed to create a recurring run")?;

        let job = self
            .stores
            .jobs
            .create(&job)
            .await
            .context("Failed to create a recurring run")?;
        tracing::info!("Recurring run created: {} ({}) swf {}", job.display_name, job.id, job.k8s_name);
        Ok(job)
    }

    pub async fn get_job(&self, id: &str) -> Result<Job> {
        self.stores
            .jobs
            .get(id)
            .await
            .with_context(|| format!("Failed to fetch recurring run {id}"))
    }

    pub async fn list_jobs(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Job>> {
        self.stores
            .jobs
            .list(filter, opts)
            .await
            .context("Failed to list recurring runs")
    }

    /// Enable or disable a job
    ///
    /// On enable, the scheduled workflow must still be the one the job was
    /// created with.
    pub async fn change_job_mode(&self, id: &str, enabled: bool) -> Result<()> {
        let job = self
            .get_job(id)
            .await
            .with_context(|| format!("Failed to change the mode of recurring run {id}"))?;

        if enabled {
            let swf = self
                .clients
                .scheduled_workflows
                .get(&job.namespace, &job.k8s_name)
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        Error::resource_not_found("ScheduledWorkflow", &job.k8s_name)
                    } else {
                        Error::internal(e, format!("Failed to fetch the scheduled workflow of recurring run {id}"))
                    }
                })?;
            if swf.uid() != job.id {
                return Err(Error::resource_not_found("ScheduledWorkflow", &job.k8s_name).wrap(
                    format!("The scheduled workflow of recurring run {id} was replaced"),
                ));
            }
        }

        let patch = json!({"spec": {"enabled": enabled}});
        self.clients
            .scheduled_workflows
            .patch(&job.namespace, &job.k8s_name, &patch)
            .await
            .map_err(|e| {
                Error::internal(e, format!("Failed to patch the scheduled workflow of recurring run {id}"))
            })?;
        self.stores
            .jobs
            .enable(id, enabled)
            .await
            .with_context(|| format!("Failed to change the mode of recurring run {id}"))?;

        tracing::info!("Recurring run {}: {}", if enabled { "enabled" } else { "disabled" }, id);
        Ok(())
    }

    /// Delete a job; a missing scheduled workflow is not an error
    pub async fn delete_job(&self, id: &str) -> Result<()> {
        let job = self
            .get_job(id)
            .await
            .with_context(|| format!("Failed to delete recurring run {id}"))?;

        match self
            .clients
            .scheduled_workflows
            .delete(&job.namespace, &job.k8s_name)
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    "Scheduled workflow {} of recurring run {} is already gone",
                    job.k8s_name,
                    id
                );
            }
            Err(e) => {
                return Err(Error::internal(
                    e,
                    format!("Failed to delete the scheduled workflow of recurring run {id}"),
                ));
            }
        }

        self.stores
            .jobs
            .delete(id)
            .await
            .with_context(|| format!("Failed to delete recurring run {id}"))?;
        tracing::info!("Recurring run deleted: {}", id);
        Ok(())
    }
}
