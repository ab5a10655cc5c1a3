//! Pipeline and pipeline version operations

use chrono::Utc;
use pipelines_core::domain::{
    FilterContext, Pipeline, PipelineStatus, PipelineVersion, PipelineVersionStatus,
};
use pipelines_core::{Error, Result, ResultExt};
use uuid::Uuid;

use super::ResourceManager;
use crate::repository::{ListOptions, ListPage};
use crate::template::Template;

impl ResourceManager {
    /// Create an empty pipeline and mark it ready
    ///
    /// Two store writes; a failure between them leaves a `Creating` pipeline
    /// behind.
    pub async fn create_pipeline(&self, mut pipeline: Pipeline) -> Result<Pipeline> {
        if pipeline.name.trim().is_empty() {
            return Err(Error::invalid_input("Pipeline name cannot be empty"));
        }
        if pipeline.namespace.is_empty() {
            pipeline.namespace = self.config.default_namespace.clone();
        }
        if pipeline.id.is_empty() {
            pipeline.id = Uuid::new_v4().to_string();
        }
        pipeline.status = PipelineStatus::Creating;
        pipeline.created_at = Utc::now();

        let mut pipeline = self
            .stores
            .pipelines
            .create_pipeline(&pipeline)
            .await
            .context("Failed to create a pipeline in the pipeline store")?;
        self.stores
            .pipelines
            .update_pipeline_status(&pipeline.id, PipelineStatus::Ready)
            .await
            .context("Failed to update the status of a pipeline after creation")?;
        pipeline.status = PipelineStatus::Ready;

        tracing::info!("Pipeline created: {} ({})", pipeline.name, pipeline.id);
        Ok(pipeline)
    }

    /// Create a version under an existing pipeline
    ///
    /// The row is written as `Creating`, the manifest is stored under the
    /// version key, then the row flips to `Ready` and becomes the parent's
    /// default version. Readers must not serve a `Creating` version.
    pub async fn create_pipeline_version(
        &self,
        mut version: PipelineVersion,
    ) -> Result<PipelineVersion> {
        if version.pipeline_id.is_empty() {
            return Err(Error::invalid_input(
                "Failed to create a pipeline version due to missing pipeline id",
            ));
        }
        if version.id.is_empty() {
            version.id = Uuid::new_v4().to_string();
        }

        let bytes = self
            .fetch_version_template(&version)
            .await
            .context("Failed to create a pipeline version as template is broken")?;
        let mut template = Template::parse(&bytes)
            .context("Failed to create a pipeline version due to template creation error")?;
        let stored = if template.is_v2() {
            let pipeline = self
                .stores
                .pipelines
                .get_pipeline(&version.pipeline_id)
                .await
                .context("Failed to create a pipeline version as parent pipeline was not found")?;
            template.override_v2_pipeline_name(
                &pipeline.name,
                &pipeline.namespace,
                self.config.multi_user,
            );
            template.bytes()?
        } else {
            bytes
        };

        version.parameters = template
            .parameters_json()
            .context("Failed to create a pipeline version due to error converting parameters")?;
        version.pipeline_spec = String::from_utf8(stored)
            .map_err(|e| Error::invalid_input(format!("Pipeline manifest is not UTF-8: {e}")))?;
        version.status = PipelineVersionStatus::Creating;
        version.created_at = Utc::now();

        let mut version = self
            .stores
            .pipelines
            .create_pipeline_version(&version)
            .await
            .context("Failed to create a pipeline version in the pipeline store")?;

        let store = &self.clients.object_store;
        store
            .add_file(version.pipeline_spec.as_bytes(), &store.pipeline_key(&version.id))
            .await
            .context("Failed to create a pipeline version due to error saving the manifest")?;

        self.stores
            .pipelines
            .update_pipeline_version_status(&version.id, PipelineVersionStatus::Ready)
            .await
            .with_context(|| {
                format!("Failed to change the status of a new pipeline version {}", version.id)
            })?;
        version.status = PipelineVersionStatus::Ready;

        self.stores
            .pipelines
            .update_pipeline_default_version(&version.pipeline_id, &version.id)
            .await
            .with_context(|| {
                format!("Failed to set the default version of pipeline {}", version.pipeline_id)
            })?;

        tracing::info!(
            "Pipeline version created: {} ({}) for pipeline {}",
            version.name,
            version.id,
            version.pipeline_id
        );
        Ok(version)
    }

    pub async fn get_pipeline(&self, id: &str) -> Result<Pipeline> {
        self.stores
            .pipelines
            .get_pipeline(id)
            .await
            .with_context(|| format!("Failed to get a pipeline with id {id}"))
    }

    pub async fn get_pipeline_version(&self, id: &str) -> Result<PipelineVersion> {
        self.stores
            .pipelines
            .get_pipeline_version(id)
            .await
            .with_context(|| format!("Failed to get a pipeline version with id {id}"))
    }

    pub async fn get_pipeline_by_name_and_namespace(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Pipeline> {
        self.stores
            .pipelines
            .get_pipeline_by_name_and_namespace(name, namespace)
            .await
            .with_context(|| format!("Failed to get a pipeline named {name} in namespace {namespace}"))
    }

    /// Newest ready version of an existing pipeline
    pub async fn get_latest_pipeline_version(&self, pipeline_id: &str) -> Result<PipelineVersion> {
        self.stores
            .pipelines
            .get_pipeline(pipeline_id)
            .await
            .context("Failed to get the latest pipeline version as pipeline was not found")?;
        self.stores
            .pipelines
            .get_latest_pipeline_version(pipeline_id)
            .await
            .context("Failed to get the latest pipeline version for a pipeline")
    }

    /// Manifest of the newest version of a pipeline
    pub async fn get_pipeline_latest_template(&self, pipeline_id: &str) -> Result<Vec<u8>> {
        let version = self.get_latest_pipeline_version(pipeline_id).await?;
        self.fetch_version_template(&version)
            .await
            .with_context(|| format!("Failed to get the latest template for pipeline {pipeline_id}"))
    }

    pub async fn get_pipeline_version_template(&self, version_id: &str) -> Result<Vec<u8>> {
        let version = self.stores.pipelines.get_pipeline_version(version_id).await.with_context(
            || format!("Failed to get the template as pipeline version {version_id} was not found"),
        )?;
        self.fetch_version_template(&version)
            .await
            .with_context(|| format!("Failed to get a template for pipeline version {version_id}"))
    }

    pub async fn list_pipelines(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Pipeline>> {
        self.stores
            .pipelines
            .list_pipelines(filter, opts)
            .await
            .context("Failed to list pipelines")
    }

    pub async fn list_pipeline_versions(
        &self,
        pipeline_id: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<PipelineVersion>> {
        self.stores
            .pipelines
            .list_pipeline_versions(pipeline_id, opts)
            .await
            .with_context(|| format!("Failed to list versions of pipeline {pipeline_id}"))
    }

    pub async fn update_pipeline_status(&self, id: &str, status: PipelineStatus) -> Result<()> {
        self.stores
            .pipelines
            .update_pipeline_status(id, status)
            .await
            .with_context(|| format!("Failed to update the status of pipeline {id} to {}", status.as_str()))
    }

    pub async fn update_pipeline_version_status(
        &self,
        id: &str,
        status: PipelineVersionStatus,
    ) -> Result<()> {
        self.stores
            .pipelines
            .update_pipeline_version_status(id, status)
            .await
            .with_context(|| {
                format!("Failed to update the status of pipeline version {id} to {}", status.as_str())
            })
    }

    pub async fn update_pipeline_default_version(
        &self,
        pipeline_id: &str,
        version_id: &str,
    ) -> Result<()> {
        self.stores
            .pipelines
            .update_pipeline_default_version(pipeline_id, version_id)
            .await
            .with_context(|| format!("Failed to set the default version of pipeline {pipeline_id}"))
    }

    /// Delete a pipeline that has no remaining versions
    pub async fn delete_pipeline(&self, id: &str) -> Result<()> {
        self.stores
            .pipelines
            .get_pipeline(id)
            .await
            .with_context(|| format!("Failed to delete pipeline {id} as it was not found"))?;

        match self.stores.pipelines.get_latest_pipeline_version(id).await {
            Ok(version) => {
                return Err(Error::invalid_input(format!(
                    "Failed to delete pipeline {id} as it has existing pipeline versions (e.g. {})",
                    version.id
                )));
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e.wrap(format!(
                    "Failed to delete pipeline {id} as it failed to check existing pipeline versions"
                )));
            }
        }

        self.stores
            .pipelines
            .update_pipeline_status(id, PipelineStatus::Deleting)
            .await
            .with_context(|| format!("Failed to change the status of pipeline {id} to DELETING"))?;
        self.stores
            .pipelines
            .delete_pipeline(id)
            .await
            .with_context(|| format!("Failed to delete the entry of pipeline {id}"))?;

        tracing::info!("Pipeline deleted: {}", id);
        Ok(())
    }

    /// Delete a version and its stored manifest
    ///
    /// The manifest may live under the recorded URI, the version key or the
    /// pipeline key. Each location is deleted independently and the call
    /// fails only when none of them could be deleted.
    pub async fn delete_pipeline_version(&self, id: &str) -> Result<()> {
        let version = self
            .stores
            .pipelines
            .get_pipeline_version(id)
            .await
            .with_context(|| format!("Failed to delete pipeline version {id} as it was not found"))?;
        self.stores
            .pipelines
            .update_pipeline_version_status(id, PipelineVersionStatus::Deleting)
            .await
            .with_context(|| format!("Failed to change the status of pipeline version {id} to DELETING"))?;

        let store = &self.clients.object_store;
        let locations = [
            ("URI", version.pipeline_spec_uri.clone()),
            ("version id", store.pipeline_key(&version.id)),
            ("pipeline id", store.pipeline_key(&version.pipeline_id)),
        ];
        let mut removed = false;
        let mut failures = Vec::new();
        for (label, key) in &locations {
            if key.is_empty() {
                continue;
            }
            match store.delete_file(key).await {
                Ok(()) => removed = true,
                Err(e) => {
                    tracing::warn!(
                        "Failed to delete the manifest of pipeline version {} by {} ({}): {}",
                        id,
                        label,
                        key,
                        e
                    );
                    failures.push(format!("by {label}: {e}"));
                }
            }
        }
        if !removed {
            return Err(Error::internal_msg(format!(
                "Failed to delete the manifest of pipeline version {id}: {}",
                failures.join("; ")
            )));
        }

        self.stores
            .pipelines
            .delete_pipeline_version(id)
            .await
            .with_context(|| format!("Failed to delete the entry of pipeline version {id}"))?;

        tracing::info!("Pipeline version deleted: {}", id);
        Ok(())
    }
}
