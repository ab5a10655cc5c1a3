//! Service Module
//!
//! The resource manager: every multi-step operation that spans the relational
//! store, the Kubernetes API and the object store. Handlers call into it after
//! validating and authorizing a request.
//!
//! Nothing here is transactional across collaborators. Each operation runs a
//! fixed sequence of steps and leaves the documented intermediate state behind
//! when a later step fails.

mod experiment;
mod job;
mod namespace;
mod pipeline;
mod report;
mod run;
mod task;

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use pipelines_core::domain::{PipelineSpec, PipelineVersion, ResourceReference, ResourceType};
use pipelines_core::reference::{ReferenceNames, Relations};
use pipelines_core::{Error, Result, ResultExt};

use crate::config::ServerConfig;
use crate::k8s::{
    AccessReviewClient, K8sError, PodClient, ScheduledWorkflowClient, WorkflowClient,
};
use crate::objectstore::ObjectStore;
use crate::repository::{
    DefaultExperimentStore, ExperimentStore, JobStore, PipelineStore, ResourceReferenceStore,
    RunStore, TaskStore,
};
use crate::template::patch_default_parameters;

pub use experiment::ARCHIVE_PAGE_SIZE;

const PATCH_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const PATCH_MAX_RETRIES: usize = 10;

/// Relational store collaborators
#[derive(Clone)]
pub struct Stores {
    pub experiments: Arc<dyn ExperimentStore>,
    pub pipelines: Arc<dyn PipelineStore>,
    pub runs: Arc<dyn RunStore>,
    pub jobs: Arc<dyn JobStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub references: Arc<dyn ResourceReferenceStore>,
    pub default_experiment: Arc<dyn DefaultExperimentStore>,
}

/// Kubernetes and object store collaborators
#[derive(Clone)]
pub struct Clients {
    pub workflows: Arc<dyn WorkflowClient>,
    pub scheduled_workflows: Arc<dyn ScheduledWorkflowClient>,
    pub pods: Arc<dyn PodClient>,
    pub access_review: Arc<dyn AccessReviewClient>,
    pub object_store: Arc<dyn ObjectStore>,
}

pub struct ResourceManager {
    stores: Stores,
    clients: Clients,
    config: Arc<ServerConfig>,
    workflow_gc: AtomicU64,
}

impl ResourceManager {
    pub fn new(stores: Stores, clients: Clients, config: Arc<ServerConfig>) -> Self {
        Self {
            stores,
            clients,
            config,
            workflow_gc: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Workflows deleted after their final state was persisted
    pub fn workflow_gc_count(&self) -> u64 {
        self.workflow_gc.load(Ordering::Relaxed)
    }

    fn record_workflow_gc(&self) {
        if self.config.collect_metrics {
            self.workflow_gc.fetch_add(1, Ordering::Relaxed);
        }
    }

    // =========================================================================
    // Manifest resolution
    // =========================================================================

    /// Manifest of a stored version
    ///
    /// Tries the inline spec, then the object at the recorded URI, then the
    /// object keyed by the version id, then the one keyed by the pipeline id.
    async fn fetch_version_template(&self, version: &PipelineVersion) -> Result<Vec<u8>> {
        if !version.pipeline_spec.is_empty() {
            return Ok(version.pipeline_spec.as_bytes().to_vec());
        }
        let store = &self.clients.object_store;

        let by_uri = if version.pipeline_spec_uri.is_empty() {
            Err(Error::invalid_input("Pipeline spec URI is empty"))
        } else {
            store.get_file(&version.pipeline_spec_uri).await
        };
        let by_uri_err = match by_uri {
            Ok(bytes) => return Ok(bytes),
            Err(e) => e,
        };
        let by_version_err = match store.get_file(&store.pipeline_key(&version.id)).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => e,
        };
        match store.get_file(&store.pipeline_key(&version.pipeline_id)).await {
            Ok(bytes) => Ok(bytes),
            Err(by_pipeline_err) => Err(by_pipeline_err.wrap(format!(
                "Failed to read the manifest of pipeline version {} (by URI: {by_uri_err}; by version id: {by_version_err}); by pipeline id",
                version.id
            ))),
        }
    }

    /// Manifest for a run or job spec
    ///
    /// An inline manifest wins; otherwise the referenced version is used, then
    /// the latest version of the referenced pipeline. Deployment placeholders
    /// are substituted in the result.
    async fn fetch_spec_template(&self, spec: &PipelineSpec) -> Result<Vec<u8>> {
        let bytes = self.fetch_spec_template_raw(spec).await?;
        let text = String::from_utf8(bytes)
            .map_err(|e| Error::invalid_input(format!("Pipeline manifest is not UTF-8: {e}")))?;
        Ok(patch_default_parameters(&text, &self.config.default_bucket, &self.config.project_id)
            .into_bytes())
    }

    async fn fetch_spec_template_raw(&self, spec: &PipelineSpec) -> Result<Vec<u8>> {
        if !spec.pipeline_spec_manifest.is_empty() {
            return Ok(spec.pipeline_spec_manifest.as_bytes().to_vec());
        }
        if !spec.workflow_spec_manifest.is_empty() {
            return Ok(spec.workflow_spec_manifest.as_bytes().to_vec());
        }

        let mut failure: Option<Error> = None;
        if !spec.pipeline_version_id.is_empty() {
            let result = match self.stores.pipelines.get_pipeline_version(&spec.pipeline_version_id).await {
                Ok(version) => self.fetch_version_template(&version).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    failure = Some(e.wrap(format!(
                        "Failed to read the manifest of pipeline version {}",
                        spec.pipeline_version_id
                    )))
                }
            }
        }
        if !spec.pipeline_id.is_empty() {
            let result = match self.stores.pipelines.get_latest_pipeline_version(&spec.pipeline_id).await {
                Ok(version) => self.fetch_version_template(&version).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(bytes) => return Ok(bytes),
                Err(e) => {
                    let context = match &failure {
                        Some(earlier) => format!(
                            "Failed to read the manifest of pipeline {} ({earlier})",
                            spec.pipeline_id
                        ),
                        None => format!("Failed to read the manifest of pipeline {}", spec.pipeline_id),
                    };
                    failure = Some(e.wrap(context));
                }
            }
        }
        Err(failure.unwrap_or_else(|| Error::invalid_input("Pipeline spec source is missing")))
    }

    // =========================================================================
    // Reference edges
    // =========================================================================

    /// Edges a resource is written with
    ///
    /// Starts from the edges the request carried, lets `resolved` fill the
    /// typed slots, and names every edge. Names already in `names` are used
    /// as is; the rest are read from the stores.
    async fn normalize_references(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        inbound: &[ResourceReference],
        resolved: Relations,
        mut names: ReferenceNames,
    ) -> Result<Vec<ResourceReference>> {
        let mut relations = Relations::from_model(inbound);
        relations.owner_experiment = resolved.owner_experiment.or(relations.owner_experiment);
        relations.owner_namespace = resolved.owner_namespace.or(relations.owner_namespace);
        relations.owner_pipeline = resolved.owner_pipeline.or(relations.owner_pipeline);
        relations.creator_job = resolved.creator_job.or(relations.creator_job);
        relations.creator_pipeline_version = resolved
            .creator_pipeline_version
            .or(relations.creator_pipeline_version);

        for (reference_type, id, _) in relations.triples() {
            if names.contains(reference_type, &id) {
                continue;
            }
            let name = self
                .reference_name(reference_type, &id)
                .await
                .with_context(|| {
                    format!("Failed to resolve the name of referenced {reference_type} {id}")
                })?;
            names.insert(reference_type, &id, name);
        }
        relations.to_model(resource_id, resource_type, &names)
    }

    async fn reference_name(&self, reference_type: ResourceType, id: &str) -> Result<String> {
        let name = match reference_type {
            ResourceType::Namespace => id.to_string(),
            ResourceType::Experiment => self.stores.experiments.get(id).await?.name,
            ResourceType::Job => self.stores.jobs.get(id).await?.display_name,
            ResourceType::Run => self.stores.runs.get(id).await?.display_name,
            ResourceType::Pipeline => self.stores.pipelines.get_pipeline(id).await?.name,
            ResourceType::PipelineVersion => {
                self.stores.pipelines.get_pipeline_version(id).await?.name
            }
        };
        Ok(name)
    }
}

/// Run a Kubernetes call with a constant backoff
///
/// Retries every 100ms, at most ten times after the first attempt.
pub(crate) async fn retry_k8s<T, F, Fut>(mut operation: F) -> std::result::Result<T, K8sError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, K8sError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < PATCH_MAX_RETRIES => {
                attempt += 1;
                tracing::debug!("Kubernetes call failed (attempt {}): {}", attempt, e);
                tokio::time::sleep(PATCH_RETRY_INTERVAL).await;
            }
            Err(e) => return Err(e),
        }
    }
}
