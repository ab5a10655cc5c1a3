//! Repository Module
//!
//! Data access layer for the API server.
//! Each store handles database operations for one entity. The resource
//! manager only sees the traits; the Postgres implementations live in the
//! submodules.

pub mod experiment;
pub mod job;
pub mod list;
pub mod pipeline;
pub mod reference;
pub mod run;
pub mod task;

use async_trait::async_trait;
use pipelines_core::Result;
use pipelines_core::domain::{
    Experiment, FilterContext, Job, Pipeline, PipelineStatus, PipelineVersion,
    PipelineVersionStatus, ResourceReference, ResourceType, Run, RunMetric, Task,
};

pub use experiment::PgExperimentStore;
pub use job::PgJobStore;
pub use list::{ListFilter, ListOptions, ListPage};
pub use pipeline::PgPipelineStore;
pub use reference::{PgDefaultExperimentStore, PgResourceReferenceStore};
pub use run::PgRunStore;
pub use task::PgTaskStore;

pub(crate) fn db_error(e: sqlx::Error, context: impl Into<String>) -> pipelines_core::Error {
    pipelines_core::Error::internal(e, context)
}

#[async_trait]
pub trait ExperimentStore: Send + Sync {
    async fn create(&self, experiment: &Experiment) -> Result<Experiment>;

    async fn get(&self, id: &str) -> Result<Experiment>;

    /// Returns `None` when no experiment of that name exists in the namespace
    async fn get_by_name_namespace(&self, name: &str, namespace: &str)
    -> Result<Option<Experiment>>;

    /// List experiments, optionally scoped to a namespace
    async fn list(&self, filter: &FilterContext, opts: &ListOptions)
    -> Result<ListPage<Experiment>>;

    /// Archive the experiment with its runs, and clear the enabled flag of its jobs
    async fn archive(&self, id: &str) -> Result<()>;

    async fn unarchive(&self, id: &str) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline>;

    /// Only `Ready` pipelines are returned
    async fn get_pipeline(&self, id: &str) -> Result<Pipeline>;

    /// Any status, used by status transitions and deletes
    async fn get_pipeline_with_status(&self, id: &str) -> Result<Pipeline>;

    async fn get_pipeline_by_name_and_namespace(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Pipeline>;

    async fn list_pipelines(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Pipeline>>;

    async fn update_pipeline_status(&self, id: &str, status: PipelineStatus) -> Result<()>;

    async fn update_pipeline_default_version(&self, id: &str, version_id: &str) -> Result<()>;

    async fn delete_pipeline(&self, id: &str) -> Result<()>;

    async fn create_pipeline_version(&self, version: &PipelineVersion) -> Result<PipelineVersion>;

    /// Only `Ready` versions are returned
    async fn get_pipeline_version(&self, id: &str) -> Result<PipelineVersion>;

    /// Any status, used by status transitions and deletes
    async fn get_pipeline_version_with_status(&self, id: &str) -> Result<PipelineVersion>;

    /// Most recently created `Ready` version of a pipeline
    async fn get_latest_pipeline_version(&self, pipeline_id: &str) -> Result<PipelineVersion>;

    async fn list_pipeline_versions(
        &self,
        pipeline_id: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<PipelineVersion>>;

    /// Versions of a pipeline that are not being deleted
    async fn count_pipeline_versions(&self, pipeline_id: &str) -> Result<i64>;

    async fn update_pipeline_version_status(
        &self,
        id: &str,
        status: PipelineVersionStatus,
    ) -> Result<()>;

    async fn delete_pipeline_version(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert the run with its reference edges
    async fn create(&self, run: &Run) -> Result<Run>;

    /// The run with its metrics and reference edges
    async fn get(&self, id: &str) -> Result<Run>;

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Run>>;

    /// Persist status fields: conditions, state, history, runtime manifests, finish time
    async fn update(&self, run: &Run) -> Result<()>;

    /// Insert or update a run reported for a recurring run
    async fn create_or_update(&self, run: &Run) -> Result<()>;

    /// Move a run that has not finished into the terminating phase
    async fn terminate(&self, id: &str) -> Result<()>;

    async fn archive(&self, id: &str) -> Result<()>;

    async fn unarchive(&self, id: &str) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;

    /// Store a metric; a second report for the same (node, name) is rejected
    async fn create_metric(&self, metric: &RunMetric) -> Result<()>;
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert the job with its reference edges
    async fn create(&self, job: &Job) -> Result<Job>;

    async fn get(&self, id: &str) -> Result<Job>;

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Job>>;

    async fn enable(&self, id: &str, enabled: bool) -> Result<()>;

    /// Persist the fields a scheduled workflow report carries
    async fn update(&self, job: &Job) -> Result<()>;

    async fn delete(&self, id: &str) -> Result<()>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> Result<Task>;

    async fn get(&self, id: &str) -> Result<Task>;

    /// Tasks scoped by run (or namespace) reference
    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Task>>;

    async fn find_by_fingerprint(&self, run_id: &str, fingerprint: &str) -> Result<Option<Task>>;
}

#[async_trait]
pub trait ResourceReferenceStore: Send + Sync {
    /// The edge of `resource_id` pointing at a resource of `reference_type`
    async fn get_reference(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        reference_type: ResourceType,
    ) -> Result<ResourceReference>;
}

#[async_trait]
pub trait DefaultExperimentStore: Send + Sync {
    async fn get_default_experiment_id(&self) -> Result<Option<String>>;

    async fn set_default_experiment_id(&self, id: &str) -> Result<()>;
}
