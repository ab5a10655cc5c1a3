//! In-memory collaborators for resource manager tests
//!
//! Every store and client trait has a fake here. State sits behind a
//! `std::sync::Mutex` and the calls tests assert on (patches, deletes, list
//! pages) are recorded.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pipelines_apiserver::config::ServerConfig;
use pipelines_apiserver::k8s::{
    AccessDecision, AccessReviewClient, K8sError, PodClient, ResourceAttributes,
    ScheduledWorkflowClient, WorkflowClient,
};
use pipelines_apiserver::objectstore::ObjectStore;
use pipelines_apiserver::repository::{
    DefaultExperimentStore, ExperimentStore, JobStore, ListOptions, ListPage, PipelineStore,
    ResourceReferenceStore, RunStore, TaskStore,
};
use pipelines_apiserver::service::{Clients, ResourceManager, Stores};
use pipelines_apiserver::workflow::{ScheduledWorkflow, Workflow};
use pipelines_core::domain::{
    Experiment, FilterContext, Job, Pipeline, PipelineStatus, PipelineVersion,
    PipelineVersionStatus, ResourceReference, ResourceType, Run, RunMetric, RuntimeState,
    RuntimeStatus, StorageState, Task,
};
use pipelines_core::{Error, Result};
use serde_json::Value;

fn scope_matches(filter: &FilterContext, references: &[(ResourceType, &str)]) -> bool {
    match &filter.reference_key {
        None => true,
        Some(key) => references
            .iter()
            .any(|(resource_type, id)| *resource_type == key.resource_type && *id == key.id),
    }
}

fn name_matches(opts: &ListOptions, name: &str) -> bool {
    opts.filter.name.as_deref().map_or(true, |wanted| wanted == name)
}

fn state_matches(opts: &ListOptions, state: StorageState) -> bool {
    opts.filter.storage_state.map_or(true, |wanted| wanted == state)
}

// ============================================================================
// Stores
// ============================================================================

#[derive(Default)]
pub struct FakeExperimentStore {
    pub experiments: Mutex<Vec<Experiment>>,
}

#[async_trait]
impl ExperimentStore for FakeExperimentStore {
    async fn create(&self, experiment: &Experiment) -> Result<Experiment> {
        let mut experiments = self.experiments.lock().unwrap();
        if experiments
            .iter()
            .any(|e| e.name == experiment.name && e.namespace == experiment.namespace)
        {
            return Err(Error::invalid_input(format!(
                "Experiment {} already exists",
                experiment.name
            )));
        }
        experiments.push(experiment.clone());
        Ok(experiment.clone())
    }

    async fn get(&self, id: &str) -> Result<Experiment> {
        self.experiments
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("Experiment", id))
    }

    async fn get_by_name_namespace(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<Experiment>> {
        Ok(self
            .experiments
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.name == name && e.namespace == namespace)
            .cloned())
    }

    async fn list(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Experiment>> {
        let items: Vec<Experiment> = self
            .experiments
            .lock()
            .unwrap()
            .iter()
            .filter(|e| scope_matches(filter, &[(ResourceType::Namespace, &e.namespace)]))
            .filter(|e| name_matches(opts, &e.name) && state_matches(opts, e.storage_state))
            .cloned()
            .collect();
        opts.paginate(items)
    }

    async fn archive(&self, id: &str) -> Result<()> {
        self.set_state(id, StorageState::Archived)
    }

    async fn unarchive(&self, id: &str) -> Result<()> {
        self.set_state(id, StorageState::Available)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.experiments.lock().unwrap().retain(|e| e.id != id);
        Ok(())
    }
}

impl FakeExperimentStore {
    fn set_state(&self, id: &str, state: StorageState) -> Result<()> {
        let mut experiments = self.experiments.lock().unwrap();
        let experiment = experiments
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::resource_not_found("Experiment", id))?;
        experiment.storage_state = state;
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePipelineStore {
    pub pipelines: Mutex<Vec<Pipeline>>,
    pub versions: Mutex<Vec<PipelineVersion>>,
    /// Every status a version was moved to, in order
    pub version_transitions: Mutex<Vec<(String, PipelineVersionStatus)>>,
    pub fail_version_delete: Mutex<bool>,
}

#[async_trait]
impl PipelineStore for FakePipelineStore {
    async fn create_pipeline(&self, pipeline: &Pipeline) -> Result<Pipeline> {
        self.pipelines.lock().unwrap().push(pipeline.clone());
        Ok(pipeline.clone())
    }

    async fn get_pipeline(&self, id: &str) -> Result<Pipeline> {
        self.pipelines
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id && p.status == PipelineStatus::Ready)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("Pipeline", id))
    }

    async fn get_pipeline_with_status(&self, id: &str) -> Result<Pipeline> {
        self.pipelines
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("Pipeline", id))
    }

    async fn get_pipeline_by_name_and_namespace(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Pipeline> {
        self.pipelines
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.name == name && p.namespace == namespace && p.status == PipelineStatus::Ready)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("Pipeline", name))
    }

    async fn list_pipelines(
        &self,
        filter: &FilterContext,
        opts: &ListOptions,
    ) -> Result<ListPage<Pipeline>> {
        let items: Vec<Pipeline> = self
            .pipelines
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.status == PipelineStatus::Ready)
            .filter(|p| scope_matches(filter, &[(ResourceType::Namespace, &p.namespace)]))
            .filter(|p| name_matches(opts, &p.name))
            .cloned()
            .collect();
        opts.paginate(items)
    }

    async fn update_pipeline_status(&self, id: &str, status: PipelineStatus) -> Result<()> {
        let mut pipelines = self.pipelines.lock().unwrap();
        let pipeline = pipelines
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::resource_not_found("Pipeline", id))?;
        pipeline.status = status;
        Ok(())
    }

    async fn update_pipeline_default_version(&self, id: &str, version_id: &str) -> Result<()> {
        let mut pipelines = self.pipelines.lock().unwrap();
        let pipeline = pipelines
            .iter_mut()
            .find(|p| p.id == id)
            .ok_or_else(|| Error::resource_not_found("Pipeline", id))?;
        pipeline.default_version_id = Some(version_id.to_string());
        Ok(())
    }

    async fn delete_pipeline(&self, id: &str) -> Result<()> {
        self.pipelines.lock().unwrap().retain(|p| p.id != id);
        Ok(())
    }

    async fn create_pipeline_version(&self, version: &PipelineVersion) -> Result<PipelineVersion> {
        self.version_transitions
            .lock()
            .unwrap()
            .push((version.id.clone(), version.status));
        self.versions.lock().unwrap().push(version.clone());
        Ok(version.clone())
    }

    async fn get_pipeline_version(&self, id: &str) -> Result<PipelineVersion> {
        self.versions
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.id == id && v.status == PipelineVersionStatus::Ready)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("PipelineVersion", id))
    }

    async fn get_pipeline_version_with_status(&self, id: &str) -> Result<PipelineVersion> {
        self.versions
            .lock()
            .unwrap()
            .iter()
            .find(|v| v.id == id)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("PipelineVersion", id))
    }

    async fn get_latest_pipeline_version(&self, pipeline_id: &str) -> Result<PipelineVersion> {
        self.versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.pipeline_id == pipeline_id && v.status == PipelineVersionStatus::Ready)
            .max_by_key(|v| v.created_at)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("PipelineVersion", pipeline_id))
    }

    async fn list_pipeline_versions(
        &self,
        pipeline_id: &str,
        opts: &ListOptions,
    ) -> Result<ListPage<PipelineVersion>> {
        let items: Vec<PipelineVersion> = self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.pipeline_id == pipeline_id && v.status == PipelineVersionStatus::Ready)
            .cloned()
            .collect();
        opts.paginate(items)
    }

    async fn count_pipeline_versions(&self, pipeline_id: &str) -> Result<i64> {
        Ok(self
            .versions
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v.pipeline_id == pipeline_id && v.status != PipelineVersionStatus::Deleting)
            .count() as i64)
    }

    async fn update_pipeline_version_status(
        &self,
        id: &str,
        status: PipelineVersionStatus,
    ) -> Result<()> {
        let mut versions = self.versions.lock().unwrap();
        let version = versions
            .iter_mut()
            .find(|v| v.id == id)
            .ok_or_else(|| Error::resource_not_found("PipelineVersion", id))?;
        version.status = status;
        self.version_transitions
            .lock()
            .unwrap()
            .push((id.to_string(), status));
        Ok(())
    }

    async fn delete_pipeline_version(&self, id: &str) -> Result<()> {
        if *self.fail_version_delete.lock().unwrap() {
            return Err(Error::internal_msg(format!("Row of version {id} is locked")));
        }
        self.versions.lock().unwrap().retain(|v| v.id != id);
        Ok(())
    }
}

/// Reference edges shared by the run and job fakes
#[derive(Default)]
pub struct FakeReferenceStore {
    pub references: Mutex<Vec<ResourceReference>>,
}

#[async_trait]
impl ResourceReferenceStore for FakeReferenceStore {
    async fn get_reference(
        &self,
        resource_id: &str,
        resource_type: ResourceType,
        reference_type: ResourceType,
    ) -> Result<ResourceReference> {
        self.references
            .lock()
            .unwrap()
            .iter()
            .find(|r| {
                r.resource_id == resource_id
                    && r.resource_type == resource_type
                    && r.reference_type == reference_type
            })
            .cloned()
            .ok_or_else(|| {
                Error::resource_not_found(
                    "ResourceReference",
                    format!("{resource_type} {resource_id} -> {reference_type}"),
                )
            })
    }
}

pub struct FakeRunStore {
    pub runs: Mutex<Vec<Run>>,
    pub references: Arc<FakeReferenceStore>,
}

impl FakeRunStore {
    fn new(references: Arc<FakeReferenceStore>) -> Self {
        Self {
            runs: Mutex::new(Vec::new()),
            references,
        }
    }

    fn with_run<T>(&self, id: &str, f: impl FnOnce(&mut Run) -> Result<T>) -> Result<T> {
        let mut runs = self.runs.lock().unwrap();
        let run = runs
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::resource_not_found("Run", id))?;
        f(run)
    }
}

#[async_trait]
impl RunStore for FakeRunStore {
    async fn create(&self, run: &Run) -> Result<Run> {
        self.references
            .references
            .lock()
            .unwrap()
            .extend(run.resource_references.iter().cloned());
        self.runs.lock().unwrap().push(run.clone());
        Ok(run.clone())
    }

    async fn get(&self, id: &str) -> Result<Run> {
        self.with_run(id, |run| Ok(run.clone()))
    }

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Run>> {
        let items: Vec<Run> = self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| {
                scope_matches(
                    filter,
                    &[
                        (ResourceType::Experiment, &r.experiment_id),
                        (ResourceType::Namespace, &r.namespace),
                    ],
                )
            })
            .filter(|r| name_matches(opts, &r.display_name) && state_matches(opts, r.storage_state))
            .cloned()
            .collect();
        opts.paginate(items)
    }

    async fn update(&self, run: &Run) -> Result<()> {
        self.with_run(&run.id, |stored| {
            stored.conditions = run.conditions.clone();
            stored.state = run.state;
            stored.state_history = run.state_history.clone();
            stored.workflow_runtime_manifest = run.workflow_runtime_manifest.clone();
            stored.pipeline_runtime_manifest = run.pipeline_runtime_manifest.clone();
            stored.finished_at = run.finished_at;
            Ok(())
        })
    }

    async fn create_or_update(&self, run: &Run) -> Result<()> {
        let exists = self.runs.lock().unwrap().iter().any(|r| r.id == run.id);
        if exists {
            self.update(run).await
        } else {
            self.create(run).await.map(|_| ())
        }
    }

    async fn terminate(&self, id: &str) -> Result<()> {
        self.with_run(id, |run| {
            if run.state.is_final() {
                return Err(Error::FailedPrecondition(format!(
                    "Run {id} already finished in state {}",
                    run.state
                )));
            }
            run.conditions = RuntimeState::Canceling.to_v1().to_string();
            run.state = RuntimeState::Canceling;
            run.state_history.push(RuntimeStatus {
                update_time: chrono::Utc::now(),
                state: RuntimeState::Canceling,
                error: None,
            });
            Ok(())
        })
    }

    async fn archive(&self, id: &str) -> Result<()> {
        self.with_run(id, |run| {
            run.storage_state = StorageState::Archived;
            Ok(())
        })
    }

    async fn unarchive(&self, id: &str) -> Result<()> {
        self.with_run(id, |run| {
            run.storage_state = StorageState::Available;
            Ok(())
        })
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.runs.lock().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    async fn create_metric(&self, metric: &RunMetric) -> Result<()> {
        self.with_run(&metric.run_id, |run| {
            if run
                .metrics
                .iter()
                .any(|m| m.node_id == metric.node_id && m.name == metric.name)
            {
                return Err(Error::invalid_input(format!(
                    "Metric {} of node {} was already reported",
                    metric.name, metric.node_id
                )));
            }
            run.metrics.push(metric.clone());
            Ok(())
        })
    }
}

pub struct FakeJobStore {
    pub jobs: Mutex<Vec<Job>>,
    pub references: Arc<FakeReferenceStore>,
    /// Page tokens of every list call, empty for the first page
    pub list_calls: Mutex<Vec<String>>,
}

impl FakeJobStore {
    fn new(references: Arc<FakeReferenceStore>) -> Self {
        Self {
            jobs: Mutex::new(Vec::new()),
            references,
            list_calls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl JobStore for FakeJobStore {
    async fn create(&self, job: &Job) -> Result<Job> {
        self.references
            .references
            .lock()
            .unwrap()
            .extend(job.resource_references.iter().cloned());
        self.jobs.lock().unwrap().push(job.clone());
        Ok(job.clone())
    }

    async fn get(&self, id: &str) -> Result<Job> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("Job", id))
    }

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Job>> {
        self.list_calls
            .lock()
            .unwrap()
            .push(format!("offset:{}", opts.offset()));
        let items: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .iter()
            .filter(|j| {
                scope_matches(
                    filter,
                    &[
                        (ResourceType::Experiment, &j.experiment_id),
                        (ResourceType::Namespace, &j.namespace),
                    ],
                )
            })
            .filter(|j| name_matches(opts, &j.display_name))
            .cloned()
            .collect();
        opts.paginate(items)
    }

    async fn enable(&self, id: &str, enabled: bool) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| Error::resource_not_found("Job", id))?;
        job.enabled = enabled;
        Ok(())
    }

    async fn update(&self, job: &Job) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        let stored = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| Error::resource_not_found("Job", &job.id))?;
        *stored = job.clone();
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.jobs.lock().unwrap().retain(|j| j.id != id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeTaskStore {
    pub tasks: Mutex<Vec<Task>>,
}

#[async_trait]
impl TaskStore for FakeTaskStore {
    async fn create(&self, task: &Task) -> Result<Task> {
        self.tasks.lock().unwrap().push(task.clone());
        Ok(task.clone())
    }

    async fn get(&self, id: &str) -> Result<Task> {
        self.tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("Task", id))
    }

    async fn list(&self, filter: &FilterContext, opts: &ListOptions) -> Result<ListPage<Task>> {
        let items: Vec<Task> = self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .filter(|t| {
                scope_matches(
                    filter,
                    &[
                        (ResourceType::Run, &t.run_id),
                        (ResourceType::Namespace, &t.namespace),
                    ],
                )
            })
            .cloned()
            .collect();
        opts.paginate(items)
    }

    async fn find_by_fingerprint(&self, run_id: &str, fingerprint: &str) -> Result<Option<Task>> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .iter()
            .find(|t| t.run_id == run_id && t.fingerprint == fingerprint)
            .cloned())
    }
}

#[derive(Default)]
pub struct FakeDefaultExperimentStore {
    pub id: Mutex<Option<String>>,
}

#[async_trait]
impl DefaultExperimentStore for FakeDefaultExperimentStore {
    async fn get_default_experiment_id(&self) -> Result<Option<String>> {
        Ok(self.id.lock().unwrap().clone())
    }

    async fn set_default_experiment_id(&self, id: &str) -> Result<()> {
        *self.id.lock().unwrap() = Some(id.to_string());
        Ok(())
    }
}

// ============================================================================
// Kubernetes
// ============================================================================

/// A recorded merge patch: namespace, name and body
pub type PatchCall = (String, String, Value);

#[derive(Default)]
pub struct FakeWorkflowClient {
    pub workflows: Mutex<BTreeMap<(String, String), Workflow>>,
    pub patches: Mutex<Vec<PatchCall>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    created: AtomicUsize,
}

impl FakeWorkflowClient {
    pub fn insert(&self, workflow: Workflow) {
        let key = (workflow.namespace().to_string(), workflow.name().to_string());
        self.workflows.lock().unwrap().insert(key, workflow);
    }

    pub fn contains(&self, namespace: &str, name: &str) -> bool {
        self.workflows
            .lock()
            .unwrap()
            .contains_key(&(namespace.to_string(), name.to_string()))
    }
}

#[async_trait]
impl WorkflowClient for FakeWorkflowClient {
    async fn get(&self, namespace: &str, name: &str) -> std::result::Result<Workflow, K8sError> {
        self.workflows
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| K8sError::NotFound(format!("workflow {namespace}/{name}")))
    }

    async fn create(
        &self,
        namespace: &str,
        workflow: &Workflow,
    ) -> std::result::Result<Workflow, K8sError> {
        if workflow.metadata.resource_version.is_some() {
            return Err(K8sError::Conflict(
                "resourceVersion should not be set on objects to be created".to_string(),
            ));
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let mut created = workflow.clone();
        if created.name().is_empty() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            created.metadata.name = Some(format!("{prefix}{n:05}"));
        }
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("wf-uid-{n}"));
        created.metadata.resource_version = Some("1".to_string());
        self.insert(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        namespace: &str,
        workflow: &Workflow,
    ) -> std::result::Result<Workflow, K8sError> {
        let key = (namespace.to_string(), workflow.name().to_string());
        let mut workflows = self.workflows.lock().unwrap();
        if !workflows.contains_key(&key) {
            return Err(K8sError::NotFound(format!("workflow {namespace}/{}", workflow.name())));
        }
        workflows.insert(key, workflow.clone());
        Ok(workflow.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> std::result::Result<(), K8sError> {
        self.deletes
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string()));
        self.workflows
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| K8sError::NotFound(format!("workflow {namespace}/{name}")))
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> std::result::Result<Workflow, K8sError> {
        self.patches
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string(), patch.clone()));
        self.workflows
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| K8sError::NotFound(format!("workflow {namespace}/{name}")))
    }
}

#[derive(Default)]
pub struct FakeScheduledWorkflowClient {
    pub scheduled: Mutex<BTreeMap<(String, String), ScheduledWorkflow>>,
    pub patches: Mutex<Vec<PatchCall>>,
    pub deletes: Mutex<Vec<(String, String)>>,
    created: AtomicUsize,
}

impl FakeScheduledWorkflowClient {
    pub fn insert(&self, swf: ScheduledWorkflow) {
        let key = (swf.namespace().to_string(), swf.name().to_string());
        self.scheduled.lock().unwrap().insert(key, swf);
    }
}

#[async_trait]
impl ScheduledWorkflowClient for FakeScheduledWorkflowClient {
    async fn get(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<ScheduledWorkflow, K8sError> {
        self.scheduled
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| K8sError::NotFound(format!("scheduled workflow {namespace}/{name}")))
    }

    async fn create(
        &self,
        namespace: &str,
        swf: &ScheduledWorkflow,
    ) -> std::result::Result<ScheduledWorkflow, K8sError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        let mut created = swf.clone();
        if created.name().is_empty() {
            let prefix = created.metadata.generate_name.clone().unwrap_or_default();
            created.metadata.name = Some(format!("{prefix}{n:05}"));
        }
        created.metadata.namespace = Some(namespace.to_string());
        created.metadata.uid = Some(format!("swf-uid-{n}"));
        self.insert(created.clone());
        Ok(created)
    }

    async fn update(
        &self,
        namespace: &str,
        swf: &ScheduledWorkflow,
    ) -> std::result::Result<ScheduledWorkflow, K8sError> {
        let key = (namespace.to_string(), swf.name().to_string());
        self.scheduled.lock().unwrap().insert(key, swf.clone());
        Ok(swf.clone())
    }

    async fn delete(&self, namespace: &str, name: &str) -> std::result::Result<(), K8sError> {
        self.deletes
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string()));
        self.scheduled
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
            .map(|_| ())
            .ok_or_else(|| K8sError::NotFound(format!("scheduled workflow {namespace}/{name}")))
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> std::result::Result<ScheduledWorkflow, K8sError> {
        self.patches
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string(), patch.clone()));
        let mut scheduled = self.scheduled.lock().unwrap();
        let swf = scheduled
            .entry((namespace.to_string(), name.to_string()))
            .or_default();
        if let Some(enabled) = patch.pointer("/spec/enabled").and_then(Value::as_bool) {
            swf.spec.enabled = enabled;
        }
        Ok(swf.clone())
    }
}

#[derive(Default)]
pub struct FakePodClient {
    pub deletes: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl PodClient for FakePodClient {
    async fn delete_pod(&self, namespace: &str, name: &str) -> std::result::Result<(), K8sError> {
        self.deletes
            .lock()
            .unwrap()
            .push((namespace.to_string(), name.to_string()));
        Ok(())
    }
}

pub struct FakeAccessReviewClient {
    pub allowed: Mutex<bool>,
    pub reviews: Mutex<Vec<(String, ResourceAttributes)>>,
}

impl Default for FakeAccessReviewClient {
    fn default() -> Self {
        Self {
            allowed: Mutex::new(true),
            reviews: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl AccessReviewClient for FakeAccessReviewClient {
    async fn review(
        &self,
        user: &str,
        attributes: &ResourceAttributes,
    ) -> std::result::Result<AccessDecision, K8sError> {
        self.reviews
            .lock()
            .unwrap()
            .push((user.to_string(), attributes.clone()));
        let allowed = *self.allowed.lock().unwrap();
        Ok(AccessDecision {
            allowed,
            reason: if allowed { String::new() } else { "denied by test".to_string() },
        })
    }
}

// ============================================================================
// Object store
// ============================================================================

#[derive(Default)]
pub struct FakeObjectStore {
    pub files: Mutex<BTreeMap<String, Vec<u8>>>,
    /// Keys whose deletion fails
    pub failing: Mutex<BTreeSet<String>>,
    pub deletes: Mutex<Vec<String>>,
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        self.files
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::resource_not_found("Object", key))
    }

    async fn add_file(&self, contents: &[u8], key: &str) -> Result<()> {
        self.files
            .lock()
            .unwrap()
            .insert(key.to_string(), contents.to_vec());
        Ok(())
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        self.deletes.lock().unwrap().push(key.to_string());
        if self.failing.lock().unwrap().contains(key) {
            return Err(Error::internal_msg(format!("Object store refused to delete {key}")));
        }
        self.files.lock().unwrap().remove(key);
        Ok(())
    }
}

// ============================================================================
// Harness
// ============================================================================

/// A resource manager wired to fakes, with handles on every fake
pub struct TestEnv {
    pub manager: Arc<ResourceManager>,
    pub config: Arc<ServerConfig>,
    pub experiments: Arc<FakeExperimentStore>,
    pub pipelines: Arc<FakePipelineStore>,
    pub runs: Arc<FakeRunStore>,
    pub jobs: Arc<FakeJobStore>,
    pub tasks: Arc<FakeTaskStore>,
    pub references: Arc<FakeReferenceStore>,
    pub default_experiment: Arc<FakeDefaultExperimentStore>,
    pub workflows: Arc<FakeWorkflowClient>,
    pub scheduled_workflows: Arc<FakeScheduledWorkflowClient>,
    pub pods: Arc<FakePodClient>,
    pub access_review: Arc<FakeAccessReviewClient>,
    pub object_store: Arc<FakeObjectStore>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_config(ServerConfig::default())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let config = Arc::new(config);
        let references = Arc::new(FakeReferenceStore::default());
        let experiments = Arc::new(FakeExperimentStore::default());
        let pipelines = Arc::new(FakePipelineStore::default());
        let runs = Arc::new(FakeRunStore::new(references.clone()));
        let jobs = Arc::new(FakeJobStore::new(references.clone()));
        let tasks = Arc::new(FakeTaskStore::default());
        let default_experiment = Arc::new(FakeDefaultExperimentStore::default());
        let workflows = Arc::new(FakeWorkflowClient::default());
        let scheduled_workflows = Arc::new(FakeScheduledWorkflowClient::default());
        let pods = Arc::new(FakePodClient::default());
        let access_review = Arc::new(FakeAccessReviewClient::default());
        let object_store = Arc::new(FakeObjectStore::default());

        let stores = Stores {
            experiments: experiments.clone(),
            pipelines: pipelines.clone(),
            runs: runs.clone(),
            jobs: jobs.clone(),
            tasks: tasks.clone(),
            references: references.clone(),
            default_experiment: default_experiment.clone(),
        };
        let clients = Clients {
            workflows: workflows.clone(),
            scheduled_workflows: scheduled_workflows.clone(),
            pods: pods.clone(),
            access_review: access_review.clone(),
            object_store: object_store.clone(),
        };
        let manager = Arc::new(ResourceManager::new(stores, clients, config.clone()));

        Self {
            manager,
            config,
            experiments,
            pipelines,
            runs,
            jobs,
            tasks,
            references,
            default_experiment,
            workflows,
            scheduled_workflows,
            pods,
            access_review,
            object_store,
        }
    }

    /// Store an experiment directly and return its id
    pub fn seed_experiment(&self, id: &str, name: &str, namespace: &str) -> String {
        self.experiments.experiments.lock().unwrap().push(Experiment {
            id: id.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
            storage_state: StorageState::Available,
            created_at: chrono::Utc::now(),
            ..Default::default()
        });
        id.to_string()
    }
}

/// A first-generation manifest with one parameter
pub fn v1_manifest() -> String {
    serde_json::json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Workflow",
        "metadata": {"generateName": "hello-"},
        "spec": {
            "entrypoint": "main",
            "arguments": {"parameters": [{"name": "x", "value": "1"}]},
            "templates": [{"name": "main", "container": {"image": "alpine"}}]
        }
    })
    .to_string()
}

/// A second-generation pipeline spec with two string inputs
pub fn v2_manifest() -> String {
    serde_json::json!({
        "pipelineInfo": {"name": "hello-world"},
        "root": {"inputDefinitions": {"parameters": {
            "param1": {"parameterType": "STRING", "defaultValue": "hello"},
            "param2": {"parameterType": "STRING"}
        }}},
        "schemaVersion": "2.1.0"
    })
    .to_string()
}
