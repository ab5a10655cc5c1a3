//! Workflow Object Model
//!
//! Typed views over the two custom resources the server drives:
//! - [`Workflow`]: a single Argo execution (`argoproj.io/v1alpha1`)
//! - [`ScheduledWorkflow`]: a recurring schedule (`kubeflow.org/v1beta1`)
//!
//! Only the fields the server reads or writes are typed. Everything else is
//! kept in flattened maps so objects survive a read-modify-write round trip.

mod execution;
mod scheduled;

pub use execution::{NodeStatus, Workflow, WorkflowStatus};
pub use scheduled::{
    ScheduledWorkflow, ScheduledWorkflowCondition, ScheduledWorkflowSpec,
    ScheduledWorkflowStatus, SwfCronSchedule, SwfParameter, SwfPeriodicSchedule, SwfTrigger,
    WorkflowResource,
};

pub const WORKFLOW_API_VERSION: &str = "argoproj.io/v1alpha1";
pub const WORKFLOW_KIND: &str = "Workflow";
pub const SCHEDULED_WORKFLOW_API_VERSION: &str = "kubeflow.org/v1beta1";
pub const SCHEDULED_WORKFLOW_KIND: &str = "ScheduledWorkflow";

/// Label carrying the id of the run a workflow executes
pub const LABEL_RUN_ID: &str = "pipeline/runid";

/// Set once the final state of a workflow is stored; marks it for collection
pub const LABEL_PERSISTED_FINAL_STATE: &str = "pipeline/persistedFinalState";

/// Name of the scheduled workflow that spawned a workflow
pub const LABEL_SCHEDULED_WORKFLOW_NAME: &str =
    "scheduledworkflows.kubeflow.org/scheduledWorkflowName";

/// Epoch second a scheduled workflow planned a workflow for
pub const LABEL_WORKFLOW_EPOCH: &str = "scheduledworkflows.kubeflow.org/workflowEpoch";

/// Argo's own completion marker
pub const LABEL_COMPLETED: &str = "workflows.argoproj.io/completed";

/// Display name of the run, read by the metadata writer
pub const ANNOTATION_RUN_NAME: &str = "pipelines.kubeflow.org/run_name";

pub const ANNOTATION_ISTIO_SIDECAR_INJECT: &str = "sidecar.istio.io/inject";
