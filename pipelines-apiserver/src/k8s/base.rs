use async_trait::async_trait;
use pipelines_core::Error;
use serde_json::Value;
use thiserror::Error;

use crate::workflow::{ScheduledWorkflow, Workflow};

/// Errors emitted by the Kubernetes integration.
///
/// Absence and conflicts are split out of the transport error so callers can
/// tolerate them without string matching.
#[derive(Debug, Error)]
pub enum K8sError {
    /// The named object does not exist.
    #[error("Kubernetes object not found: {0}")]
    NotFound(String),
    /// The write lost an optimistic concurrency race or the name is taken.
    #[error("Kubernetes object conflict: {0}")]
    Conflict(String),
    /// A serialization or deserialization error while building or parsing
    /// Kubernetes resources.
    #[error("An error occurred in serde when dealing with K8s: {0}")]
    Serde(#[from] serde_json::error::Error),
    /// An error returned by the [`kube`] client when talking to the API
    /// server.
    #[error("An error occurred with kube when dealing with K8s: {0}")]
    Kube(#[from] kube::Error),
}

impl K8sError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, K8sError::NotFound(_))
    }

    /// Lift into the shared taxonomy with operation context.
    ///
    /// Absence becomes `NotFound`; everything else is internal.
    pub fn into_error(self, context: impl Into<String>) -> Error {
        let context = context.into();
        match self {
            K8sError::NotFound(message) => Error::NotFound(message).wrap(context),
            other => Error::internal(other, context),
        }
    }
}

/// Attributes of the action an access review asks about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceAttributes {
    pub namespace: String,
    pub verb: String,
    pub group: String,
    pub version: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
}

/// Outcome of an access review.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

/// Namespaced CRUD and merge-patch on Argo workflows.
#[async_trait]
pub trait WorkflowClient: Send + Sync {
    /// Fetches a workflow by name.
    async fn get(&self, namespace: &str, name: &str) -> Result<Workflow, K8sError>;

    /// Creates a workflow, honoring `generateName` when no name is set.
    async fn create(&self, namespace: &str, workflow: &Workflow) -> Result<Workflow, K8sError>;

    /// Replaces a workflow. A stale `resourceVersion` yields a conflict.
    async fn update(&self, namespace: &str, workflow: &Workflow) -> Result<Workflow, K8sError>;

    /// Deletes a workflow. A missing object yields [`K8sError::NotFound`].
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), K8sError>;

    /// Applies a JSON merge patch.
    async fn patch(&self, namespace: &str, name: &str, patch: &Value)
    -> Result<Workflow, K8sError>;
}

/// Namespaced CRUD and merge-patch on scheduled workflows.
#[async_trait]
pub trait ScheduledWorkflowClient: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<ScheduledWorkflow, K8sError>;

    async fn create(
        &self,
        namespace: &str,
        swf: &ScheduledWorkflow,
    ) -> Result<ScheduledWorkflow, K8sError>;

    async fn update(
        &self,
        namespace: &str,
        swf: &ScheduledWorkflow,
    ) -> Result<ScheduledWorkflow, K8sError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), K8sError>;

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<ScheduledWorkflow, K8sError>;
}

/// Pod deletion, used to clear failed steps before a retry.
#[async_trait]
pub trait PodClient: Send + Sync {
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), K8sError>;
}

/// Subject access reviews.
#[async_trait]
pub trait AccessReviewClient: Send + Sync {
    /// Asks whether `user` may perform the action described by `attributes`.
    async fn review(
        &self,
        user: &str,
        attributes: &ResourceAttributes,
    ) -> Result<AccessDecision, K8sError>;
}
