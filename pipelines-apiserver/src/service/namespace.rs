//! Namespace resolution and authorization

use pipelines_core::domain::ResourceType;
use pipelines_core::{Error, Result, ResultExt};

use super::ResourceManager;
use crate::auth::{VERB_GET, VERB_LIST};
use crate::k8s::ResourceAttributes;

/// Placeholder clients send for "no namespace"
pub const NO_NAMESPACE: &str = "-";

impl ResourceManager {
    pub fn default_namespace(&self) -> &str {
        match self.config.default_namespace() {
            "" | NO_NAMESPACE => &self.config.pod_namespace,
            namespace => namespace,
        }
    }

    pub fn is_default_namespace(&self, namespace: &str) -> bool {
        namespace.is_empty() || namespace == NO_NAMESPACE || namespace == self.default_namespace()
    }

    pub fn replace_empty_namespace(&self, namespace: &str) -> String {
        match namespace {
            "" | NO_NAMESPACE => self.default_namespace().to_string(),
            other => other.to_string(),
        }
    }

    /// Namespace an experiment lives in
    ///
    /// Rows written before namespaces became a column carry the namespace as
    /// a reference edge, which is consulted in multi-user mode.
    pub async fn namespace_from_experiment_id(&self, experiment_id: &str) -> Result<String> {
        let experiment = self
            .stores
            .experiments
            .get(experiment_id)
            .await
            .with_context(|| format!("Failed to fetch namespace from experiment {experiment_id}"))?;
        if !experiment.namespace.is_empty() {
            return Ok(experiment.namespace);
        }
        if !self.config.multi_user {
            return Ok(self.config.pod_namespace.clone());
        }
        self.namespace_reference(experiment_id, ResourceType::Experiment).await
    }

    pub async fn namespace_from_pipeline_id(&self, pipeline_id: &str) -> Result<String> {
        let pipeline = self
            .stores
            .pipelines
            .get_pipeline(pipeline_id)
            .await
            .with_context(|| format!("Failed to fetch namespace from pipeline {pipeline_id}"))?;
        if !pipeline.namespace.is_empty() {
            return Ok(pipeline.namespace);
        }
        if !self.config.multi_user {
            return Ok(self.config.pod_namespace.clone());
        }
        self.namespace_reference(pipeline_id, ResourceType::Pipeline).await
    }

    pub async fn namespace_from_pipeline_version_id(&self, version_id: &str) -> Result<String> {
        let version = self
            .stores
            .pipelines
            .get_pipeline_version(version_id)
            .await
            .with_context(|| format!("Failed to fetch namespace from pipeline version {version_id}"))?;
        self.namespace_from_pipeline_id(&version.pipeline_id)
            .await
            .with_context(|| format!("Failed to fetch namespace from pipeline version {version_id}"))
    }

    pub async fn namespace_from_run_id(&self, run_id: &str) -> Result<String> {
        let run = self
            .stores
            .runs
            .get(run_id)
            .await
            .with_context(|| format!("Failed to fetch namespace from run {run_id}"))?;
        if !run.namespace.is_empty() {
            return Ok(run.namespace);
        }
        self.namespace_from_experiment_id(&run.experiment_id)
            .await
            .with_context(|| format!("Failed to fetch namespace from run {run_id}"))
    }

    async fn namespace_reference(&self, id: &str, resource_type: ResourceType) -> Result<String> {
        let reference = self
            .stores
            .references
            .get_reference(id, resource_type, ResourceType::Namespace)
            .await
            .with_context(|| {
                format!("Failed to fetch namespace of {resource_type} {id} from its references")
            })?;
        if reference.reference_id.is_empty() {
            return Err(Error::internal_msg(format!(
                "Namespace of {resource_type} {id} is empty in multi-user mode"
            )));
        }
        Ok(reference.reference_id)
    }

    /// Reject a namespace that differs from the experiment's own
    pub async fn validate_experiment_namespace(
        &self,
        experiment_id: &str,
        namespace: &str,
    ) -> Result<()> {
        if experiment_id.is_empty() || namespace.is_empty() {
            return Ok(());
        }
        let experiment_namespace = self
            .namespace_from_experiment_id(experiment_id)
            .await
            .with_context(|| format!("Failed to validate the namespace of experiment {experiment_id}"))?;
        if !experiment_namespace.is_empty() && experiment_namespace != namespace {
            return Err(Error::invalid_input(format!(
                "Experiment {experiment_id} belongs to namespace '{experiment_namespace}' (claimed a different namespace '{namespace}')"
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Authorization
    // =========================================================================

    /// Check that `user` may perform the described action
    ///
    /// Always allowed in single-user mode; reads are allowed for everyone
    /// when shared read is on.
    pub async fn is_authorized(&self, user: &str, attributes: &ResourceAttributes) -> Result<()> {
        if !self.config.multi_user {
            return Ok(());
        }
        if self.config.shared_read && (attributes.verb == VERB_GET || attributes.verb == VERB_LIST)
        {
            tracing::debug!("Shared read mode, allowing {:?}", attributes);
            return Ok(());
        }
        if user.is_empty() {
            return Err(Error::Unauthenticated(
                "User identity is empty in the request header".to_string(),
            ));
        }

        let decision = self
            .clients
            .access_review
            .review(user, attributes)
            .await
            .map_err(|e| {
                Error::internal(e, format!("Failed to review access of user '{user}'"))
            })?;
        if !decision.allowed {
            tracing::info!("Denied user '{}': {:?}", user, attributes);
            return Err(Error::PermissionDenied(format!(
                "User '{user}' is not authorized with reason: {} (verb {} on {} '{}' in namespace '{}')",
                decision.reason,
                attributes.verb,
                attributes.resource,
                attributes.name,
                attributes.namespace
            )));
        }
        tracing::debug!("Authorized user '{}': {:?}", user, attributes);
        Ok(())
    }
}
