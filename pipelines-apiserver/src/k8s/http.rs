//! [`kube`] backed implementation of the Kubernetes collaborators.

use async_trait::async_trait;
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes as SarResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use k8s_openapi::api::core::v1::Pod;
use kube::Client;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, Patch, PatchParams,
    PostParams,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::base::{
    AccessDecision, AccessReviewClient, K8sError, PodClient, ResourceAttributes,
    ScheduledWorkflowClient, WorkflowClient,
};
use crate::workflow::{ScheduledWorkflow, Workflow};

/// Kubernetes client for workflows, scheduled workflows, pods and access reviews.
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    workflow_resource: ApiResource,
    scheduled_workflow_resource: ApiResource,
}

impl KubeClient {
    /// Builds a client from the ambient cluster configuration.
    pub async fn try_default() -> Result<Self, K8sError> {
        let client = Client::try_default().await?;
        Ok(Self::new(client))
    }

    pub fn new(client: Client) -> Self {
        let workflow = GroupVersionKind::gvk("argoproj.io", "v1alpha1", "Workflow");
        let scheduled = GroupVersionKind::gvk("kubeflow.org", "v1beta1", "ScheduledWorkflow");
        Self {
            client,
            workflow_resource: ApiResource::from_gvk(&workflow),
            scheduled_workflow_resource: ApiResource::from_gvk(&scheduled),
        }
    }

    fn workflows(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &self.workflow_resource)
    }

    fn scheduled_workflows(&self, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(
            self.client.clone(),
            namespace,
            &self.scheduled_workflow_resource,
        )
    }
}

fn map_kube_error(err: kube::Error) -> K8sError {
    match err {
        kube::Error::Api(response) if response.code == 404 => {
            K8sError::NotFound(response.message)
        }
        kube::Error::Api(response) if response.code == 409 => {
            K8sError::Conflict(response.message)
        }
        other => K8sError::Kube(other),
    }
}

fn to_dynamic<T: Serialize>(object: &T) -> Result<DynamicObject, K8sError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

fn from_dynamic<T: DeserializeOwned>(object: DynamicObject) -> Result<T, K8sError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

async fn get_object<T: DeserializeOwned>(api: Api<DynamicObject>, name: &str) -> Result<T, K8sError> {
    let object = api.get(name).await.map_err(map_kube_error)?;
    from_dynamic(object)
}

async fn create_object<T>(api: Api<DynamicObject>, object: &T) -> Result<T, K8sError>
where
    T: Serialize + DeserializeOwned,
{
    let created = api
        .create(&PostParams::default(), &to_dynamic(object)?)
        .await
        .map_err(map_kube_error)?;
    from_dynamic(created)
}

async fn replace_object<T>(api: Api<DynamicObject>, name: &str, object: &T) -> Result<T, K8sError>
where
    T: Serialize + DeserializeOwned,
{
    let replaced = api
        .replace(name, &PostParams::default(), &to_dynamic(object)?)
        .await
        .map_err(map_kube_error)?;
    from_dynamic(replaced)
}

async fn delete_object(api: Api<DynamicObject>, name: &str) -> Result<(), K8sError> {
    api.delete(name, &DeleteParams::default())
        .await
        .map_err(map_kube_error)?;
    Ok(())
}

async fn patch_object<T: DeserializeOwned>(
    api: Api<DynamicObject>,
    name: &str,
    patch: &Value,
) -> Result<T, K8sError> {
    let patched = api
        .patch(name, &PatchParams::default(), &Patch::Merge(patch))
        .await
        .map_err(map_kube_error)?;
    from_dynamic(patched)
}

#[async_trait]
impl WorkflowClient for KubeClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Workflow, K8sError> {
        get_object(self.workflows(namespace), name).await
    }

    async fn create(&self, namespace: &str, workflow: &Workflow) -> Result<Workflow, K8sError> {
        create_object(self.workflows(namespace), workflow).await
    }

    async fn update(&self, namespace: &str, workflow: &Workflow) -> Result<Workflow, K8sError> {
        replace_object(self.workflows(namespace), workflow.name(), workflow).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
        delete_object(self.workflows(namespace), name).await
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<Workflow, K8sError> {
        patch_object(self.workflows(namespace), name, patch).await
    }
}

#[async_trait]
impl ScheduledWorkflowClient for KubeClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<ScheduledWorkflow, K8sError> {
        get_object(self.scheduled_workflows(namespace), name).await
    }

    async fn create(
        &self,
        namespace: &str,
        swf: &ScheduledWorkflow,
    ) -> Result<ScheduledWorkflow, K8sError> {
        create_object(self.scheduled_workflows(namespace), swf).await
    }

    async fn update(
        &self,
        namespace: &str,
        swf: &ScheduledWorkflow,
    ) -> Result<ScheduledWorkflow, K8sError> {
        replace_object(self.scheduled_workflows(namespace), swf.name(), swf).await
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
        delete_object(self.scheduled_workflows(namespace), name).await
    }

    async fn patch(
        &self,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<ScheduledWorkflow, K8sError> {
        patch_object(self.scheduled_workflows(namespace), name, patch).await
    }
}

#[async_trait]
impl PodClient for KubeClient {
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<(), K8sError> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.delete(name, &DeleteParams::default())
            .await
            .map_err(map_kube_error)?;
        Ok(())
    }
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

#[async_trait]
impl AccessReviewClient for KubeClient {
    async fn review(
        &self,
        user: &str,
        attributes: &ResourceAttributes,
    ) -> Result<AccessDecision, K8sError> {
        let review = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: Some(user.to_string()),
                resource_attributes: Some(SarResourceAttributes {
                    namespace: non_empty(&attributes.namespace),
                    verb: non_empty(&attributes.verb),
                    group: non_empty(&attributes.group),
                    version: non_empty(&attributes.version),
                    resource: non_empty(&attributes.resource),
                    subresource: non_empty(&attributes.subresource),
                    name: non_empty(&attributes.name),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };

        let reviews: Api<SubjectAccessReview> = Api::all(self.client.clone());
        let result = reviews
            .create(&PostParams::default(), &review)
            .await
            .map_err(map_kube_error)?;
        let status = result.status.unwrap_or_default();
        Ok(AccessDecision {
            allowed: status.allowed,
            reason: status.reason.unwrap_or_default(),
        })
    }
}
