//! API Module
//!
//! HTTP API layer of the server. Both wire generations are served from the
//! same handlers; the path names the generation and the body is decoded into
//! the matching variant of the tagged request types.
//!
//! Each submodule handles endpoints for a specific resource.

pub mod error;
pub mod experiment;
pub mod health;
pub mod job;
pub mod pipeline;
pub mod report;
pub mod run;
pub mod task;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    Router,
    http::HeaderMap,
    routing::{get, post},
};
use pipelines_core::domain::{FilterContext, ResourceType};
use pipelines_core::dto::{ApiVersion, v1beta1};
use pipelines_core::reference::to_model_resource_type;
use pipelines_core::{Error, Result};
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::auth::{
    RESOURCE_EXPERIMENTS, RESOURCE_JOBS, RESOURCE_PIPELINES, RESOURCE_RUNS, VERB_CREATE,
    VERB_LIST, resource_attributes, user_identity,
};
use crate::config::ServerConfig;
use crate::repository::{ListFilter, ListOptions};
use crate::service::ResourceManager;

/// Per-operation request counts
#[derive(Debug, Default)]
pub struct RequestCounters {
    counts: Mutex<BTreeMap<&'static str, u64>>,
}

impl RequestCounters {
    pub fn record(&self, operation: &'static str) {
        let mut counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        *counts.entry(operation).or_default() += 1;
    }

    pub fn get(&self, operation: &str) -> u64 {
        let counts = self.counts.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(operation).copied().unwrap_or_default()
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ResourceManager>,
    pub config: Arc<ServerConfig>,
    pub counters: Arc<RequestCounters>,
}

impl AppState {
    pub fn new(manager: Arc<ResourceManager>, config: Arc<ServerConfig>) -> Self {
        Self {
            manager,
            config,
            counters: Arc::new(RequestCounters::default()),
        }
    }

    pub(crate) fn count(&self, operation: &'static str) {
        if self.config.collect_metrics {
            self.counters.record(operation);
        }
    }

    /// Authorize the caller for an action in `namespace`
    pub(crate) async fn authorize(
        &self,
        headers: &HeaderMap,
        namespace: &str,
        verb: &str,
        resource: &str,
        name: &str,
    ) -> Result<()> {
        if !self.config.multi_user {
            return Ok(());
        }
        let user = user_identity(headers, &self.config);
        let attributes = resource_attributes(namespace, verb, resource, name);
        self.manager.is_authorized(&user, &attributes).await
    }

    pub(crate) async fn authorize_experiment(
        &self,
        headers: &HeaderMap,
        id: &str,
        verb: &str,
    ) -> Result<()> {
        if !self.config.multi_user {
            return Ok(());
        }
        let namespace = self.manager.namespace_from_experiment_id(id).await?;
        self.authorize(headers, &namespace, verb, RESOURCE_EXPERIMENTS, id)
            .await
    }

    pub(crate) async fn authorize_pipeline(
        &self,
        headers: &HeaderMap,
        id: &str,
        verb: &str,
    ) -> Result<()> {
        if !self.config.multi_user {
            return Ok(());
        }
        let namespace = self.manager.namespace_from_pipeline_id(id).await?;
        self.authorize(headers, &namespace, verb, RESOURCE_PIPELINES, id)
            .await
    }

    pub(crate) async fn authorize_run(&self, headers: &HeaderMap, id: &str, verb: &str) -> Result<()> {
        if !self.config.multi_user {
            return Ok(());
        }
        let namespace = self.manager.namespace_from_run_id(id).await?;
        self.authorize(headers, &namespace, verb, RESOURCE_RUNS, id)
            .await
    }

    pub(crate) async fn authorize_job(&self, headers: &HeaderMap, id: &str, verb: &str) -> Result<()> {
        if !self.config.multi_user {
            return Ok(());
        }
        let job = self.manager.get_job(id).await?;
        self.authorize(headers, &job.namespace, verb, RESOURCE_JOBS, id)
            .await
    }

    /// Namespace a list or create request is scoped to
    ///
    /// Required in multi-user mode. In single-user mode only the default
    /// namespace may be named.
    pub(crate) fn scoped_namespace(&self, namespace: &str) -> Result<Option<String>> {
        if self.config.multi_user {
            if namespace.is_empty() {
                return Err(Error::invalid_input(
                    "Namespace is required in multi-user mode",
                ));
            }
            return Ok(Some(namespace.to_string()));
        }
        if !self.manager.is_default_namespace(namespace) {
            return Err(Error::invalid_input(format!(
                "Namespace '{namespace}' is not allowed in single-user mode"
            )));
        }
        Ok(None)
    }

    /// Filter for run and recurring run listings
    ///
    /// v1 names the scope through a `resource_reference_key`, v2 through
    /// `experiment_id` or `namespace`. The caller must be allowed to list
    /// `resource` in the namespace the scope resolves to.
    pub(crate) async fn list_scope(
        &self,
        headers: &HeaderMap,
        version: ApiVersion,
        query: &ListQuery,
        resource: &str,
    ) -> Result<FilterContext> {
        let scope = match version {
            ApiVersion::V1Beta1 => match query.reference_key()? {
                Some((kind @ (ResourceType::Experiment | ResourceType::Namespace), id)) => {
                    Some((kind, id))
                }
                Some((other, _)) => {
                    return Err(Error::invalid_input(format!(
                        "Listing {resource} by {other} is not supported"
                    )));
                }
                None => None,
            },
            ApiVersion::V2Beta1 if !query.experiment_id.is_empty() => {
                Some((ResourceType::Experiment, query.experiment_id.clone()))
            }
            ApiVersion::V2Beta1 if !query.namespace.is_empty() => {
                Some((ResourceType::Namespace, query.namespace.clone()))
            }
            ApiVersion::V2Beta1 => None,
        };

        match scope {
            Some((ResourceType::Experiment, experiment_id)) => {
                if self.config.multi_user {
                    let namespace = self
                        .manager
                        .namespace_from_experiment_id(&experiment_id)
                        .await?;
                    self.authorize(headers, &namespace, VERB_LIST, resource, "")
                        .await?;
                }
                Ok(FilterContext::by(ResourceType::Experiment, experiment_id))
            }
            Some((_, namespace)) => match self.scoped_namespace(&namespace)? {
                Some(namespace) => {
                    self.authorize(headers, &namespace, VERB_LIST, resource, "")
                        .await?;
                    Ok(FilterContext::by(ResourceType::Namespace, namespace))
                }
                None => Ok(FilterContext::none()),
            },
            None => {
                self.scoped_namespace("")?;
                Ok(FilterContext::none())
            }
        }
    }

    /// Namespace a new run or recurring run is authorized against
    pub(crate) async fn authorize_create_in_experiment(
        &self,
        headers: &HeaderMap,
        experiment_id: &str,
        resource: &str,
        name: &str,
    ) -> Result<()> {
        if !self.config.multi_user {
            return Ok(());
        }
        if experiment_id.is_empty() {
            return Err(Error::invalid_input(
                "Experiment id is required in multi-user mode",
            ));
        }
        let namespace = self.manager.namespace_from_experiment_id(experiment_id).await?;
        self.authorize(headers, &namespace, VERB_CREATE, resource, name)
            .await
    }
}

/// Parse the generation named in a request path
pub(crate) fn api_version(version: &str, operation: &str) -> Result<ApiVersion> {
    version
        .parse()
        .map_err(|_| Error::unknown_api_version(operation, format!("API {version}")))
}

/// Split `id:verb` custom method segments
pub(crate) fn split_action(segment: &str) -> (&str, Option<&str>) {
    match segment.split_once(':') {
        Some((id, verb)) => (id, Some(verb)),
        None => (segment, None),
    }
}

/// Query parameters shared by list endpoints
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub page_token: String,
    pub page_size: i32,
    /// `field` or `field desc`
    pub sort_by: String,
    /// JSON predicate filter
    pub filter: String,
    pub namespace: String,
    pub experiment_id: String,
    pub run_id: String,
    #[serde(rename = "resource_reference_key.type")]
    pub reference_type: String,
    #[serde(rename = "resource_reference_key.id")]
    pub reference_id: String,
}

impl ListQuery {
    pub fn list_options(&self) -> Result<ListOptions> {
        let mut parts = self.sort_by.split_whitespace();
        let field = parts.next().unwrap_or_default();
        let desc = match parts.next() {
            None | Some("asc") => false,
            Some("desc") => true,
            Some(other) => {
                return Err(Error::invalid_input(format!(
                    "Invalid sort order {other:?}: expected asc or desc"
                )));
            }
        };
        Ok(ListOptions::new(self.page_size, &self.page_token, field, desc)?
            .with_filter(parse_filter(&self.filter)?))
    }

    /// The v1 `resource_reference_key`, if given
    pub fn reference_key(&self) -> Result<Option<(ResourceType, String)>> {
        if self.reference_type.is_empty() {
            return Ok(None);
        }
        let api_type: v1beta1::ResourceType =
            serde_json::from_value(serde_json::Value::String(self.reference_type.clone()))
                .map_err(|e| Error::invalid_input(format!("Invalid resource reference type: {e}")))?;
        Ok(Some((to_model_resource_type(api_type)?, self.reference_id.clone())))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterDocument {
    predicates: Vec<FilterPredicate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FilterPredicate {
    key: String,
    op: String,
    string_value: String,
}

/// Equality predicates on `name` and `storage_state`
fn parse_filter(filter: &str) -> Result<ListFilter> {
    let mut parsed = ListFilter::default();
    if filter.trim().is_empty() {
        return Ok(parsed);
    }
    let document: FilterDocument = serde_json::from_str(filter)
        .map_err(|e| Error::invalid_input(format!("Invalid filter: {e}")))?;
    for predicate in document.predicates {
        if predicate.op != "EQUALS" {
            return Err(Error::invalid_input(format!(
                "Unsupported filter operation {}",
                predicate.op
            )));
        }
        match predicate.key.as_str() {
            "name" | "display_name" => parsed.name = Some(predicate.string_value),
            "storage_state" => {
                let state = match predicate.string_value.as_str() {
                    "STORAGESTATE_ARCHIVED" | "ARCHIVED" => {
                        pipelines_core::domain::StorageState::Archived
                    }
                    _ => pipelines_core::domain::StorageState::Available,
                };
                parsed.storage_state = Some(state);
            }
            other => {
                return Err(Error::invalid_input(format!("Unsupported filter key {other}")));
            }
        }
    }
    Ok(parsed)
}

/// Create the main API router with all endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/apis/v2beta1/healthz", get(health::healthz))
        // Experiment endpoints
        .route(
            "/apis/{version}/experiments",
            post(experiment::create_experiment).get(experiment::list_experiments),
        )
        .route(
            "/apis/{version}/experiments/{id}",
            get(experiment::get_experiment)
                .delete(experiment::delete_experiment)
                .post(experiment::experiment_action),
        )
        // Pipeline endpoints
        .route(
            "/apis/{version}/pipelines",
            post(pipeline::create_pipeline).get(pipeline::list_pipelines),
        )
        .route(
            "/apis/{version}/pipelines/{id}",
            get(pipeline::get_pipeline).delete(pipeline::delete_pipeline),
        )
        .route(
            "/apis/{version}/pipelines/{id}/versions",
            post(pipeline::create_pipeline_version).get(pipeline::list_pipeline_versions),
        )
        .route(
            "/apis/{version}/pipelines/{id}/versions/{version_id}",
            get(pipeline::get_pipeline_version).delete(pipeline::delete_pipeline_version),
        )
        .route(
            "/apis/{version}/pipelines/{id}/templates",
            get(pipeline::get_pipeline_template),
        )
        // Run endpoints
        .route("/apis/{version}/runs", post(run::create_run).get(run::list_runs))
        .route(
            "/apis/{version}/runs/{id}",
            get(run::get_run).delete(run::delete_run).post(run::run_action),
        )
        .route("/apis/{version}/runs/{id}/metrics", post(run::report_metrics))
        .route(
            "/apis/{version}/runs/{id}/nodes/{node_id}/artifacts/{artifact}",
            get(run::read_artifact),
        )
        // Task endpoints
        .route("/apis/v1alpha1/tasks", post(task::create_task).get(task::list_tasks))
        // Persistence agent reports
        .route("/apis/v1beta1/workflows", post(report::report_workflow))
        .route(
            "/apis/v1beta1/scheduledworkflows",
            post(report::report_scheduled_workflow),
        )
        // Recurring run endpoints
        .nest("/apis/v1beta1", job::routes(ApiVersion::V1Beta1, "jobs"))
        .nest("/apis/v2beta1", job::routes(ApiVersion::V2Beta1, "recurringruns"))
        // Add state and middleware
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipelines_core::ErrorKind;
    use pipelines_core::domain::StorageState;

    #[test]
    fn test_split_action() {
        assert_eq!(split_action("r1:terminate"), ("r1", Some("terminate")));
        assert_eq!(split_action("r1"), ("r1", None));
    }

    #[test]
    fn test_api_version() {
        assert_eq!(api_version("v1beta1", "GetRun").unwrap(), ApiVersion::V1Beta1);
        let err = api_version("v3", "GetRun").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownApiVersion);
    }

    #[test]
    fn test_list_query_sort_order() {
        let query = ListQuery {
            sort_by: "name desc".to_string(),
            ..Default::default()
        };
        let opts = query.list_options().unwrap();
        assert_eq!(opts.sort_by, "name");
        assert!(opts.desc);

        let query = ListQuery {
            sort_by: "name sideways".to_string(),
            ..Default::default()
        };
        assert!(query.list_options().is_err());
    }

    #[test]
    fn test_parse_filter() {
        let filter = r#"{"predicates": [
            {"key": "name", "op": "EQUALS", "string_value": "nightly"},
            {"key": "storage_state", "op": "EQUALS", "string_value": "ARCHIVED"}
        ]}"#;
        let parsed = parse_filter(filter).unwrap();
        assert_eq!(parsed.name.as_deref(), Some("nightly"));
        assert_eq!(parsed.storage_state, Some(StorageState::Archived));

        assert!(parse_filter(r#"{"predicates": [{"key": "name", "op": "LESS_THAN"}]}"#).is_err());
        assert_eq!(parse_filter("").unwrap(), ListFilter::default());
    }

    #[test]
    fn test_reference_key() {
        let query = ListQuery {
            reference_type: "EXPERIMENT".to_string(),
            reference_id: "e1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            query.reference_key().unwrap(),
            Some((ResourceType::Experiment, "e1".to_string()))
        );
        assert_eq!(ListQuery::default().reference_key().unwrap(), None);
    }

    #[test]
    fn test_request_counters() {
        let counters = RequestCounters::default();
        counters.record("CreateRun");
        counters.record("CreateRun");
        assert_eq!(counters.get("CreateRun"), 2);
        assert_eq!(counters.get("GetRun"), 0);
    }
}
