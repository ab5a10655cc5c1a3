//! Experiment API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use pipelines_core::convert::{to_api_experiment, to_model_experiment};
use pipelines_core::domain::{FilterContext, ResourceType};
use pipelines_core::dto::{ApiExperiment, ApiVersion, v1beta1, v2beta1};
use pipelines_core::Error;
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::api::{AppState, ListQuery, api_version, split_action};
use crate::auth::{
    RESOURCE_EXPERIMENTS, VERB_ARCHIVE, VERB_CREATE, VERB_DELETE, VERB_GET, VERB_LIST,
    VERB_UNARCHIVE,
};

/// POST /apis/{version}/experiments
pub async fn create_experiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(version): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<ApiExperiment>> {
    let version = api_version(&version, "CreateExperiment")?;
    state.count("CreateExperiment");

    let request = ApiExperiment::from_json(version, body)?;
    let mut experiment = to_model_experiment(&request)
        .map_err(|e| e.wrap("Failed to create an experiment due to conversion error"))?;
    if experiment.name.trim().is_empty() {
        return Err(Error::invalid_input("Experiment name is empty").into());
    }
    match state.scoped_namespace(&experiment.namespace)? {
        Some(namespace) => experiment.namespace = namespace,
        None => experiment.namespace = state.manager.default_namespace().to_string(),
    }
    state
        .authorize(&headers, &experiment.namespace, VERB_CREATE, RESOURCE_EXPERIMENTS, &experiment.name)
        .await?;

    tracing::info!("Creating experiment: {}", experiment.name);
    let experiment = state.manager.create_experiment(experiment).await?;
    Ok(Json(to_api_experiment(&experiment, version, state.config.multi_user)))
}

/// GET /apis/{version}/experiments/{id}
pub async fn get_experiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<Json<ApiExperiment>> {
    let version = api_version(&version, "GetExperiment")?;
    state.count("GetExperiment");
    state.authorize_experiment(&headers, &id, VERB_GET).await?;

    let experiment = state.manager.get_experiment(&id).await?;
    Ok(Json(to_api_experiment(&experiment, version, state.config.multi_user)))
}

/// GET /apis/{version}/experiments
///
/// Multi-user listings name their namespace through `namespace` (v2) or a
/// namespace `resource_reference_key` (v1).
pub async fn list_experiments(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(version): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let version = api_version(&version, "ListExperiments")?;
    state.count("ListExperiments");

    let requested = match version {
        ApiVersion::V1Beta1 => match query.reference_key()? {
            Some((ResourceType::Namespace, id)) => id,
            Some((other, _)) => {
                return Err(Error::invalid_input(format!(
                    "Experiments can only be filtered by namespace, not {other}"
                ))
                .into());
            }
            None => String::new(),
        },
        ApiVersion::V2Beta1 => query.namespace.clone(),
    };
    let filter = match state.scoped_namespace(&requested)? {
        Some(namespace) => {
            state
                .authorize(&headers, &namespace, VERB_LIST, RESOURCE_EXPERIMENTS, "")
                .await?;
            FilterContext::by(ResourceType::Namespace, namespace)
        }
        None => FilterContext::none(),
    };

    let page = state
        .manager
        .list_experiments(&filter, &query.list_options()?)
        .await?;
    let multi_user = state.config.multi_user;
    let convert = |e: &pipelines_core::domain::Experiment| to_api_experiment(e, version, multi_user);
    let response = match version {
        ApiVersion::V1Beta1 => Json(v1beta1::ListExperimentsResponse {
            experiments: page.items.iter().filter_map(|e| convert(e).into_v1()).collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
        ApiVersion::V2Beta1 => Json(v2beta1::ListExperimentsResponse {
            experiments: page.items.iter().filter_map(|e| convert(e).into_v2()).collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
    };
    Ok(response)
}

/// POST /apis/{version}/experiments/{id}:archive|:unarchive
pub async fn experiment_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, segment)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    api_version(&version, "ExperimentAction")?;
    let (id, action) = split_action(&segment);
    match action {
        Some("archive") => {
            state.count("ArchiveExperiment");
            state.authorize_experiment(&headers, id, VERB_ARCHIVE).await?;
            state.manager.archive_experiment(id).await?;
        }
        Some("unarchive") => {
            state.count("UnarchiveExperiment");
            state.authorize_experiment(&headers, id, VERB_UNARCHIVE).await?;
            state.manager.unarchive_experiment(id).await?;
        }
        _ => {
            return Err(Error::invalid_input(format!(
                "Unsupported experiment action in {segment:?}"
            ))
            .into());
        }
    }
    Ok(StatusCode::OK)
}

/// DELETE /apis/{version}/experiments/{id}
pub async fn delete_experiment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    api_version(&version, "DeleteExperiment")?;
    state.count("DeleteExperiment");
    state.authorize_experiment(&headers, &id, VERB_DELETE).await?;

    state.manager.delete_experiment(&id).await?;
    Ok(StatusCode::OK)
}
