//! Pipeline API Handlers
//!
//! HTTP endpoints for pipelines and their versions.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use pipelines_core::convert::{
    to_api_pipeline, to_api_pipeline_version, to_model_pipeline, to_model_pipeline_version,
};
use pipelines_core::domain::{FilterContext, Pipeline, PipelineVersion, ResourceType};
use pipelines_core::dto::{ApiPipeline, ApiPipelineVersion, ApiVersion, v1beta1, v2beta1};
use pipelines_core::{Error, Result};
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::api::{AppState, ListQuery, api_version};
use crate::auth::{RESOURCE_PIPELINES, VERB_CREATE, VERB_DELETE, VERB_GET, VERB_LIST};

// =============================================================================
// Pipelines
// =============================================================================

/// POST /apis/{version}/pipelines
///
/// A v1 pipeline carrying a package `url` also gets its first version.
pub async fn create_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(version): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<ApiPipeline>> {
    let version = api_version(&version, "CreatePipeline")?;
    state.count("CreatePipeline");

    let request = ApiPipeline::from_json(version, body)?;
    let mut pipeline = to_model_pipeline(&request)
        .map_err(|e| e.wrap("Failed to create a pipeline due to conversion error"))?;
    if pipeline.name.trim().is_empty() {
        return Err(Error::invalid_input("Pipeline name is empty").into());
    }
    if let Some(namespace) = state.scoped_namespace(&pipeline.namespace)? {
        pipeline.namespace = namespace;
    } else {
        pipeline.namespace.clear();
    }
    state
        .authorize(&headers, &pipeline.namespace, VERB_CREATE, RESOURCE_PIPELINES, &pipeline.name)
        .await?;

    tracing::info!("Creating pipeline: {}", pipeline.name);
    let pipeline = state.manager.create_pipeline(pipeline).await?;

    let package_url = match &request {
        ApiPipeline::V1(p) => p.url.as_ref().map(|u| u.pipeline_url.clone()),
        ApiPipeline::V2(_) => None,
    };
    let default_version = match package_url.filter(|url| !url.is_empty()) {
        Some(url) => {
            let version = PipelineVersion {
                name: pipeline.name.clone(),
                description: pipeline.description.clone(),
                pipeline_id: pipeline.id.clone(),
                pipeline_spec: fetch_package(&url).await?,
                pipeline_spec_uri: url,
                ..Default::default()
            };
            Some(state.manager.create_pipeline_version(version).await?)
        }
        None => None,
    };

    Ok(Json(to_api_pipeline(&pipeline, default_version.as_ref(), version)))
}

/// GET /apis/{version}/pipelines/{id}
pub async fn get_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<Json<ApiPipeline>> {
    let version = api_version(&version, "GetPipeline")?;
    state.count("GetPipeline");
    state.authorize_pipeline(&headers, &id, VERB_GET).await?;

    let pipeline = state.manager.get_pipeline(&id).await?;
    let default_version = default_version(&state, &pipeline).await?;
    Ok(Json(to_api_pipeline(&pipeline, default_version.as_ref(), version)))
}

/// Newest version of a pipeline, if it has any
async fn default_version(state: &AppState, pipeline: &Pipeline) -> Result<Option<PipelineVersion>> {
    match state.manager.get_latest_pipeline_version(&pipeline.id).await {
        Ok(version) => Ok(Some(version)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// GET /apis/{version}/pipelines
pub async fn list_pipelines(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(version): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let version = api_version(&version, "ListPipelines")?;
    state.count("ListPipelines");

    let requested = match version {
        ApiVersion::V1Beta1 => match query.reference_key()? {
            Some((ResourceType::Namespace, id)) => id,
            Some((other, _)) => {
                return Err(Error::invalid_input(format!(
                    "Pipelines can only be filtered by namespace, not {other}"
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
                .authorize(&headers, &namespace, VERB_LIST, RESOURCE_PIPELINES, "")
                .await?;
            FilterContext::by(ResourceType::Namespace, namespace)
        }
        None => FilterContext::none(),
    };

    let page = state
        .manager
        .list_pipelines(&filter, &query.list_options()?)
        .await?;
    let response = match version {
        ApiVersion::V1Beta1 => Json(v1beta1::ListPipelinesResponse {
            pipelines: page
                .items
                .iter()
                .filter_map(|p| to_api_pipeline(p, None, version).into_v1())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
        ApiVersion::V2Beta1 => Json(v2beta1::ListPipelinesResponse {
            pipelines: page
                .items
                .iter()
                .filter_map(|p| to_api_pipeline(p, None, version).into_v2())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
    };
    Ok(response)
}

/// DELETE /apis/{version}/pipelines/{id}
pub async fn delete_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    api_version(&version, "DeletePipeline")?;
    state.count("DeletePipeline");
    state.authorize_pipeline(&headers, &id, VERB_DELETE).await?;

    state.manager.delete_pipeline(&id).await?;
    Ok(StatusCode::OK)
}

/// GET /apis/{version}/pipelines/{id}/templates
pub async fn get_pipeline_template(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<Json<v1beta1::GetTemplateResponse>> {
    api_version(&version, "GetTemplate")?;
    state.count("GetTemplate");
    state.authorize_pipeline(&headers, &id, VERB_GET).await?;

    let bytes = state.manager.get_pipeline_latest_template(&id).await?;
    let template = String::from_utf8(bytes)
        .map_err(|e| Error::internal(e, format!("Template of pipeline {id} is not UTF-8")))?;
    Ok(Json(v1beta1::GetTemplateResponse { template }))
}

// =============================================================================
// Pipeline versions
// =============================================================================

/// POST /apis/{version}/pipelines/{id}/versions
pub async fn create_pipeline_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, pipeline_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> ApiResult<Json<ApiPipelineVersion>> {
    let version = api_version(&version, "CreatePipelineVersion")?;
    state.count("CreatePipelineVersion");

    let mut request = ApiPipelineVersion::from_json(version, body)?;
    match &mut request {
        ApiPipelineVersion::V1(v) if v.resource_references.is_empty() => {
            v.resource_references.push(v1beta1::ResourceReference::new(
                v1beta1::ResourceType::Pipeline,
                &pipeline_id,
                v1beta1::Relationship::Owner,
            ));
        }
        ApiPipelineVersion::V2(v) if v.pipeline_id.is_empty() => {
            v.pipeline_id = pipeline_id.clone();
        }
        _ => {}
    }
    let mut pipeline_version = to_model_pipeline_version(&request)
        .map_err(|e| e.wrap("Failed to create a pipeline version due to conversion error"))?;
    if pipeline_version.pipeline_id != pipeline_id {
        return Err(Error::invalid_input(format!(
            "Pipeline version belongs to pipeline {}, not {pipeline_id}",
            pipeline_version.pipeline_id
        ))
        .into());
    }
    if pipeline_version.name.trim().is_empty() {
        return Err(Error::invalid_input("Pipeline version name is empty").into());
    }
    state
        .authorize_pipeline(&headers, &pipeline_id, VERB_CREATE)
        .await?;

    if pipeline_version.pipeline_spec.is_empty() && is_remote(&pipeline_version.pipeline_spec_uri) {
        pipeline_version.pipeline_spec = fetch_package(&pipeline_version.pipeline_spec_uri).await?;
    }

    tracing::info!("Creating pipeline version {} for pipeline {}", pipeline_version.name, pipeline_id);
    let pipeline_version = state.manager.create_pipeline_version(pipeline_version).await?;
    Ok(Json(to_api_pipeline_version(&pipeline_version, version)))
}

/// GET /apis/{version}/pipelines/{id}/versions/{version_id}
pub async fn get_pipeline_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, pipeline_id, version_id)): Path<(String, String, String)>,
) -> ApiResult<Json<ApiPipelineVersion>> {
    let version = api_version(&version, "GetPipelineVersion")?;
    state.count("GetPipelineVersion");
    state.authorize_pipeline(&headers, &pipeline_id, VERB_GET).await?;

    let pipeline_version = owned_version(&state, &pipeline_id, &version_id).await?;
    Ok(Json(to_api_pipeline_version(&pipeline_version, version)))
}

/// GET /apis/{version}/pipelines/{id}/versions
pub async fn list_pipeline_versions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, pipeline_id)): Path<(String, String)>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let version = api_version(&version, "ListPipelineVersions")?;
    state.count("ListPipelineVersions");
    state.authorize_pipeline(&headers, &pipeline_id, VERB_LIST).await?;

    let page = state
        .manager
        .list_pipeline_versions(&pipeline_id, &query.list_options()?)
        .await?;
    let response = match version {
        ApiVersion::V1Beta1 => Json(v1beta1::ListPipelineVersionsResponse {
            versions: page
                .items
                .iter()
                .filter_map(|v| to_api_pipeline_version(v, version).into_v1())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
        ApiVersion::V2Beta1 => Json(v2beta1::ListPipelineVersionsResponse {
            pipeline_versions: page
                .items
                .iter()
                .filter_map(|v| to_api_pipeline_version(v, version).into_v2())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
    };
    Ok(response)
}

/// DELETE /apis/{version}/pipelines/{id}/versions/{version_id}
pub async fn delete_pipeline_version(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, pipeline_id, version_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    api_version(&version, "DeletePipelineVersion")?;
    state.count("DeletePipelineVersion");
    state.authorize_pipeline(&headers, &pipeline_id, VERB_DELETE).await?;

    owned_version(&state, &pipeline_id, &version_id).await?;
    state.manager.delete_pipeline_version(&version_id).await?;
    Ok(StatusCode::OK)
}

/// A version that must belong to `pipeline_id`
async fn owned_version(
    state: &AppState,
    pipeline_id: &str,
    version_id: &str,
) -> Result<PipelineVersion> {
    let version = state.manager.get_pipeline_version(version_id).await?;
    if version.pipeline_id != pipeline_id {
        return Err(Error::resource_not_found("PipelineVersion", version_id)
            .wrap(format!("Pipeline {pipeline_id} has no such version")));
    }
    Ok(version)
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Download a pipeline package
async fn fetch_package(url: &str) -> Result<String> {
    if !is_remote(url) {
        return Err(Error::invalid_input(format!(
            "Package URL {url:?} must be an http(s) URL"
        )));
    }
    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| Error::invalid_input(format!("Failed to download the package at {url}: {e}")))?;
    response
        .text()
        .await
        .map_err(|e| Error::invalid_input(format!("Failed to read the package at {url}: {e}")))
}
