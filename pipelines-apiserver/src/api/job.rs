//! Recurring Run API Handlers
//!
//! v1 calls them jobs and v2 recurring runs; both collections are served by
//! the same handlers with the generation carried as a request extension.

use axum::{
    Extension, Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use pipelines_core::convert::{to_api_job, to_model_job};
use pipelines_core::domain::{Job, Trigger};
use pipelines_core::dto::{ApiJob, ApiVersion, v1beta1, v2beta1};
use pipelines_core::{Error, Result};
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::api::{AppState, ListQuery, split_action};
use crate::auth::{RESOURCE_JOBS, VERB_DELETE, VERB_DISABLE, VERB_ENABLE, VERB_GET};

const MAX_CONCURRENCY_LIMIT: i64 = 10;

/// Routes of one generation's recurring run collection
pub fn routes(version: ApiVersion, collection: &str) -> Router<AppState> {
    Router::new()
        .route(&format!("/{collection}"), post(create_job).get(list_jobs))
        .route(
            &format!("/{collection}/{{id}}"),
            get(get_job).delete(delete_job).post(job_action),
        )
        .layer(Extension(version))
}

/// Schedule and concurrency checks the persisted job must satisfy
fn validate_job(job: &Job) -> Result<()> {
    if job.display_name.trim().is_empty() {
        return Err(Error::invalid_input("Recurring run name is empty"));
    }
    if !(1..=MAX_CONCURRENCY_LIMIT).contains(&job.max_concurrency) {
        return Err(Error::invalid_input(format!(
            "Max concurrency of a recurring run must be between 1 and {MAX_CONCURRENCY_LIMIT}, got {}",
            job.max_concurrency
        )));
    }
    match &job.trigger {
        Some(Trigger::Cron(cron)) if cron.cron.trim().is_empty() => {
            Err(Error::invalid_input("Cron schedule of a recurring run is empty"))
        }
        Some(Trigger::Periodic(periodic)) if periodic.interval_seconds <= 0 => {
            Err(Error::invalid_input(format!(
                "Periodic interval of a recurring run must be positive, got {}",
                periodic.interval_seconds
            )))
        }
        _ => Ok(()),
    }
}

/// POST /apis/v1beta1/jobs, /apis/v2beta1/recurringruns
pub async fn create_job(
    State(state): State<AppState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<ApiJob>> {
    state.count("CreateJob");

    let request = ApiJob::from_json(version, body)?;
    let job = to_model_job(&request)
        .map_err(|e| e.wrap("Failed to create a recurring run due to conversion error"))?;
    validate_job(&job)?;
    state
        .authorize_create_in_experiment(&headers, &job.experiment_id, RESOURCE_JOBS, &job.display_name)
        .await?;

    tracing::info!("Creating recurring run: {}", job.display_name);
    let job = state.manager.create_job(job).await?;
    Ok(Json(to_api_job(&job, version)))
}

/// GET /apis/v1beta1/jobs/{id}, /apis/v2beta1/recurringruns/{id}
pub async fn get_job(
    State(state): State<AppState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiJob>> {
    state.count("GetJob");
    state.authorize_job(&headers, &id, VERB_GET).await?;

    let job = state.manager.get_job(&id).await?;
    Ok(Json(to_api_job(&job, version)))
}

/// GET /apis/v1beta1/jobs, /apis/v2beta1/recurringruns
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(version): Extension<ApiVersion>,
    headers: HeaderMap,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    state.count("ListJobs");

    let filter = state
        .list_scope(&headers, version, &query, RESOURCE_JOBS)
        .await?;
    let page = state.manager.list_jobs(&filter, &query.list_options()?).await?;
    let response = match version {
        ApiVersion::V1Beta1 => Json(v1beta1::ListJobsResponse {
            jobs: page
                .items
                .iter()
                .filter_map(|j| to_api_job(j, version).into_v1())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
        ApiVersion::V2Beta1 => Json(v2beta1::ListRecurringRunsResponse {
            recurring_runs: page
                .items
                .iter()
                .filter_map(|j| to_api_job(j, version).into_v2())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
    };
    Ok(response)
}

/// POST .../{id}:enable|:disable
pub async fn job_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(segment): Path<String>,
) -> ApiResult<StatusCode> {
    let (id, action) = split_action(&segment);
    let (enabled, verb) = match action {
        Some("enable") => (true, VERB_ENABLE),
        Some("disable") => (false, VERB_DISABLE),
        _ => {
            return Err(Error::invalid_input(format!(
                "Unsupported recurring run action in {segment:?}"
            ))
            .into());
        }
    };
    state.count(if enabled { "EnableJob" } else { "DisableJob" });
    state.authorize_job(&headers, id, verb).await?;

    state.manager.change_job_mode(id, enabled).await?;
    Ok(StatusCode::OK)
}

/// DELETE /apis/v1beta1/jobs/{id}, /apis/v2beta1/recurringruns/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.count("DeleteJob");
    state.authorize_job(&headers, &id, VERB_DELETE).await?;

    state.manager.delete_job(&id).await?;
    Ok(StatusCode::OK)
}
