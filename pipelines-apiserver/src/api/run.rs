//! Run API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use pipelines_core::convert::{to_api_run, to_api_run_detail, to_model_run, to_model_run_metric};
use pipelines_core::domain::Run;
use pipelines_core::dto::{ApiRun, ApiVersion, v1beta1, v2beta1};
use pipelines_core::{Error, ErrorKind};
use serde::Serialize;
use serde_json::Value;

use crate::api::error::ApiResult;
use crate::api::{AppState, ListQuery, api_version, split_action};
use crate::auth::{
    RESOURCE_RUNS, VERB_ARCHIVE, VERB_DELETE, VERB_GET, VERB_READ_ARTIFACT, VERB_REPORT_METRICS,
    VERB_RETRY, VERB_TERMINATE, VERB_UNARCHIVE,
};

/// v1 answers with the run detail, v2 with the bare run
fn run_response(run: &Run, version: ApiVersion) -> Response {
    match version {
        ApiVersion::V1Beta1 => Json(to_api_run_detail(run)).into_response(),
        ApiVersion::V2Beta1 => Json(to_api_run(run, version)).into_response(),
    }
}

/// POST /apis/{version}/runs
pub async fn create_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(version): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Response> {
    let version = api_version(&version, "CreateRun")?;
    state.count("CreateRun");

    let request = ApiRun::from_json(version, body)?;
    let run = to_model_run(&request)
        .map_err(|e| e.wrap("Failed to create a run due to conversion error"))?;
    state
        .authorize_create_in_experiment(&headers, &run.experiment_id, RESOURCE_RUNS, &run.display_name)
        .await?;

    tracing::info!("Creating run: {}", run.display_name);
    let run = state.manager.create_run(run).await?;
    Ok(run_response(&run, version))
}

/// GET /apis/{version}/runs/{id}
pub async fn get_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<Response> {
    let version = api_version(&version, "GetRun")?;
    state.count("GetRun");
    state.authorize_run(&headers, &id, VERB_GET).await?;

    let run = state.manager.get_run(&id).await?;
    Ok(run_response(&run, version))
}

/// GET /apis/{version}/runs
pub async fn list_runs(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(version): Path<String>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Response> {
    let version = api_version(&version, "ListRuns")?;
    state.count("ListRuns");

    let filter = state
        .list_scope(&headers, version, &query, RESOURCE_RUNS)
        .await?;
    let page = state.manager.list_runs(&filter, &query.list_options()?).await?;
    let response = match version {
        ApiVersion::V1Beta1 => Json(v1beta1::ListRunsResponse {
            runs: page
                .items
                .iter()
                .filter_map(|r| to_api_run(r, version).into_v1())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
        ApiVersion::V2Beta1 => Json(v2beta1::ListRunsResponse {
            runs: page
                .items
                .iter()
                .filter_map(|r| to_api_run(r, version).into_v2())
                .collect(),
            total_size: page.total_size,
            next_page_token: page.next_page_token,
        })
        .into_response(),
    };
    Ok(response)
}

/// POST /apis/{version}/runs/{id}:archive|:unarchive|:terminate|:retry
pub async fn run_action(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, segment)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    api_version(&version, "RunAction")?;
    let (id, action) = split_action(&segment);
    match action {
        Some("archive") => {
            state.count("ArchiveRun");
            state.authorize_run(&headers, id, VERB_ARCHIVE).await?;
            state.manager.archive_run(id).await?;
        }
        Some("unarchive") => {
            state.count("UnarchiveRun");
            state.authorize_run(&headers, id, VERB_UNARCHIVE).await?;
            state.manager.unarchive_run(id).await?;
        }
        Some("terminate") => {
            state.count("TerminateRun");
            state.authorize_run(&headers, id, VERB_TERMINATE).await?;
            state.manager.terminate_run(id).await?;
        }
        Some("retry") => {
            state.count("RetryRun");
            state.authorize_run(&headers, id, VERB_RETRY).await?;
            state.manager.retry_run(id).await?;
        }
        _ => {
            return Err(Error::invalid_input(format!("Unsupported run action in {segment:?}")).into());
        }
    }
    Ok(StatusCode::OK)
}

/// DELETE /apis/{version}/runs/{id}
pub async fn delete_run(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    api_version(&version, "DeleteRun")?;
    state.count("DeleteRun");
    state.authorize_run(&headers, &id, VERB_DELETE).await?;

    state.manager.delete_run(&id).await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
pub struct ReportRunMetricResult {
    pub metric_name: String,
    pub metric_node_id: String,
    pub status: &'static str,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ReportRunMetricsResponse {
    pub results: Vec<ReportRunMetricResult>,
}

/// POST /apis/{version}/runs/{id}/metrics
///
/// Each metric is stored independently and reported back with its own
/// status. A metric already stored for the same node answers
/// `DUPLICATE_REPORTING`.
pub async fn report_metrics(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, run_id)): Path<(String, String)>,
    Json(request): Json<v1beta1::ReportRunMetricsRequest>,
) -> ApiResult<Json<ReportRunMetricsResponse>> {
    api_version(&version, "ReportRunMetrics")?;
    state.count("ReportRunMetrics");
    state
        .authorize_run(&headers, &run_id, VERB_REPORT_METRICS)
        .await?;

    let existing = state.manager.get_run_metrics(&run_id).await?;
    let mut results = Vec::with_capacity(request.metrics.len());
    for metric in &request.metrics {
        let (status, message) = if existing
            .iter()
            .any(|m| m.node_id == metric.node_id && m.name == metric.name)
        {
            ("DUPLICATE_REPORTING", String::new())
        } else {
            match to_model_run_metric(metric, &run_id) {
                Err(e) => ("INVALID_ARGUMENT", e.to_string()),
                Ok(model) => match state.manager.report_metric(&model).await {
                    Ok(()) => ("OK", String::new()),
                    Err(e) if e.kind() == ErrorKind::InvalidInput => {
                        ("DUPLICATE_REPORTING", e.to_string())
                    }
                    Err(e) => {
                        tracing::error!("Failed to report metric {}: {:?}", metric.name, e);
                        ("INTERNAL_ERROR", e.to_string())
                    }
                },
            }
        };
        results.push(ReportRunMetricResult {
            metric_name: metric.name.clone(),
            metric_node_id: metric.node_id.clone(),
            status,
            message,
        });
    }
    Ok(Json(ReportRunMetricsResponse { results }))
}

/// GET /apis/{version}/runs/{id}/nodes/{node_id}/artifacts/{artifact}:read
pub async fn read_artifact(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((version, run_id, node_id, artifact)): Path<(String, String, String, String)>,
) -> ApiResult<Json<v1beta1::ReadArtifactResponse>> {
    api_version(&version, "ReadArtifact")?;
    state.count("ReadArtifact");
    let artifact_name = artifact.strip_suffix(":read").unwrap_or(&artifact);
    state
        .authorize_run(&headers, &run_id, VERB_READ_ARTIFACT)
        .await?;

    let data = state
        .manager
        .read_artifact(&run_id, &node_id, artifact_name)
        .await?;
    Ok(Json(v1beta1::ReadArtifactResponse {
        data: STANDARD.encode(data),
    }))
}
