//! Task API Handlers

use axum::{
    Json,
    extract::{Query, State},
};
use pipelines_core::convert::{to_api_task, to_model_task};
use pipelines_core::domain::{FilterContext, ResourceType};
use pipelines_core::dto::v1beta1;

use crate::api::error::ApiResult;
use crate::api::{AppState, ListQuery};

/// POST /apis/v1alpha1/tasks
pub async fn create_task(
    State(state): State<AppState>,
    Json(request): Json<v1beta1::Task>,
) -> ApiResult<Json<v1beta1::Task>> {
    state.count("CreateTask");
    let task = state.manager.create_task(to_model_task(&request)).await?;
    Ok(Json(to_api_task(&task)))
}

/// GET /apis/v1alpha1/tasks
///
/// `run_id` narrows the listing to the tasks of one run.
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<v1beta1::ListTasksResponse>> {
    state.count("ListTasks");
    let filter = if query.run_id.is_empty() {
        FilterContext::none()
    } else {
        FilterContext::by(ResourceType::Run, query.run_id.clone())
    };

    let page = state.manager.list_tasks(&filter, &query.list_options()?).await?;
    Ok(Json(v1beta1::ListTasksResponse {
        tasks: page.items.iter().map(to_api_task).collect(),
        total_size: page.total_size,
        next_page_token: page.next_page_token,
    }))
}
