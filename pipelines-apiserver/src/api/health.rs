//! Health Check API Handler

use axum::{Json, extract::State};
use serde::Serialize;

use crate::api::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub commit_sha: String,
    pub tag_name: String,
    pub multi_user: bool,
}

/// GET /apis/v2beta1/healthz
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        commit_sha: option_env!("GIT_COMMIT_SHA").unwrap_or("unknown").to_string(),
        tag_name: env!("CARGO_PKG_VERSION").to_string(),
        multi_user: state.config.multi_user,
    })
}
