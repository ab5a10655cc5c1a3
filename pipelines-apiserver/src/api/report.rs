//! Persistence Agent Report Handlers
//!
//! The agent posts either the resource itself or a `{"workflow": "<json>"}`
//! / `{"scheduled_workflow": "<json>"}` envelope carrying it as a string.

use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use pipelines_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::api::AppState;
use crate::api::error::ApiResult;
use crate::auth::{RESOURCE_SCHEDULED_WORKFLOWS, RESOURCE_WORKFLOWS, VERB_REPORT};
use crate::workflow::{ScheduledWorkflow, Workflow};

/// Decode a reported resource, unwrapping the string envelope if present
fn decode_report<T: DeserializeOwned>(body: Value, envelope: &str) -> Result<T> {
    let decoded = match body.get(envelope).and_then(Value::as_str) {
        Some(raw) => serde_json::from_str(raw),
        None => serde_json::from_value(body),
    };
    decoded.map_err(|e| Error::invalid_input(format!("Failed to parse the reported {envelope}: {e}")))
}

/// POST /apis/v1beta1/workflows
pub async fn report_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    state.count("ReportWorkflow");
    let workflow: Workflow = decode_report(body, "workflow")?;
    state
        .authorize(&headers, workflow.namespace(), VERB_REPORT, RESOURCE_WORKFLOWS, workflow.name())
        .await?;

    state.manager.report_workflow_resource(workflow).await?;
    Ok(StatusCode::OK)
}

/// POST /apis/v1beta1/scheduledworkflows
pub async fn report_scheduled_workflow(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<StatusCode> {
    state.count("ReportScheduledWorkflow");
    let swf: ScheduledWorkflow = decode_report(body, "scheduled_workflow")?;
    state
        .authorize(
            &headers,
            swf.namespace(),
            VERB_REPORT,
            RESOURCE_SCHEDULED_WORKFLOWS,
            swf.name(),
        )
        .await?;

    state.manager.report_scheduled_workflow_resource(swf).await?;
    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workflow_json() -> Value {
        json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Workflow",
            "metadata": {"name": "wf-1", "namespace": "ns1"},
            "spec": {}
        })
    }

    #[test]
    fn test_decode_report_plain_body() {
        let workflow: Workflow = decode_report(workflow_json(), "workflow").unwrap();
        assert_eq!(workflow.name(), "wf-1");
        assert_eq!(workflow.namespace(), "ns1");
    }

    #[test]
    fn test_decode_report_string_envelope() {
        let body = json!({"workflow": workflow_json().to_string()});
        let workflow: Workflow = decode_report(body, "workflow").unwrap();
        assert_eq!(workflow.name(), "wf-1");
    }

    #[test]
    fn test_decode_report_rejects_garbage() {
        let body = json!({"workflow": "{not json"});
        let err = decode_report::<Workflow>(body, "workflow").unwrap_err();
        assert_eq!(err.kind(), pipelines_core::ErrorKind::InvalidInput);
    }
}
