//! HTTP routing tests driven through the router with `oneshot`

mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestEnv, v2_manifest};
use pipelines_apiserver::api::{AppState, create_router};
use pipelines_apiserver::config::ServerConfig;
use serde_json::{Value, json};
use tower::ServiceExt;

fn router(env: &TestEnv) -> Router {
    let state = AppState::new(env.manager.clone(), Arc::clone(&env.config));
    create_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

#[tokio::test]
async fn test_healthz() {
    let env = TestEnv::new();
    let app = router(&env);

    let (status, body) = send(&app, "GET", "/apis/v2beta1/healthz", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["multi_user"], json!(false));
}

#[tokio::test]
async fn test_unknown_api_version_is_bad_request() {
    let env = TestEnv::new();
    let app = router(&env);

    let (status, body) = send(&app, "GET", "/apis/v3/experiments", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], json!("INVALID_ARGUMENT"));
}

#[tokio::test]
async fn test_create_and_list_experiments_v2() {
    let env = TestEnv::new();
    let app = router(&env);

    let (status, created) = send(
        &app,
        "POST",
        "/apis/v2beta1/experiments",
        Some(json!({"display_name": "nightly", "description": "runs every night"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let id = created["experiment_id"].as_str().unwrap().to_string();
    assert!(!id.is_empty());
    assert_eq!(created["display_name"], json!("nightly"));

    let (status, listed) = send(&app, "GET", "/apis/v2beta1/experiments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total_size"], json!(1));
    assert_eq!(listed["experiments"][0]["experiment_id"], json!(id));

    let (status, fetched) = send(&app, "GET", &format!("/apis/v1beta1/experiments/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["id"], json!(id));
    assert_eq!(fetched["name"], json!("nightly"));
}

#[tokio::test]
async fn test_create_experiment_with_empty_name_is_rejected() {
    let env = TestEnv::new();
    let app = router(&env);

    let (status, _) = send(
        &app,
        "POST",
        "/apis/v2beta1/experiments",
        Some(json!({"display_name": "  "})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(env.experiments.experiments.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_get_missing_run_is_not_found() {
    let env = TestEnv::new();
    let app = router(&env);

    let (status, body) = send(&app, "GET", "/apis/v2beta1/runs/does-not-exist", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!("NOT_FOUND"));
}

#[tokio::test]
async fn test_create_and_terminate_run_v2() {
    let env = TestEnv::new();
    let experiment_id = env.seed_experiment("exp-1", "nightly", "ns1");
    let app = router(&env);
    let pipeline_spec: Value = serde_json::from_str(&v2_manifest()).unwrap();

    let (status, created) = send(
        &app,
        "POST",
        "/apis/v2beta1/runs",
        Some(json!({
            "display_name": "hello",
            "experiment_id": experiment_id,
            "pipeline_spec": pipeline_spec,
            "runtime_config": {"parameters": {"param2": "world"}}
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["state"], json!("PENDING"));
    let run_id = created["run_id"].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/apis/v2beta1/runs/{run_id}:terminate"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(env.workflows.patches.lock().unwrap().len(), 1);

    let (status, fetched) = send(&app, "GET", &format!("/apis/v2beta1/runs/{run_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched["state"], json!("CANCELING"));
}

#[tokio::test]
async fn test_unsupported_run_action_is_bad_request() {
    let env = TestEnv::new();
    let app = router(&env);

    let (status, _) = send(&app, "POST", "/apis/v2beta1/runs/r1:explode", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_recurring_run_concurrency_is_validated() {
    let env = TestEnv::new();
    let experiment_id = env.seed_experiment("exp-1", "nightly", "ns1");
    let app = router(&env);

    let (status, _) = send(
        &app,
        "POST",
        "/apis/v2beta1/recurringruns",
        Some(json!({
            "display_name": "hourly",
            "experiment_id": experiment_id,
            "max_concurrency": 11,
            "trigger": {"cron_schedule": {"cron": "0 * * * *"}},
            "pipeline_spec": serde_json::from_str::<Value>(&v2_manifest()).unwrap()
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(env.scheduled_workflows.scheduled.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_report_workflow_envelope_collects_persisted_workflow() {
    let env = TestEnv::new();
    let app = router(&env);
    let workflow = json!({
        "apiVersion": "argoproj.io/v1alpha1",
        "kind": "Workflow",
        "metadata": {
            "name": "wf-done",
            "namespace": "ns1",
            "labels": {"pipeline/runid": "run-1", "pipeline/persistedFinalState": "true"}
        },
        "spec": {},
        "status": {"phase": "Succeeded"}
    });

    let (status, _) = send(
        &app,
        "POST",
        "/apis/v1beta1/workflows",
        Some(json!({"workflow": workflow.to_string()})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(env.manager.workflow_gc_count(), 1);
}

#[tokio::test]
async fn test_multi_user_run_listing_requires_namespace() {
    let env = TestEnv::with_config(ServerConfig::default().with_multi_user(true));
    let app = router(&env);

    let (status, _) = send(&app, "GET", "/apis/v2beta1/runs", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_multi_user_denied_review_is_forbidden() {
    let env = TestEnv::with_config(ServerConfig::default().with_multi_user(true));
    *env.access_review.allowed.lock().unwrap() = false;
    let app = router(&env);

    let request = Request::builder()
        .method("GET")
        .uri("/apis/v2beta1/experiments?namespace=team-a")
        .header("kubeflow-userid", "alice@example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let reviews = env.access_review.reviews.lock().unwrap().clone();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].0, "alice@example.com");
    assert_eq!(reviews[0].1.namespace, "team-a");
}
