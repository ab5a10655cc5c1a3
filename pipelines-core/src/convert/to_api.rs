//! Model to wire conversion
//!
//! Conversions here never fail. A stored field that cannot be rendered is
//! reported through the `error` field of the returned object so a single bad
//! row does not blank out a whole list response.

use serde_json::{Map, Value};

use super::accessors::{
    PIPELINE_ID_KEY, PIPELINE_MANIFEST_KEY, PIPELINE_NAME_KEY, WORKFLOW_MANIFEST_KEY,
};
use super::parameters::{model_parameters_to_api, model_runtime_parameters};
use crate::domain::{
    Experiment, Job, Pipeline, PipelineSpec, PipelineVersion, Run, RunMetric, RuntimeStatus,
    StorageState, Task, Trigger,
};
use crate::dto::{self, ApiExperiment, ApiJob, ApiPipeline, ApiPipelineVersion, ApiRun, ApiVersion};
use crate::dto::{v1beta1, v2beta1};
use crate::error::Result;
use crate::reference::to_api_references;

/// gRPC code carried in embedded statuses
const CODE_INTERNAL: i32 = 13;

fn internal_status(message: impl Into<String>) -> v2beta1::Status {
    v2beta1::Status {
        code: CODE_INTERNAL,
        message: message.into(),
    }
}

fn v1_storage_state(state: StorageState) -> v1beta1::StorageState {
    match state {
        StorageState::Available => v1beta1::StorageState::Available,
        StorageState::Archived => v1beta1::StorageState::Archived,
    }
}

fn v2_storage_state(state: StorageState) -> v2beta1::StorageState {
    match state {
        StorageState::Available => v2beta1::StorageState::Available,
        StorageState::Archived => v2beta1::StorageState::Archived,
    }
}

fn namespace_reference(namespace: &str) -> Vec<v1beta1::ResourceReference> {
    if namespace.is_empty() {
        return Vec::new();
    }
    vec![v1beta1::ResourceReference::new(
        v1beta1::ResourceType::Namespace,
        namespace,
        v1beta1::Relationship::Owner,
    )]
}

// ============================================================================
// Experiments
// ============================================================================

/// v1 experiments only expose their namespace in multi-user mode
pub fn to_api_experiment(
    experiment: &Experiment,
    version: ApiVersion,
    multi_user: bool,
) -> ApiExperiment {
    match version {
        ApiVersion::V1Beta1 => ApiExperiment::V1(v1beta1::Experiment {
            id: experiment.id.clone(),
            name: experiment.name.clone(),
            description: experiment.description.clone(),
            created_at: Some(experiment.created_at),
            resource_references: if multi_user {
                namespace_reference(&experiment.namespace)
            } else {
                Vec::new()
            },
            storage_state: v1_storage_state(experiment.storage_state),
        }),
        ApiVersion::V2Beta1 => ApiExperiment::V2(v2beta1::Experiment {
            experiment_id: experiment.id.clone(),
            display_name: experiment.name.clone(),
            description: experiment.description.clone(),
            created_at: Some(experiment.created_at),
            namespace: experiment.namespace.clone(),
            storage_state: v2_storage_state(experiment.storage_state),
        }),
    }
}

// ============================================================================
// Pipelines
// ============================================================================

fn v1_pipeline_version(
    version: &PipelineVersion,
    parameters: Vec<v1beta1::Parameter>,
) -> v1beta1::PipelineVersion {
    v1beta1::PipelineVersion {
        id: version.id.clone(),
        name: version.name.clone(),
        created_at: Some(version.created_at),
        parameters,
        code_source_url: version.code_source_url.clone(),
        package_url: (!version.pipeline_spec_uri.is_empty()).then(|| dto::Url {
            pipeline_url: version.pipeline_spec_uri.clone(),
        }),
        resource_references: vec![v1beta1::ResourceReference::new(
            v1beta1::ResourceType::Pipeline,
            &version.pipeline_id,
            v1beta1::Relationship::Owner,
        )],
        description: version.description.clone(),
    }
}

/// Convert a pipeline, taking v1 parameters from its default version
pub fn to_api_pipeline(
    pipeline: &Pipeline,
    default_version: Option<&PipelineVersion>,
    version: ApiVersion,
) -> ApiPipeline {
    match version {
        ApiVersion::V1Beta1 => {
            let default_version = match default_version
                .map(|v| model_parameters_to_api(&v.parameters).map(|p| v1_pipeline_version(v, p)))
                .transpose()
            {
                Ok(v) => v,
                Err(e) => {
                    return ApiPipeline::V1(v1beta1::Pipeline {
                        id: pipeline.id.clone(),
                        error: e.to_string(),
                        ..Default::default()
                    });
                }
            };
            ApiPipeline::V1(v1beta1::Pipeline {
                id: pipeline.id.clone(),
                created_at: Some(pipeline.created_at),
                name: pipeline.name.clone(),
                description: pipeline.description.clone(),
                parameters: default_version
                    .as_ref()
                    .map(|v| v.parameters.clone())
                    .unwrap_or_default(),
                url: default_version.as_ref().and_then(|v| v.package_url.clone()),
                error: String::new(),
                default_version,
                resource_references: namespace_reference(&pipeline.namespace),
            })
        }
        ApiVersion::V2Beta1 => ApiPipeline::V2(v2beta1::Pipeline {
            pipeline_id: pipeline.id.clone(),
            display_name: pipeline.name.clone(),
            description: pipeline.description.clone(),
            created_at: Some(pipeline.created_at),
            namespace: pipeline.namespace.clone(),
            error: None,
        }),
    }
}

/// Convert a pipeline version
///
/// v1 has no error slot, so unreadable stored parameters render as none.
pub fn to_api_pipeline_version(version: &PipelineVersion, api: ApiVersion) -> ApiPipelineVersion {
    match api {
        ApiVersion::V1Beta1 => {
            let parameters = model_parameters_to_api(&version.parameters).unwrap_or_default();
            ApiPipelineVersion::V1(v1_pipeline_version(version, parameters))
        }
        ApiVersion::V2Beta1 => {
            let (pipeline_spec, error) = if version.pipeline_spec.is_empty() {
                (None, None)
            } else {
                match serde_json::from_str::<Value>(&version.pipeline_spec) {
                    Ok(spec) => (Some(spec), None),
                    Err(e) => (
                        None,
                        Some(internal_status(format!(
                            "Failed to parse the pipeline spec of version {}: {e}",
                            version.id
                        ))),
                    ),
                }
            };
            ApiPipelineVersion::V2(v2beta1::PipelineVersion {
                pipeline_id: version.pipeline_id.clone(),
                pipeline_version_id: version.id.clone(),
                display_name: version.name.clone(),
                description: version.description.clone(),
                created_at: Some(version.created_at),
                package_url: (!version.pipeline_spec_uri.is_empty()).then(|| dto::Url {
                    pipeline_url: version.pipeline_spec_uri.clone(),
                }),
                code_source_url: version.code_source_url.clone(),
                pipeline_spec,
                error,
            })
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

fn v1_runtime_config(spec: &PipelineSpec) -> Result<Option<v1beta1::RuntimeConfig>> {
    let config = &spec.runtime_config;
    if config.parameters.is_empty() && config.pipeline_root.is_empty() {
        return Ok(None);
    }
    Ok(Some(v1beta1::RuntimeConfig {
        parameters: model_runtime_parameters(&config.parameters)?,
        pipeline_root: config.pipeline_root.clone(),
    }))
}

fn v2_runtime_config(spec: &PipelineSpec) -> Result<Option<v2beta1::RuntimeConfig>> {
    let config = &spec.runtime_config;
    if config.parameters.is_empty() && config.pipeline_root.is_empty() {
        return Ok(None);
    }
    Ok(Some(v2beta1::RuntimeConfig {
        parameters: model_runtime_parameters(&config.parameters)?,
        pipeline_root: config.pipeline_root.clone(),
    }))
}

fn v1_pipeline_spec(spec: &PipelineSpec) -> Result<v1beta1::PipelineSpec> {
    Ok(v1beta1::PipelineSpec {
        pipeline_id: spec.pipeline_id.clone(),
        pipeline_name: spec.pipeline_name.clone(),
        workflow_manifest: spec.workflow_spec_manifest.clone(),
        pipeline_manifest: spec.pipeline_spec_manifest.clone(),
        parameters: model_parameters_to_api(&spec.parameters)?,
        runtime_config: v1_runtime_config(spec)?,
    })
}

/// v2 pipeline source: a version reference when known, otherwise a struct
fn v2_pipeline_source(
    spec: &PipelineSpec,
) -> (Option<v2beta1::PipelineVersionReference>, Option<Map<String, Value>>) {
    if !spec.pipeline_version_id.is_empty() {
        let reference = v2beta1::PipelineVersionReference {
            pipeline_id: spec.pipeline_id.clone(),
            pipeline_version_id: spec.pipeline_version_id.clone(),
        };
        return (Some(reference), None);
    }
    if let Ok(Value::Object(ir)) = serde_json::from_str::<Value>(&spec.pipeline_spec_manifest) {
        return (None, Some(ir));
    }
    let mut legacy = Map::new();
    legacy.insert(PIPELINE_ID_KEY.into(), Value::String(spec.pipeline_id.clone()));
    legacy.insert(PIPELINE_NAME_KEY.into(), Value::String(spec.pipeline_name.clone()));
    legacy.insert(
        WORKFLOW_MANIFEST_KEY.into(),
        Value::String(spec.workflow_spec_manifest.clone()),
    );
    legacy.insert(
        PIPELINE_MANIFEST_KEY.into(),
        Value::String(spec.pipeline_spec_manifest.clone()),
    );
    (None, Some(legacy))
}

fn v2_state_history(history: &[RuntimeStatus]) -> Vec<v2beta1::RuntimeStatus> {
    history
        .iter()
        .map(|status| v2beta1::RuntimeStatus {
            update_time: Some(status.update_time),
            state: status.state,
            error: status.error.as_ref().map(|e| internal_status(e.clone())),
        })
        .collect()
}

pub fn to_api_run_metric(metric: &RunMetric) -> v1beta1::RunMetric {
    v1beta1::RunMetric {
        name: metric.name.clone(),
        node_id: metric.node_id.clone(),
        number_value: metric.number_value,
        format: v1beta1::MetricFormat::parse(&metric.format),
    }
}

fn v1_run(run: &Run) -> v1beta1::Run {
    let pipeline_spec = match v1_pipeline_spec(&run.pipeline_spec) {
        Ok(spec) => spec,
        Err(e) => {
            return v1beta1::Run {
                id: run.id.clone(),
                error: e.to_string(),
                ..Default::default()
            };
        }
    };
    v1beta1::Run {
        id: run.id.clone(),
        name: run.display_name.clone(),
        storage_state: v1_storage_state(run.storage_state),
        description: run.description.clone(),
        pipeline_spec: Some(pipeline_spec),
        resource_references: to_api_references(&run.resource_references),
        service_account: run.service_account.clone(),
        created_at: Some(run.created_at),
        scheduled_at: run.scheduled_at,
        finished_at: run.finished_at,
        status: run.conditions.clone(),
        error: String::new(),
        metrics: run.metrics.iter().map(to_api_run_metric).collect(),
    }
}

fn v2_run(run: &Run) -> v2beta1::Run {
    let runtime_config = match v2_runtime_config(&run.pipeline_spec) {
        Ok(config) => config,
        Err(e) => {
            return v2beta1::Run {
                run_id: run.id.clone(),
                error: Some(v2beta1::Error {
                    error_message: e.to_string(),
                    error_details: "Error converting RuntimeConfig".into(),
                }),
                ..Default::default()
            };
        }
    };
    let (pipeline_version_reference, pipeline_spec) = v2_pipeline_source(&run.pipeline_spec);
    v2beta1::Run {
        experiment_id: run.experiment_id.clone(),
        run_id: run.id.clone(),
        display_name: run.display_name.clone(),
        storage_state: v2_storage_state(run.storage_state),
        description: run.description.clone(),
        pipeline_version_id: String::new(),
        pipeline_spec,
        pipeline_version_reference,
        runtime_config,
        service_account: run.service_account.clone(),
        created_at: Some(run.created_at),
        scheduled_at: run.scheduled_at,
        finished_at: run.finished_at,
        state: run.state,
        error: None,
        run_details: None,
        recurring_run_id: run.recurring_run_id.clone().unwrap_or_default(),
        state_history: v2_state_history(&run.state_history),
        namespace: run.namespace.clone(),
    }
}

pub fn to_api_run(run: &Run, version: ApiVersion) -> ApiRun {
    match version {
        ApiVersion::V1Beta1 => ApiRun::V1(v1_run(run)),
        ApiVersion::V2Beta1 => ApiRun::V2(v2_run(run)),
    }
}

pub fn to_api_run_detail(run: &Run) -> v1beta1::RunDetail {
    v1beta1::RunDetail {
        run: v1_run(run),
        pipeline_runtime: v1beta1::PipelineRuntime {
            pipeline_manifest: run.pipeline_runtime_manifest.clone(),
            workflow_manifest: run.workflow_runtime_manifest.clone(),
        },
    }
}

pub fn to_api_task(task: &Task) -> v1beta1::Task {
    v1beta1::Task {
        id: task.id.clone(),
        namespace: task.namespace.clone(),
        pipeline_name: task.pipeline_name.clone(),
        run_id: task.run_id.clone(),
        mlmd_execution_id: task.mlmd_execution_id.clone(),
        created_at: Some(task.created_at),
        finished_at: task.finished_at,
        fingerprint: task.fingerprint.clone(),
    }
}

// ============================================================================
// Jobs
// ============================================================================

pub fn to_api_trigger(trigger: Option<&Trigger>) -> Option<dto::Trigger> {
    match trigger? {
        Trigger::Cron(cron) => Some(dto::Trigger {
            cron_schedule: Some(dto::CronSchedule {
                start_time: cron.start_time,
                end_time: cron.end_time,
                cron: cron.cron.clone(),
            }),
            periodic_schedule: None,
        }),
        Trigger::Periodic(periodic) => Some(dto::Trigger {
            cron_schedule: None,
            periodic_schedule: Some(dto::PeriodicSchedule {
                start_time: periodic.start_time,
                end_time: periodic.end_time,
                interval_second: periodic.interval_seconds,
            }),
        }),
    }
}

fn v1_job(job: &Job) -> v1beta1::Job {
    let pipeline_spec = match v1_pipeline_spec(&job.pipeline_spec) {
        Ok(spec) => spec,
        Err(e) => {
            return v1beta1::Job {
                id: job.id.clone(),
                error: e.to_string(),
                ..Default::default()
            };
        }
    };
    v1beta1::Job {
        id: job.id.clone(),
        name: job.display_name.clone(),
        description: job.description.clone(),
        pipeline_spec: Some(pipeline_spec),
        resource_references: to_api_references(&job.resource_references),
        service_account: job.service_account.clone(),
        max_concurrency: job.max_concurrency,
        trigger: to_api_trigger(job.trigger.as_ref()),
        mode: if job.enabled {
            v1beta1::JobMode::Enabled
        } else {
            v1beta1::JobMode::Disabled
        },
        created_at: Some(job.created_at),
        updated_at: Some(job.updated_at),
        status: job.conditions.clone(),
        error: String::new(),
        enabled: job.enabled,
        no_catchup: job.no_catchup,
    }
}

fn v2_recurring_run(job: &Job) -> v2beta1::RecurringRun {
    let runtime_config = match v2_runtime_config(&job.pipeline_spec) {
        Ok(config) => config,
        Err(e) => {
            return v2beta1::RecurringRun {
                recurring_run_id: job.id.clone(),
                error: Some(internal_status(e.to_string())),
                ..Default::default()
            };
        }
    };
    let (pipeline_version_reference, pipeline_spec) = v2_pipeline_source(&job.pipeline_spec);
    let (mode, status) = if job.enabled {
        (v2beta1::RecurringRunMode::Enable, v2beta1::RecurringRunStatus::Enabled)
    } else {
        (v2beta1::RecurringRunMode::Disable, v2beta1::RecurringRunStatus::Disabled)
    };
    v2beta1::RecurringRun {
        recurring_run_id: job.id.clone(),
        display_name: job.display_name.clone(),
        description: job.description.clone(),
        pipeline_version_id: String::new(),
        pipeline_spec,
        pipeline_version_reference,
        runtime_config,
        service_account: job.service_account.clone(),
        max_concurrency: job.max_concurrency,
        trigger: to_api_trigger(job.trigger.as_ref()),
        mode,
        created_at: Some(job.created_at),
        updated_at: Some(job.updated_at),
        status,
        error: None,
        no_catchup: job.no_catchup,
        namespace: job.namespace.clone(),
        experiment_id: job.experiment_id.clone(),
    }
}

pub fn to_api_job(job: &Job, version: ApiVersion) -> ApiJob {
    match version {
        ApiVersion::V1Beta1 => ApiJob::V1(v1_job(job)),
        ApiVersion::V2Beta1 => ApiJob::V2(v2_recurring_run(job)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CronSchedule, RuntimeConfig, RuntimeState};
    use chrono::Utc;

    fn stored_run() -> Run {
        Run {
            id: "r1".into(),
            experiment_id: "e1".into(),
            display_name: "nightly".into(),
            conditions: "Running".into(),
            state: RuntimeState::Running,
            pipeline_spec: PipelineSpec {
                pipeline_id: "p1".into(),
                parameters: r#"[{"name":"x","value":"1"}]"#.into(),
                runtime_config: RuntimeConfig {
                    parameters: r#"{"param2":"world"}"#.into(),
                    pipeline_root: String::new(),
                },
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_v1_run_conversion() {
        let ApiRun::V1(run) = to_api_run(&stored_run(), ApiVersion::V1Beta1) else {
            panic!("expected v1");
        };
        assert!(run.error.is_empty());
        assert_eq!(run.status, "Running");
        let spec = run.pipeline_spec.unwrap();
        assert_eq!(spec.parameters[0].name, "x");
        assert_eq!(spec.runtime_config.unwrap().parameters["param2"], "world");
    }

    #[test]
    fn test_bad_stored_parameters_embed_error() {
        let mut run = stored_run();
        run.pipeline_spec.parameters = "garbage".into();
        let ApiRun::V1(api) = to_api_run(&run, ApiVersion::V1Beta1) else {
            panic!("expected v1");
        };
        assert_eq!(api.id, "r1");
        assert!(api.error.contains("Parameter with wrong format is stored"));

        run.pipeline_spec.runtime_config.parameters = "[".into();
        let ApiRun::V2(api) = to_api_run(&run, ApiVersion::V2Beta1) else {
            panic!("expected v2");
        };
        assert_eq!(api.run_id, "r1");
        assert!(api.error.is_some());
    }

    #[test]
    fn test_v2_run_uses_legacy_struct_without_version() {
        let ApiRun::V2(run) = to_api_run(&stored_run(), ApiVersion::V2Beta1) else {
            panic!("expected v2");
        };
        assert!(run.pipeline_version_reference.is_none());
        assert_eq!(run.pipeline_spec.unwrap()[PIPELINE_ID_KEY], "p1");
        assert_eq!(run.state, RuntimeState::Running);
        assert_eq!(run.experiment_id, "e1");
    }

    #[test]
    fn test_experiment_namespace_only_in_multi_user() {
        let exp = Experiment {
            id: "e1".into(),
            namespace: "team-a".into(),
            ..Default::default()
        };
        let ApiExperiment::V1(single) = to_api_experiment(&exp, ApiVersion::V1Beta1, false) else {
            panic!("expected v1");
        };
        assert!(single.resource_references.is_empty());
        let ApiExperiment::V1(multi) = to_api_experiment(&exp, ApiVersion::V1Beta1, true) else {
            panic!("expected v1");
        };
        assert_eq!(multi.resource_references[0].key.id, "team-a");
    }

    #[test]
    fn test_pipeline_takes_default_version_parameters() {
        let pipeline = Pipeline {
            id: "p1".into(),
            name: "p1".into(),
            ..Default::default()
        };
        let version = PipelineVersion {
            id: "v1".into(),
            pipeline_id: "p1".into(),
            parameters: r#"[{"name":"x","value":"1"}]"#.into(),
            ..Default::default()
        };
        let ApiPipeline::V1(api) = to_api_pipeline(&pipeline, Some(&version), ApiVersion::V1Beta1)
        else {
            panic!("expected v1");
        };
        assert_eq!(api.parameters.len(), 1);
        assert_eq!(api.default_version.unwrap().id, "v1");

        let broken = PipelineVersion {
            parameters: "{".into(),
            ..version
        };
        let ApiPipeline::V1(api) = to_api_pipeline(&pipeline, Some(&broken), ApiVersion::V1Beta1)
        else {
            panic!("expected v1");
        };
        assert!(!api.error.is_empty());
    }

    #[test]
    fn test_v2_pipeline_version_bad_spec_is_embedded() {
        let version = PipelineVersion {
            id: "v1".into(),
            pipeline_spec: "not json".into(),
            ..Default::default()
        };
        let ApiPipelineVersion::V2(api) = to_api_pipeline_version(&version, ApiVersion::V2Beta1)
        else {
            panic!("expected v2");
        };
        assert!(api.pipeline_spec.is_none());
        assert_eq!(api.error.unwrap().code, CODE_INTERNAL);
    }

    #[test]
    fn test_job_mode_and_trigger() {
        let job = Job {
            id: "j1".into(),
            enabled: false,
            trigger: Some(Trigger::Cron(CronSchedule {
                cron: "0 0 * * * *".into(),
                start_time: None,
                end_time: None,
            })),
            created_at: Utc::now(),
            ..Default::default()
        };
        let ApiJob::V2(rr) = to_api_job(&job, ApiVersion::V2Beta1) else {
            panic!("expected v2");
        };
        assert_eq!(rr.mode, v2beta1::RecurringRunMode::Disable);
        assert_eq!(rr.status, v2beta1::RecurringRunStatus::Disabled);
        assert_eq!(rr.trigger.unwrap().cron_schedule.unwrap().cron, "0 0 * * * *");

        let ApiJob::V1(v1) = to_api_job(&job, ApiVersion::V1Beta1) else {
            panic!("expected v1");
        };
        assert_eq!(v1.mode, v1beta1::JobMode::Disabled);
        assert!(!v1.enabled);
    }
}
