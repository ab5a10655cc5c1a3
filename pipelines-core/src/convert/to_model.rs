//! Wire to model conversion

use chrono::Utc;
use serde_json::{Map, Value};

use super::accessors::{self, PIPELINE_ID_KEY, PIPELINE_NAME_KEY};
use super::parameters::{api_parameters_to_model, runtime_parameters_to_model};
use crate::domain::{
    CronSchedule, Experiment, Job, PeriodicSchedule, Pipeline, PipelineSpec, PipelineStatus,
    PipelineVersion, PipelineVersionStatus, Relationship, ResourceType, Run, RunMetric,
    RuntimeConfig, StorageState, Task, Trigger,
};
use crate::dto::{self, ApiExperiment, ApiJob, ApiPipeline, ApiPipelineVersion, ApiRun};
use crate::dto::{v1beta1, v2beta1};
use crate::error::{Error, Result};
use crate::reference::{self, Relations};

// ============================================================================
// Experiments and pipelines
// ============================================================================

pub fn to_model_experiment(experiment: &ApiExperiment) -> Result<Experiment> {
    match experiment {
        ApiExperiment::V1(exp) => {
            let mut namespace = String::new();
            for reference in &exp.resource_references {
                let ty = reference::to_model_resource_type(reference.key.resource_type)?;
                let rel = reference::to_model_relationship(reference.relationship)?;
                if ty != ResourceType::Namespace || rel != Relationship::Owner {
                    return Err(Error::invalid_input(format!(
                        "Invalid resource references for experiment: {ty} {rel} {}",
                        reference.key.id
                    )));
                }
                if !namespace.is_empty() && namespace != reference.key.id {
                    return Err(Error::invalid_input(format!(
                        "Invalid resource references for experiment: namespaces {namespace} and {}",
                        reference.key.id
                    )));
                }
                namespace = reference.key.id.clone();
            }
            Ok(Experiment {
                id: exp.id.clone(),
                name: exp.name.clone(),
                description: exp.description.clone(),
                namespace,
                storage_state: StorageState::Available,
                created_at: Utc::now(),
            })
        }
        ApiExperiment::V2(exp) => Ok(Experiment {
            id: exp.experiment_id.clone(),
            name: exp.display_name.clone(),
            description: exp.description.clone(),
            namespace: exp.namespace.clone(),
            storage_state: StorageState::Available,
            created_at: Utc::now(),
        }),
    }
}

pub fn to_model_pipeline(pipeline: &ApiPipeline) -> Result<Pipeline> {
    match pipeline {
        ApiPipeline::V1(p) => Ok(Pipeline {
            id: p.id.clone(),
            name: p.name.clone(),
            description: p.description.clone(),
            namespace: reference::find_owner(
                &p.resource_references,
                ResourceType::Namespace,
                Relationship::Owner,
            )?
            .unwrap_or_default(),
            status: PipelineStatus::Creating,
            default_version_id: None,
            created_at: Utc::now(),
        }),
        ApiPipeline::V2(p) => Ok(Pipeline {
            id: p.pipeline_id.clone(),
            name: p.display_name.clone(),
            description: p.description.clone(),
            namespace: p.namespace.clone(),
            status: PipelineStatus::Creating,
            default_version_id: None,
            created_at: Utc::now(),
        }),
    }
}

/// Convert a pipeline version request
///
/// v1 versions must name their pipeline through an owner reference.
pub fn to_model_pipeline_version(version: &ApiPipelineVersion) -> Result<PipelineVersion> {
    match version {
        ApiPipelineVersion::V1(v) => {
            let pipeline_id = reference::resolve_owner(
                &v.resource_references,
                ResourceType::Pipeline,
                Relationship::Owner,
            )
            .map_err(|e| e.wrap("Failed to convert v1beta1::PipelineVersion: no pipeline"))?;
            Ok(PipelineVersion {
                id: v.id.clone(),
                name: v.name.clone(),
                description: v.description.clone(),
                pipeline_id,
                parameters: api_parameters_to_model(&v.parameters)?,
                pipeline_spec: String::new(),
                pipeline_spec_uri: v
                    .package_url
                    .as_ref()
                    .map(|u| u.pipeline_url.clone())
                    .unwrap_or_default(),
                code_source_url: v.code_source_url.clone(),
                status: PipelineVersionStatus::Creating,
                created_at: Utc::now(),
            })
        }
        ApiPipelineVersion::V2(v) => {
            let pipeline_spec = match &v.pipeline_spec {
                Some(spec) if !spec.is_null() => serde_json::to_string(spec).map_err(|e| {
                    Error::internal(e, "Failed to serialize v2beta1::PipelineVersion spec")
                })?,
                _ => String::new(),
            };
            Ok(PipelineVersion {
                id: v.pipeline_version_id.clone(),
                name: v.display_name.clone(),
                description: v.description.clone(),
                pipeline_id: v.pipeline_id.clone(),
                parameters: String::new(),
                pipeline_spec,
                pipeline_spec_uri: v
                    .package_url
                    .as_ref()
                    .map(|u| u.pipeline_url.clone())
                    .unwrap_or_default(),
                code_source_url: v.code_source_url.clone(),
                status: PipelineVersionStatus::Creating,
                created_at: Utc::now(),
            })
        }
    }
}

// ============================================================================
// Runs
// ============================================================================

/// Convert a run request into the persisted shape
///
/// Owner experiment and namespace are copied as given; the resource manager
/// resolves defaults and builds the reference edges once the id is known.
/// A run without any pipeline source is rejected.
pub fn to_model_run(run: &ApiRun) -> Result<Run> {
    let (workflow_spec_manifest, pipeline_spec_manifest) = run.manifests()?;
    let pipeline_version_id = run.pipeline_version_id()?;
    let pipeline_id = match run.pipeline_id() {
        Ok(id) => id,
        Err(e)
            if e.is_not_found()
                && (pipeline_version_id.is_some()
                    || !workflow_spec_manifest.is_empty()
                    || !pipeline_spec_manifest.is_empty()) =>
        {
            String::new()
        }
        Err(e) => return Err(e.wrap("Failed to convert a run without a pipeline source")),
    };
    let pipeline_name = match run {
        ApiRun::V1(r) => r
            .pipeline_spec
            .as_ref()
            .map(|s| s.pipeline_name.clone())
            .unwrap_or_default(),
        ApiRun::V2(r) => r
            .pipeline_spec
            .as_ref()
            .and_then(|s| s.get(PIPELINE_NAME_KEY))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    };
    let state = run.state();
    let conditions = match run {
        ApiRun::V1(r) => r.status.clone(),
        ApiRun::V2(_) => state.to_v1().to_string(),
    };

    let experiment_id = run.experiment_id()?.unwrap_or_default();
    let namespace = run.namespace()?.unwrap_or_default();
    let resource_references =
        run_relations(run, &experiment_id, &namespace)?.to_unnamed_model(ResourceType::Run);

    Ok(Run {
        id: run.id().to_string(),
        experiment_id,
        display_name: run.display_name().to_string(),
        description: run.description().to_string(),
        namespace,
        service_account: run.service_account().to_string(),
        storage_state: StorageState::Available,
        pipeline_spec: PipelineSpec {
            pipeline_id,
            pipeline_version_id: pipeline_version_id.unwrap_or_default(),
            pipeline_name,
            workflow_spec_manifest,
            pipeline_spec_manifest,
            parameters: api_parameters_to_model(run.parameters())?,
            runtime_config: RuntimeConfig {
                parameters: runtime_parameters_to_model(&run.runtime_parameters())?,
                pipeline_root: run.pipeline_root().to_string(),
            },
        },
        conditions,
        state,
        state_history: run.state_history(),
        resource_references,
        ..Default::default()
    })
}

/// Typed ownership of a run: owner experiment and namespace plus creators
pub fn run_relations(run: &ApiRun, experiment_id: &str, namespace: &str) -> Result<Relations> {
    let mut relations = match run {
        ApiRun::V1(r) => Relations::from_api(&r.resource_references)?,
        ApiRun::V2(_) => Relations {
            creator_pipeline_version: run.pipeline_version_id()?,
            ..Default::default()
        },
    };
    relations.owner_experiment = Some(experiment_id.to_string());
    relations.owner_namespace = (!namespace.is_empty()).then(|| namespace.to_string());
    Ok(relations)
}

pub fn to_model_run_metric(metric: &v1beta1::RunMetric, run_id: &str) -> Result<RunMetric> {
    validate_metric_name(&metric.name)?;
    if metric.node_id.is_empty() {
        return Err(Error::invalid_input("Metric node id is empty"));
    }
    Ok(RunMetric {
        run_id: run_id.to_string(),
        node_id: metric.node_id.clone(),
        name: metric.name.clone(),
        number_value: metric.number_value,
        format: metric.format.as_str().to_string(),
    })
}

/// Metric names follow the lower-case DNS label shape
fn validate_metric_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::invalid_input(format!(
            "Metric name {name:?} must consist of lower case letters, digits and '-'"
        )))
    }
}

pub fn to_model_task(task: &v1beta1::Task) -> Task {
    Task {
        id: task.id.clone(),
        namespace: task.namespace.clone(),
        pipeline_name: task.pipeline_name.clone(),
        run_id: task.run_id.clone(),
        mlmd_execution_id: task.mlmd_execution_id.clone(),
        created_at: task.created_at.unwrap_or_else(Utc::now),
        started_at: task.created_at,
        finished_at: task.finished_at,
        fingerprint: task.fingerprint.clone(),
        ..Default::default()
    }
}

// ============================================================================
// Jobs
// ============================================================================

/// Convert a schedule; exactly one of cron or periodic may be set
pub fn to_model_trigger(trigger: Option<&dto::Trigger>) -> Result<Option<Trigger>> {
    let Some(trigger) = trigger else {
        return Ok(None);
    };
    match (&trigger.cron_schedule, &trigger.periodic_schedule) {
        (Some(_), Some(_)) => Err(Error::invalid_input(
            "Trigger must set exactly one of cron_schedule and periodic_schedule",
        )),
        (Some(cron), None) => Ok(Some(Trigger::Cron(CronSchedule {
            cron: cron.cron.clone(),
            start_time: cron.start_time,
            end_time: cron.end_time,
        }))),
        (None, Some(periodic)) => Ok(Some(Trigger::Periodic(PeriodicSchedule {
            interval_seconds: periodic.interval_second,
            start_time: periodic.start_time,
            end_time: periodic.end_time,
        }))),
        (None, None) => Ok(None),
    }
}

fn v1_pipeline_spec(
    spec: Option<&v1beta1::PipelineSpec>,
    pipeline_version_id: Option<String>,
) -> Result<PipelineSpec> {
    let spec = spec.cloned().unwrap_or_default();
    let runtime_config = spec.runtime_config.unwrap_or_default();
    Ok(PipelineSpec {
        pipeline_id: spec.pipeline_id,
        pipeline_version_id: pipeline_version_id.unwrap_or_default(),
        pipeline_name: spec.pipeline_name,
        workflow_spec_manifest: spec.workflow_manifest,
        pipeline_spec_manifest: spec.pipeline_manifest,
        parameters: api_parameters_to_model(&spec.parameters)?,
        runtime_config: RuntimeConfig {
            parameters: runtime_parameters_to_model(&runtime_config.parameters)?,
            pipeline_root: runtime_config.pipeline_root,
        },
    })
}

fn v2_pipeline_spec(run: &v2beta1::RecurringRun) -> Result<PipelineSpec> {
    let (workflow_spec_manifest, pipeline_spec_manifest) =
        accessors::spec_struct_manifests(run.pipeline_spec.as_ref())?;
    let struct_field = |key: &str| {
        run.pipeline_spec
            .as_ref()
            .and_then(|s| s.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let reference = run.pipeline_version_reference.clone().unwrap_or_default();
    let pipeline_id = if reference.pipeline_id.is_empty() {
        struct_field(PIPELINE_ID_KEY)
    } else {
        reference.pipeline_id
    };
    let pipeline_version_id = if reference.pipeline_version_id.is_empty() {
        run.pipeline_version_id.clone()
    } else {
        reference.pipeline_version_id
    };
    let runtime_config = run.runtime_config.clone().unwrap_or_default();
    Ok(PipelineSpec {
        pipeline_id,
        pipeline_version_id,
        pipeline_name: struct_field(PIPELINE_NAME_KEY),
        workflow_spec_manifest,
        pipeline_spec_manifest,
        parameters: String::new(),
        runtime_config: RuntimeConfig {
            parameters: runtime_parameters_to_model(&runtime_config.parameters)?,
            pipeline_root: runtime_config.pipeline_root,
        },
    })
}

/// Convert a recurring run request
///
/// An unspecified v2 mode creates an enabled job.
pub fn to_model_job(job: &ApiJob) -> Result<Job> {
    let mut model = to_model_job_fields(job)?;
    model.resource_references = job_relations(job, &model.experiment_id, &model.namespace)?
        .to_unnamed_model(ResourceType::Job);
    Ok(model)
}

fn to_model_job_fields(job: &ApiJob) -> Result<Job> {
    let now = Utc::now();
    match job {
        ApiJob::V1(j) => {
            let pipeline_version_id = reference::find_owner(
                &j.resource_references,
                ResourceType::PipelineVersion,
                Relationship::Creator,
            )?;
            Ok(Job {
                id: j.id.clone(),
                display_name: j.name.clone(),
                namespace: reference::find_owner(
                    &j.resource_references,
                    ResourceType::Namespace,
                    Relationship::Owner,
                )?
                .unwrap_or_default(),
                service_account: j.service_account.clone(),
                description: j.description.clone(),
                experiment_id: reference::find_owner(
                    &j.resource_references,
                    ResourceType::Experiment,
                    Relationship::Owner,
                )?
                .unwrap_or_default(),
                max_concurrency: j.max_concurrency,
                no_catchup: j.no_catchup,
                enabled: j.enabled,
                conditions: j.status.clone(),
                trigger: to_model_trigger(j.trigger.as_ref())?,
                pipeline_spec: v1_pipeline_spec(j.pipeline_spec.as_ref(), pipeline_version_id)?,
                created_at: now,
                updated_at: now,
                ..Default::default()
            })
        }
        ApiJob::V2(rr) => Ok(Job {
            id: rr.recurring_run_id.clone(),
            display_name: rr.display_name.clone(),
            namespace: rr.namespace.clone(),
            service_account: rr.service_account.clone(),
            description: rr.description.clone(),
            experiment_id: rr.experiment_id.clone(),
            max_concurrency: rr.max_concurrency,
            no_catchup: rr.no_catchup,
            enabled: rr.mode != v2beta1::RecurringRunMode::Disable,
            trigger: to_model_trigger(rr.trigger.as_ref())?,
            pipeline_spec: v2_pipeline_spec(rr)?,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }),
    }
}

/// Typed ownership of a job
pub fn job_relations(job: &ApiJob, experiment_id: &str, namespace: &str) -> Result<Relations> {
    let mut relations = match job {
        ApiJob::V1(j) => Relations::from_api(&j.resource_references)?,
        ApiJob::V2(_) => Relations::default(),
    };
    relations.owner_experiment = Some(experiment_id.to_string());
    relations.owner_namespace = (!namespace.is_empty()).then(|| namespace.to_string());
    Ok(relations)
}

/// Runtime parameters of a stored spec as a value map
pub fn runtime_parameter_map(spec: &PipelineSpec) -> Result<Map<String, Value>> {
    super::parameters::model_runtime_parameters(&spec.runtime_config.parameters)
}
