//! Pipeline Templates
//!
//! A manifest is either a first-generation Argo workflow or a second-generation
//! pipeline IR document. [`Template`] detects which, extracts parameters, and
//! renders the custom resources that execute it.

mod v1;
mod v2;

use chrono::{DateTime, Utc};
use pipelines_core::domain::{Job, Run};
use pipelines_core::{Error, Result};
use serde_json::Value;

use crate::workflow::{ScheduledWorkflow, WORKFLOW_KIND, Workflow};

pub use v1::V1Template;
pub use v2::V2Template;

const DEFAULT_BUCKET_PLACEHOLDER: &str = "{{kfp-default-bucket}}";
const PROJECT_ID_PLACEHOLDER: &str = "{{kfp-project-id}}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateType {
    V1,
    V2,
}

/// Parsed manifest
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    V1(V1Template),
    V2(V2Template),
}

/// Per-run inputs that are not part of the run model
#[derive(Debug, Clone)]
pub struct RunWorkflowOptions {
    pub run_id: String,
    pub run_at: DateTime<Utc>,
}

impl Template {
    /// Parse a JSON manifest
    ///
    /// A `PipelineJob` style wrapper carrying a `pipelineSpec` field is
    /// unwrapped to the spec it holds.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes).map_err(|e| {
            Error::invalid_input(format!("Failed to parse the pipeline manifest as JSON: {e}"))
        })?;
        let Value::Object(mut object) = value else {
            return Err(Error::invalid_input("Pipeline manifest must be a JSON object"));
        };

        if object.get("kind").and_then(Value::as_str) == Some(WORKFLOW_KIND) {
            return V1Template::new(Value::Object(object)).map(Template::V1);
        }
        if let Some(Value::Object(spec)) = object.remove("pipelineSpec") {
            object = spec;
        }
        if object.contains_key("pipelineInfo") || object.contains_key("root") {
            return Ok(Template::V2(V2Template::new(object)));
        }
        Err(Error::invalid_input(
            "Unknown template format: expected an Argo workflow or a pipeline spec",
        ))
    }

    pub fn template_type(&self) -> TemplateType {
        match self {
            Template::V1(_) => TemplateType::V1,
            Template::V2(_) => TemplateType::V2,
        }
    }

    pub fn is_v2(&self) -> bool {
        self.template_type() == TemplateType::V2
    }

    /// Declared parameters in the stored `[{"name","value"}]` form
    pub fn parameters_json(&self) -> Result<String> {
        match self {
            Template::V1(t) => t.parameters_json(),
            Template::V2(t) => t.parameters_json(),
        }
    }

    /// Point the IR at the pipeline it is stored under; no-op for v1
    pub fn override_v2_pipeline_name(&mut self, name: &str, namespace: &str, multi_user: bool) {
        if let Template::V2(t) = self {
            let qualified = if multi_user {
                format!("namespace/{namespace}/pipeline/{name}")
            } else {
                name.to_string()
            };
            t.set_pipeline_name(&qualified);
        }
    }

    /// Canonical serialized manifest
    pub fn bytes(&self) -> Result<Vec<u8>> {
        match self {
            Template::V1(t) => t.bytes(),
            Template::V2(t) => t.bytes(),
        }
    }

    /// Workflow that executes `run` once
    pub fn run_workflow(&self, run: &Run, options: &RunWorkflowOptions) -> Result<Workflow> {
        match self {
            Template::V1(t) => t.run_workflow(run, options),
            Template::V2(t) => t.run_workflow(run, options),
        }
    }

    /// Scheduled workflow that executes `job` on its trigger
    pub fn scheduled_workflow(&self, job: &Job) -> Result<ScheduledWorkflow> {
        let workflow = match self {
            Template::V1(t) => t.job_workflow(job)?,
            Template::V2(t) => t.job_workflow(job)?,
        };
        Ok(scheduled_workflow(job, workflow))
    }
}

/// Substitute deployment defaults into a manifest
pub fn patch_default_parameters(text: &str, default_bucket: &str, project_id: &str) -> String {
    text.replace(DEFAULT_BUCKET_PLACEHOLDER, default_bucket)
        .replace(PROJECT_ID_PLACEHOLDER, project_id)
}

/// Kubernetes-safe `generateName` prefix derived from a display name
pub(crate) fn generate_name_prefix(name: &str, fallback: &str, max_len: usize) -> String {
    let mut cleaned: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    cleaned.truncate(max_len);
    let trimmed = cleaned.trim_matches('-');
    if trimmed.is_empty() {
        format!("{fallback}-")
    } else {
        format!("{trimmed}-")
    }
}

fn scheduled_workflow(job: &Job, workflow: Workflow) -> ScheduledWorkflow {
    use crate::workflow::{SwfParameter, WorkflowResource};

    let base_name = if job.k8s_name.is_empty() {
        &job.display_name
    } else {
        &job.k8s_name
    };
    let mut swf = ScheduledWorkflow::default();
    swf.metadata.generate_name = Some(generate_name_prefix(base_name, "job", 25));
    if !job.namespace.is_empty() {
        swf.metadata.namespace = Some(job.namespace.clone());
    }
    swf.spec.enabled = job.enabled;
    swf.spec.max_concurrency = Some(job.max_concurrency);
    swf.spec.no_catchup = Some(job.no_catchup);
    swf.set_trigger(job.trigger.as_ref());
    swf.spec.service_account = job.service_account.clone();
    swf.spec.pipeline_id = job.pipeline_spec.pipeline_id.clone();
    swf.spec.pipeline_name = job.pipeline_spec.pipeline_name.clone();
    swf.spec.pipeline_version_id = job.pipeline_spec.pipeline_version_id.clone();
    swf.spec.experiment_id = job.experiment_id.clone();
    swf.spec.workflow = Some(WorkflowResource {
        parameters: workflow
            .parameters()
            .into_iter()
            .map(|(name, value)| SwfParameter {
                name,
                value: value.unwrap_or_default(),
            })
            .collect(),
        spec: workflow.spec,
    });
    swf
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipelines_core::ErrorKind;
    use pipelines_core::domain::{PeriodicSchedule, Trigger};
    use serde_json::json;

    fn v1_manifest() -> String {
        json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Workflow",
            "metadata": {"generateName": "hello-"},
            "spec": {
                "entrypoint": "main",
                "arguments": {"parameters": [{"name": "x", "value": "1"}]},
                "templates": [{"name": "main", "container": {"image": "alpine"}}]
            }
        })
        .to_string()
    }

    #[test]
    fn test_parse_detects_generation() {
        let v1 = Template::parse(v1_manifest().as_bytes()).unwrap();
        assert_eq!(v1.template_type(), TemplateType::V1);

        let v2 = Template::parse(br#"{"pipelineInfo": {"name": "p"}, "root": {}}"#).unwrap();
        assert!(v2.is_v2());

        let wrapped =
            Template::parse(br#"{"displayName": "x", "pipelineSpec": {"pipelineInfo": {"name": "p"}}}"#)
                .unwrap();
        assert!(wrapped.is_v2());
    }

    #[test]
    fn test_parse_rejects_unknown_documents() {
        let bodies: [&[u8]; 3] = [b"not json", b"[1, 2]", br#"{"hello": "world"}"#];
        for body in bodies {
            let err = Template::parse(body).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_override_v2_pipeline_name() {
        let mut template = Template::parse(br#"{"pipelineInfo": {"name": "orig"}}"#).unwrap();
        template.override_v2_pipeline_name("p1", "team-a", true);
        let bytes = template.bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["pipelineInfo"]["name"], "namespace/team-a/pipeline/p1");

        template.override_v2_pipeline_name("p1", "team-a", false);
        let value: Value = serde_json::from_slice(&template.bytes().unwrap()).unwrap();
        assert_eq!(value["pipelineInfo"]["name"], "p1");
    }

    #[test]
    fn test_patch_default_parameters() {
        let text = r#"{"value": "gs://{{kfp-default-bucket}}/{{kfp-project-id}}"}"#;
        assert_eq!(
            patch_default_parameters(text, "bucket", "proj"),
            r#"{"value": "gs://bucket/proj"}"#
        );
    }

    #[test]
    fn test_generate_name_prefix() {
        assert_eq!(generate_name_prefix("My Nightly_Job!", "job", 25), "my-nightly-job-");
        assert_eq!(generate_name_prefix("???", "job", 25), "job-");
        assert_eq!(generate_name_prefix(&"a".repeat(40), "job", 25).len(), 26);
    }

    #[test]
    fn test_scheduled_workflow_from_job() {
        let template = Template::parse(v1_manifest().as_bytes()).unwrap();
        let job = Job {
            display_name: "Nightly".into(),
            namespace: "kubeflow".into(),
            enabled: true,
            max_concurrency: 3,
            trigger: Some(Trigger::Periodic(PeriodicSchedule {
                interval_seconds: 60,
                start_time: None,
                end_time: None,
            })),
            ..Default::default()
        };
        let swf = template.scheduled_workflow(&job).unwrap();
        assert_eq!(swf.metadata.generate_name.as_deref(), Some("nightly-"));
        assert_eq!(swf.namespace(), "kubeflow");
        assert!(swf.enabled());
        assert_eq!(swf.spec.max_concurrency, Some(3));
        assert_eq!(swf.trigger(), job.trigger);
        let workflow = swf.spec.workflow.unwrap();
        assert_eq!(workflow.parameters[0].name, "x");
        assert_eq!(workflow.spec["entrypoint"], "main");
    }
}
