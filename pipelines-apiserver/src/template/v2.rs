//! Pipeline IR templates
//!
//! The IR is not compiled here. A v2 run is handed to a single driver step
//! that receives the IR, the runtime parameters and the pipeline root as
//! workflow arguments.

use pipelines_core::convert::SpecParameter;
use pipelines_core::domain::{Job, PipelineSpec, Run};
use pipelines_core::{Error, Result};
use serde_json::{Map, Value, json};

use super::{RunWorkflowOptions, generate_name_prefix};
use crate::workflow::{
    ANNOTATION_ISTIO_SIDECAR_INJECT, ANNOTATION_RUN_NAME, LABEL_RUN_ID, Workflow,
};

const DRIVER_IMAGE: &str = "gcr.io/ml-pipeline/kfp-driver:latest";
const DRIVER_ENTRYPOINT: &str = "entrypoint";

#[derive(Debug, Clone, PartialEq)]
pub struct V2Template {
    spec: Map<String, Value>,
}

impl V2Template {
    pub(super) fn new(spec: Map<String, Value>) -> Self {
        Self { spec }
    }

    pub fn pipeline_name(&self) -> &str {
        self.spec
            .get("pipelineInfo")
            .and_then(|info| info.get("name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub(super) fn set_pipeline_name(&mut self, name: &str) {
        let info = self
            .spec
            .entry("pipelineInfo")
            .or_insert_with(|| json!({}));
        if !info.is_object() {
            *info = json!({});
        }
        if let Some(info) = info.as_object_mut() {
            info.insert("name".to_string(), Value::String(name.to_string()));
        }
    }

    /// Root input definitions with their defaults
    pub(super) fn parameters_json(&self) -> Result<String> {
        let Some(definitions) = self
            .spec
            .get("root")
            .and_then(|root| root.get("inputDefinitions"))
            .and_then(|inputs| inputs.get("parameters"))
            .and_then(Value::as_object)
        else {
            return Ok(String::new());
        };
        let params: Vec<SpecParameter> = definitions
            .iter()
            .map(|(name, definition)| SpecParameter {
                name: name.clone(),
                value: definition.get("defaultValue").map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            })
            .collect();
        if params.is_empty() {
            return Ok(String::new());
        }
        serde_json::to_string(&params)
            .map_err(|e| Error::internal(e, "Failed to marshal the pipeline spec parameters"))
    }

    pub(super) fn bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.spec)
            .map_err(|e| Error::internal(e, "Failed to marshal the pipeline spec"))
    }

    fn driver_workflow(&self, spec: &PipelineSpec, service_account: &str) -> Result<Workflow> {
        let pipeline_spec = serde_json::to_string(&self.spec)
            .map_err(|e| Error::internal(e, "Failed to marshal the pipeline spec"))?;
        let runtime_config = if spec.runtime_config.parameters.is_empty() {
            "{}".to_string()
        } else {
            spec.runtime_config.parameters.clone()
        };

        let mut workflow = Workflow::default();
        workflow.metadata.generate_name =
            Some(generate_name_prefix(self.pipeline_name(), "pipeline", 50));
        let body = json!({
            "entrypoint": DRIVER_ENTRYPOINT,
            "arguments": {"parameters": [
                {"name": "pipeline-spec", "value": pipeline_spec},
                {"name": "runtime-config", "value": runtime_config},
                {"name": "pipeline-root", "value": spec.runtime_config.pipeline_root},
            ]},
            "templates": [{
                "name": DRIVER_ENTRYPOINT,
                "container": {
                    "image": DRIVER_IMAGE,
                    "command": ["driver"],
                    "args": [
                        "--type", "ROOT_DAG",
                        "--pipeline_spec", "{{workflow.parameters.pipeline-spec}}",
                        "--runtime_config", "{{workflow.parameters.runtime-config}}",
                        "--pipeline_root", "{{workflow.parameters.pipeline-root}}",
                    ],
                },
            }],
        });
        if let Value::Object(body) = body {
            workflow.spec = body;
        }
        if !service_account.is_empty() {
            workflow.set_service_account(service_account);
        }
        workflow.set_template_annotation_if_absent(ANNOTATION_ISTIO_SIDECAR_INJECT, "false");
        Ok(workflow)
    }

    pub(super) fn run_workflow(&self, run: &Run, options: &RunWorkflowOptions) -> Result<Workflow> {
        let mut workflow = self.driver_workflow(&run.pipeline_spec, &run.service_account)?;
        if !run.namespace.is_empty() {
            workflow.metadata.namespace = Some(run.namespace.clone());
        }
        workflow.set_label(LABEL_RUN_ID, options.run_id.clone());
        workflow.set_annotation(ANNOTATION_RUN_NAME, run.display_name.clone());
        Ok(workflow)
    }

    pub(super) fn job_workflow(&self, job: &Job) -> Result<Workflow> {
        self.driver_workflow(&job.pipeline_spec, &job.service_account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pipelines_core::domain::RuntimeConfig;

    fn template() -> V2Template {
        let spec = json!({
            "pipelineInfo": {"name": "hello-world"},
            "root": {"inputDefinitions": {"parameters": {
                "param1": {"parameterType": "STRING", "defaultValue": "hello"},
                "param2": {"parameterType": "STRING"},
                "count": {"parameterType": "NUMBER_INTEGER", "defaultValue": 3}
            }}}
        });
        match spec {
            Value::Object(map) => V2Template::new(map),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_parameters_from_input_definitions() {
        let params: Vec<SpecParameter> =
            serde_json::from_str(&template().parameters_json().unwrap()).unwrap();
        let find = |name: &str| params.iter().find(|p| p.name == name).unwrap().value.clone();
        assert_eq!(find("param1"), Some("hello".to_string()));
        assert_eq!(find("param2"), None);
        assert_eq!(find("count"), Some("3".to_string()));
    }

    #[test]
    fn test_run_workflow_carries_runtime_config() {
        let run = Run {
            display_name: "r".into(),
            pipeline_spec: PipelineSpec {
                runtime_config: RuntimeConfig {
                    parameters: r#"{"param2":"world"}"#.into(),
                    pipeline_root: "gs://root".into(),
                },
                ..Default::default()
            },
            ..Default::default()
        };
        let options = RunWorkflowOptions {
            run_id: "run-2".into(),
            run_at: Utc::now(),
        };
        let wf = template().run_workflow(&run, &options).unwrap();

        assert_eq!(wf.run_id(), "run-2");
        assert_eq!(wf.metadata.generate_name.as_deref(), Some("hello-world-"));
        let params = wf.parameters();
        assert_eq!(params[1], ("runtime-config".to_string(), Some(r#"{"param2":"world"}"#.to_string())));
        assert_eq!(params[2], ("pipeline-root".to_string(), Some("gs://root".to_string())));
    }
}
