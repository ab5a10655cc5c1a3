//! Field accessors over both run generations
//!
//! Every accessor is written once per variant. A field that cannot be
//! resolved is an error, never a silent default.

use serde_json::{Map, Value};

use crate::domain::reference::{Relationship, ResourceType};
use crate::domain::run::{RuntimeState, RuntimeStatus};
use crate::dto::{ApiRun, v1beta1};
use crate::error::{Error, Result};
use crate::reference;

/// Keys of the legacy pipeline-spec struct
pub const PIPELINE_ID_KEY: &str = "PipelineId";
pub const PIPELINE_NAME_KEY: &str = "PipelineName";
pub const WORKFLOW_MANIFEST_KEY: &str = "WorkflowManifest";
pub const PIPELINE_MANIFEST_KEY: &str = "PipelineManifest";

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Manifests carried by a v2 pipeline-spec struct
///
/// A struct holding the legacy keys is unpacked; any other non-empty struct is
/// the pipeline IR itself.
pub fn spec_struct_manifests(spec: Option<&Map<String, Value>>) -> Result<(String, String)> {
    let Some(spec) = spec.filter(|s| !s.is_empty()) else {
        return Ok(Default::default());
    };
    if spec.contains_key(PIPELINE_ID_KEY) || spec.contains_key(WORKFLOW_MANIFEST_KEY) {
        return Ok((
            string_field(spec, WORKFLOW_MANIFEST_KEY).unwrap_or_default(),
            string_field(spec, PIPELINE_MANIFEST_KEY).unwrap_or_default(),
        ));
    }
    let manifest = serde_json::to_string(spec)
        .map_err(|e| Error::internal(e, "Failed to serialize the inline pipeline spec"))?;
    Ok((String::new(), manifest))
}

impl ApiRun {
    pub fn id(&self) -> &str {
        match self {
            ApiRun::V1(run) => &run.id,
            ApiRun::V2(run) => &run.run_id,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ApiRun::V1(run) => &run.name,
            ApiRun::V2(run) => &run.display_name,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            ApiRun::V1(run) => &run.description,
            ApiRun::V2(run) => &run.description,
        }
    }

    pub fn service_account(&self) -> &str {
        match self {
            ApiRun::V1(run) => &run.service_account,
            ApiRun::V2(run) => &run.service_account,
        }
    }

    /// v2 runs carry no reference list
    pub fn resource_references(&self) -> &[v1beta1::ResourceReference] {
        match self {
            ApiRun::V1(run) => &run.resource_references,
            ApiRun::V2(_) => &[],
        }
    }

    /// Pipeline the run was launched from
    ///
    /// v1 runs may legitimately leave it empty. v2 runs fall back to the
    /// `PipelineId` key of the pipeline-spec struct and fail when absent.
    pub fn pipeline_id(&self) -> Result<String> {
        match self {
            ApiRun::V1(run) => Ok(run
                .pipeline_spec
                .as_ref()
                .map(|spec| spec.pipeline_id.clone())
                .unwrap_or_default()),
            ApiRun::V2(run) => {
                if let Some(reference) = &run.pipeline_version_reference {
                    if !reference.pipeline_id.is_empty() {
                        return Ok(reference.pipeline_id.clone());
                    }
                }
                run.pipeline_spec
                    .as_ref()
                    .and_then(|spec| string_field(spec, PIPELINE_ID_KEY))
                    .ok_or_else(|| {
                        Error::resource_not_found("v2beta1::Run.PipelineId", &run.run_id)
                    })
            }
        }
    }

    pub fn pipeline_version_id(&self) -> Result<Option<String>> {
        match self {
            ApiRun::V1(run) => reference::find_owner(
                &run.resource_references,
                ResourceType::PipelineVersion,
                Relationship::Creator,
            ),
            ApiRun::V2(run) => {
                let id = run
                    .pipeline_version_reference
                    .as_ref()
                    .map(|r| r.pipeline_version_id.as_str())
                    .filter(|id| !id.is_empty())
                    .unwrap_or(run.pipeline_version_id.as_str());
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
        }
    }

    /// Owning experiment, if the request names one
    pub fn experiment_id(&self) -> Result<Option<String>> {
        match self {
            ApiRun::V1(run) => reference::find_owner(
                &run.resource_references,
                ResourceType::Experiment,
                Relationship::Owner,
            ),
            ApiRun::V2(run) => {
                Ok((!run.experiment_id.is_empty()).then(|| run.experiment_id.clone()))
            }
        }
    }

    pub fn namespace(&self) -> Result<Option<String>> {
        match self {
            ApiRun::V1(run) => reference::find_owner(
                &run.resource_references,
                ResourceType::Namespace,
                Relationship::Owner,
            ),
            ApiRun::V2(run) => Ok((!run.namespace.is_empty()).then(|| run.namespace.clone())),
        }
    }

    pub fn state(&self) -> RuntimeState {
        match self {
            ApiRun::V1(run) => RuntimeState::from_condition(&run.status),
            ApiRun::V2(run) => run.state,
        }
    }

    pub fn state_history(&self) -> Vec<RuntimeStatus> {
        match self {
            ApiRun::V1(_) => Vec::new(),
            ApiRun::V2(run) => run
                .state_history
                .iter()
                .filter_map(|status| {
                    status.update_time.map(|update_time| RuntimeStatus {
                        update_time,
                        state: status.state,
                        error: status.error.as_ref().map(|e| e.message.clone()),
                    })
                })
                .collect(),
        }
    }

    /// Pipeline source as a struct; v1 specs are lifted into the legacy keys
    pub fn pipeline_spec(&self) -> Map<String, Value> {
        match self {
            ApiRun::V1(run) => {
                let spec = run.pipeline_spec.clone().unwrap_or_default();
                let mut map = Map::new();
                map.insert(PIPELINE_ID_KEY.into(), Value::String(spec.pipeline_id));
                map.insert(PIPELINE_NAME_KEY.into(), Value::String(spec.pipeline_name));
                map.insert(
                    WORKFLOW_MANIFEST_KEY.into(),
                    Value::String(spec.workflow_manifest),
                );
                map.insert(
                    PIPELINE_MANIFEST_KEY.into(),
                    Value::String(spec.pipeline_manifest),
                );
                map
            }
            ApiRun::V2(run) => run.pipeline_spec.clone().unwrap_or_default(),
        }
    }

    /// Inline manifests as (workflow manifest, pipeline manifest)
    pub fn manifests(&self) -> Result<(String, String)> {
        match self {
            ApiRun::V1(run) => Ok(run
                .pipeline_spec
                .as_ref()
                .map(|s| (s.workflow_manifest.clone(), s.pipeline_manifest.clone()))
                .unwrap_or_default()),
            ApiRun::V2(run) => spec_struct_manifests(run.pipeline_spec.as_ref()),
        }
    }

    pub fn pipeline_root(&self) -> &str {
        match self {
            ApiRun::V1(run) => run
                .pipeline_spec
                .as_ref()
                .and_then(|s| s.runtime_config.as_ref())
                .map(|c| c.pipeline_root.as_str())
                .unwrap_or_default(),
            ApiRun::V2(run) => run
                .runtime_config
                .as_ref()
                .map(|c| c.pipeline_root.as_str())
                .unwrap_or_default(),
        }
    }

    /// v1 name/value parameters; v2 runs have none
    pub fn parameters(&self) -> &[v1beta1::Parameter] {
        match self {
            ApiRun::V1(run) => run
                .pipeline_spec
                .as_ref()
                .map(|s| s.parameters.as_slice())
                .unwrap_or_default(),
            ApiRun::V2(_) => &[],
        }
    }

    pub fn runtime_parameters(&self) -> Map<String, Value> {
        match self {
            ApiRun::V1(run) => run
                .pipeline_spec
                .as_ref()
                .and_then(|s| s.runtime_config.as_ref())
                .map(|c| c.parameters.clone())
                .unwrap_or_default(),
            ApiRun::V2(run) => run
                .runtime_config
                .as_ref()
                .map(|c| c.parameters.clone())
                .unwrap_or_default(),
        }
    }

    /// Serialized run details; v1 runs have none
    pub fn run_details(&self) -> Result<String> {
        match self {
            ApiRun::V1(_) => Ok(String::new()),
            ApiRun::V2(run) => match &run.run_details {
                Some(details) => serde_json::to_string(details)
                    .map_err(|e| Error::internal(e, "Failed to serialize run details")),
                None => Ok(String::new()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::v2beta1;
    use crate::error::ErrorKind;

    fn v2_with_spec(spec: Option<Map<String, Value>>) -> ApiRun {
        ApiRun::V2(v2beta1::Run {
            run_id: "r1".into(),
            pipeline_spec: spec,
            ..Default::default()
        })
    }

    #[test]
    fn test_v2_pipeline_id_from_spec_struct() {
        let mut spec = Map::new();
        spec.insert(PIPELINE_ID_KEY.into(), Value::String("p-42".into()));
        let run = v2_with_spec(Some(spec));
        assert_eq!(run.pipeline_id().unwrap(), "p-42");
    }

    #[test]
    fn test_v2_pipeline_id_missing_is_not_found() {
        let err = v2_with_spec(None).pipeline_id().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = v2_with_spec(Some(Map::new())).pipeline_id().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_v2_direct_pipeline_id_wins() {
        let run = ApiRun::V2(v2beta1::Run {
            pipeline_version_reference: Some(v2beta1::PipelineVersionReference {
                pipeline_id: "direct".into(),
                pipeline_version_id: "v1".into(),
            }),
            ..Default::default()
        });
        assert_eq!(run.pipeline_id().unwrap(), "direct");
        assert_eq!(run.pipeline_version_id().unwrap().as_deref(), Some("v1"));
    }

    #[test]
    fn test_v1_pipeline_id_may_be_empty() {
        let run = ApiRun::V1(v1beta1::Run::default());
        assert_eq!(run.pipeline_id().unwrap(), "");
        assert_eq!(run.experiment_id().unwrap(), None);
    }

    #[test]
    fn test_v1_experiment_from_references() {
        let run = ApiRun::V1(v1beta1::Run {
            resource_references: vec![v1beta1::ResourceReference::new(
                v1beta1::ResourceType::Experiment,
                "e1",
                v1beta1::Relationship::Owner,
            )],
            ..Default::default()
        });
        assert_eq!(run.experiment_id().unwrap().as_deref(), Some("e1"));
    }

    #[test]
    fn test_v1_spec_lifted_to_struct() {
        let run = ApiRun::V1(v1beta1::Run {
            pipeline_spec: Some(v1beta1::PipelineSpec {
                pipeline_id: "p1".into(),
                workflow_manifest: "{}".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let spec = run.pipeline_spec();
        assert_eq!(spec[PIPELINE_ID_KEY], "p1");
        assert_eq!(spec[WORKFLOW_MANIFEST_KEY], "{}");
    }

    #[test]
    fn test_v2_inline_spec_becomes_pipeline_manifest() {
        let mut spec = Map::new();
        spec.insert("pipelineInfo".into(), serde_json::json!({"name": "p"}));
        let (workflow, pipeline) = v2_with_spec(Some(spec)).manifests().unwrap();
        assert!(workflow.is_empty());
        assert!(pipeline.contains("pipelineInfo"));
    }
}
