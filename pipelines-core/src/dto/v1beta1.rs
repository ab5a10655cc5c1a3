//! v1beta1 wire types
//!
//! First API generation. Ownership is expressed as a free-form list of
//! resource references and parameters as flat name/value pairs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Trigger, Url};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    #[serde(rename = "EXPERIMENT")]
    Experiment,
    #[serde(rename = "JOB")]
    Job,
    #[serde(rename = "PIPELINE")]
    Pipeline,
    #[serde(rename = "PIPELINE_VERSION")]
    PipelineVersion,
    #[serde(rename = "NAMESPACE")]
    Namespace,
    #[default]
    #[serde(rename = "UNKNOWN_RESOURCE_TYPE", other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relationship {
    #[serde(rename = "OWNER")]
    Owner,
    #[serde(rename = "CREATOR")]
    Creator,
    #[default]
    #[serde(rename = "UNKNOWN_RELATIONSHIP", other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceKey {
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    pub id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceReference {
    pub key: ResourceKey,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    pub relationship: Relationship,
}

impl ResourceReference {
    pub fn new(resource_type: ResourceType, id: impl Into<String>, relationship: Relationship) -> Self {
        Self {
            key: ResourceKey {
                resource_type,
                id: id.into(),
            },
            name: String::new(),
            relationship,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Parameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    #[serde(rename = "STORAGESTATE_ARCHIVED")]
    Archived,
    #[default]
    #[serde(rename = "STORAGESTATE_AVAILABLE", other)]
    Available,
}

// ============================================================================
// Experiments
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_references: Vec<ResourceReference>,
    pub storage_state: StorageState,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListExperimentsResponse {
    pub experiments: Vec<Experiment>,
    pub total_size: i32,
    pub next_page_token: String,
}

// ============================================================================
// Pipelines
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Pipeline {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<Url>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_version: Option<PipelineVersion>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_references: Vec<ResourceReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineVersion {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code_source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_url: Option<Url>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_references: Vec<ResourceReference>,
    pub description: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListPipelinesResponse {
    pub pipelines: Vec<Pipeline>,
    pub total_size: i32,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListPipelineVersionsResponse {
    pub versions: Vec<PipelineVersion>,
    pub total_size: i32,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetTemplateResponse {
    pub template: String,
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_root: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSpec {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub workflow_manifest: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_manifest: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<RuntimeConfig>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MetricFormat {
    #[serde(rename = "RAW")]
    Raw,
    #[serde(rename = "PERCENTAGE")]
    Percentage,
    #[default]
    #[serde(rename = "UNSPECIFIED", other)]
    Unspecified,
}

impl MetricFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricFormat::Unspecified => "UNSPECIFIED",
            MetricFormat::Raw => "RAW",
            MetricFormat::Percentage => "PERCENTAGE",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "RAW" => MetricFormat::Raw,
            "PERCENTAGE" => MetricFormat::Percentage,
            _ => MetricFormat::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunMetric {
    pub name: String,
    pub node_id: String,
    pub number_value: f64,
    pub format: MetricFormat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Run {
    pub id: String,
    pub name: String,
    pub storage_state: StorageState,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<PipelineSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_references: Vec<ResourceReference>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<RunMetric>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineRuntime {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_manifest: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub workflow_manifest: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDetail {
    pub run: Run,
    pub pipeline_runtime: PipelineRuntime,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRunsResponse {
    pub runs: Vec<Run>,
    pub total_size: i32,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportRunMetricsRequest {
    pub metrics: Vec<RunMetric>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadArtifactResponse {
    /// Base64 encoded artifact content
    pub data: String,
}

// ============================================================================
// Jobs
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobMode {
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "DISABLED")]
    Disabled,
    #[default]
    #[serde(rename = "UNKNOWN_MODE", other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<PipelineSpec>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub resource_references: Vec<ResourceReference>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    pub max_concurrency: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    pub mode: JobMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
    pub enabled: bool,
    pub no_catchup: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListJobsResponse {
    pub jobs: Vec<Job>,
    pub total_size: i32,
    pub next_page_token: String,
}

// ============================================================================
// Tasks
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Task {
    pub id: String,
    pub namespace: String,
    #[serde(rename = "pipelineName")]
    pub pipeline_name: String,
    #[serde(rename = "runId")]
    pub run_id: String,
    #[serde(rename = "mlmdExecutionID")]
    pub mlmd_execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListTasksResponse {
    pub tasks: Vec<Task>,
    pub total_size: i32,
    pub next_page_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_enum_values_fall_back() {
        let json = r#"{"key":{"type":"ARTIFACT","id":"a1"},"relationship":"SIBLING"}"#;
        let reference: ResourceReference = serde_json::from_str(json).unwrap();
        assert_eq!(reference.key.resource_type, ResourceType::Unknown);
        assert_eq!(reference.relationship, Relationship::Unknown);
    }

    #[test]
    fn test_run_decodes_gateway_json() {
        let json = r#"{
            "name": "nightly",
            "pipeline_spec": {
                "pipeline_id": "p1",
                "parameters": [{"name": "x", "value": "1"}]
            },
            "resource_references": [
                {"key": {"type": "EXPERIMENT", "id": "e1"}, "relationship": "OWNER"}
            ]
        }"#;
        let run: Run = serde_json::from_str(json).unwrap();
        let spec = run.pipeline_spec.unwrap();
        assert_eq!(spec.pipeline_id, "p1");
        assert_eq!(spec.parameters[0].value, "1");
        assert_eq!(run.resource_references[0].key.resource_type, ResourceType::Experiment);
    }
}
