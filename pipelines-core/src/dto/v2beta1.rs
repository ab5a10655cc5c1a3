//! v2beta1 wire types
//!
//! Second API generation. Ownership is carried by plain id fields and
//! runtime parameters by a structured value map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{Trigger, Url};
use crate::domain::run::RuntimeState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    #[serde(rename = "AVAILABLE")]
    Available,
    #[serde(rename = "ARCHIVED")]
    Archived,
    #[default]
    #[serde(rename = "STORAGE_STATE_UNSPECIFIED", other)]
    Unspecified,
}

/// Error embedded in a converted object
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Error {
    pub error_message: String,
    pub error_details: String,
}

/// RPC style status embedded in pipelines and recurring runs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub code: i32,
    pub message: String,
}

// ============================================================================
// Experiments
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experiment {
    pub experiment_id: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub namespace: String,
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
    pub pipeline_id: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub namespace: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Status>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineVersion {
    pub pipeline_id: String,
    pub pipeline_version_id: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub package_url: Option<Url>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub code_source_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Status>,
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
    pub pipeline_versions: Vec<PipelineVersion>,
    pub total_size: i32,
    pub next_page_token: String,
}

// ============================================================================
// Runs
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineVersionReference {
    pub pipeline_id: String,
    pub pipeline_version_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub parameters: Map<String, Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_root: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    pub state: RuntimeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Status>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDetails {
    pub pipeline_context_id: i64,
    pub pipeline_run_context_id: i64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_details: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Run {
    pub experiment_id: String,
    pub run_id: String,
    pub display_name: String,
    pub storage_state: StorageState,
    pub description: String,
    /// Deprecated in favour of `pipeline_version_reference`
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_version_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_version_reference: Option<PipelineVersionReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<RuntimeConfig>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub state: RuntimeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Error>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_details: Option<RunDetails>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub recurring_run_id: String,
    pub state_history: Vec<RuntimeStatus>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRunsResponse {
    pub runs: Vec<Run>,
    pub total_size: i32,
    pub next_page_token: String,
}

// ============================================================================
// Recurring runs
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurringRunMode {
    #[serde(rename = "ENABLE")]
    Enable,
    #[serde(rename = "DISABLE")]
    Disable,
    #[default]
    #[serde(rename = "MODE_UNSPECIFIED", other)]
    Unspecified,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecurringRunStatus {
    #[serde(rename = "ENABLED")]
    Enabled,
    #[serde(rename = "DISABLED")]
    Disabled,
    #[default]
    #[serde(rename = "STATUS_UNSPECIFIED", other)]
    Unspecified,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecurringRun {
    pub recurring_run_id: String,
    pub display_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_version_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_spec: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pipeline_version_reference: Option<PipelineVersionReference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_config: Option<RuntimeConfig>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    pub max_concurrency: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<Trigger>,
    pub mode: RecurringRunMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    pub status: RecurringRunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Status>,
    pub no_catchup: bool,
    pub namespace: String,
    pub experiment_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ListRecurringRunsResponse {
    pub recurring_runs: Vec<RecurringRun>,
    pub total_size: i32,
    pub next_page_token: String,
}
