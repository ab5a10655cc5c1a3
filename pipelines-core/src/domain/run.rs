//! Run domain types

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::experiment::StorageState;
use super::reference::ResourceReference;
use crate::error::Error;

/// A single execution of a pipeline
///
/// Created from an inbound API run plus a resolved manifest, then mutated by
/// status reports and by terminate / retry requests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub experiment_id: String,
    pub display_name: String,
    /// Name of the backing workflow object
    pub k8s_name: String,
    pub description: String,
    pub namespace: String,
    pub service_account: String,
    pub storage_state: StorageState,
    /// Recurring run that spawned this run, if any
    pub recurring_run_id: Option<String>,
    pub pipeline_spec: PipelineSpec,
    /// Current phase in the v1 vocabulary
    pub conditions: String,
    pub state: RuntimeState,
    pub state_history: Vec<RuntimeStatus>,
    /// Snapshot of the live workflow object
    pub workflow_runtime_manifest: String,
    pub pipeline_runtime_manifest: String,
    pub created_at: DateTime<Utc>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub resource_references: Vec<ResourceReference>,
    pub metrics: Vec<RunMetric>,
}

impl Run {
    /// Record a state transition, keeping the history ordered
    pub fn transition(&mut self, state: RuntimeState, at: DateTime<Utc>) {
        if self.state == state && !self.state_history.is_empty() {
            return;
        }
        self.state = state;
        self.state_history.push(RuntimeStatus {
            update_time: at,
            state,
            error: None,
        });
    }
}

/// Where the run's (or recurring run's) manifest came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub pipeline_id: String,
    pub pipeline_version_id: String,
    pub pipeline_name: String,
    /// First-generation (Argo workflow) manifest
    pub workflow_spec_manifest: String,
    /// Second-generation (pipeline IR) manifest
    pub pipeline_spec_manifest: String,
    /// Serialized v1 parameter list
    pub parameters: String,
    pub runtime_config: RuntimeConfig,
}

impl PipelineSpec {
    pub fn has_manifest(&self) -> bool {
        !self.workflow_spec_manifest.is_empty() || !self.pipeline_spec_manifest.is_empty()
    }
}

/// v2 runtime inputs, stored in their string-encoded form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// JSON object string, e.g. `{"param2":"world"}`
    pub parameters: String,
    pub pipeline_root: String,
}

/// Runtime state in the v2 vocabulary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RuntimeState {
    #[default]
    #[serde(rename = "RUNTIME_STATE_UNSPECIFIED")]
    Unspecified,
    Pending,
    Running,
    Succeeded,
    Skipped,
    Failed,
    Canceling,
    Canceled,
    Paused,
}

impl RuntimeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeState::Unspecified => "RUNTIME_STATE_UNSPECIFIED",
            RuntimeState::Pending => "PENDING",
            RuntimeState::Running => "RUNNING",
            RuntimeState::Succeeded => "SUCCEEDED",
            RuntimeState::Skipped => "SKIPPED",
            RuntimeState::Failed => "FAILED",
            RuntimeState::Canceling => "CANCELING",
            RuntimeState::Canceled => "CANCELED",
            RuntimeState::Paused => "PAUSED",
        }
    }

    /// Map a workflow phase or stored v1 condition onto the v2 vocabulary
    pub fn from_condition(condition: &str) -> Self {
        match condition {
            "Pending" => RuntimeState::Pending,
            "Running" => RuntimeState::Running,
            "Succeeded" | "Completed" => RuntimeState::Succeeded,
            "Skipped" => RuntimeState::Skipped,
            "Failed" | "Error" => RuntimeState::Failed,
            "Terminating" => RuntimeState::Canceling,
            "Terminated" | "Canceled" => RuntimeState::Canceled,
            "Paused" => RuntimeState::Paused,
            _ => RuntimeState::Unspecified,
        }
    }

    /// The v1 condition string for this state
    pub fn to_v1(&self) -> &'static str {
        match self {
            RuntimeState::Unspecified => "",
            RuntimeState::Pending => "Pending",
            RuntimeState::Running => "Running",
            RuntimeState::Succeeded => "Succeeded",
            RuntimeState::Skipped => "Skipped",
            RuntimeState::Failed => "Failed",
            RuntimeState::Canceling => "Terminating",
            RuntimeState::Canceled => "Canceled",
            RuntimeState::Paused => "Paused",
        }
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self,
            RuntimeState::Succeeded
                | RuntimeState::Skipped
                | RuntimeState::Failed
                | RuntimeState::Canceled
        )
    }
}

impl fmt::Display for RuntimeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "RUNTIME_STATE_UNSPECIFIED" => Ok(RuntimeState::Unspecified),
            "PENDING" => Ok(RuntimeState::Pending),
            "RUNNING" => Ok(RuntimeState::Running),
            "SUCCEEDED" => Ok(RuntimeState::Succeeded),
            "SKIPPED" => Ok(RuntimeState::Skipped),
            "FAILED" => Ok(RuntimeState::Failed),
            "CANCELING" => Ok(RuntimeState::Canceling),
            "CANCELED" => Ok(RuntimeState::Canceled),
            "PAUSED" => Ok(RuntimeState::Paused),
            other => Err(Error::invalid_input(format!(
                "Unknown runtime state: {other}"
            ))),
        }
    }
}

/// One entry of a state history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub update_time: DateTime<Utc>,
    pub state: RuntimeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A numeric metric reported by a run node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetric {
    pub run_id: String,
    pub node_id: String,
    pub name: String,
    pub number_value: f64,
    /// `RAW` or `PERCENTAGE`
    pub format: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_mapping() {
        assert_eq!(RuntimeState::from_condition("Error"), RuntimeState::Failed);
        assert_eq!(
            RuntimeState::from_condition("Terminating"),
            RuntimeState::Canceling
        );
        assert_eq!(RuntimeState::from_condition("???"), RuntimeState::Unspecified);
        assert_eq!(RuntimeState::Canceling.to_v1(), "Terminating");
    }

    #[test]
    fn test_final_states() {
        assert!(RuntimeState::Succeeded.is_final());
        assert!(RuntimeState::Canceled.is_final());
        assert!(!RuntimeState::Canceling.is_final());
        assert!(!RuntimeState::Running.is_final());
    }

    #[test]
    fn test_transition_skips_repeated_state() {
        let mut run = Run::default();
        let now = Utc::now();
        run.transition(RuntimeState::Running, now);
        run.transition(RuntimeState::Running, now);
        run.transition(RuntimeState::Succeeded, now);

        let states: Vec<_> = run.state_history.iter().map(|s| s.state).collect();
        assert_eq!(states, vec![RuntimeState::Running, RuntimeState::Succeeded]);
        assert_eq!(run.state, RuntimeState::Succeeded);
    }

    #[test]
    fn test_state_serde_names() {
        let json = serde_json::to_string(&RuntimeState::Unspecified).unwrap();
        assert_eq!(json, "\"RUNTIME_STATE_UNSPECIFIED\"");
        let state: RuntimeState = serde_json::from_str("\"CANCELING\"").unwrap();
        assert_eq!(state, RuntimeState::Canceling);
    }
}
