//! Task domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::{RuntimeState, RuntimeStatus};

/// One node execution inside a run
///
/// Tasks form a tree through `parent_task_id`. The fingerprint identifies a
/// cacheable execution so repeated reports do not create duplicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub namespace: String,
    pub pipeline_name: String,
    pub run_id: String,
    pub mlmd_execution_id: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub fingerprint: String,
    pub name: String,
    pub parent_task_id: Option<String>,
    pub state: RuntimeState,
    pub state_history: Vec<RuntimeStatus>,
    /// Serialized input artifact map
    pub mlmd_inputs: String,
    /// Serialized output artifact map
    pub mlmd_outputs: String,
}
