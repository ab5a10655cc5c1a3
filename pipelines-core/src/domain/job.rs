//! Job (recurring run) domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::reference::ResourceReference;
use super::run::PipelineSpec;

/// Recurring run definition
///
/// Backed 1:1 by a ScheduledWorkflow custom resource whose UID is the job id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub display_name: String,
    /// Name of the backing scheduled workflow
    pub k8s_name: String,
    pub namespace: String,
    pub service_account: String,
    pub description: String,
    pub experiment_id: String,
    pub max_concurrency: i64,
    pub no_catchup: bool,
    pub enabled: bool,
    /// Condition summary of the scheduled workflow
    pub conditions: String,
    pub trigger: Option<Trigger>,
    pub pipeline_spec: PipelineSpec,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub resource_references: Vec<ResourceReference>,
}

/// When a recurring run fires
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    Cron(CronSchedule),
    Periodic(PeriodicSchedule),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSchedule {
    pub cron: String,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicSchedule {
    pub interval_seconds: i64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}
