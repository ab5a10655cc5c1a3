//! ScheduledWorkflow view

use chrono::{DateTime, Utc};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pipelines_core::domain::{CronSchedule, PeriodicSchedule, Trigger};
use pipelines_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{SCHEDULED_WORKFLOW_API_VERSION, SCHEDULED_WORKFLOW_KIND};

fn default_api_version() -> String {
    SCHEDULED_WORKFLOW_API_VERSION.to_string()
}

fn default_kind() -> String {
    SCHEDULED_WORKFLOW_KIND.to_string()
}

/// Recurring schedule custom resource backing a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledWorkflow {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ScheduledWorkflowSpec,
    #[serde(default)]
    pub status: ScheduledWorkflowStatus,
}

impl Default for ScheduledWorkflow {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            spec: ScheduledWorkflowSpec::default(),
            status: ScheduledWorkflowStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduledWorkflowSpec {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_catchup: Option<bool>,
    pub trigger: SwfTrigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowResource>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub service_account: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pipeline_version_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub experiment_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwfTrigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_schedule: Option<SwfCronSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periodic_schedule: Option<SwfPeriodicSchedule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwfCronSchedule {
    pub cron: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwfPeriodicSchedule {
    pub interval_second: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// Workflow stamped out on every tick
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowResource {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<SwfParameter>,
    pub spec: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwfParameter {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduledWorkflowStatus {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ScheduledWorkflowCondition>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScheduledWorkflowCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScheduledWorkflow {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn enabled(&self) -> bool {
        self.spec.enabled
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    /// Type of the most recent condition
    pub fn condition_summary(&self) -> String {
        self.status
            .conditions
            .last()
            .map(|c| c.condition_type.clone())
            .unwrap_or_else(|| "NO_STATUS".to_string())
    }

    /// The schedule in model form
    pub fn trigger(&self) -> Option<Trigger> {
        let trigger = &self.spec.trigger;
        if let Some(cron) = &trigger.cron_schedule {
            return Some(Trigger::Cron(CronSchedule {
                cron: cron.cron.clone(),
                start_time: cron.start_time,
                end_time: cron.end_time,
            }));
        }
        trigger.periodic_schedule.as_ref().map(|periodic| {
            Trigger::Periodic(PeriodicSchedule {
                interval_seconds: periodic.interval_second,
                start_time: periodic.start_time,
                end_time: periodic.end_time,
            })
        })
    }

    pub fn set_trigger(&mut self, trigger: Option<&Trigger>) {
        self.spec.trigger = match trigger {
            Some(Trigger::Cron(cron)) => SwfTrigger {
                cron_schedule: Some(SwfCronSchedule {
                    cron: cron.cron.clone(),
                    start_time: cron.start_time,
                    end_time: cron.end_time,
                }),
                periodic_schedule: None,
            },
            Some(Trigger::Periodic(periodic)) => SwfTrigger {
                cron_schedule: None,
                periodic_schedule: Some(SwfPeriodicSchedule {
                    interval_second: periodic.interval_seconds,
                    start_time: periodic.start_time,
                    end_time: periodic.end_time,
                }),
            },
            None => SwfTrigger::default(),
        };
    }

    pub fn to_store_string(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::internal(e, "Failed to marshal the scheduled workflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_summary() {
        let mut swf = ScheduledWorkflow::default();
        assert_eq!(swf.condition_summary(), "NO_STATUS");
        for ty in ["Enabled", "Disabled"] {
            swf.status.conditions.push(ScheduledWorkflowCondition {
                condition_type: ty.to_string(),
                status: "True".to_string(),
                ..Default::default()
            });
        }
        assert_eq!(swf.condition_summary(), "Disabled");
    }

    #[test]
    fn test_trigger_round_trip_through_spec() {
        let trigger = Trigger::Periodic(PeriodicSchedule {
            interval_seconds: 3600,
            start_time: None,
            end_time: None,
        });
        let mut swf = ScheduledWorkflow::default();
        swf.set_trigger(Some(&trigger));
        assert_eq!(swf.trigger(), Some(trigger));

        let json = serde_json::to_value(&swf).unwrap();
        assert_eq!(json["spec"]["trigger"]["periodicSchedule"]["intervalSecond"], 3600);
        assert_eq!(json["kind"], SCHEDULED_WORKFLOW_KIND);
    }

    #[test]
    fn test_decode_api_server_object() {
        let json = r#"{
            "apiVersion": "kubeflow.org/v1beta1",
            "kind": "ScheduledWorkflow",
            "metadata": {"name": "job-abc", "namespace": "kubeflow", "uid": "u-1"},
            "spec": {
                "enabled": true,
                "maxConcurrency": 2,
                "trigger": {"cronSchedule": {"cron": "0 0 * * *"}},
                "workflow": {"parameters": [{"name": "x", "value": "1"}], "spec": {"entrypoint": "main"}}
            },
            "status": {"conditions": [{"type": "Enabled", "status": "True"}]}
        }"#;
        let swf: ScheduledWorkflow = serde_json::from_str(json).unwrap();
        assert_eq!(swf.uid(), "u-1");
        assert!(swf.enabled());
        assert_eq!(swf.spec.max_concurrency, Some(2));
        assert!(matches!(swf.trigger(), Some(Trigger::Cron(c)) if c.cron == "0 0 * * *"));
        assert_eq!(swf.condition_summary(), "Enabled");
    }
}
