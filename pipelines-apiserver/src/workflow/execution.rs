//! Argo workflow view

use std::collections::BTreeMap;
use std::io::Read;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use pipelines_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::{
    LABEL_COMPLETED, LABEL_PERSISTED_FINAL_STATE, LABEL_RUN_ID, LABEL_WORKFLOW_EPOCH,
    SCHEDULED_WORKFLOW_KIND, WORKFLOW_API_VERSION, WORKFLOW_KIND,
};

const PHASE_RUNNING: &str = "Running";
const PHASE_SUCCEEDED: &str = "Succeeded";
const PHASE_SKIPPED: &str = "Skipped";
const PHASE_FAILED: &str = "Failed";
const PHASE_ERROR: &str = "Error";
const PHASE_OMITTED: &str = "Omitted";

const NODE_TYPE_POD: &str = "Pod";
const NODE_TYPE_DAG: &str = "DAG";

fn default_api_version() -> String {
    WORKFLOW_API_VERSION.to_string()
}

fn default_kind() -> String {
    WORKFLOW_KIND.to_string()
}

/// A single pipeline execution as stored by the Kubernetes API server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: Map<String, Value>,
    #[serde(default)]
    pub status: WorkflowStatus,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            spec: Map::new(),
            status: WorkflowStatus::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WorkflowStatus {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeStatus>,
    /// base64 of the gzipped JSON node map, set when the map is too large
    #[serde(skip_serializing_if = "String::is_empty")]
    pub compressed_nodes: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeStatus {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub display_name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Workflow {
    /// Parse a stored manifest or a template body
    pub fn from_json(manifest: &str) -> Result<Self> {
        let workflow: Workflow = serde_json::from_str(manifest)
            .map_err(|e| Error::invalid_input(format!("Failed to parse the workflow manifest: {e}")))?;
        if workflow.kind != WORKFLOW_KIND {
            return Err(Error::invalid_input(format!(
                "Unexpected resource kind {}, expected {WORKFLOW_KIND}",
                workflow.kind
            )));
        }
        Ok(workflow)
    }

    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or_default()
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(key))
            .map(String::as_str)
    }

    pub fn set_label(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
    }

    pub fn set_annotation(&mut self, key: &str, value: impl Into<String>) {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.into());
    }

    /// Run id label, empty when the workflow was not started by the server
    pub fn run_id(&self) -> &str {
        self.label(LABEL_RUN_ID).unwrap_or_default()
    }

    pub fn persisted_final_state(&self) -> bool {
        self.label(LABEL_PERSISTED_FINAL_STATE) == Some("true")
    }

    /// UID of the owning scheduled workflow, i.e. the job id
    pub fn job_uid(&self) -> Option<&str> {
        self.metadata
            .owner_references
            .as_ref()?
            .iter()
            .find(|owner| owner.kind == SCHEDULED_WORKFLOW_KIND)
            .map(|owner| owner.uid.as_str())
    }

    pub fn creation_timestamp(&self) -> Option<DateTime<Utc>> {
        self.metadata.creation_timestamp.as_ref().map(|t| t.0)
    }

    /// Time the owning schedule planned this workflow for
    ///
    /// `None` when the epoch label is missing, unparsable or zero.
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        let epoch = self.label(LABEL_WORKFLOW_EPOCH)?.parse::<i64>().ok()?;
        if epoch == 0 {
            return None;
        }
        DateTime::from_timestamp(epoch, 0)
    }

    /// Current phase, empty while Argo has not picked the workflow up
    pub fn condition(&self) -> &str {
        &self.status.phase
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.status.finished_at
    }

    pub fn is_final(&self) -> bool {
        matches!(
            self.status.phase.as_str(),
            PHASE_SUCCEEDED | PHASE_FAILED | PHASE_ERROR
        )
    }

    /// Deadline patched to zero but Argo has not stopped it yet
    pub fn is_terminating(&self) -> bool {
        let deadline = self.spec.get("activeDeadlineSeconds").and_then(Value::as_i64);
        deadline == Some(0) && !self.is_final()
    }

    pub fn service_account(&self) -> &str {
        self.spec
            .get("serviceAccountName")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn set_service_account(&mut self, service_account: &str) {
        self.spec.insert(
            "serviceAccountName".to_string(),
            Value::String(service_account.to_string()),
        );
    }

    /// Name/value pairs of `spec.arguments.parameters`
    pub fn parameters(&self) -> Vec<(String, Option<String>)> {
        self.spec
            .get("arguments")
            .and_then(|a| a.get("parameters"))
            .and_then(Value::as_array)
            .map(|params| {
                params
                    .iter()
                    .filter_map(|p| {
                        let name = p.get("name")?.as_str()?.to_string();
                        let value = p.get("value").and_then(Value::as_str).map(str::to_string);
                        Some((name, value))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Replace the values of declared parameters; undeclared names are ignored
    pub fn override_parameters(&mut self, overrides: &BTreeMap<String, String>) {
        let Some(params) = self
            .spec
            .get_mut("arguments")
            .and_then(|a| a.get_mut("parameters"))
            .and_then(Value::as_array_mut)
        else {
            return;
        };
        for param in params {
            let Some(name) = param.get("name").and_then(Value::as_str) else {
                continue;
            };
            let Some(value) = overrides.get(name).cloned() else {
                continue;
            };
            if let Some(obj) = param.as_object_mut() {
                obj.insert("value".to_string(), Value::String(value));
            }
        }
    }

    /// Annotate every template's pod metadata unless the key is already set
    pub fn set_template_annotation_if_absent(&mut self, key: &str, value: &str) {
        let Some(templates) = self.spec.get_mut("templates").and_then(Value::as_array_mut) else {
            return;
        };
        for template in templates {
            let Some(template) = template.as_object_mut() else {
                continue;
            };
            let metadata = template
                .entry("metadata")
                .or_insert_with(|| json!({}));
            let Some(metadata) = metadata.as_object_mut() else {
                continue;
            };
            let annotations = metadata
                .entry("annotations")
                .or_insert_with(|| json!({}));
            if let Some(annotations) = annotations.as_object_mut() {
                annotations
                    .entry(key.to_string())
                    .or_insert_with(|| Value::String(value.to_string()));
            }
        }
    }

    /// Inflate `status.compressedNodes` into `status.nodes`
    pub fn decompress(&mut self) -> Result<()> {
        if self.status.compressed_nodes.is_empty() {
            return Ok(());
        }
        let compressed = STANDARD
            .decode(self.status.compressed_nodes.trim())
            .map_err(|e| Error::internal(e, "Failed to decode the compressed workflow nodes"))?;
        let mut json = String::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_string(&mut json)
            .map_err(|e| Error::internal(e, "Failed to inflate the compressed workflow nodes"))?;
        self.status.nodes = serde_json::from_str(&json)
            .map_err(|e| Error::internal(e, "Failed to parse the compressed workflow nodes"))?;
        self.status.compressed_nodes.clear();
        Ok(())
    }

    pub fn can_retry(&self) -> Result<()> {
        match self.status.phase.as_str() {
            PHASE_FAILED | PHASE_ERROR => Ok(()),
            phase => Err(Error::invalid_input(format!(
                "Workflow must be Failed or Error to retry, current phase is {phase:?}"
            ))),
        }
    }

    /// Reset a failed workflow so Argo resumes it
    ///
    /// Succeeded and skipped nodes are carried over, failed DAG nodes are put
    /// back to running, and every other finished node is dropped. Returns the
    /// new workflow and the pods of dropped pod nodes, which must be deleted
    /// before the workflow is resubmitted.
    pub fn generate_retry(&self) -> Result<(Workflow, Vec<String>)> {
        self.can_retry()?;

        let mut retried = self.clone();
        if let Some(labels) = retried.metadata.labels.as_mut() {
            labels.remove(LABEL_PERSISTED_FINAL_STATE);
        }
        retried.set_label(LABEL_COMPLETED, "false");
        retried.status.phase = PHASE_RUNNING.to_string();
        retried.status.message.clear();
        retried.status.finished_at = None;
        if retried.spec.get("activeDeadlineSeconds").and_then(Value::as_i64) == Some(0) {
            retried.spec.remove("activeDeadlineSeconds");
        }

        let on_exit_prefix = format!("{}.onExit", self.name());
        let mut nodes = BTreeMap::new();
        let mut pods_to_delete = Vec::new();
        for node in self.status.nodes.values() {
            let on_exit = node.name.starts_with(&on_exit_prefix);
            match node.phase.as_str() {
                PHASE_SUCCEEDED | PHASE_SKIPPED if !on_exit => {
                    nodes.insert(node.id.clone(), node.clone());
                    continue;
                }
                PHASE_SUCCEEDED | PHASE_SKIPPED => {}
                PHASE_FAILED | PHASE_ERROR | PHASE_OMITTED => {
                    if !on_exit && node.node_type == NODE_TYPE_DAG {
                        let mut reset = node.clone();
                        reset.phase = PHASE_RUNNING.to_string();
                        reset.message.clear();
                        reset.finished_at = None;
                        nodes.insert(reset.id.clone(), reset);
                        continue;
                    }
                }
                phase => {
                    return Err(Error::internal_msg(format!(
                        "Workflow cannot be retried with node {} in {phase:?} phase",
                        node.id
                    )));
                }
            }
            if node.node_type == NODE_TYPE_POD {
                pods_to_delete.push(node.id.clone());
            }
        }
        retried.status.nodes = nodes;
        Ok((retried, pods_to_delete))
    }

    /// Minimal shape checks before a workflow is submitted
    pub fn validate(&self) -> Result<()> {
        let templates = self
            .spec
            .get("templates")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        let has_template_ref = self.spec.contains_key("workflowTemplateRef");
        if templates == 0 && !has_template_ref {
            return Err(Error::invalid_input("Workflow has no templates"));
        }
        let entrypoint = self
            .spec
            .get("entrypoint")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if entrypoint.is_empty() && !has_template_ref {
            return Err(Error::invalid_input("Workflow has no entrypoint"));
        }
        if self.name().is_empty() && self.metadata.generate_name.as_deref().unwrap_or_default().is_empty() {
            return Err(Error::invalid_input("Workflow has neither a name nor a generateName"));
        }
        Ok(())
    }

    /// Object store key of an output artifact of a node
    pub fn artifact_key(&self, node_id: &str, artifact_name: &str) -> Option<String> {
        let node = self.status.nodes.get(node_id)?;
        let artifact = node
            .extra
            .get("outputs")?
            .get("artifacts")?
            .as_array()?
            .iter()
            .find(|a| a.get("name").and_then(Value::as_str) == Some(artifact_name))?;
        artifact
            .get("s3")
            .and_then(|s3| s3.get("key"))
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    /// Serialized form kept in the run row
    pub fn to_store_string(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::internal(e, "Failed to marshal the workflow"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use pipelines_core::ErrorKind;
    use std::io::Write;

    fn node(id: &str, node_type: &str, phase: &str) -> NodeStatus {
        NodeStatus {
            id: id.to_string(),
            name: format!("wf.{id}"),
            node_type: node_type.to_string(),
            phase: phase.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_scheduled_at_reads_epoch_label() {
        let mut wf = Workflow::default();
        assert_eq!(wf.scheduled_at(), None);

        wf.set_label(LABEL_WORKFLOW_EPOCH, "0");
        assert_eq!(wf.scheduled_at(), None);

        wf.set_label(LABEL_WORKFLOW_EPOCH, "1700000000");
        assert_eq!(wf.scheduled_at().map(|t| t.timestamp()), Some(1_700_000_000));
    }

    fn failed_workflow() -> Workflow {
        let mut wf = Workflow::default();
        wf.metadata.name = Some("wf".to_string());
        wf.set_label(LABEL_PERSISTED_FINAL_STATE, "true");
        wf.status.phase = PHASE_FAILED.to_string();
        wf.status.finished_at = Some(Utc::now());
        for n in [
            node("ok", NODE_TYPE_POD, PHASE_SUCCEEDED),
            node("bad", NODE_TYPE_POD, PHASE_FAILED),
            node("dag", NODE_TYPE_DAG, PHASE_FAILED),
        ] {
            wf.status.nodes.insert(n.id.clone(), n);
        }
        wf
    }

    #[test]
    fn test_parse_keeps_unknown_fields() {
        let manifest = r#"{
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Workflow",
            "metadata": {"name": "hello", "labels": {"pipeline/runid": "r1"}},
            "spec": {"entrypoint": "main", "arguments": {"parameters": [{"name": "x", "value": "1"}]}},
            "status": {"phase": "Running", "progress": "1/2"}
        }"#;
        let wf = Workflow::from_json(manifest).unwrap();
        assert_eq!(wf.name(), "hello");
        assert_eq!(wf.run_id(), "r1");
        assert_eq!(wf.condition(), "Running");
        assert_eq!(wf.status.extra["progress"], "1/2");
        assert_eq!(wf.parameters(), vec![("x".to_string(), Some("1".to_string()))]);

        let round = Workflow::from_json(&wf.to_store_string().unwrap()).unwrap();
        assert_eq!(round, wf);
    }

    #[test]
    fn test_parse_rejects_other_kinds() {
        let err = Workflow::from_json(r#"{"kind": "Pod"}"#).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_terminating_requires_zero_deadline() {
        let mut wf = Workflow::default();
        wf.status.phase = PHASE_RUNNING.to_string();
        assert!(!wf.is_terminating());
        wf.spec.insert("activeDeadlineSeconds".into(), json!(0));
        assert!(wf.is_terminating());
        wf.status.phase = PHASE_FAILED.to_string();
        assert!(wf.is_final());
        assert!(!wf.is_terminating());
    }

    #[test]
    fn test_job_uid_from_owner_reference() {
        let mut wf = Workflow::default();
        assert_eq!(wf.job_uid(), None);
        wf.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "kubeflow.org/v1beta1".into(),
            kind: SCHEDULED_WORKFLOW_KIND.into(),
            name: "swf".into(),
            uid: "job-1".into(),
            ..Default::default()
        }]);
        assert_eq!(wf.job_uid(), Some("job-1"));
    }

    #[test]
    fn test_override_parameters_only_touches_declared() {
        let mut wf = Workflow::default();
        wf.spec.insert(
            "arguments".into(),
            json!({"parameters": [{"name": "x", "value": "1"}, {"name": "y"}]}),
        );
        let overrides = BTreeMap::from([
            ("y".to_string(), "2".to_string()),
            ("z".to_string(), "3".to_string()),
        ]);
        wf.override_parameters(&overrides);
        assert_eq!(
            wf.parameters(),
            vec![
                ("x".to_string(), Some("1".to_string())),
                ("y".to_string(), Some("2".to_string())),
            ]
        );
    }

    #[test]
    fn test_decompress_nodes() {
        let nodes = BTreeMap::from([("n1".to_string(), node("n1", NODE_TYPE_POD, PHASE_FAILED))]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(serde_json::to_string(&nodes).unwrap().as_bytes())
            .unwrap();
        let compressed = STANDARD.encode(encoder.finish().unwrap());

        let mut wf = Workflow::default();
        wf.status.compressed_nodes = compressed;
        wf.decompress().unwrap();
        assert!(wf.status.compressed_nodes.is_empty());
        assert_eq!(wf.status.nodes, nodes);
    }

    #[test]
    fn test_generate_retry() {
        let wf = failed_workflow();
        let (retried, pods) = wf.generate_retry().unwrap();

        assert_eq!(pods, vec!["bad".to_string()]);
        assert_eq!(retried.condition(), PHASE_RUNNING);
        assert!(retried.finished_at().is_none());
        assert!(!retried.persisted_final_state());
        assert_eq!(retried.label(LABEL_COMPLETED), Some("false"));
        assert!(retried.status.nodes.contains_key("ok"));
        assert!(!retried.status.nodes.contains_key("bad"));
        assert_eq!(retried.status.nodes["dag"].phase, PHASE_RUNNING);
    }

    #[test]
    fn test_retry_rejects_running_workflow() {
        let mut wf = failed_workflow();
        wf.status.phase = PHASE_RUNNING.to_string();
        assert_eq!(wf.can_retry().unwrap_err().kind(), ErrorKind::InvalidInput);

        let mut wf = failed_workflow();
        wf.status
            .nodes
            .insert("live".into(), node("live", NODE_TYPE_POD, PHASE_RUNNING));
        assert_eq!(wf.generate_retry().unwrap_err().kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_validate() {
        let mut wf = Workflow::default();
        wf.metadata.generate_name = Some("run-".into());
        assert_eq!(wf.validate().unwrap_err().kind(), ErrorKind::InvalidInput);

        wf.spec = match json!({"entrypoint": "main", "templates": [{"name": "main"}]}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        wf.validate().unwrap();

        wf.metadata.generate_name = None;
        assert!(wf.validate().is_err());
    }

    #[test]
    fn test_artifact_key() {
        let mut wf = failed_workflow();
        if let Some(ok) = wf.status.nodes.get_mut("ok") {
            ok.extra.insert(
                "outputs".into(),
                json!({"artifacts": [{"name": "metrics", "s3": {"key": "artifacts/wf/ok/metrics.tgz"}}]}),
            );
        }
        assert_eq!(
            wf.artifact_key("ok", "metrics").as_deref(),
            Some("artifacts/wf/ok/metrics.tgz")
        );
        assert_eq!(wf.artifact_key("ok", "missing"), None);
        assert_eq!(wf.artifact_key("bad", "metrics"), None);
    }
}
