//! Caller identity and access-review attributes

use axum::http::HeaderMap;

use crate::config::ServerConfig;
use crate::k8s::ResourceAttributes;

pub const RBAC_GROUP: &str = "pipelines.kubeflow.org";
pub const RBAC_VERSION: &str = "v1beta1";

pub const VERB_CREATE: &str = "create";
pub const VERB_GET: &str = "get";
pub const VERB_LIST: &str = "list";
pub const VERB_DELETE: &str = "delete";
pub const VERB_ARCHIVE: &str = "archive";
pub const VERB_UNARCHIVE: &str = "unarchive";
pub const VERB_TERMINATE: &str = "terminate";
pub const VERB_RETRY: &str = "retry";
pub const VERB_ENABLE: &str = "enable";
pub const VERB_DISABLE: &str = "disable";
pub const VERB_REPORT_METRICS: &str = "reportMetrics";
pub const VERB_READ_ARTIFACT: &str = "readArtifact";
pub const VERB_REPORT: &str = "report";

pub const RESOURCE_EXPERIMENTS: &str = "experiments";
pub const RESOURCE_PIPELINES: &str = "pipelines";
pub const RESOURCE_RUNS: &str = "runs";
pub const RESOURCE_JOBS: &str = "jobs";
pub const RESOURCE_WORKFLOWS: &str = "workflows";
pub const RESOURCE_SCHEDULED_WORKFLOWS: &str = "scheduledworkflows";

/// Caller identity from the configured header, prefix stripped
///
/// Empty when the header is absent or not valid UTF-8.
pub fn user_identity(headers: &HeaderMap, config: &ServerConfig) -> String {
    let Some(value) = headers
        .get(config.user_id_header.as_str())
        .and_then(|v| v.to_str().ok())
    else {
        return String::new();
    };
    value
        .strip_prefix(config.user_id_prefix.as_str())
        .unwrap_or(value)
        .trim()
        .to_string()
}

/// Attributes for an action on a pipelines resource
pub fn resource_attributes(
    namespace: &str,
    verb: &str,
    resource: &str,
    name: &str,
) -> ResourceAttributes {
    ResourceAttributes {
        namespace: namespace.to_string(),
        verb: verb.to_string(),
        group: RBAC_GROUP.to_string(),
        version: RBAC_VERSION.to_string(),
        resource: resource.to_string(),
        subresource: String::new(),
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_identity_strips_prefix() {
        let config = ServerConfig {
            user_id_prefix: "accounts.google.com:".to_string(),
            ..Default::default()
        };
        let mut headers = HeaderMap::new();
        assert_eq!(user_identity(&headers, &config), "");

        headers.insert(
            "kubeflow-userid",
            HeaderValue::from_static("accounts.google.com:alice@example.com"),
        );
        assert_eq!(user_identity(&headers, &config), "alice@example.com");
    }

    #[test]
    fn test_resource_attributes() {
        let attrs = resource_attributes("team-a", VERB_GET, RESOURCE_RUNS, "r1");
        assert_eq!(attrs.group, "pipelines.kubeflow.org");
        assert_eq!(attrs.version, "v1beta1");
        assert_eq!(attrs.namespace, "team-a");
        assert_eq!(attrs.name, "r1");
    }
}
