//! Pipeline domain types

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Pipeline definition record
///
/// A pipeline is an empty shell until a version supplies its manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub description: String,
    pub namespace: String,
    pub status: PipelineStatus,
    pub default_version_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a pipeline row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineStatus {
    #[default]
    Creating,
    Ready,
    Deleting,
}

impl PipelineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStatus::Creating => "CREATING",
            PipelineStatus::Ready => "READY",
            PipelineStatus::Deleting => "DELETING",
        }
    }
}

impl FromStr for PipelineStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(PipelineStatus::Creating),
            "READY" => Ok(PipelineStatus::Ready),
            "DELETING" => Ok(PipelineStatus::Deleting),
            other => Err(Error::invalid_input(format!(
                "Unknown pipeline status: {other}"
            ))),
        }
    }
}

/// A concrete manifest of a pipeline
///
/// The manifest lives either inline (`pipeline_spec`) or in object storage,
/// addressed by `pipeline_spec_uri`, by the version id, or by the pipeline id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineVersion {
    pub id: String,
    pub name: String,
    pub description: String,
    pub pipeline_id: String,
    /// Serialized `[{"name":..,"value":..}]` list, empty when unknown
    pub parameters: String,
    pub pipeline_spec: String,
    pub pipeline_spec_uri: String,
    pub code_source_url: String,
    pub status: PipelineVersionStatus,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a pipeline version row
///
/// Readers must not serve a version that is not `Ready`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineVersionStatus {
    #[default]
    Creating,
    Ready,
    Deleting,
}

impl PipelineVersionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineVersionStatus::Creating => "CREATING",
            PipelineVersionStatus::Ready => "READY",
            PipelineVersionStatus::Deleting => "DELETING",
        }
    }
}

impl FromStr for PipelineVersionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATING" => Ok(PipelineVersionStatus::Creating),
            "READY" => Ok(PipelineVersionStatus::Ready),
            "DELETING" => Ok(PipelineVersionStatus::Deleting),
            other => Err(Error::invalid_input(format!(
                "Unknown pipeline version status: {other}"
            ))),
        }
    }
}
