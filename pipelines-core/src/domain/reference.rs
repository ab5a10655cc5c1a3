//! Resource reference domain types
//!
//! Loosely typed ownership and creation edges between resources.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Kind of a resource on either end of a reference edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Experiment,
    Job,
    Run,
    Pipeline,
    PipelineVersion,
    Namespace,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Experiment => "Experiment",
            ResourceType::Job => "Job",
            ResourceType::Run => "Run",
            ResourceType::Pipeline => "Pipeline",
            ResourceType::PipelineVersion => "PipelineVersion",
            ResourceType::Namespace => "Namespace",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Experiment" => Ok(ResourceType::Experiment),
            "Job" => Ok(ResourceType::Job),
            "Run" => Ok(ResourceType::Run),
            "Pipeline" => Ok(ResourceType::Pipeline),
            "PipelineVersion" => Ok(ResourceType::PipelineVersion),
            "Namespace" => Ok(ResourceType::Namespace),
            other => Err(Error::invalid_input(format!(
                "Unsupported resource type: {other}"
            ))),
        }
    }
}

/// How the reference relates to the resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Relationship {
    Owner,
    Creator,
}

impl Relationship {
    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Owner => "Owner",
            Relationship::Creator => "Creator",
        }
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Relationship {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Owner" => Ok(Relationship::Owner),
            "Creator" => Ok(Relationship::Creator),
            other => Err(Error::invalid_input(format!(
                "Unsupported relationship: {other}"
            ))),
        }
    }
}

/// A single (resource, reference, relationship) edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceReference {
    pub resource_id: String,
    pub resource_type: ResourceType,
    pub reference_id: String,
    pub reference_name: String,
    pub reference_type: ResourceType,
    pub relationship: Relationship,
}

/// Key of the resource a list is scoped to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceKey {
    pub resource_type: ResourceType,
    pub id: String,
}

impl ReferenceKey {
    pub fn new(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource_type,
            id: id.into(),
        }
    }
}

/// Scope applied to list operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterContext {
    pub reference_key: Option<ReferenceKey>,
}

impl FilterContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn by(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            reference_key: Some(ReferenceKey::new(resource_type, id)),
        }
    }
}
