//! Experiment domain types

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Groups runs and recurring runs in a namespace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Experiment {
    pub id: String,
    pub name: String,
    pub description: String,
    pub namespace: String,
    pub storage_state: StorageState,
    pub created_at: DateTime<Utc>,
}

/// Whether a resource is visible in default listings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageState {
    #[default]
    Available,
    Archived,
}

impl StorageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageState::Available => "AVAILABLE",
            StorageState::Archived => "ARCHIVED",
        }
    }
}

impl FromStr for StorageState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" | "STORAGESTATE_AVAILABLE" => Ok(StorageState::Available),
            "ARCHIVED" | "STORAGESTATE_ARCHIVED" => Ok(StorageState::Archived),
            other => Err(Error::invalid_input(format!(
                "Unknown storage state: {other}"
            ))),
        }
    }
}
