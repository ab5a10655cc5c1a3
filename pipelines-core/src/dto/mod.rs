//! Data Transfer Objects for the public API
//!
//! Two incompatible schema generations are served side by side. Every
//! versioned input is carried as a tagged union so callers match on the
//! concrete generation instead of probing a shared shape.

pub mod v1beta1;
pub mod v2beta1;

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// API generation named in a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiVersion {
    V1Beta1,
    V2Beta1,
}

impl ApiVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiVersion::V1Beta1 => "v1beta1",
            ApiVersion::V2Beta1 => "v2beta1",
        }
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "v1beta1" => Ok(ApiVersion::V1Beta1),
            "v2beta1" => Ok(ApiVersion::V2Beta1),
            other => Err(Error::unknown_api_version(
                "ApiVersion::from_str",
                format!("API {other}"),
            )),
        }
    }
}

/// Pipeline package location
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Url {
    pub pipeline_url: String,
}

/// Schedule of a recurring run; identical in both generations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Trigger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_schedule: Option<CronSchedule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub periodic_schedule: Option<PeriodicSchedule>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CronSchedule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub cron: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodicSchedule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub interval_second: i64,
}

macro_rules! versioned {
    ($(#[$meta:meta])* $name:ident, $v1:ty, $v2:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Serialize)]
        #[serde(untagged)]
        pub enum $name {
            V1($v1),
            V2($v2),
        }

        impl $name {
            /// Decode a request body for the given generation
            pub fn from_json(version: ApiVersion, value: serde_json::Value) -> Result<Self> {
                let decoded = match version {
                    ApiVersion::V1Beta1 => serde_json::from_value(value).map(Self::V1),
                    ApiVersion::V2Beta1 => serde_json::from_value(value).map(Self::V2),
                };
                decoded.map_err(|e| {
                    Error::invalid_input(format!(
                        "Malformed {} {} body: {e}",
                        version,
                        stringify!($name)
                    ))
                })
            }

            pub fn version(&self) -> ApiVersion {
                match self {
                    Self::V1(_) => ApiVersion::V1Beta1,
                    Self::V2(_) => ApiVersion::V2Beta1,
                }
            }

            pub fn into_v1(self) -> Option<$v1> {
                match self {
                    Self::V1(inner) => Some(inner),
                    Self::V2(_) => None,
                }
            }

            pub fn into_v2(self) -> Option<$v2> {
                match self {
                    Self::V2(inner) => Some(inner),
                    Self::V1(_) => None,
                }
            }
        }
    };
}

versioned!(
    /// An experiment in either generation
    ApiExperiment,
    v1beta1::Experiment,
    v2beta1::Experiment
);
versioned!(
    /// A pipeline in either generation
    ApiPipeline,
    v1beta1::Pipeline,
    v2beta1::Pipeline
);
versioned!(
    /// A pipeline version in either generation
    ApiPipelineVersion,
    v1beta1::PipelineVersion,
    v2beta1::PipelineVersion
);
versioned!(
    /// A run in either generation
    ApiRun,
    v1beta1::Run,
    v2beta1::Run
);
versioned!(
    /// A recurring run in either generation
    ApiJob,
    v1beta1::Job,
    v2beta1::RecurringRun
);
