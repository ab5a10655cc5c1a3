//! Core domain types
//!
//! The persisted model of the API server. These types are independent of the
//! wire schema version and are what the relational store reads and writes.

pub mod experiment;
pub mod job;
pub mod pipeline;
pub mod reference;
pub mod run;
pub mod task;

pub use experiment::{Experiment, StorageState};
pub use job::{CronSchedule, Job, PeriodicSchedule, Trigger};
pub use pipeline::{Pipeline, PipelineStatus, PipelineVersion, PipelineVersionStatus};
pub use reference::{FilterContext, ReferenceKey, Relationship, ResourceReference, ResourceType};
pub use run::{PipelineSpec, Run, RunMetric, RuntimeConfig, RuntimeState, RuntimeStatus};
pub use task::Task;
