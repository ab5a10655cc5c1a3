//! Pipelines Core
//!
//! Core types and pure logic shared by the pipelines API server.
//!
//! This crate contains:
//! - Domain types: the persisted model (Pipeline, Run, Job, etc.)
//! - DTOs: the two wire generations of the public API (v1beta1, v2beta1)
//! - Reference resolution over the loosely typed ownership graph
//! - Conversion between wire types and the persisted model
//! - The error taxonomy used by every layer above

pub mod convert;
pub mod domain;
pub mod dto;
pub mod error;
pub mod reference;

pub use error::{Error, ErrorKind, Result, ResultExt};
