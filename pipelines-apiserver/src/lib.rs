//! Pipelines API Server
//!
//! Control plane of the pipelines service: the HTTP API, the resource
//! manager behind it and the stores and cluster clients it drives.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod k8s;
pub mod objectstore;
pub mod repository;
pub mod service;
pub mod template;
pub mod workflow;
