//! Kubernetes integration for the API server.
//!
//! The Resource Manager talks to the cluster only through the traits in
//! [`base`]: workflows, scheduled workflows, pods and access reviews. The
//! production client, [`http::KubeClient`], is backed by the [`kube`] crate
//! and uses the ambient configuration (in-cluster or `~/.kube/config`).
//! Tests substitute in-memory implementations.

mod base;
pub mod http;

pub use base::*;
