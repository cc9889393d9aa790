//! Jenkins operator - CRD-driven Kubernetes operator for Jenkins masters
//!
//! A `Jenkins` resource describes one master. The operator provisions it,
//! applies configuration through groovy script jobs, provisions seed jobs
//! and backs job history up. Every Jenkins job the operator runs is tracked
//! in a build ledger kept in the resource status, so a restarted operator
//! picks up where it left off.
//!
//! # Modules
//!
//! - [`crd`] - The `Jenkins` custom resource and the build ledger
//! - [`controller`] - Reconciliation loop and the Kubernetes seam
//! - [`configuration`] - Base and user configuration phases
//! - [`jobs`] - Job execution engine (submit, poll, retry, expire)
//! - [`jenkins`] - Jenkins HTTP API client
//! - [`plugins`] - Plugin identifiers and dependency conflict checks
//! - [`backup`] - Backup strategies
//! - [`resources`] - Builders for the objects a master consists of
//! - [`fingerprint`] - Content fingerprints keying builds
//! - [`events`] - Kubernetes events on Jenkins resources
//! - [`error`] - Error types for the operator

#![deny(missing_docs)]

pub mod backup;
pub mod configuration;
pub mod controller;
pub mod crd;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod jenkins;
pub mod jobs;
pub mod plugins;
pub mod resources;
pub mod retry;
pub mod telemetry;
pub mod templates;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;
