//! Tenant provisioner - per-tenant Flux HelmReleases for organizations and restaurants
//!
//! Every organization gets its own namespace and HelmRelease. Every
//! restaurant gets a HelmRelease in its organization's namespace. Flux does
//! the actual Helm work; this crate declares what should run and reads back
//! what the cluster reports.
//!
//! # Flow
//!
//! - Creating a tenant stores it `pending`, then ensures its namespace and
//!   applies its HelmRelease ([`rollout`], [`provisioner`])
//! - Changing a tenant's version stores it `pending` and re-applies the
//!   HelmRelease with the new image tags ([`rollout`])
//! - Listing tenants observes each release ([`observer`]), classifies the
//!   result ([`status`]) and commits changed statuses in one batch
//!   ([`reconciler`])
//!
//! # Modules
//!
//! - [`tenant`] - Tenant records, versions and statuses
//! - [`crd`] - The Flux HelmRelease resource type
//! - [`descriptor`] - Rendering a tenant into a HelmRelease
//! - [`provisioner`] - Idempotent namespace and HelmRelease apply
//! - [`observer`] - Reading release conditions and workload readiness
//! - [`status`] - Classifying observations into a tenant status
//! - [`reconciler`] - Batch status reconciliation
//! - [`rollout`] - Provisioning and version rollouts
//! - [`store`] - Tenant persistence (PostgreSQL, in-memory)
//! - [`service`] - Operations exposed to the CRUD layer
//! - [`config`] - Runtime configuration
//! - [`kube_utils`] - Client construction and namespace helpers
//! - [`retry`] - Backoff for transient cluster errors
//! - [`telemetry`] - Logging setup
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod descriptor;
pub mod error;
pub mod kube_utils;
pub mod observer;
pub mod provisioner;
pub mod reconciler;
pub mod retry;
pub mod rollout;
pub mod service;
pub mod status;
pub mod store;
pub mod telemetry;
pub mod tenant;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager for server-side apply and the managed-by label
pub const FIELD_MANAGER: &str = "tenant-provisioner";
