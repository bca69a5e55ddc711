//! Integration tests for tenant provisioning
//!
//! These tests require a Kubernetes cluster (kind) with the Flux CRDs and
//! tell the story of how tenants move through the cluster.
//!
//! # Test Organization
//!
//! - `release_operations`: Stories about applying tenant HelmReleases and
//!   namespaces through the Kubernetes API
//!
//! - `status_observation`: Stories about reading release conditions and pod
//!   readiness back into tenant statuses
//!
//! # Running These Tests
//!
//! ```bash
//! # Ensure a kind cluster with Flux installed is the current context
//! cargo test --test kind -- --ignored
//! ```

mod helpers;
mod release_operations;
mod status_observation;
