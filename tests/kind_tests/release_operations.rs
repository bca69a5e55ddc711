//! Integration tests for HelmRelease and namespace operations
//!
//! These tests tell the story of a tenant's HelmRelease from first apply to
//! version change, against the real API server.

use k8s_openapi::api::core::v1::Namespace;
use kube::api::Api;

use tenant_provisioner::config::ProvisionerConfig;
use tenant_provisioner::crd::HelmRelease;
use tenant_provisioner::descriptor::{DeploymentDescriptor, MANAGED_BY_LABEL};
use tenant_provisioner::provisioner::{ApplyOutcome, DescriptorClient, KubeDescriptorClient};
use tenant_provisioner::tenant::Version;
use tenant_provisioner::FIELD_MANAGER;

use super::helpers::{cleanup_namespace, ensure_test_cluster};

const NAMESPACE: &str = "tp-it-release-ops";

fn version(raw: &str) -> Version {
    Version::parse(raw).expect("valid version")
}

/// Story: provisioning a new organization creates its namespace and a
/// HelmRelease that carries the declared image tags
///
/// Expected behavior:
/// - The namespace exists afterwards and ensuring it again is a no-op
/// - The HelmRelease is created with the managed-by label
/// - Both image tags equal the declared version
#[tokio::test]
#[ignore = "requires kind cluster with Flux - run with: cargo test --test kind -- --ignored"]
async fn story_new_organization_gets_namespace_and_release() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    cleanup_namespace(&client, NAMESPACE).await;

    let provisioner = KubeDescriptorClient::new(client.clone());
    provisioner
        .ensure_namespace(NAMESPACE)
        .await
        .expect("failed to create namespace");
    provisioner
        .ensure_namespace(NAMESPACE)
        .await
        .expect("second ensure should be a no-op");

    let namespaces: Api<Namespace> = Api::all(client.clone());
    assert!(namespaces.get(NAMESPACE).await.is_ok());

    let descriptor = DeploymentDescriptor::for_organization(
        NAMESPACE,
        &version("1.0.0"),
        &ProvisionerConfig::default(),
    );
    let outcome = provisioner
        .apply_descriptor(&descriptor)
        .await
        .expect("failed to apply release");
    assert_eq!(outcome, ApplyOutcome::Created);

    let releases: Api<HelmRelease> = Api::namespaced(client.clone(), NAMESPACE);
    let hr = releases.get(NAMESPACE).await.expect("release should exist");
    let labels = hr.metadata.labels.unwrap_or_default();
    assert_eq!(labels.get(MANAGED_BY_LABEL).map(String::as_str), Some(FIELD_MANAGER));

    let values = hr.spec.values.expect("values should be set");
    assert_eq!(values["images"]["backend"]["tag"], "1.0.0");
    assert_eq!(values["images"]["frontend"]["tag"], "1.0.0");

    cleanup_namespace(&client, NAMESPACE).await;
}

/// Story: changing a tenant's version replaces the existing HelmRelease
/// with the new tags rather than failing on "already exists"
#[tokio::test]
#[ignore = "requires kind cluster with Flux - run with: cargo test --test kind -- --ignored"]
async fn story_version_change_replaces_release() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = format!("{}-upgrade", NAMESPACE);
    cleanup_namespace(&client, &namespace).await;

    let config = ProvisionerConfig::default();
    let provisioner = KubeDescriptorClient::new(client.clone());
    provisioner
        .ensure_namespace(&namespace)
        .await
        .expect("failed to create namespace");

    let first = DeploymentDescriptor::for_organization(&namespace, &version("1.0.0"), &config);
    provisioner
        .apply_descriptor(&first)
        .await
        .expect("failed to apply first release");

    let second = DeploymentDescriptor::for_organization(&namespace, &version("1.1.0"), &config);
    let outcome = provisioner
        .apply_descriptor(&second)
        .await
        .expect("failed to replace release");
    assert_eq!(outcome, ApplyOutcome::Updated);

    let releases: Api<HelmRelease> = Api::namespaced(client.clone(), &namespace);
    let hr = releases.get(&namespace).await.expect("release should exist");
    let values = hr.spec.values.expect("values should be set");
    assert_eq!(values["images"]["backend"]["tag"], "1.1.0");

    cleanup_namespace(&client, &namespace).await;
}

/// Story: a restaurant's release lands in its organization's namespace
/// under a prefixed name
#[tokio::test]
#[ignore = "requires kind cluster with Flux - run with: cargo test --test kind -- --ignored"]
async fn story_restaurant_release_shares_organization_namespace() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    let namespace = format!("{}-restaurant", NAMESPACE);
    cleanup_namespace(&client, &namespace).await;

    let provisioner = KubeDescriptorClient::new(client.clone());
    provisioner
        .ensure_namespace(&namespace)
        .await
        .expect("failed to create namespace");

    let descriptor = DeploymentDescriptor::for_restaurant(
        &namespace,
        "pizza",
        &version("0.0.1"),
        &ProvisionerConfig::default(),
    );
    provisioner
        .apply_descriptor(&descriptor)
        .await
        .expect("failed to apply restaurant release");

    let releases: Api<HelmRelease> = Api::namespaced(client.clone(), &namespace);
    let hr = releases
        .get("restaurant-pizza")
        .await
        .expect("restaurant release should exist");
    assert_eq!(hr.spec.release_name.as_deref(), Some("restaurant-pizza"));

    cleanup_namespace(&client, &namespace).await;
}
