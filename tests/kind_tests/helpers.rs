//! Shared fixtures for cluster tests

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams};
use kube::Client;

use tenant_provisioner::crd::HelmRelease;
use tenant_provisioner::kube_utils::create_client;

/// Connect to the test cluster and check the HelmRelease CRD is served
pub async fn ensure_test_cluster() -> Result<Client, String> {
    let client = create_client(None)
        .await
        .map_err(|e| format!("no usable kubeconfig: {}", e))?;

    let api: Api<HelmRelease> = Api::all(client.clone());
    api.list(&Default::default())
        .await
        .map_err(|e| format!("HelmRelease CRD not available (is Flux installed?): {}", e))?;

    Ok(client)
}

/// Remove a test namespace and everything in it
pub async fn cleanup_namespace(client: &Client, name: &str) {
    let api: Api<Namespace> = Api::all(client.clone());
    let _ = api.delete(name, &DeleteParams::default()).await;
}

/// Remove one HelmRelease
pub async fn cleanup_release(client: &Client, namespace: &str, name: &str) {
    let api: Api<HelmRelease> = Api::namespaced(client.clone(), namespace);
    let _ = api.delete(name, &DeleteParams::default()).await;
}
