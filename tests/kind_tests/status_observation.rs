//! Integration tests for status observation
//!
//! Flux is not guaranteed to finish a release within a test, so these
//! stories only assert what holds immediately after an apply.

use tenant_provisioner::observer::{ObserveTarget, ObserverChain};
use tenant_provisioner::tenant::DomainStatus;

use super::helpers::{cleanup_release, ensure_test_cluster};

/// Story: observing a release that was never applied, in a namespace with no
/// pods, reports the tenant as pending rather than failing
#[tokio::test]
#[ignore = "requires kind cluster with Flux - run with: cargo test --test kind -- --ignored"]
async fn story_unknown_release_is_pending() {
    let client = ensure_test_cluster()
        .await
        .expect("failed to setup cluster");
    cleanup_release(&client, "default", "tp-it-never-applied").await;

    let observers = ObserverChain::for_client(client, true);
    let observation = observers
        .observe(&ObserveTarget {
            release_name: "tp-it-never-applied".to_string(),
            namespace: "default".to_string(),
        })
        .await
        .expect("observation should not fail");

    assert!(observation.conditions.is_empty());
    assert_eq!(observation.classify(), DomainStatus::Pending);
}
