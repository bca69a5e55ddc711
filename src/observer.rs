//! Cluster observation
//!
//! Two observers read what the cluster reports for a tenant:
//!
//! - [`ReleaseStatusObserver`] reads the HelmRelease conditions
//! - [`WorkloadReadinessObserver`] lists the pods in the tenant's namespace
//!
//! [`ObserverChain`] asks the release observer first and only falls back to
//! workloads when the release has nothing to say. Observations are never
//! cached; every pass reads the cluster again.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use tracing::{debug, warn};

#[cfg(test)]
use mockall::automock;

use crate::crd::{Condition, HelmRelease};
use crate::error::is_not_found;
use crate::status::{classify, ContainerSignal, WorkloadReport, WorkloadSignal};
use crate::tenant::{DomainStatus, Tenant};
use crate::Error;

/// Label Helm charts put on every object of a release
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

/// The release an observation is about
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObserveTarget {
    /// HelmRelease name
    pub release_name: String,
    /// Namespace of the release and its workloads
    pub namespace: String,
}

impl ObserveTarget {
    /// Target for a tenant's release
    pub fn for_tenant(tenant: &Tenant) -> Self {
        Self {
            release_name: tenant.release_name(),
            namespace: tenant.namespace().to_string(),
        }
    }
}

/// What a single observer saw
#[derive(Clone, Debug, PartialEq)]
pub enum Observation {
    /// Release conditions, never empty
    Conditions(Vec<Condition>),
    /// Pods in the namespace, possibly none
    Workloads(Vec<WorkloadSignal>),
    /// Nothing to report (e.g. the release does not exist yet)
    NotObserved,
}

/// Combined observation handed to the classifier
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterObservation {
    /// Release conditions; empty when the release reported none
    pub conditions: Vec<Condition>,
    /// Workload readiness, queried only when there are no conditions
    pub workloads: WorkloadReport,
}

impl ClusterObservation {
    /// Classify this observation
    pub fn classify(&self) -> DomainStatus {
        classify(&self.conditions, &self.workloads)
    }
}

/// Reads one kind of cluster state for a release
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterObserver: Send + Sync {
    /// Observe the target
    async fn observe(&self, target: &ObserveTarget) -> Result<Observation, Error>;
}

// =============================================================================
// Release status
// =============================================================================

/// Reads `status.conditions` from the target's HelmRelease
pub struct ReleaseStatusObserver {
    client: Client,
}

impl ReleaseStatusObserver {
    /// Create a new observer
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterObserver for ReleaseStatusObserver {
    async fn observe(&self, target: &ObserveTarget) -> Result<Observation, Error> {
        let api: Api<HelmRelease> = Api::namespaced(self.client.clone(), &target.namespace);
        match api.get(&target.release_name).await {
            Ok(hr) if hr.conditions().is_empty() => {
                debug!(release = %target.release_name, "HelmRelease has no conditions yet");
                Ok(Observation::NotObserved)
            }
            Ok(hr) => Ok(Observation::Conditions(hr.conditions().to_vec())),
            Err(e) if is_not_found(&e) => {
                debug!(release = %target.release_name, namespace = %target.namespace, "HelmRelease not found");
                Ok(Observation::NotObserved)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Workload readiness
// =============================================================================

/// Lists pods in the target namespace and reports their readiness
pub struct WorkloadReadinessObserver {
    client: Client,
    scope_to_release: bool,
}

impl WorkloadReadinessObserver {
    /// Observe every pod in the namespace
    pub fn new(client: Client) -> Self {
        Self {
            client,
            scope_to_release: false,
        }
    }

    /// Only observe pods labelled with the target's release
    pub fn scoped_to_release(mut self, scoped: bool) -> Self {
        self.scope_to_release = scoped;
        self
    }

    fn list_params(&self, target: &ObserveTarget) -> ListParams {
        if self.scope_to_release {
            ListParams::default().labels(&format!("{}={}", INSTANCE_LABEL, target.release_name))
        } else {
            ListParams::default()
        }
    }
}

#[async_trait]
impl ClusterObserver for WorkloadReadinessObserver {
    async fn observe(&self, target: &ObserveTarget) -> Result<Observation, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &target.namespace);
        let pods = api.list(&self.list_params(target)).await?;
        Ok(Observation::Workloads(
            pods.items.iter().map(workload_signal).collect(),
        ))
    }
}

/// Readiness signal for one pod
pub fn workload_signal(pod: &Pod) -> WorkloadSignal {
    let containers = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|cs| ContainerSignal {
                    name: cs.name.clone(),
                    ready: cs.ready,
                    waiting_reason: cs
                        .state
                        .as_ref()
                        .and_then(|st| st.waiting.as_ref())
                        .and_then(|w| w.reason.clone()),
                })
                .collect()
        })
        .unwrap_or_default();

    WorkloadSignal {
        pod: pod.name_any(),
        containers,
    }
}

// =============================================================================
// Chain
// =============================================================================

/// Release status first, workload readiness as fallback
#[derive(Clone)]
pub struct ObserverChain {
    release: Arc<dyn ClusterObserver>,
    workloads: Arc<dyn ClusterObserver>,
}

impl ObserverChain {
    /// Compose the two observers
    pub fn new(release: Arc<dyn ClusterObserver>, workloads: Arc<dyn ClusterObserver>) -> Self {
        Self { release, workloads }
    }

    /// Chain over the real cluster observers
    pub fn for_client(client: Client, scope_workloads_to_release: bool) -> Self {
        Self::new(
            Arc::new(ReleaseStatusObserver::new(client.clone())),
            Arc::new(
                WorkloadReadinessObserver::new(client).scoped_to_release(scope_workloads_to_release),
            ),
        )
    }

    /// Observe the target.
    ///
    /// An error from the release observer is returned as-is. A failed
    /// workload query is folded into [`WorkloadReport::Unavailable`].
    pub async fn observe(&self, target: &ObserveTarget) -> Result<ClusterObservation, Error> {
        match self.release.observe(target).await? {
            Observation::Conditions(conditions) if !conditions.is_empty() => {
                return Ok(ClusterObservation {
                    conditions,
                    workloads: WorkloadReport::NotQueried,
                });
            }
            Observation::Workloads(workloads) => {
                return Ok(ClusterObservation {
                    conditions: Vec::new(),
                    workloads: WorkloadReport::Observed(workloads),
                });
            }
            Observation::Conditions(_) | Observation::NotObserved => {}
        }

        let workloads = match self.workloads.observe(target).await {
            Ok(Observation::Workloads(workloads)) => WorkloadReport::Observed(workloads),
            Ok(Observation::Conditions(_)) | Ok(Observation::NotObserved) => {
                WorkloadReport::Observed(Vec::new())
            }
            Err(e) => {
                warn!(
                    release = %target.release_name,
                    namespace = %target.namespace,
                    error = %e,
                    "Workload readiness unavailable"
                );
                WorkloadReport::Unavailable(e.to_string())
            }
        };

        Ok(ClusterObservation {
            conditions: Vec::new(),
            workloads,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::ConditionStatus;
    use k8s_openapi::api::core::v1::{
        ContainerState, ContainerStateWaiting, ContainerStatus, PodStatus,
    };
    use kube::api::ObjectMeta;

    fn target() -> ObserveTarget {
        ObserveTarget {
            release_name: "acme".to_string(),
            namespace: "acme".to_string(),
        }
    }

    fn ready_true() -> Vec<Condition> {
        vec![Condition::new("Ready", ConditionStatus::True, "InstallSucceeded", "ok")]
    }

    fn chain(release: MockClusterObserver, workloads: MockClusterObserver) -> ObserverChain {
        ObserverChain::new(Arc::new(release), Arc::new(workloads))
    }

    fn pod(name: &str, statuses: Option<Vec<ContainerStatus>>) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                container_statuses: statuses,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn container_status(ready: bool, waiting: Option<&str>) -> ContainerStatus {
        ContainerStatus {
            name: "backend".to_string(),
            ready,
            state: waiting.map(|reason| ContainerState {
                waiting: Some(ContainerStateWaiting {
                    reason: Some(reason.to_string()),
                    message: None,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Story: a release that reports conditions is classified from them and
    /// the workload observer is never asked
    #[tokio::test]
    async fn story_release_conditions_win() {
        let mut release = MockClusterObserver::new();
        release
            .expect_observe()
            .returning(|_| Ok(Observation::Conditions(ready_true())));
        let mut workloads = MockClusterObserver::new();
        workloads.expect_observe().never();

        let observation = chain(release, workloads).observe(&target()).await.unwrap();
        assert_eq!(observation.workloads, WorkloadReport::NotQueried);
        assert_eq!(observation.classify(), DomainStatus::Active);
    }

    /// Story: a release that does not exist yet falls back to the pods in
    /// the namespace
    #[tokio::test]
    async fn story_missing_release_falls_back_to_workloads() {
        let mut release = MockClusterObserver::new();
        release.expect_observe().returning(|_| Ok(Observation::NotObserved));
        let mut workloads = MockClusterObserver::new();
        workloads.expect_observe().times(1).returning(|_| {
            Ok(Observation::Workloads(vec![WorkloadSignal {
                pod: "acme-backend".to_string(),
                containers: vec![ContainerSignal {
                    name: "backend".to_string(),
                    ready: false,
                    waiting_reason: Some("ImagePullBackOff".to_string()),
                }],
            }]))
        });

        let observation = chain(release, workloads).observe(&target()).await.unwrap();
        assert!(observation.conditions.is_empty());
        assert_eq!(observation.classify(), DomainStatus::Error);
    }

    #[tokio::test]
    async fn failed_workload_query_is_unavailable() {
        let mut release = MockClusterObserver::new();
        release.expect_observe().returning(|_| Ok(Observation::NotObserved));
        let mut workloads = MockClusterObserver::new();
        workloads
            .expect_observe()
            .returning(|_| Err(Error::internal_with_context("observer", "connection refused")));

        let observation = chain(release, workloads).observe(&target()).await.unwrap();
        assert!(matches!(observation.workloads, WorkloadReport::Unavailable(_)));
        assert_eq!(observation.classify(), DomainStatus::Error);
    }

    #[tokio::test]
    async fn release_observer_error_is_returned() {
        let mut release = MockClusterObserver::new();
        release
            .expect_observe()
            .returning(|_| Err(Error::internal_with_context("observer", "api unavailable")));
        let mut workloads = MockClusterObserver::new();
        workloads.expect_observe().never();

        let result = chain(release, workloads).observe(&target()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_namespace_is_pending() {
        let mut release = MockClusterObserver::new();
        release.expect_observe().returning(|_| Ok(Observation::NotObserved));
        let mut workloads = MockClusterObserver::new();
        workloads
            .expect_observe()
            .returning(|_| Ok(Observation::Workloads(vec![])));

        let observation = chain(release, workloads).observe(&target()).await.unwrap();
        assert_eq!(observation.classify(), DomainStatus::Pending);
    }

    #[test]
    fn pod_signals_carry_waiting_reasons() {
        let signal = workload_signal(&pod(
            "acme-backend-0",
            Some(vec![
                container_status(true, None),
                container_status(false, Some("CrashLoopBackOff")),
            ]),
        ));
        assert_eq!(signal.pod, "acme-backend-0");
        assert_eq!(signal.containers.len(), 2);
        assert!(!signal.is_ready());
        assert_eq!(signal.terminal_waiting_reason(), Some("CrashLoopBackOff"));
    }

    #[test]
    fn pod_without_statuses_has_no_containers() {
        let signal = workload_signal(&pod("acme-frontend-0", None));
        assert!(signal.containers.is_empty());
        assert!(!signal.is_ready());
    }

    #[test]
    fn target_follows_tenant_scope() {
        use crate::tenant::{OrganizationRef, TenantScope, Version};
        use chrono::Utc;

        let restaurant = Tenant {
            id: 1,
            name: "pizza".to_string(),
            scope: TenantScope::Restaurant {
                organization: OrganizationRef {
                    id: 9,
                    name: "acme".to_string(),
                },
            },
            version: Version::parse("0.0.1").unwrap(),
            status: DomainStatus::Pending,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let target = ObserveTarget::for_tenant(&restaurant);
        assert_eq!(target.release_name, "restaurant-pizza");
        assert_eq!(target.namespace, "acme");
    }
}
