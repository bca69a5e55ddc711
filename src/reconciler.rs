//! Status reconciliation
//!
//! A pass observes every live tenant in a batch, classifies what the cluster
//! reports and persists the statuses that changed with a single store
//! commit. Observations run concurrently; one tenant's failure never blocks
//! the others.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::observer::{ObserveTarget, ObserverChain};
use crate::store::{StatusMutation, TenantStore};
use crate::tenant::{DomainStatus, Tenant};
use crate::Error;

/// Counters for one reconcile pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Tenants observed
    pub examined: usize,
    /// Tenants whose status changed
    pub changed: usize,
    /// Tenants whose observation failed; their status was left alone
    pub failed: usize,
    /// Deleted or unnamed tenants that were not observed
    pub skipped: usize,
}

/// Mirrors cluster state into tenant statuses
pub struct StatusReconciler {
    observers: ObserverChain,
    store: Arc<dyn TenantStore>,
    concurrency: usize,
}

impl StatusReconciler {
    /// Create a reconciler observing up to `concurrency` tenants at once
    pub fn new(observers: ObserverChain, store: Arc<dyn TenantStore>, concurrency: usize) -> Self {
        Self {
            observers,
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Reconcile a batch in place.
    ///
    /// Records in `tenants` are updated to the statuses that were committed.
    /// Only a failed store commit is returned as an error; observation
    /// failures are counted in the report.
    #[instrument(skip(self, tenants), fields(batch = tenants.len()))]
    pub async fn reconcile(&self, tenants: &mut [Tenant]) -> Result<ReconcileReport, Error> {
        let mut report = ReconcileReport::default();

        let targets: Vec<(usize, ObserveTarget)> = tenants
            .iter()
            .enumerate()
            .filter(|(_, t)| t.is_live() && !t.name.trim().is_empty())
            .map(|(idx, t)| (idx, ObserveTarget::for_tenant(t)))
            .collect();
        report.skipped = tenants.len() - targets.len();
        report.examined = targets.len();

        let observers = &self.observers;
        let results: Vec<(usize, Result<DomainStatus, Error>)> = stream::iter(targets)
            .map(|(idx, target)| async move {
                let status = observers.observe(&target).await.map(|o| o.classify());
                (idx, status)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut mutations = Vec::new();
        for (idx, result) in results {
            let tenant = &tenants[idx];
            match result {
                Ok(status) if status != tenant.status => {
                    debug!(tenant = %tenant.key(), from = %tenant.status, to = %status, "Status changed");
                    mutations.push(StatusMutation {
                        key: tenant.key(),
                        from: tenant.status,
                        to: status,
                    });
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        tenant = %tenant.key(),
                        name = %tenant.name,
                        error = %e,
                        "Observation failed, keeping previous status"
                    );
                    report.failed += 1;
                }
            }
        }

        if mutations.is_empty() {
            debug!(?report, "No status changes");
            return Ok(report);
        }

        self.store.commit_statuses(&mutations).await?;

        for mutation in &mutations {
            if let Some(tenant) = tenants.iter_mut().find(|t| t.key() == mutation.key) {
                tenant.status = mutation.to;
            }
        }
        report.changed = mutations.len();

        info!(
            examined = report.examined,
            changed = report.changed,
            failed = report.failed,
            skipped = report.skipped,
            "Reconciled tenant statuses"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{Condition, ConditionStatus};
    use crate::observer::{MockClusterObserver, Observation};
    use crate::status::{ContainerSignal, WorkloadSignal};
    use crate::store::MockTenantStore;
    use crate::tenant::{TenantScope, Version};
    use chrono::Utc;
    use std::sync::Mutex;

    fn org(id: i64, name: &str, status: DomainStatus) -> Tenant {
        Tenant {
            id,
            name: name.to_string(),
            scope: TenantScope::Organization,
            version: Version::parse("1.0.0").unwrap(),
            status,
            is_deleted: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn ready(status: ConditionStatus, reason: &str) -> Observation {
        Observation::Conditions(vec![Condition::new("Ready", status, reason, "")])
    }

    /// Release observer answering per release name
    fn release_observer(answers: Vec<(&'static str, Result<Observation, ()>)>) -> MockClusterObserver {
        let mut mock = MockClusterObserver::new();
        mock.expect_observe().returning(move |target| {
            match answers.iter().find(|(name, _)| *name == target.release_name) {
                Some((_, Ok(obs))) => Ok(obs.clone()),
                Some((_, Err(()))) => Err(Error::internal_with_context("observer", "api unavailable")),
                None => Ok(Observation::NotObserved),
            }
        });
        mock
    }

    fn empty_workloads() -> MockClusterObserver {
        let mut mock = MockClusterObserver::new();
        mock.expect_observe()
            .returning(|_| Ok(Observation::Workloads(vec![])));
        mock
    }

    fn chain(release: MockClusterObserver, workloads: MockClusterObserver) -> ObserverChain {
        ObserverChain::new(Arc::new(release), Arc::new(workloads))
    }

    fn recording_store() -> (MockTenantStore, Arc<Mutex<Vec<Vec<StatusMutation>>>>) {
        let commits: Arc<Mutex<Vec<Vec<StatusMutation>>>> = Arc::new(Mutex::new(Vec::new()));
        let commits_clone = commits.clone();
        let mut store = MockTenantStore::new();
        store.expect_commit_statuses().returning(move |mutations| {
            commits_clone.lock().unwrap().push(mutations.to_vec());
            Ok(mutations.len())
        });
        (store, commits)
    }

    /// Story: a batch with mixed outcomes commits once and refreshes the
    /// in-memory records
    #[tokio::test]
    async fn story_batch_commits_changes_once() {
        let release = release_observer(vec![
            ("acme", Ok(ready(ConditionStatus::True, "InstallSucceeded"))),
            ("globex", Ok(ready(ConditionStatus::False, "InstallFailed"))),
            ("initech", Ok(ready(ConditionStatus::Unknown, "Progressing"))),
        ]);
        let (store, commits) = recording_store();
        let reconciler = StatusReconciler::new(chain(release, empty_workloads()), Arc::new(store), 4);

        let mut tenants = vec![
            org(1, "acme", DomainStatus::Pending),
            org(2, "globex", DomainStatus::Pending),
            org(3, "initech", DomainStatus::Pending),
        ];
        let report = reconciler.reconcile(&mut tenants).await.unwrap();

        assert_eq!(report.examined, 3);
        assert_eq!(report.changed, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(tenants[0].status, DomainStatus::Active);
        assert_eq!(tenants[1].status, DomainStatus::Error);
        assert_eq!(tenants[2].status, DomainStatus::Pending);

        let commits = commits.lock().unwrap();
        assert_eq!(commits.len(), 1);
        let mut keys: Vec<_> = commits[0].iter().map(|m| m.key.id).collect();
        keys.sort();
        assert_eq!(keys, vec![1, 2]);
    }

    /// Story: one tenant's observation failure does not block its siblings
    #[tokio::test]
    async fn story_failure_is_isolated_to_one_tenant() {
        let release = release_observer(vec![
            ("acme", Ok(ready(ConditionStatus::True, "InstallSucceeded"))),
            ("globex", Err(())),
            ("initech", Ok(ready(ConditionStatus::True, "UpgradeSucceeded"))),
        ]);
        let (store, commits) = recording_store();
        let reconciler = StatusReconciler::new(chain(release, empty_workloads()), Arc::new(store), 8);

        let mut tenants = vec![
            org(1, "acme", DomainStatus::Pending),
            org(2, "globex", DomainStatus::Active),
            org(3, "initech", DomainStatus::Pending),
        ];
        let report = reconciler.reconcile(&mut tenants).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.changed, 2);
        assert_eq!(tenants[0].status, DomainStatus::Active);
        assert_eq!(tenants[1].status, DomainStatus::Active);
        assert_eq!(tenants[2].status, DomainStatus::Active);
        assert_eq!(commits.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unchanged_statuses_do_not_touch_the_store() {
        let release = release_observer(vec![(
            "acme",
            Ok(ready(ConditionStatus::True, "InstallSucceeded")),
        )]);
        let mut store = MockTenantStore::new();
        store.expect_commit_statuses().never();
        let reconciler = StatusReconciler::new(chain(release, empty_workloads()), Arc::new(store), 8);

        let mut tenants = vec![org(1, "acme", DomainStatus::Active)];
        let report = reconciler.reconcile(&mut tenants).await.unwrap();
        assert_eq!(report.changed, 0);
        assert_eq!(report.examined, 1);
    }

    #[tokio::test]
    async fn deleted_and_unnamed_tenants_are_never_observed() {
        let mut release = MockClusterObserver::new();
        release.expect_observe().never();
        let mut workloads = MockClusterObserver::new();
        workloads.expect_observe().never();
        let mut store = MockTenantStore::new();
        store.expect_commit_statuses().never();
        let reconciler = StatusReconciler::new(chain(release, workloads), Arc::new(store), 8);

        let mut deleted = org(1, "acme", DomainStatus::Deleted);
        deleted.is_deleted = true;
        let mut tenants = vec![deleted, org(2, "", DomainStatus::Pending)];
        let report = reconciler.reconcile(&mut tenants).await.unwrap();

        assert_eq!(report.skipped, 2);
        assert_eq!(report.examined, 0);
        assert_eq!(tenants[0].status, DomainStatus::Deleted);
    }

    #[tokio::test]
    async fn workload_fallback_drives_status_when_release_is_missing() {
        let release = release_observer(vec![]);
        let mut workloads = MockClusterObserver::new();
        workloads.expect_observe().returning(|_| {
            Ok(Observation::Workloads(vec![WorkloadSignal {
                pod: "acme-backend".to_string(),
                containers: vec![ContainerSignal {
                    name: "backend".to_string(),
                    ready: true,
                    waiting_reason: None,
                }],
            }]))
        });
        let (store, _commits) = recording_store();
        let reconciler = StatusReconciler::new(chain(release, workloads), Arc::new(store), 8);

        let mut tenants = vec![org(1, "acme", DomainStatus::Pending)];
        reconciler.reconcile(&mut tenants).await.unwrap();
        assert_eq!(tenants[0].status, DomainStatus::Active);
    }

    #[tokio::test]
    async fn failed_commit_leaves_records_untouched() {
        let release = release_observer(vec![(
            "acme",
            Ok(ready(ConditionStatus::True, "InstallSucceeded")),
        )]);
        let mut store = MockTenantStore::new();
        store
            .expect_commit_statuses()
            .returning(|_| Err(Error::internal_with_context("store", "connection reset")));
        let reconciler = StatusReconciler::new(chain(release, empty_workloads()), Arc::new(store), 8);

        let mut tenants = vec![org(1, "acme", DomainStatus::Pending)];
        assert!(reconciler.reconcile(&mut tenants).await.is_err());
        assert_eq!(tenants[0].status, DomainStatus::Pending);
    }
}
