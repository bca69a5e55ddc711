//! Rollouts
//!
//! A rollout pushes a tenant's declared version to the cluster. The tenant is
//! marked `pending` first; if the apply fails it is marked `error` and the
//! failure is returned. The declared version is never rolled back, so a
//! failed rollout leaves the new version with an `error` status.

use std::future::Future;
use std::sync::Arc;

use tracing::{error, info, instrument, warn};

use crate::config::ProvisionerConfig;
use crate::descriptor::DeploymentDescriptor;
use crate::provisioner::{ApplyOutcome, DescriptorClient};
use crate::store::TenantStore;
use crate::tenant::{DomainStatus, Tenant};
use crate::Error;

/// Applies tenants' descriptors and records the outcome in their status
pub struct RolloutTrigger {
    client: Arc<dyn DescriptorClient>,
    store: Arc<dyn TenantStore>,
    config: Arc<ProvisionerConfig>,
}

impl RolloutTrigger {
    /// Create a new trigger
    pub fn new(
        client: Arc<dyn DescriptorClient>,
        store: Arc<dyn TenantStore>,
        config: Arc<ProvisionerConfig>,
    ) -> Self {
        Self {
            client,
            store,
            config,
        }
    }

    /// Provision a newly created tenant: namespace, then HelmRelease
    #[instrument(skip(self, tenant), fields(tenant = %tenant.key(), name = %tenant.name))]
    pub async fn provision(&self, tenant: &mut Tenant) -> Result<ApplyOutcome, Error> {
        ensure_live(tenant)?;

        let namespace = tenant.namespace().to_string();
        let ensured = self
            .with_deadline(&tenant.name, self.client.ensure_namespace(&namespace))
            .await;
        if let Err(e) = ensured {
            return Err(self.fail(tenant, e).await);
        }

        self.apply(tenant).await
    }

    /// Roll out the tenant's current declared version
    #[instrument(
        skip(self, tenant),
        fields(tenant = %tenant.key(), name = %tenant.name, version = %tenant.version)
    )]
    pub async fn trigger(&self, tenant: &mut Tenant) -> Result<ApplyOutcome, Error> {
        ensure_live(tenant)?;

        if tenant.status != DomainStatus::Pending {
            self.store
                .set_status(tenant.key(), DomainStatus::Pending)
                .await?;
            tenant.status = DomainStatus::Pending;
        }

        self.apply(tenant).await
    }

    async fn apply(&self, tenant: &mut Tenant) -> Result<ApplyOutcome, Error> {
        let descriptor = DeploymentDescriptor::for_tenant(tenant, &self.config);
        let applied = self
            .with_deadline(&tenant.name, self.client.apply_descriptor(&descriptor))
            .await;
        match applied {
            Ok(outcome) => {
                info!(
                    release = %descriptor.release_name,
                    namespace = %descriptor.namespace,
                    version = %tenant.version,
                    %outcome,
                    "Rollout started"
                );
                Ok(outcome)
            }
            Err(e) => Err(self.fail(tenant, e).await),
        }
    }

    async fn with_deadline<T>(
        &self,
        tenant: &str,
        call: impl Future<Output = Result<T, Error>>,
    ) -> Result<T, Error> {
        let deadline = self.config.apply_timeout();
        match tokio::time::timeout(deadline, call).await {
            Ok(result) => result,
            Err(_) => Err(Error::provisioning(
                tenant,
                format!("cluster apply timed out after {}s", deadline.as_secs()),
            )),
        }
    }

    /// Record `error` and turn the cause into a provisioning error
    async fn fail(&self, tenant: &mut Tenant, cause: Error) -> Error {
        error!(error = %cause, "Provisioning failed");

        if let Err(e) = self
            .store
            .set_status(tenant.key(), DomainStatus::Error)
            .await
        {
            warn!(error = %e, "Failed to record error status");
        }
        tenant.status = DomainStatus::Error;

        match cause {
            Error::Provisioning { .. } => cause,
            other => Error::provisioning(&tenant.name, other.to_string()),
        }
    }
}

fn ensure_live(tenant: &Tenant) -> Result<(), Error> {
    if tenant.is_live() {
        Ok(())
    } else {
        Err(Error::validation_for(
            &tenant.name,
            "deleted tenants cannot be provisioned",
        ))
    }
}
