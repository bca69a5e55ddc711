//! Tenant operations
//!
//! [`TenantService`] is the surface the CRUD layer calls. It validates
//! requests, persists records through the [`TenantStore`] and hands cluster
//! work to the [`RolloutTrigger`] and [`StatusReconciler`].

use std::sync::Arc;

use tracing::{info, instrument};

use crate::config::ProvisionerConfig;
use crate::observer::ObserverChain;
use crate::provisioner::DescriptorClient;
use crate::reconciler::{ReconcileReport, StatusReconciler};
use crate::rollout::RolloutTrigger;
use crate::store::{ListFilter, TenantStore};
use crate::tenant::{
    validate_tenant_name, DomainStatus, NewTenant, OrganizationRef, Tenant, TenantKey,
    TenantKind, TenantScope, Version,
};
use crate::Error;

/// Fields a caller may send when updating a tenant
///
/// Only `version` may actually change. `name` and `status` are accepted so
/// that a client echoing the current record back does not fail, but a
/// different value is rejected.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TenantUpdate {
    /// Tenant name; immutable
    pub name: Option<String>,
    /// New declared version
    pub version: Option<Version>,
    /// Status; owned by reconciliation
    pub status: Option<DomainStatus>,
}

/// A listing together with the reconcile pass that refreshed it
#[derive(Clone, Debug, PartialEq)]
pub struct TenantListing {
    /// Tenants with freshly reconciled statuses
    pub tenants: Vec<Tenant>,
    /// What the reconcile pass did
    pub report: ReconcileReport,
}

/// Create, update, delete and list tenants
pub struct TenantService {
    store: Arc<dyn TenantStore>,
    rollout: RolloutTrigger,
    reconciler: StatusReconciler,
}

impl TenantService {
    /// Create a service from its parts
    pub fn new(
        store: Arc<dyn TenantStore>,
        rollout: RolloutTrigger,
        reconciler: StatusReconciler,
    ) -> Self {
        Self {
            store,
            rollout,
            reconciler,
        }
    }

    /// Wire a service from shared dependencies
    pub fn assemble(
        config: Arc<ProvisionerConfig>,
        store: Arc<dyn TenantStore>,
        client: Arc<dyn DescriptorClient>,
        observers: ObserverChain,
    ) -> Self {
        let concurrency = config.concurrency();
        Self::new(
            store.clone(),
            RolloutTrigger::new(client, store.clone(), config),
            StatusReconciler::new(observers, store, concurrency),
        )
    }

    /// Fetch a live tenant
    pub async fn get(&self, key: TenantKey) -> Result<Tenant, Error> {
        match self.store.get(key).await? {
            Some(t) if !t.is_deleted => Ok(t),
            _ => Err(Error::not_found(key.kind.as_str(), key.id)),
        }
    }

    /// Create an organization and provision its namespace and release
    ///
    /// The record is kept when provisioning fails; it is left in `error`
    /// and the provisioning error is returned.
    #[instrument(skip(self, version))]
    pub async fn create_organization(
        &self,
        name: &str,
        version: Option<Version>,
    ) -> Result<Tenant, Error> {
        validate_tenant_name(TenantKind::Organization, name)?;
        let mut tenant = self
            .store
            .insert(NewTenant {
                name: name.to_string(),
                scope: TenantScope::Organization,
                version: version.unwrap_or_else(|| TenantKind::Organization.default_version()),
                status: DomainStatus::Pending,
            })
            .await?;
        info!(tenant = %tenant.key(), version = %tenant.version, "Created organization");

        self.rollout.provision(&mut tenant).await?;
        Ok(tenant)
    }

    /// Create a restaurant under a live organization and provision it
    #[instrument(skip(self, version))]
    pub async fn create_restaurant(
        &self,
        organization_id: i64,
        name: &str,
        version: Option<Version>,
    ) -> Result<Tenant, Error> {
        let organization = self
            .get(TenantKey::organization(organization_id))
            .await?;
        validate_tenant_name(TenantKind::Restaurant, name)?;

        let mut tenant = self
            .store
            .insert(NewTenant {
                name: name.to_string(),
                scope: TenantScope::Restaurant {
                    organization: OrganizationRef {
                        id: organization.id,
                        name: organization.name,
                    },
                },
                version: version.unwrap_or_else(|| TenantKind::Restaurant.default_version()),
                status: DomainStatus::Pending,
            })
            .await?;
        info!(
            tenant = %tenant.key(),
            namespace = %tenant.namespace(),
            version = %tenant.version,
            "Created restaurant"
        );

        self.rollout.provision(&mut tenant).await?;
        Ok(tenant)
    }

    /// Apply an update; a version change starts a rollout
    #[instrument(skip(self, update), fields(tenant = %key))]
    pub async fn update(&self, key: TenantKey, update: TenantUpdate) -> Result<Tenant, Error> {
        let tenant = self
            .store
            .get(key)
            .await?
            .ok_or_else(|| Error::not_found(key.kind.as_str(), key.id))?;

        if tenant.is_deleted {
            return Err(Error::validation_for(
                &tenant.name,
                format!("{} is deleted", key.kind),
            ));
        }
        if let Some(name) = &update.name {
            if name != &tenant.name {
                return Err(Error::validation_for_field(
                    &tenant.name,
                    "name",
                    format!("{} name cannot be changed", key.kind),
                ));
            }
        }
        if let Some(status) = update.status {
            if status != tenant.status {
                return Err(Error::validation_for_field(
                    &tenant.name,
                    "status",
                    "status is managed by reconciliation and cannot be set",
                ));
            }
        }

        let version = match update.version {
            Some(v) if v != tenant.version => v,
            _ => return Ok(tenant),
        };

        info!(from = %tenant.version, to = %version, "Version changed, starting rollout");
        let mut tenant = self
            .store
            .update_version(key, &version, DomainStatus::Pending)
            .await?;
        self.rollout.trigger(&mut tenant).await?;
        Ok(tenant)
    }

    /// Soft-delete a tenant. Deleting twice is a no-op.
    ///
    /// Cluster objects are left in place.
    #[instrument(skip(self), fields(tenant = %key))]
    pub async fn delete(&self, key: TenantKey) -> Result<(), Error> {
        if self.store.mark_deleted(key).await? {
            info!("Deleted tenant");
        }
        Ok(())
    }

    /// List tenants and refresh their statuses from the cluster
    #[instrument(skip(self, filter))]
    pub async fn list(&self, kind: TenantKind, filter: &ListFilter) -> Result<TenantListing, Error> {
        let mut tenants = self.store.list(kind, filter).await?;
        let report = self.reconciler.reconcile(&mut tenants).await?;
        Ok(TenantListing { tenants, report })
    }
}
