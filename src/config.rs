//! Runtime configuration
//!
//! Every setting can come from a flag or an environment variable. Defaults
//! target a local minikube/kind cluster with Flux installed in `flux-system`.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::tenant::TenantKind;

/// Default ingress base domain
pub const DEFAULT_BASE_DOMAIN: &str = "127.0.0.1.nip.io";
/// Default Flux source kind
pub const DEFAULT_SOURCE_KIND: &str = "GitRepository";
/// Default namespace holding the Flux sources
pub const DEFAULT_SOURCE_NAMESPACE: &str = "flux-system";
/// Default organization chart path within its source
pub const DEFAULT_ORGANIZATION_CHART: &str = "charts/org-stack";
/// Default organization source name
pub const DEFAULT_ORGANIZATION_SOURCE: &str = "org-stack";
/// Default restaurant chart path within its source
pub const DEFAULT_RESTAURANT_CHART: &str = "charts/restaurant-stack";
/// Default restaurant source name
pub const DEFAULT_RESTAURANT_SOURCE: &str = "restaurant-stack";
/// Default organization backend image repository
pub const DEFAULT_ORGANIZATION_BACKEND_IMAGE: &str = "ghcr.io/zdravkobonev/organization-be";
/// Default organization frontend image repository
pub const DEFAULT_ORGANIZATION_FRONTEND_IMAGE: &str = "ghcr.io/zdravkobonev/organization-fe";
/// Default restaurant backend image repository
pub const DEFAULT_RESTAURANT_BACKEND_IMAGE: &str = "ghcr.io/zdravkobonev/restaurant-be";
/// Default restaurant frontend image repository
pub const DEFAULT_RESTAURANT_FRONTEND_IMAGE: &str = "ghcr.io/zdravkobonev/restaurant-fe";
/// Default Flux reconciliation interval for each HelmRelease
pub const DEFAULT_RELEASE_INTERVAL: &str = "5m";
/// Default install/upgrade remediation retries
pub const DEFAULT_REMEDIATION_RETRIES: i64 = 3;
/// Default deadline for a single apply call, in seconds
pub const DEFAULT_APPLY_TIMEOUT_SECS: u64 = 30;
/// Default number of tenants observed concurrently during a reconcile pass
pub const DEFAULT_RECONCILE_CONCURRENCY: usize = 8;

/// Provisioning and reconciliation settings
#[derive(Args, Clone, Debug, PartialEq)]
pub struct ProvisionerConfig {
    /// Base domain passed to charts as `ingress.baseDomain`
    #[arg(long, env = "BASE_DOMAIN", default_value = DEFAULT_BASE_DOMAIN)]
    pub base_domain: String,

    /// Kind of the Flux source objects
    #[arg(long, env = "FLUX_SOURCE_KIND", default_value = DEFAULT_SOURCE_KIND)]
    pub flux_source_kind: String,

    /// Namespace of the Flux source objects
    #[arg(long, env = "FLUX_SOURCE_NAMESPACE", default_value = DEFAULT_SOURCE_NAMESPACE)]
    pub flux_source_namespace: String,

    /// Flux source holding the organization chart
    #[arg(long, env = "FLUX_SOURCE_NAME", default_value = DEFAULT_ORGANIZATION_SOURCE)]
    pub organization_source_name: String,

    /// Path of the organization chart inside its source
    #[arg(long, env = "CHART_PATH", default_value = DEFAULT_ORGANIZATION_CHART)]
    pub organization_chart_path: String,

    /// Flux source holding the restaurant chart
    #[arg(long, env = "RESTAURANT_SOURCE_NAME", default_value = DEFAULT_RESTAURANT_SOURCE)]
    pub restaurant_source_name: String,

    /// Path of the restaurant chart inside its source
    #[arg(long, env = "RESTAURANT_CHART_PATH", default_value = DEFAULT_RESTAURANT_CHART)]
    pub restaurant_chart_path: String,

    /// Organization backend image repository
    #[arg(long, env = "ORGANIZATION_BACKEND_IMAGE", default_value = DEFAULT_ORGANIZATION_BACKEND_IMAGE)]
    pub organization_backend_image: String,

    /// Organization frontend image repository
    #[arg(long, env = "ORGANIZATION_FRONTEND_IMAGE", default_value = DEFAULT_ORGANIZATION_FRONTEND_IMAGE)]
    pub organization_frontend_image: String,

    /// Restaurant backend image repository
    #[arg(long, env = "RESTAURANT_BACKEND_IMAGE", default_value = DEFAULT_RESTAURANT_BACKEND_IMAGE)]
    pub restaurant_backend_image: String,

    /// Restaurant frontend image repository
    #[arg(long, env = "RESTAURANT_FRONTEND_IMAGE", default_value = DEFAULT_RESTAURANT_FRONTEND_IMAGE)]
    pub restaurant_frontend_image: String,

    /// Flux reconciliation interval written into every HelmRelease
    #[arg(long, env = "RELEASE_INTERVAL", default_value = DEFAULT_RELEASE_INTERVAL)]
    pub release_interval: String,

    /// Install/upgrade remediation retries written into every HelmRelease
    #[arg(long, env = "REMEDIATION_RETRIES", default_value_t = DEFAULT_REMEDIATION_RETRIES)]
    pub remediation_retries: i64,

    /// Deadline for one namespace/HelmRelease apply, in seconds
    #[arg(
        long,
        env = "APPLY_TIMEOUT_SECS",
        default_value_t = DEFAULT_APPLY_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub apply_timeout_secs: u64,

    /// Tenants observed concurrently during one reconcile pass
    #[arg(long, env = "RECONCILE_CONCURRENCY", default_value_t = DEFAULT_RECONCILE_CONCURRENCY)]
    pub reconcile_concurrency: usize,

    /// Only count pods labelled with the tenant's release as its workloads
    #[arg(long, env = "SCOPE_WORKLOADS_TO_RELEASE")]
    pub scope_workloads_to_release: bool,
}

impl Default for ProvisionerConfig {
    fn default() -> Self {
        Self {
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            flux_source_kind: DEFAULT_SOURCE_KIND.to_string(),
            flux_source_namespace: DEFAULT_SOURCE_NAMESPACE.to_string(),
            organization_source_name: DEFAULT_ORGANIZATION_SOURCE.to_string(),
            organization_chart_path: DEFAULT_ORGANIZATION_CHART.to_string(),
            restaurant_source_name: DEFAULT_RESTAURANT_SOURCE.to_string(),
            restaurant_chart_path: DEFAULT_RESTAURANT_CHART.to_string(),
            organization_backend_image: DEFAULT_ORGANIZATION_BACKEND_IMAGE.to_string(),
            organization_frontend_image: DEFAULT_ORGANIZATION_FRONTEND_IMAGE.to_string(),
            restaurant_backend_image: DEFAULT_RESTAURANT_BACKEND_IMAGE.to_string(),
            restaurant_frontend_image: DEFAULT_RESTAURANT_FRONTEND_IMAGE.to_string(),
            release_interval: DEFAULT_RELEASE_INTERVAL.to_string(),
            remediation_retries: DEFAULT_REMEDIATION_RETRIES,
            apply_timeout_secs: DEFAULT_APPLY_TIMEOUT_SECS,
            reconcile_concurrency: DEFAULT_RECONCILE_CONCURRENCY,
            scope_workloads_to_release: false,
        }
    }
}

/// Chart coordinates and image repositories for one tenant kind
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartSettings {
    /// Chart path inside the source
    pub chart_path: String,
    /// Flux source kind
    pub source_kind: String,
    /// Flux source name
    pub source_name: String,
    /// Flux source namespace
    pub source_namespace: String,
    /// Backend image repository
    pub backend_repository: String,
    /// Frontend image repository
    pub frontend_repository: String,
}

impl ProvisionerConfig {
    /// Chart settings for a tenant kind
    pub fn chart_for(&self, kind: TenantKind) -> ChartSettings {
        let (chart_path, source_name, backend, frontend) = match kind {
            TenantKind::Organization => (
                &self.organization_chart_path,
                &self.organization_source_name,
                &self.organization_backend_image,
                &self.organization_frontend_image,
            ),
            TenantKind::Restaurant => (
                &self.restaurant_chart_path,
                &self.restaurant_source_name,
                &self.restaurant_backend_image,
                &self.restaurant_frontend_image,
            ),
        };
        ChartSettings {
            chart_path: chart_path.clone(),
            source_kind: self.flux_source_kind.clone(),
            source_name: source_name.clone(),
            source_namespace: self.flux_source_namespace.clone(),
            backend_repository: backend.clone(),
            frontend_repository: frontend.clone(),
        }
    }

    /// Deadline for a single apply call
    pub fn apply_timeout(&self) -> Duration {
        Duration::from_secs(self.apply_timeout_secs)
    }

    /// Concurrency for reconcile passes, never zero
    pub fn concurrency(&self) -> usize {
        self.reconcile_concurrency.max(1)
    }
}

/// Cluster connection settings
#[derive(Args, Clone, Debug, Default)]
pub struct ClusterArgs {
    /// Path to a kubeconfig; falls back to in-cluster config or ~/.kube/config
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,
}

/// Tenant database settings
#[derive(Args, Clone, Debug)]
pub struct DatabaseArgs {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: String,

    /// Maximum pooled connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    pub database_max_connections: u32,
}
