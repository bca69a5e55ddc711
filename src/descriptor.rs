//! Deployment descriptors
//!
//! A [`DeploymentDescriptor`] is everything needed to render a tenant's Flux
//! `HelmRelease`. It is built from a tenant record plus [`ProvisionerConfig`]
//! and identified by `(release_name, namespace)`.

use kube::api::ObjectMeta;
use serde_json::json;

use crate::config::ProvisionerConfig;
use crate::crd::{
    CrossNamespaceObjectReference, HelmChartTemplate, HelmChartTemplateSpec, HelmRelease,
    HelmReleaseSpec, InstallSpec, Remediation, UpgradeSpec,
};
use crate::tenant::{Tenant, TenantKind, Version};
use crate::{Error, FIELD_MANAGER};

/// Label carrying the component that manages an object
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Flux source the chart is fetched from
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRef {
    /// Source kind (GitRepository, HelmRepository)
    pub kind: String,
    /// Source name
    pub name: String,
    /// Source namespace
    pub namespace: String,
}

/// Chart path plus its source
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChartRef {
    /// Chart path inside the source
    pub path: String,
    /// Source object
    pub source: SourceRef,
}

/// An image repository and the tag to deploy
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageRef {
    /// Repository without tag
    pub repository: String,
    /// Tag, always the tenant's declared version
    pub tag: String,
}

/// Desired HelmRelease for one tenant
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeploymentDescriptor {
    /// Tenant kind, which selects the values key
    pub kind: TenantKind,
    /// Tenant name as passed to the chart
    pub tenant_name: String,
    /// HelmRelease object name
    pub release_name: String,
    /// Namespace of the HelmRelease and the workloads
    pub namespace: String,
    /// Chart to install
    pub chart: ChartRef,
    /// Backend image
    pub backend: ImageRef,
    /// Frontend image
    pub frontend: ImageRef,
    /// Ingress base domain
    pub base_domain: String,
    /// Install/upgrade remediation retries
    pub remediation_retries: i64,
    /// Flux reconciliation interval
    pub interval: String,
}

impl DeploymentDescriptor {
    /// Descriptor for a tenant at its declared version
    pub fn for_tenant(tenant: &Tenant, config: &ProvisionerConfig) -> Self {
        Self::build(
            tenant.kind(),
            &tenant.name,
            tenant.namespace(),
            tenant.release_name(),
            &tenant.version,
            config,
        )
    }

    /// Descriptor for an organization that owns namespace `name`
    pub fn for_organization(name: &str, version: &Version, config: &ProvisionerConfig) -> Self {
        Self::build(
            TenantKind::Organization,
            name,
            name,
            name.to_string(),
            version,
            config,
        )
    }

    /// Descriptor for a restaurant deployed into its organization's namespace
    pub fn for_restaurant(
        organization: &str,
        name: &str,
        version: &Version,
        config: &ProvisionerConfig,
    ) -> Self {
        Self::build(
            TenantKind::Restaurant,
            name,
            organization,
            format!("{}{}", crate::tenant::RESTAURANT_RELEASE_PREFIX, name),
            version,
            config,
        )
    }

    fn build(
        kind: TenantKind,
        tenant_name: &str,
        namespace: &str,
        release_name: String,
        version: &Version,
        config: &ProvisionerConfig,
    ) -> Self {
        let chart = config.chart_for(kind);
        Self {
            kind,
            tenant_name: tenant_name.to_string(),
            release_name,
            namespace: namespace.to_string(),
            chart: ChartRef {
                path: chart.chart_path,
                source: SourceRef {
                    kind: chart.source_kind,
                    name: chart.source_name,
                    namespace: chart.source_namespace,
                },
            },
            backend: ImageRef {
                repository: chart.backend_repository,
                tag: version.to_string(),
            },
            frontend: ImageRef {
                repository: chart.frontend_repository,
                tag: version.to_string(),
            },
            base_domain: config.base_domain.clone(),
            remediation_retries: config.remediation_retries,
            interval: config.release_interval.clone(),
        }
    }

    /// Chart values key naming the tenant
    fn name_key(&self) -> &'static str {
        match self.kind {
            TenantKind::Organization => "orgName",
            TenantKind::Restaurant => "restaurantName",
        }
    }

    /// Render the full HelmRelease body
    ///
    /// Every call yields the complete declared state, so applying it with
    /// force ownership replaces whatever an earlier apply declared.
    pub fn to_helm_release(&self) -> HelmRelease {
        let remediation = Some(Remediation {
            retries: self.remediation_retries,
        });

        let values = json!({
            self.name_key(): self.tenant_name,
            "ingress": { "baseDomain": self.base_domain },
            "images": {
                "backend": {
                    "repository": self.backend.repository,
                    "tag": self.backend.tag,
                },
                "frontend": {
                    "repository": self.frontend.repository,
                    "tag": self.frontend.tag,
                },
            },
        });

        let spec = HelmReleaseSpec {
            interval: self.interval.clone(),
            release_name: match self.kind {
                TenantKind::Organization => None,
                TenantKind::Restaurant => Some(self.release_name.clone()),
            },
            chart: HelmChartTemplate {
                spec: HelmChartTemplateSpec {
                    chart: self.chart.path.clone(),
                    source_ref: CrossNamespaceObjectReference {
                        kind: self.chart.source.kind.clone(),
                        name: self.chart.source.name.clone(),
                        namespace: Some(self.chart.source.namespace.clone()),
                    },
                },
            },
            install: Some(InstallSpec {
                remediation: remediation.clone(),
            }),
            upgrade: Some(UpgradeSpec { remediation }),
            values: Some(values),
        };

        let mut hr = HelmRelease::new(&self.release_name, spec);
        hr.metadata = ObjectMeta {
            name: Some(self.release_name.clone()),
            namespace: Some(self.namespace.clone()),
            labels: Some(
                [(MANAGED_BY_LABEL.to_string(), FIELD_MANAGER.to_string())]
                    .into_iter()
                    .collect(),
            ),
            ..Default::default()
        };
        hr
    }

    /// Render the HelmRelease as YAML
    pub fn to_yaml(&self) -> Result<String, Error> {
        serde_yaml::to_string(&self.to_helm_release())
            .map_err(|e| Error::serialization_for_kind("HelmRelease", e.to_string()))
    }
}
