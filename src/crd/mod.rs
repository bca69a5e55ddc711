//! Custom resource types consumed by the provisioner
//!
//! The provisioner does not own any CRD. It writes Flux `HelmRelease` objects
//! and reads back their status conditions.

mod helm_release;
mod types;

pub use helm_release::{
    CrossNamespaceObjectReference, HelmChartTemplate, HelmChartTemplateSpec, HelmRelease,
    HelmReleaseSpec, HelmReleaseStatus, InstallSpec, Remediation, UpgradeSpec,
    HELM_RELEASE_GROUP, HELM_RELEASE_VERSION,
};
pub use types::{Condition, ConditionStatus};
