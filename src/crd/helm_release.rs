//! Flux HelmRelease custom resource (`helm.toolkit.fluxcd.io/v2`)
//!
//! Only the fields the provisioner writes or reads are modelled. Chart values
//! stay an untyped JSON object because each chart defines its own schema.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::Condition;

/// API group of the Flux helm-controller
pub const HELM_RELEASE_GROUP: &str = "helm.toolkit.fluxcd.io";

/// Served API version
pub const HELM_RELEASE_VERSION: &str = "v2";

/// Desired Helm installation reconciled by Flux
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "helm.toolkit.fluxcd.io",
    version = "v2",
    kind = "HelmRelease",
    plural = "helmreleases",
    shortname = "hr",
    status = "HelmReleaseStatus",
    namespaced,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseSpec {
    /// How often Flux reconciles the release (e.g. "5m")
    pub interval: String,

    /// Helm release name, defaults to `<namespace>-<name>` in Flux when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,

    /// Chart template to install
    pub chart: HelmChartTemplate,

    /// Install behaviour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallSpec>,

    /// Upgrade behaviour
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade: Option<UpgradeSpec>,

    /// Chart values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values: Option<serde_json::Value>,
}

/// Wrapper matching Flux's `spec.chart.spec` nesting
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct HelmChartTemplate {
    /// Chart coordinates
    pub spec: HelmChartTemplateSpec,
}

/// Chart path and the source it is fetched from
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmChartTemplateSpec {
    /// Chart name or path within the source
    pub chart: String,

    /// Source object holding the chart
    pub source_ref: CrossNamespaceObjectReference,
}

/// Reference to a Flux source object, possibly in another namespace
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct CrossNamespaceObjectReference {
    /// Source kind (GitRepository, HelmRepository, Bucket)
    pub kind: String,
    /// Source name
    pub name: String,
    /// Source namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// `spec.install`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct InstallSpec {
    /// Failure remediation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
}

/// `spec.upgrade`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct UpgradeSpec {
    /// Failure remediation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
}

/// Retry budget Flux spends before giving up on an install/upgrade
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Remediation {
    /// Number of retries
    pub retries: i64,
}

/// Status reported by the helm-controller
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelmReleaseStatus {
    /// Current conditions (Ready, Released, TestSuccess, Remediated, ...)
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Last generation the controller acted on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Chart version of the last attempted release
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempted_revision: Option<String>,

    /// Consecutive install failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install_failures: Option<i64>,

    /// Consecutive upgrade failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upgrade_failures: Option<i64>,
}

impl HelmRelease {
    /// Conditions from the status, empty when no status was reported yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }
}
