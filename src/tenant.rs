//! Tenant records as the provisioner sees them
//!
//! Organizations and restaurants are structurally identical for provisioning
//! and reconciliation. The only difference is scope: an organization owns its
//! namespace, a restaurant lives in its owning organization's namespace.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Error;

/// Default declared version for a new organization
pub const DEFAULT_ORGANIZATION_VERSION: &str = "1.0.0";

/// Default declared version for a new restaurant
pub const DEFAULT_RESTAURANT_VERSION: &str = "0.0.1";

/// Prefix for restaurant HelmRelease names
pub const RESTAURANT_RELEASE_PREFIX: &str = "restaurant-";

static SEMVER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(0|[1-9]\d*)\.(0|[1-9]\d*)\.(0|[1-9]\d*)$").expect("semver pattern is valid")
});

static DNS_LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$").expect("dns label pattern is valid")
});

// =============================================================================
// DomainStatus
// =============================================================================

/// Persisted lifecycle status of a tenant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainStatus {
    /// Created or rolling out, not yet observed ready
    #[default]
    Pending,
    /// Deployment observed ready
    Active,
    /// Administratively suspended; never produced by reconciliation
    Suspended,
    /// Provisioning or rollout failed
    Error,
    /// Explicitly removed; terminal
    Deleted,
}

impl DomainStatus {
    /// Lowercase wire/database representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Error => "error",
            Self::Deleted => "deleted",
        }
    }

    /// Deleted is the only terminal status
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl fmt::Display for DomainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DomainStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "error" => Ok(Self::Error),
            "deleted" => Ok(Self::Deleted),
            other => Err(Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "status",
                format!("unknown status '{}'", other),
            )),
        }
    }
}

// =============================================================================
// Version
// =============================================================================

/// Declared release version, always `MAJOR.MINOR.PATCH` without leading zeros
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version(String);

impl Version {
    /// Parse and validate a version string
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let trimmed = raw.trim();
        if SEMVER_RE.is_match(trimmed) {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(Error::validation_for_field(
                crate::error::UNKNOWN_CONTEXT,
                "version",
                format!(
                    "'{}' is not a MAJOR.MINOR.PATCH version without leading zeros",
                    raw
                ),
            ))
        }
    }

    /// The version as an image tag
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.0
    }
}

// =============================================================================
// Tenant identity
// =============================================================================

/// Which table/scope a tenant belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantKind {
    /// Top-level tenant, owns a namespace
    Organization,
    /// Nested tenant, deployed into its organization's namespace
    Restaurant,
}

impl TenantKind {
    /// Singular lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Organization => "organization",
            Self::Restaurant => "restaurant",
        }
    }

    /// Version a new tenant of this kind gets when none is supplied
    pub fn default_version(&self) -> Version {
        let raw = match self {
            Self::Organization => DEFAULT_ORGANIZATION_VERSION,
            Self::Restaurant => DEFAULT_RESTAURANT_VERSION,
        };
        Version(raw.to_string())
    }
}

impl fmt::Display for TenantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary key of a tenant record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TenantKey {
    /// Record kind
    pub kind: TenantKind,
    /// Row id within that kind
    pub id: i64,
}

impl TenantKey {
    /// Key for an organization row
    pub fn organization(id: i64) -> Self {
        Self {
            kind: TenantKind::Organization,
            id,
        }
    }

    /// Key for a restaurant row
    pub fn restaurant(id: i64) -> Self {
        Self {
            kind: TenantKind::Restaurant,
            id,
        }
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Owning organization of a restaurant
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationRef {
    /// Organization row id
    pub id: i64,
    /// Organization name, which is also the restaurant's namespace
    pub name: String,
}

/// Where a tenant sits in the ownership tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TenantScope {
    /// Top-level organization
    Organization,
    /// Restaurant owned by exactly one organization
    Restaurant {
        /// The owning organization
        organization: OrganizationRef,
    },
}

// =============================================================================
// Tenant
// =============================================================================

/// A persisted organization or restaurant
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tenant {
    /// Row id
    pub id: i64,
    /// Tenant name, unique among non-deleted siblings
    pub name: String,
    /// Ownership scope
    pub scope: TenantScope,
    /// Declared desired version
    pub version: Version,
    /// Observed or attempted status
    pub status: DomainStatus,
    /// Soft-delete flag
    pub is_deleted: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Tenant {
    /// Record kind
    pub fn kind(&self) -> TenantKind {
        match self.scope {
            TenantScope::Organization => TenantKind::Organization,
            TenantScope::Restaurant { .. } => TenantKind::Restaurant,
        }
    }

    /// Primary key
    pub fn key(&self) -> TenantKey {
        TenantKey {
            kind: self.kind(),
            id: self.id,
        }
    }

    /// Namespace the tenant's release lives in
    pub fn namespace(&self) -> &str {
        match &self.scope {
            TenantScope::Organization => &self.name,
            TenantScope::Restaurant { organization } => &organization.name,
        }
    }

    /// Name of the tenant's HelmRelease
    pub fn release_name(&self) -> String {
        match self.scope {
            TenantScope::Organization => self.name.clone(),
            TenantScope::Restaurant { .. } => {
                format!("{}{}", RESTAURANT_RELEASE_PREFIX, self.name)
            }
        }
    }

    /// Deleted tenants are excluded from reconciliation and rollouts
    pub fn is_live(&self) -> bool {
        !self.is_deleted && !self.status.is_terminal()
    }
}

/// Input for inserting a tenant row
#[derive(Clone, Debug, PartialEq)]
pub struct NewTenant {
    /// Tenant name
    pub name: String,
    /// Ownership scope
    pub scope: TenantScope,
    /// Declared version
    pub version: Version,
    /// Initial status (always `pending` from the service layer)
    pub status: DomainStatus,
}

/// Validate a tenant name for use as a namespace or release name.
///
/// Names must be DNS-1123 labels. Restaurant release names carry an extra
/// prefix, so the budget for them is shorter.
pub fn validate_tenant_name(kind: TenantKind, name: &str) -> Result<(), Error> {
    let max_len = match kind {
        TenantKind::Organization => 63,
        TenantKind::Restaurant => 63 - RESTAURANT_RELEASE_PREFIX.len(),
    };

    if name.is_empty() {
        return Err(Error::validation_for_field(name, "name", "name must not be empty"));
    }
    if name.len() > max_len {
        return Err(Error::validation_for_field(
            name,
            "name",
            format!("{} name must be at most {} characters", kind, max_len),
        ));
    }
    if !DNS_LABEL_RE.is_match(name) {
        return Err(Error::validation_for_field(
            name,
            "name",
            "name must consist of lowercase alphanumerics and '-', starting and ending with an alphanumeric",
        ));
    }
    Ok(())
}
