//! Error types for the tenant provisioner
//!
//! Errors are structured with fields to aid debugging in production.
//! Variants carry the tenant name where one is known so that the CRUD layer
//! can turn them into user-facing messages without re-parsing strings.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for provisioning and reconciliation
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Persistence error from the tenant store
    #[error("store error: {source}")]
    Store {
        /// The underlying sqlx error
        #[from]
        source: sqlx::Error,
    },

    /// Validation error for a tenant request
    #[error("validation error for {tenant}: {message}")]
    Validation {
        /// Name of the tenant with invalid input
        tenant: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field (e.g., "version")
        field: Option<String>,
    },

    /// A sibling tenant already uses this name
    #[error("conflict for {tenant}: {message}")]
    Conflict {
        /// Name that collided
        tenant: String,
        /// Description of the conflict
        message: String,
    },

    /// Referenced record does not exist
    #[error("{kind} {id} not found")]
    NotFound {
        /// Record kind (organization, restaurant)
        kind: String,
        /// Record identifier
        id: String,
    },

    /// Applying the tenant's namespace or HelmRelease failed
    #[error("provisioning failed for {tenant}: {message}")]
    Provisioning {
        /// Name of the tenant being provisioned
        tenant: String,
        /// Description of what failed
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "observer")
        context: String,
    },
}

impl Error {
    /// Create a validation error without tenant context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            tenant: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with tenant context
    pub fn validation_for(tenant: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            tenant: tenant.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with tenant context and field name
    pub fn validation_for_field(
        tenant: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            tenant: tenant.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a name conflict error
    pub fn conflict(tenant: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Conflict {
            tenant: tenant.into(),
            message: msg.into(),
        }
    }

    /// Create a not-found error for a record kind and id
    pub fn not_found(kind: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.to_string(),
        }
    }

    /// Create a provisioning error for a tenant
    pub fn provisioning(tenant: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Provisioning {
            tenant: tenant.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Kubernetes 4xx responses (other than 429) are not retryable; connection
    /// failures, timeouts and 5xx responses are. Validation, conflict and
    /// not-found errors need a different request, not a retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => is_transient_kube_error(source),
            Error::Store { source } => matches!(
                source,
                sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
            ),
            Error::Validation { .. } => false,
            Error::Conflict { .. } => false,
            Error::NotFound { .. } => false,
            Error::Provisioning { .. } => true,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the tenant name if this error is associated with a specific tenant
    pub fn tenant(&self) -> Option<&str> {
        match self {
            Error::Validation { tenant, .. } => Some(tenant),
            Error::Conflict { tenant, .. } => Some(tenant),
            Error::Provisioning { tenant, .. } => Some(tenant),
            _ => None,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Whether a kube error is worth retrying.
///
/// 429 and 5xx API responses are transient, other API responses are not.
/// Of the errors that never got an API response, only transport failures
/// (connect, read, timeouts) are retried. Bad kubeconfig, TLS setup and
/// request-building errors fail the same way every time.
pub fn is_transient_kube_error(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => ae.code == 429 || ae.code >= 500,
        kube::Error::HyperError(_) | kube::Error::Service(_) | kube::Error::ReadEvents(_) => true,
        _ => false,
    }
}

/// Whether a kube error is an HTTP 409 "already exists" response
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// Whether a kube error is an HTTP 404 response
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}
