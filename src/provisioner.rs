//! Deployment descriptor client
//!
//! Creates tenant namespaces and HelmReleases. Both operations are
//! idempotent: a namespace that already exists is left alone, and a
//! HelmRelease that already exists is overwritten with the full declared
//! body through a forced server-side apply.

use std::fmt;

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use tracing::{debug, info, instrument};

#[cfg(test)]
use mockall::automock;

use crate::crd::HelmRelease;
use crate::descriptor::DeploymentDescriptor;
use crate::error::{is_conflict, is_transient_kube_error};
use crate::kube_utils::create_namespace_if_missing;
use crate::retry::{retry_transient, RetryConfig};
use crate::{Error, FIELD_MANAGER};

/// What an apply call did to the cluster
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The HelmRelease did not exist and was created
    Created,
    /// The HelmRelease existed and was replaced with the declared body
    Updated,
}

impl fmt::Display for ApplyOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Updated => f.write_str("updated"),
        }
    }
}

/// Cluster writes needed to provision a tenant
///
/// Implementations never touch tenant records. Callers decide what a
/// failure means for the tenant's status.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DescriptorClient: Send + Sync {
    /// Ensure the namespace exists
    async fn ensure_namespace(&self, name: &str) -> Result<(), Error>;

    /// Create the descriptor's HelmRelease, or replace it if it exists
    async fn apply_descriptor(
        &self,
        descriptor: &DeploymentDescriptor,
    ) -> Result<ApplyOutcome, Error>;
}

/// [`DescriptorClient`] backed by the Kubernetes API
pub struct KubeDescriptorClient {
    client: Client,
    retry: RetryConfig,
}

impl KubeDescriptorClient {
    /// Create a new client with the default retry policy
    pub fn new(client: Client) -> Self {
        Self::with_retry(client, RetryConfig::default())
    }

    /// Create a new client with a custom retry policy
    pub fn with_retry(client: Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    async fn create_or_replace(
        &self,
        api: &Api<HelmRelease>,
        name: &str,
        hr: &HelmRelease,
    ) -> Result<ApplyOutcome, kube::Error> {
        let create = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        match api.create(&create, hr).await {
            Ok(_) => Ok(ApplyOutcome::Created),
            Err(e) if is_conflict(&e) => {
                debug!(release = %name, "HelmRelease exists, applying declared body");
                api.patch(
                    name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(hr),
                )
                .await?;
                Ok(ApplyOutcome::Updated)
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl DescriptorClient for KubeDescriptorClient {
    #[instrument(skip(self))]
    async fn ensure_namespace(&self, name: &str) -> Result<(), Error> {
        retry_transient(&self.retry, "ensure_namespace", is_transient_kube_error, || {
            create_namespace_if_missing(&self.client, name)
        })
        .await?;
        Ok(())
    }

    #[instrument(
        skip(self, descriptor),
        fields(release = %descriptor.release_name, namespace = %descriptor.namespace)
    )]
    async fn apply_descriptor(
        &self,
        descriptor: &DeploymentDescriptor,
    ) -> Result<ApplyOutcome, Error> {
        let api: Api<HelmRelease> = Api::namespaced(self.client.clone(), &descriptor.namespace);
        let hr = descriptor.to_helm_release();
        let name = descriptor.release_name.as_str();

        let outcome = retry_transient(&self.retry, "apply_descriptor", is_transient_kube_error, || {
            self.create_or_replace(&api, name, &hr)
        })
        .await?;

        info!(
            release = %name,
            namespace = %descriptor.namespace,
            tag = %descriptor.backend.tag,
            %outcome,
            "Applied HelmRelease"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_displays_lowercase() {
        assert_eq!(ApplyOutcome::Created.to_string(), "created");
        assert_eq!(ApplyOutcome::Updated.to_string(), "updated");
    }

    #[tokio::test]
    async fn mock_client_records_the_descriptor_it_was_given() {
        use crate::config::ProvisionerConfig;
        use crate::tenant::Version;

        let mut mock = MockDescriptorClient::new();
        mock.expect_apply_descriptor()
            .withf(|d| d.release_name == "acme" && d.backend.tag == "1.1.0")
            .times(1)
            .returning(|_| Ok(ApplyOutcome::Updated));

        let descriptor = DeploymentDescriptor::for_organization(
            "acme",
            &Version::parse("1.1.0").unwrap(),
            &ProvisionerConfig::default(),
        );
        let outcome = mock.apply_descriptor(&descriptor).await.unwrap();
        assert_eq!(outcome, ApplyOutcome::Updated);
    }
}
