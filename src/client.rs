//! Kubernetes API seam for certificate provisioning
//!
//! Everything the provisioning pass reads from or writes to the cluster goes
//! through [`CertKubeClient`], so the pass can run against the real API server
//! or against an in-memory stand-in in tests.

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, PostParams};
use kube::Client;

#[cfg(test)]
use mockall::automock;

/// Trait abstracting the Kubernetes operations used by a provisioning pass
///
/// Getters return `Ok(None)` when the object does not exist; every other API
/// failure is returned as-is for the caller to classify. Replace operations
/// send the object's `resourceVersion`, so a stale write fails with 409.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CertKubeClient: Send + Sync {
    /// Fetch a Secret, `None` if it does not exist
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error>;

    /// Create a Secret that does not exist yet
    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), kube::Error>;

    /// Replace an existing Secret, guarded by its `resourceVersion`
    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<(), kube::Error>;

    /// Fetch a ValidatingWebhookConfiguration, `None` if it does not exist
    async fn get_validating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, kube::Error>;

    /// Replace a ValidatingWebhookConfiguration
    async fn replace_validating_webhook_configuration(
        &self,
        name: &str,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<(), kube::Error>;

    /// Fetch a MutatingWebhookConfiguration, `None` if it does not exist
    async fn get_mutating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, kube::Error>;

    /// Replace a MutatingWebhookConfiguration
    async fn replace_mutating_webhook_configuration(
        &self,
        name: &str,
        config: &MutatingWebhookConfiguration,
    ) -> Result<(), kube::Error>;
}

/// Real Kubernetes client implementation
pub struct KubeCertClient {
    client: Client,
}

impl KubeCertClient {
    /// Create a new KubeCertClient wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CertKubeClient for KubeCertClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get_opt(name).await
    }

    async fn create_secret(&self, namespace: &str, secret: &Secret) -> Result<(), kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), secret).await?;
        Ok(())
    }

    async fn replace_secret(
        &self,
        namespace: &str,
        name: &str,
        secret: &Secret,
    ) -> Result<(), kube::Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), secret).await?;
        Ok(())
    }

    async fn get_validating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<ValidatingWebhookConfiguration>, kube::Error> {
        let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
        api.get_opt(name).await
    }

    async fn replace_validating_webhook_configuration(
        &self,
        name: &str,
        config: &ValidatingWebhookConfiguration,
    ) -> Result<(), kube::Error> {
        let api: Api<ValidatingWebhookConfiguration> = Api::all(self.client.clone());
        api.replace(name, &PostParams::default(), config).await?;
        Ok(())
    }

    async fn get_mutating_webhook_configuration(
        &self,
        name: &str,
    ) -> Result<Option<MutatingWebhookConfiguration>, kube::Error> {
        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        api.get_opt(name).await
    }

    async fn replace_mutating_webhook_configuration(
        &self,
        name: &str,
        config: &MutatingWebhookConfiguration,
    ) -> Result<(), kube::Error> {
        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        api.replace(name, &PostParams::default(), config).await?;
        Ok(())
    }
}
