//! Trust propagation into admission webhook configurations
//!
//! The API server verifies the webhook server against the `caBundle` of each
//! webhook entry. Every pass overwrites those bundles with the current
//! authority certificate, so a regenerated CA is picked up without manual
//! steps. Configurations are never created here, only patched.

use async_trait::async_trait;
use k8s_openapi::api::admissionregistration::v1::{
    MutatingWebhookConfiguration, ValidatingWebhookConfiguration,
};
use k8s_openapi::ByteString;
use tracing::{debug, info, instrument};

use crate::client::CertKubeClient;
use crate::error::{CertError, Result};

/// Marker replaced to derive the mutating configuration name
pub const VALIDATING_MARKER: &str = "validating";
/// Replacement for [`VALIDATING_MARKER`]
pub const MUTATING_MARKER: &str = "mutating";

/// Raw API result, classified by [`patch_consumer`]
pub type ApiResult<T> = std::result::Result<T, kube::Error>;

/// Derive the MutatingWebhookConfiguration name from the validating one
///
/// Compatibility convention: operators scaffolded with a single
/// `<prefix>-validating-webhook-configuration` name their mutating
/// counterpart by swapping the first `validating` for `mutating`. Names
/// without the marker are returned unchanged.
pub fn mutating_webhook_name(validating_name: &str) -> String {
    validating_name.replacen(VALIDATING_MARKER, MUTATING_MARKER, 1)
}

/// Whether a missing consumer aborts the pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Missing object is an error
    Required,
    /// Missing object is skipped
    Optional,
}

/// A webhook configuration kind whose entries carry a CA bundle
#[async_trait]
pub trait TrustConsumer: Sized + Send + Sync {
    /// Kubernetes kind, used in errors and logs
    const KIND: &'static str;

    /// Fetch the object by name, `None` if it does not exist
    async fn fetch(client: &dyn CertKubeClient, name: &str) -> ApiResult<Option<Self>>;

    /// Write the object back
    async fn store(&self, client: &dyn CertKubeClient, name: &str) -> ApiResult<()>;

    /// Overwrite every entry's CA bundle, returning the number of entries
    fn inject_ca_bundle(&mut self, ca_bundle: &[u8]) -> usize;
}

#[async_trait]
impl TrustConsumer for ValidatingWebhookConfiguration {
    const KIND: &'static str = "ValidatingWebhookConfiguration";

    async fn fetch(client: &dyn CertKubeClient, name: &str) -> ApiResult<Option<Self>> {
        client.get_validating_webhook_configuration(name).await
    }

    async fn store(&self, client: &dyn CertKubeClient, name: &str) -> ApiResult<()> {
        client.replace_validating_webhook_configuration(name, self).await
    }

    fn inject_ca_bundle(&mut self, ca_bundle: &[u8]) -> usize {
        let webhooks = self.webhooks.get_or_insert_with(Vec::new);
        for webhook in webhooks.iter_mut() {
            webhook.client_config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));
        }
        webhooks.len()
    }
}

#[async_trait]
impl TrustConsumer for MutatingWebhookConfiguration {
    const KIND: &'static str = "MutatingWebhookConfiguration";

    async fn fetch(client: &dyn CertKubeClient, name: &str) -> ApiResult<Option<Self>> {
        client.get_mutating_webhook_configuration(name).await
    }

    async fn store(&self, client: &dyn CertKubeClient, name: &str) -> ApiResult<()> {
        client.replace_mutating_webhook_configuration(name, self).await
    }

    fn inject_ca_bundle(&mut self, ca_bundle: &[u8]) -> usize {
        let webhooks = self.webhooks.get_or_insert_with(Vec::new);
        for webhook in webhooks.iter_mut() {
            webhook.client_config.ca_bundle = Some(ByteString(ca_bundle.to_vec()));
        }
        webhooks.len()
    }
}

/// Patch one consumer, returning whether it was found and updated
///
/// The update is issued even when the configuration has no webhook entries.
#[instrument(skip_all, fields(kind = C::KIND, name = %name))]
pub async fn patch_consumer<C: TrustConsumer>(
    client: &dyn CertKubeClient,
    name: &str,
    presence: Presence,
    ca_bundle: &[u8],
) -> Result<bool> {
    let fetched = C::fetch(client, name)
        .await
        .map_err(|source| CertError::WebhookConfiguration {
            operation: "getting",
            kind: C::KIND,
            name: name.to_string(),
            source,
        })?;

    let Some(mut consumer) = fetched else {
        return match presence {
            Presence::Required => Err(CertError::MissingWebhookConfiguration {
                kind: C::KIND,
                name: name.to_string(),
            }),
            Presence::Optional => {
                debug!(kind = C::KIND, name = %name, "webhook configuration not found, skipping");
                Ok(false)
            }
        };
    };

    let entries = consumer.inject_ca_bundle(ca_bundle);
    consumer
        .store(client, name)
        .await
        .map_err(|source| CertError::WebhookConfiguration {
            operation: "updating",
            kind: C::KIND,
            name: name.to_string(),
            source,
        })?;

    info!(kind = C::KIND, name = %name, entries, "patched webhook CA bundle");
    Ok(true)
}

/// Inject `ca_bundle` into the validating configuration and, if named and
/// present, the mutating one
pub async fn patch_consumers(
    client: &dyn CertKubeClient,
    primary: &str,
    secondary: Option<&str>,
    ca_bundle: &[u8],
) -> Result<()> {
    patch_consumer::<ValidatingWebhookConfiguration>(
        client,
        primary,
        Presence::Required,
        ca_bundle,
    )
    .await?;

    if let Some(secondary) = secondary {
        patch_consumer::<MutatingWebhookConfiguration>(
            client,
            secondary,
            Presence::Optional,
            ca_bundle,
        )
        .await?;
    }
    Ok(())
}
