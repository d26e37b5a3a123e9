//! One provisioning pass over the webhook's trust material
//!
//! The pass is a strictly forward pipeline:
//!
//! 1. Derive the DNS identities of the webhook Service
//! 2. Load the trust record from its Secret
//! 3. Reuse it, or generate a fresh CA and server certificate and persist them
//! 4. Write the server pair to the cert directory
//! 5. Inject the CA into the webhook configurations
//!
//! Steps 4 and 5 run on every pass, so drifted projections are repaired even
//! when nothing was regenerated. The first failure aborts the pass.

use std::fmt;

use tracing::{info, Instrument, Span};

use crate::client::CertKubeClient;
use crate::config::WebhookCertConfig;
use crate::disk::write_to_filesystem;
use crate::error::Result;
use crate::pki::{dns_names_for_service, generate_authority, generate_leaf};
use crate::renewal::needs_renewal;
use crate::store::{self, TrustRecord};
use crate::webhook::patch_consumers;

/// Which branch a successful pass took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnsureOutcome {
    /// No record existed; one was generated and created
    Created,
    /// A record existed but needed renewal; it was regenerated and updated
    Renewed,
    /// The existing record was reused as-is
    Reused,
}

impl EnsureOutcome {
    /// Whether new material was generated during the pass
    pub fn regenerated(self) -> bool {
        !matches!(self, Self::Reused)
    }
}

impl fmt::Display for EnsureOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Renewed => write!(f, "renewed"),
            Self::Reused => write!(f, "reused"),
        }
    }
}

/// Make sure valid webhook TLS material exists everywhere it is consumed
///
/// Every event of the pass is emitted under `span`. On success the server
/// pair is on disk in `config.cert_dir` and the webhook server may start
/// listening; on error it must not.
pub async fn ensure(
    client: &dyn CertKubeClient,
    config: &WebhookCertConfig,
    span: &Span,
) -> Result<EnsureOutcome> {
    run(client, config).instrument(span.clone()).await
}

async fn run(client: &dyn CertKubeClient, config: &WebhookCertConfig) -> Result<EnsureOutcome> {
    config.validate()?;

    let dns_names = dns_names_for_service(&config.service_name, &config.namespace);
    let existing =
        store::load_existing(client, &config.secret_namespace, &config.secret_name).await?;

    let (record, outcome) = match existing {
        Some(record) if !needs_renewal(&record, config.renewal_threshold) => {
            info!(
                namespace = %config.secret_namespace,
                name = %config.secret_name,
                "existing webhook certs are valid, reusing"
            );
            (record, EnsureOutcome::Reused)
        }
        existing => {
            info!(dns_names = ?dns_names, "generating webhook certs");
            let authority = generate_authority(config.validity)?;
            let (cert_pem, key_pem) = generate_leaf(&authority, &dns_names, config.validity)?;
            let record = TrustRecord::new(authority.cert_pem(), cert_pem, key_pem);

            store::save(
                client,
                &config.secret_namespace,
                &config.secret_name,
                &record,
                existing.as_ref(),
            )
            .await?;

            let outcome = if existing.is_some() {
                EnsureOutcome::Renewed
            } else {
                EnsureOutcome::Created
            };
            (record, outcome)
        }
    };

    write_to_filesystem(&config.cert_dir, &record.tls_cert, &record.tls_key).await?;

    patch_consumers(
        client,
        &config.validating_webhook_name,
        config.mutating_webhook_name.as_deref(),
        &record.ca_cert,
    )
    .await?;

    info!(outcome = %outcome, "webhook certs ready");
    Ok(outcome)
}
