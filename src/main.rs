//! webhook-certs - provision TLS trust material for an admission webhook
//!
//! Runs a single provisioning pass and exits. Intended as an init container
//! (or pre-start hook) of the webhook server: a non-zero exit keeps the server
//! from starting without valid certificates.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use kube::Client;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use webhook_certs::{ensure, KubeCertClient, WebhookCertConfig};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Provision, renew and propagate webhook TLS certificates
#[derive(Parser, Debug)]
#[command(name = "webhook-certs", version, about, long_about = None)]
struct Cli {
    /// Name of the Service fronting the webhook server
    #[arg(long, env = "WEBHOOK_SERVICE_NAME")]
    service_name: String,

    /// Namespace of the webhook Service
    #[arg(long, env = "POD_NAMESPACE")]
    namespace: String,

    /// Secret holding the trust record (default: `<service>-tls`)
    #[arg(long, env = "WEBHOOK_SECRET_NAME")]
    secret_name: Option<String>,

    /// Namespace of the Secret (default: the Service namespace)
    #[arg(long, env = "WEBHOOK_SECRET_NAMESPACE")]
    secret_namespace: Option<String>,

    /// Directory the webhook server loads tls.crt and tls.key from
    #[arg(long, env = "WEBHOOK_CERT_DIR")]
    cert_dir: Option<PathBuf>,

    /// ValidatingWebhookConfiguration to patch
    /// (default: `<service>-validating-webhook-configuration`)
    #[arg(long, env = "WEBHOOK_VALIDATING_CONFIGURATION")]
    validating_webhook: Option<String>,

    /// MutatingWebhookConfiguration to patch when it exists
    /// (default: derived from the validating name)
    #[arg(long, env = "WEBHOOK_MUTATING_CONFIGURATION", conflicts_with = "no_mutating_webhook")]
    mutating_webhook: Option<String>,

    /// Do not patch any MutatingWebhookConfiguration
    #[arg(long, env = "WEBHOOK_NO_MUTATING_CONFIGURATION")]
    no_mutating_webhook: bool,

    /// Lifetime of generated certificates, in days
    #[arg(long, env = "WEBHOOK_CERT_VALIDITY_DAYS", default_value_t = 365)]
    validity_days: u64,

    /// Remaining lifetime below which certificates are regenerated, in days
    #[arg(long, env = "WEBHOOK_CERT_RENEWAL_DAYS", default_value_t = 30)]
    renewal_threshold_days: u64,
}

impl Cli {
    fn into_config(self) -> WebhookCertConfig {
        let mut config = WebhookCertConfig::new(self.service_name, self.namespace)
            .with_validity(Duration::from_secs(self.validity_days.saturating_mul(SECS_PER_DAY)))
            .with_renewal_threshold(Duration::from_secs(
                self.renewal_threshold_days.saturating_mul(SECS_PER_DAY),
            ));

        if self.secret_name.is_some() || self.secret_namespace.is_some() {
            let namespace = self
                .secret_namespace
                .unwrap_or_else(|| config.secret_namespace.clone());
            let name = self
                .secret_name
                .unwrap_or_else(|| config.secret_name.clone());
            config = config.with_secret(namespace, name);
        }
        if let Some(dir) = self.cert_dir {
            config = config.with_cert_dir(dir);
        }
        if let Some(name) = self.validating_webhook {
            config = config.with_validating_webhook(name);
        }
        if let Some(name) = self.mutating_webhook {
            config = config.with_mutating_webhook(Some(name));
        }
        if self.no_mutating_webhook {
            config = config.with_mutating_webhook(None);
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // The kube client's TLS stack needs a process-wide provider
    if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
        eprintln!("CRITICAL: Failed to install aws-lc-rs crypto provider: {:?}", e);
        std::process::exit(1);
    }

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Cli::parse().into_config();
    let span = tracing::info_span!(
        "webhook_certs",
        service = %config.service_name,
        namespace = %config.namespace
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let client = KubeCertClient::new(client);

    let outcome = ensure(&client, &config, &span)
        .await
        .context("failed to ensure webhook certificates")?;

    tracing::info!(
        outcome = %outcome,
        cert_dir = %config.cert_dir.display(),
        "webhook certificates ready"
    );
    Ok(())
}
