//! Fully-resolved inputs for one provisioning pass

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CertError, Result};
use crate::webhook::mutating_webhook_name;

/// Directory controller-runtime style webhook servers load their pair from
pub const DEFAULT_CERT_DIR: &str = "/tmp/k8s-webhook-server/serving-certs";
/// Default lifetime of generated certificates
pub const DEFAULT_VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// Default remaining lifetime below which material is regenerated
pub const DEFAULT_RENEWAL_THRESHOLD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Configuration for [`crate::ensure`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookCertConfig {
    /// Name of the Service fronting the webhook server
    pub service_name: String,
    /// Namespace of that Service
    pub namespace: String,
    /// Name of the Secret holding the trust record
    pub secret_name: String,
    /// Namespace of the Secret holding the trust record
    pub secret_namespace: String,
    /// Directory the server loads `tls.crt` and `tls.key` from
    pub cert_dir: PathBuf,
    /// ValidatingWebhookConfiguration to patch; must exist
    pub validating_webhook_name: String,
    /// MutatingWebhookConfiguration to patch when it exists
    pub mutating_webhook_name: Option<String>,
    /// Lifetime of generated certificates
    pub validity: Duration,
    /// Remaining lifetime below which material is regenerated
    pub renewal_threshold: Duration,
}

impl WebhookCertConfig {
    /// Defaults for a webhook served by `service_name` in `namespace`
    ///
    /// The mutating configuration name is derived from the validating one
    /// with [`mutating_webhook_name`]. Override it with
    /// [`Self::with_mutating_webhook`] when the names do not follow that
    /// convention.
    pub fn new(service_name: impl Into<String>, namespace: impl Into<String>) -> Self {
        let service_name = service_name.into();
        let namespace = namespace.into();
        let validating_webhook_name = format!("{}-validating-webhook-configuration", service_name);

        Self {
            secret_name: format!("{}-tls", service_name),
            secret_namespace: namespace.clone(),
            cert_dir: PathBuf::from(DEFAULT_CERT_DIR),
            mutating_webhook_name: Some(mutating_webhook_name(&validating_webhook_name)),
            validating_webhook_name,
            validity: DEFAULT_VALIDITY,
            renewal_threshold: DEFAULT_RENEWAL_THRESHOLD,
            service_name,
            namespace,
        }
    }

    /// Store the trust record in `namespace/name`
    pub fn with_secret(mut self, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        self.secret_namespace = namespace.into();
        self.secret_name = name.into();
        self
    }

    /// Write the key pair into `dir`
    pub fn with_cert_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cert_dir = dir.into();
        self
    }

    /// Patch the named ValidatingWebhookConfiguration
    ///
    /// A mutating name still derived from the previous validating name is
    /// re-derived from `name`; an explicitly set or disabled one is kept.
    pub fn with_validating_webhook(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        let derived = mutating_webhook_name(&self.validating_webhook_name);
        if self.mutating_webhook_name.as_deref() == Some(derived.as_str()) {
            self.mutating_webhook_name = Some(mutating_webhook_name(&name));
        }
        self.validating_webhook_name = name;
        self
    }

    /// Patch the named MutatingWebhookConfiguration, or none
    pub fn with_mutating_webhook(mut self, name: Option<String>) -> Self {
        self.mutating_webhook_name = name;
        self
    }

    /// Lifetime of generated certificates
    pub fn with_validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Remaining lifetime below which material is regenerated
    pub fn with_renewal_threshold(mut self, threshold: Duration) -> Self {
        self.renewal_threshold = threshold;
        self
    }

    /// Reject configurations that cannot produce usable material
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("service name", &self.service_name),
            ("namespace", &self.namespace),
            ("secret name", &self.secret_name),
            ("secret namespace", &self.secret_namespace),
            ("validating webhook name", &self.validating_webhook_name),
        ];
        for (field, value) in required {
            if value.is_empty() {
                return Err(CertError::config(format!("{} is empty", field)));
            }
        }

        if matches!(self.mutating_webhook_name.as_deref(), Some("")) {
            return Err(CertError::config("mutating webhook name is empty"));
        }
        if self.cert_dir.as_os_str().is_empty() {
            return Err(CertError::config("cert directory is empty"));
        }
        if self.validity.is_zero() {
            return Err(CertError::config("validity must be positive"));
        }
        // Fresh material would already be due for renewal
        if self.renewal_threshold >= self.validity {
            return Err(CertError::config(format!(
                "renewal threshold ({}s) must be shorter than validity ({}s)",
                self.renewal_threshold.as_secs(),
                self.validity.as_secs()
            )));
        }
        Ok(())
    }
}
