//! Error types for webhook certificate provisioning

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for a certificate provisioning pass
///
/// Every variant carries enough context (resource, operation) to diagnose a
/// failed pass without retrying it. None of these are recovered locally: the
/// caller must treat any of them as "trust material is not ready".
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CertError {
    /// Invalid provisioning configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Key pair generation failed
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// Random serial number could not be drawn
    #[error("serial number generation failed: {0}")]
    SerialGeneration(String),

    /// Certificate construction or signing failed
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(String),

    /// PEM or DER decoding failed
    #[error("certificate parsing error: {0}")]
    Parse(String),

    /// Secret read or write failed
    #[error("{operation} secret {namespace}/{name}: {source}")]
    Secret {
        /// Operation that failed (get, create, update)
        operation: &'static str,
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
        /// Underlying API error
        #[source]
        source: kube::Error,
    },

    /// Secret was modified concurrently since it was read
    #[error("secret {namespace}/{name} was modified concurrently (resourceVersion conflict)")]
    SecretConflict {
        /// Secret namespace
        namespace: String,
        /// Secret name
        name: String,
    },

    /// Local filesystem write failed
    #[error("{operation} {}: {source}", .path.display())]
    Filesystem {
        /// Operation that failed
        operation: &'static str,
        /// Path being written
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// A required webhook configuration does not exist
    #[error("{kind} {name} not found")]
    MissingWebhookConfiguration {
        /// Kubernetes kind of the configuration
        kind: &'static str,
        /// Object name
        name: String,
    },

    /// Webhook configuration read or write failed
    #[error("{operation} {kind} {name}: {source}")]
    WebhookConfiguration {
        /// Operation that failed (get, update)
        operation: &'static str,
        /// Kubernetes kind of the configuration
        kind: &'static str,
        /// Object name
        name: String,
        /// Underlying API error
        #[source]
        source: kube::Error,
    },
}

impl CertError {
    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a certificate parsing error with the given message
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Wrap a Secret API error, classifying version conflicts
    pub(crate) fn secret(
        operation: &'static str,
        namespace: &str,
        name: &str,
        source: kube::Error,
    ) -> Self {
        if is_status(&source, 409) {
            return Self::SecretConflict {
                namespace: namespace.to_string(),
                name: name.to_string(),
            };
        }
        Self::Secret {
            operation,
            namespace: namespace.to_string(),
            name: name.to_string(),
            source,
        }
    }

    /// Whether this error is an optimistic-concurrency conflict on the Secret
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::SecretConflict { .. })
    }

    /// Whether this error reports a missing object
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::MissingWebhookConfiguration { .. } => true,
            Self::Secret { source, .. } | Self::WebhookConfiguration { source, .. } => {
                is_status(source, 404)
            }
            _ => false,
        }
    }
}

/// Check whether a kube error is an API status with the given HTTP code
pub(crate) fn is_status(err: &kube::Error, code: u16) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == code)
}

/// Result type alias for certificate provisioning
pub type Result<T> = std::result::Result<T, CertError>;
