//! Webhook certs - TLS trust material for Kubernetes admission webhooks
//!
//! Provisions, persists, renews and propagates the certificates an admission
//! webhook server needs to serve TLS that the API server trusts. A single
//! [`ensure`] pass is run before the server starts listening.
//!
//! # Modules
//!
//! - [`pki`] - CA and server certificate generation
//! - [`renewal`] - Decides whether stored material can be reused
//! - [`store`] - Trust record persisted in a `kubernetes.io/tls` Secret
//! - [`disk`] - Server pair written to the webhook server's cert directory
//! - [`webhook`] - CA bundle injection into webhook configurations
//! - [`client`] - Kubernetes API seam
//! - [`config`] - Inputs for a pass
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod client;
pub mod config;
pub mod disk;
pub mod ensure;
pub mod error;
pub mod pki;
pub mod renewal;
pub mod store;
pub mod webhook;

pub use client::{CertKubeClient, KubeCertClient};
pub use config::WebhookCertConfig;
pub use ensure::{ensure, EnsureOutcome};
pub use error::{CertError, Result};
pub use renewal::{needs_renewal, CertificateInfo};
pub use store::TrustRecord;
