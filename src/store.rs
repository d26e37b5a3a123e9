//! Durable trust record backed by a Kubernetes TLS Secret
//!
//! The Secret is the single source of truth for the webhook's trust material.
//! Files on disk and CA bundles in webhook configurations are projections of
//! it and are rewritten from it on every pass.

use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::ByteString;
use tracing::{debug, info, instrument};

use crate::client::CertKubeClient;
use crate::error::{CertError, Result};

/// Secret data key holding the authority certificate
pub const CA_CERT_KEY: &str = "ca.crt";
/// Secret data key holding the server certificate
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Secret data key holding the server private key
pub const TLS_KEY_KEY: &str = "tls.key";
/// Secret type used for the trust record
pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";

/// Authority certificate, server certificate and server key, all PEM-encoded
///
/// A missing data key is represented as an empty buffer.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TrustRecord {
    /// PEM-encoded authority certificate
    pub ca_cert: Vec<u8>,
    /// PEM-encoded server certificate
    pub tls_cert: Vec<u8>,
    /// PEM-encoded server private key
    pub tls_key: Vec<u8>,
    /// Optimistic-concurrency token of the Secret this record was read from
    pub resource_version: Option<String>,
}

impl fmt::Debug for TrustRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustRecord")
            .field("ca_cert_len", &self.ca_cert.len())
            .field("tls_cert_len", &self.tls_cert.len())
            .field("tls_key", &"<redacted>")
            .field("resource_version", &self.resource_version)
            .finish()
    }
}

impl TrustRecord {
    /// Assemble a record for freshly generated material
    pub fn new(
        ca_cert: impl Into<Vec<u8>>,
        tls_cert: impl Into<Vec<u8>>,
        tls_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            ca_cert: ca_cert.into(),
            tls_cert: tls_cert.into(),
            tls_key: tls_key.into(),
            resource_version: None,
        }
    }

    /// Read the record out of a Secret
    pub fn from_secret(secret: &Secret) -> Self {
        let field = |key: &str| {
            secret
                .data
                .as_ref()
                .and_then(|data| data.get(key))
                .map(|value| value.0.clone())
                .unwrap_or_default()
        };

        Self {
            ca_cert: field(CA_CERT_KEY),
            tls_cert: field(TLS_CERT_KEY),
            tls_key: field(TLS_KEY_KEY),
            resource_version: secret.metadata.resource_version.clone(),
        }
    }

    /// Render the record as a TLS Secret
    pub fn to_secret(&self, namespace: &str, name: &str) -> Secret {
        let data = BTreeMap::from([
            (CA_CERT_KEY.to_string(), ByteString(self.ca_cert.clone())),
            (TLS_CERT_KEY.to_string(), ByteString(self.tls_cert.clone())),
            (TLS_KEY_KEY.to_string(), ByteString(self.tls_key.clone())),
        ]);

        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                resource_version: self.resource_version.clone(),
                ..Default::default()
            },
            type_: Some(SECRET_TYPE_TLS.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

/// Load the trust record, `None` if the Secret does not exist
#[instrument(skip_all, fields(namespace = %namespace, name = %name))]
pub async fn load_existing(
    client: &dyn CertKubeClient,
    namespace: &str,
    name: &str,
) -> Result<Option<TrustRecord>> {
    let secret = client
        .get_secret(namespace, name)
        .await
        .map_err(|e| CertError::secret("getting", namespace, name, e))?;

    match secret {
        Some(secret) => {
            debug!(namespace = %namespace, name = %name, "loaded webhook cert secret");
            Ok(Some(TrustRecord::from_secret(&secret)))
        }
        None => Ok(None),
    }
}

/// Persist `record`, updating `existing` in place or creating the Secret
///
/// An update carries `existing`'s resourceVersion, so a concurrent writer
/// makes this fail with [`CertError::SecretConflict`] instead of being
/// overwritten.
#[instrument(skip_all, fields(namespace = %namespace, name = %name))]
pub async fn save(
    client: &dyn CertKubeClient,
    namespace: &str,
    name: &str,
    record: &TrustRecord,
    existing: Option<&TrustRecord>,
) -> Result<()> {
    match existing {
        Some(existing) => {
            let record = TrustRecord {
                resource_version: existing.resource_version.clone(),
                ..record.clone()
            };
            client
                .replace_secret(namespace, name, &record.to_secret(namespace, name))
                .await
                .map_err(|e| CertError::secret("updating", namespace, name, e))?;
            info!(namespace = %namespace, name = %name, "updated webhook cert secret");
        }
        None => {
            client
                .create_secret(namespace, &record.to_secret(namespace, name))
                .await
                .map_err(|e| CertError::secret("creating", namespace, name, e))?;
            info!(namespace = %namespace, name = %name, "created webhook cert secret");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockCertKubeClient;
    use std::sync::{Arc, Mutex};

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "injected".to_string(),
            reason: "Injected".to_string(),
            code,
        })
    }

    fn sample_record() -> TrustRecord {
        TrustRecord::new("ca-pem", "cert-pem", "key-pem")
    }

    #[test]
    fn secret_round_trip_keeps_fields_and_version() {
        let mut record = sample_record();
        record.resource_version = Some("42".to_string());

        let secret = record.to_secret("ops", "webhook-tls");
        assert_eq!(secret.type_.as_deref(), Some(SECRET_TYPE_TLS));
        assert_eq!(secret.metadata.name.as_deref(), Some("webhook-tls"));
        assert_eq!(secret.metadata.namespace.as_deref(), Some("ops"));

        let data = secret.data.as_ref().unwrap();
        assert_eq!(data.len(), 3);
        assert_eq!(data[CA_CERT_KEY].0, b"ca-pem");

        assert_eq!(TrustRecord::from_secret(&secret), record);
    }

    #[test]
    fn missing_data_keys_read_as_empty() {
        let secret = Secret {
            data: Some(BTreeMap::from([(
                CA_CERT_KEY.to_string(),
                ByteString(b"ca".to_vec()),
            )])),
            ..Default::default()
        };
        let record = TrustRecord::from_secret(&secret);
        assert_eq!(record.ca_cert, b"ca");
        assert!(record.tls_cert.is_empty());
        assert!(record.tls_key.is_empty());
        assert!(TrustRecord::from_secret(&Secret::default()).tls_cert.is_empty());
    }

    #[test]
    fn debug_output_redacts_private_key() {
        let rendered = format!("{:?}", sample_record());
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("key-pem"));
    }

    #[tokio::test]
    async fn load_existing_maps_absent_secret_to_none() {
        let mut client = MockCertKubeClient::new();
        client.expect_get_secret().returning(|_, _| Ok(None));

        let loaded = load_existing(&client, "ops", "webhook-tls").await.unwrap();
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn load_existing_surfaces_api_errors() {
        let mut client = MockCertKubeClient::new();
        client
            .expect_get_secret()
            .returning(|_, _| Err(api_error(403)));

        let err = load_existing(&client, "ops", "webhook-tls").await.unwrap_err();
        assert!(err.to_string().starts_with("getting secret ops/webhook-tls"));
    }

    /// Records every Secret written, so tests check outcomes rather than calls
    #[derive(Clone, Default)]
    struct WriteCapture {
        writes: Arc<Mutex<Vec<(&'static str, Secret)>>>,
    }

    impl WriteCapture {
        fn record(&self, operation: &'static str, secret: &Secret) {
            self.writes.lock().unwrap().push((operation, secret.clone()));
        }

        fn take(&self) -> Vec<(&'static str, Secret)> {
            std::mem::take(&mut *self.writes.lock().unwrap())
        }
    }

    fn capturing_client(capture: &WriteCapture) -> MockCertKubeClient {
        let mut client = MockCertKubeClient::new();
        let create_capture = capture.clone();
        client.expect_create_secret().returning(move |_, secret| {
            create_capture.record("create", secret);
            Ok(())
        });
        let replace_capture = capture.clone();
        client
            .expect_replace_secret()
            .returning(move |_, _, secret| {
                replace_capture.record("replace", secret);
                Ok(())
            });
        client
    }

    #[tokio::test]
    async fn save_creates_when_nothing_existed() {
        let capture = WriteCapture::default();
        let client = capturing_client(&capture);

        save(&client, "ops", "webhook-tls", &sample_record(), None)
            .await
            .unwrap();

        let writes = capture.take();
        assert_eq!(writes.len(), 1);
        let (operation, secret) = &writes[0];
        assert_eq!(*operation, "create");
        assert!(secret.metadata.resource_version.is_none());
        assert_eq!(TrustRecord::from_secret(secret), sample_record());
    }

    #[tokio::test]
    async fn save_updates_with_previous_resource_version() {
        let mut existing = TrustRecord::new("old-ca", "old-cert", "old-key");
        existing.resource_version = Some("7".to_string());

        let capture = WriteCapture::default();
        let client = capturing_client(&capture);

        save(&client, "ops", "webhook-tls", &sample_record(), Some(&existing))
            .await
            .unwrap();

        let writes = capture.take();
        assert_eq!(writes.len(), 1);
        let (operation, secret) = &writes[0];
        assert_eq!(*operation, "replace");
        assert_eq!(secret.metadata.resource_version.as_deref(), Some("7"));
        assert_eq!(secret.data.as_ref().unwrap()[TLS_CERT_KEY].0, b"cert-pem");
    }

    #[tokio::test]
    async fn save_reports_version_conflict() {
        let existing = TrustRecord {
            resource_version: Some("7".to_string()),
            ..sample_record()
        };

        let mut client = MockCertKubeClient::new();
        client
            .expect_replace_secret()
            .times(1)
            .returning(|_, _, _| Err(api_error(409)));

        let err = save(&client, "ops", "webhook-tls", &sample_record(), Some(&existing))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }
}
