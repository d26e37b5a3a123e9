//! PKI generation for webhook serving certificates
//!
//! Each generation pass builds a fresh self-signed certificate authority and a
//! single server certificate signed by it. The authority only lives in memory
//! for the duration of the pass; afterwards it exists solely as the PEM bytes
//! persisted in the trust record.
//!
//! # Key Strength
//!
//! - Authority: RSA 4096 (longer-lived, higher value)
//! - Server: RSA 2048
//!
//! Both certificates are valid from generation time until generation time plus
//! the configured validity. No backdating is applied.

use std::time::Duration;

use rand::rngs::OsRng;
use rand::TryRngCore;
use rcgen::{
    string::Ia5String, BasicConstraints, CertificateParams, DistinguishedName, DnType, DnValue,
    ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose, RsaKeySize, SanType,
    SerialNumber,
};
use x509_parser::prelude::*;

use crate::error::{CertError, Result};

/// Subject common name of every generated authority
pub const AUTHORITY_COMMON_NAME: &str = "webhook-ca";

/// Subject organization of every generated certificate
pub const ORGANIZATION: &str = "butane-operator";

/// Number of random bytes in a certificate serial number (128 bits)
const SERIAL_BYTES: usize = 16;

/// DNS identities under which the webhook service is reachable in-cluster
///
/// Always exactly two entries, short form first. The first entry doubles as
/// the server certificate's common name.
pub fn dns_names_for_service(service_name: &str, namespace: &str) -> Vec<String> {
    vec![
        format!("{}.{}.svc", service_name, namespace),
        format!("{}.{}.svc.cluster.local", service_name, namespace),
    ]
}

/// Parse PEM-encoded data and return the DER bytes of the first block
pub fn parse_pem(pem_data: &[u8]) -> Result<Vec<u8>> {
    let pem_obj = ::pem::parse(pem_data)
        .map_err(|e| CertError::parse(format!("failed to parse PEM: {}", e)))?;
    Ok(pem_obj.contents().to_vec())
}

/// Freshly generated certificate authority
///
/// Holds the signing key in memory; only the certificate is ever persisted.
pub struct Authority {
    cert_pem: String,
    key: KeyPair,
}

impl Authority {
    /// PEM-encoded authority certificate (the CA bundle)
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// Signing issuer backed by this authority's certificate and key
    fn issuer(&self) -> Result<Issuer<'_, &KeyPair>> {
        Issuer::from_ca_cert_pem(&self.cert_pem, &self.key)
            .map_err(|e| CertError::parse(format!("failed to load authority as issuer: {}", e)))
    }
}

/// Generate a self-signed certificate authority valid for `validity`
pub fn generate_authority(validity: Duration) -> Result<Authority> {
    let key = KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_4096)
        .map_err(|e| CertError::KeyGeneration(format!("failed to generate CA key: {}", e)))?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(AUTHORITY_COMMON_NAME);
    params.serial_number = Some(random_serial()?);
    params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign, KeyUsagePurpose::CrlSign];

    let (not_before, not_after) = validity_window(validity)?;
    params.not_before = not_before;
    params.not_after = not_after;

    let cert = params.self_signed(&key).map_err(|e| {
        CertError::CertificateGeneration(format!("failed to create CA certificate: {}", e))
    })?;

    X509Certificate::from_der(cert.der())
        .map_err(|e| CertError::parse(format!("failed to parse CA certificate: {}", e)))?;

    Ok(Authority {
        cert_pem: cert.pem(),
        key,
    })
}

/// Generate a server certificate for `dns_names`, signed by `authority`
///
/// Returns the PEM-encoded certificate and PKCS#8 private key.
pub fn generate_leaf(
    authority: &Authority,
    dns_names: &[String],
    validity: Duration,
) -> Result<(String, String)> {
    let common_name = dns_names.first().ok_or_else(|| {
        CertError::CertificateGeneration("server certificate needs at least one DNS name".into())
    })?;

    let key = KeyPair::generate_rsa_for(&rcgen::PKCS_RSA_SHA256, RsaKeySize::_2048)
        .map_err(|e| CertError::KeyGeneration(format!("failed to generate server key: {}", e)))?;

    let mut params = CertificateParams::default();
    params.distinguished_name = distinguished_name(common_name);
    params.serial_number = Some(random_serial()?);

    // Not a CA
    params.is_ca = IsCa::NoCa;
    params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

    params.subject_alt_names = dns_names
        .iter()
        .map(|name| {
            Ia5String::try_from(name.as_str())
                .map(SanType::DnsName)
                .map_err(|e| {
                    CertError::CertificateGeneration(format!(
                        "invalid DNS name '{}': {}",
                        name, e
                    ))
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let (not_before, not_after) = validity_window(validity)?;
    params.not_before = not_before;
    params.not_after = not_after;

    let issuer = authority.issuer()?;
    let cert = params.signed_by(&key, &issuer).map_err(|e| {
        CertError::CertificateGeneration(format!("failed to sign server certificate: {}", e))
    })?;

    X509Certificate::from_der(cert.der())
        .map_err(|e| CertError::parse(format!("failed to parse server certificate: {}", e)))?;

    Ok((cert.pem(), key.serialize_pem()))
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(ORGANIZATION.to_string()),
    );
    dn
}

/// Draw a uniformly random 128-bit serial number from the OS entropy source
fn random_serial() -> Result<SerialNumber> {
    let mut bytes = [0u8; SERIAL_BYTES];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| CertError::SerialGeneration(e.to_string()))?;
    Ok(SerialNumber::from_slice(&bytes))
}

/// Compute `[now, now + validity]`
fn validity_window(validity: Duration) -> Result<(::time::OffsetDateTime, ::time::OffsetDateTime)> {
    let lifetime = ::time::Duration::try_from(validity).map_err(|e| {
        CertError::CertificateGeneration(format!("validity {:?} out of range: {}", validity, e))
    })?;
    let now = ::time::OffsetDateTime::now_utc();
    let not_after = now.checked_add(lifetime).ok_or_else(|| {
        CertError::CertificateGeneration(format!("validity {:?} overflows", validity))
    })?;
    Ok((now, not_after))
}
