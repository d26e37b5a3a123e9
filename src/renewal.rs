//! Renewal policy for persisted trust material
//!
//! Stored material is reused only while the server certificate, its key and
//! the authority certificate are all present and well-formed, the server
//! certificate was issued by that authority, and both certificates have at
//! least `threshold` validity left.

use std::fmt;
use std::time::Duration;

use tracing::debug;
use x509_parser::prelude::*;

use crate::error::{CertError, Result};
use crate::pki::parse_pem;
use crate::store::TrustRecord;

/// Validity information of a certificate
#[derive(Debug, Clone)]
pub struct CertificateInfo {
    /// When the certificate becomes valid (Unix timestamp)
    pub not_before: i64,
    /// When the certificate expires (Unix timestamp)
    pub not_after: i64,
    /// Subject common name
    pub common_name: String,
}

impl CertificateInfo {
    /// Parse certificate info from a PEM-encoded certificate
    pub fn from_pem(pem_data: &[u8]) -> Result<Self> {
        let der = parse_pem(pem_data)?;
        Self::from_der(&der)
    }

    /// Parse certificate info from a DER-encoded certificate
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| CertError::parse(format!("failed to parse certificate: {}", e)))?;
        Ok(Self::from_x509(&cert))
    }

    /// Extract certificate info from an already parsed certificate
    pub fn from_x509(cert: &X509Certificate<'_>) -> Self {
        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or("")
            .to_string();

        Self {
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            common_name,
        }
    }

    /// Seconds remaining until the certificate expires (negative once expired)
    pub fn remaining_secs(&self) -> i64 {
        self.not_after - ::time::OffsetDateTime::now_utc().unix_timestamp()
    }

    /// Check if the certificate has expired
    pub fn is_expired(&self) -> bool {
        self.remaining_secs() <= 0
    }

    /// Check if less than `threshold` validity remains
    pub fn expires_within(&self, threshold: Duration) -> bool {
        let threshold_secs = i64::try_from(threshold.as_secs()).unwrap_or(i64::MAX);
        self.remaining_secs() < threshold_secs
    }
}

/// Why stored material cannot be reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenewalReason {
    /// `tls.crt` is absent or empty
    MissingServerCert,
    /// `tls.crt` does not decode or parse
    InvalidServerCert(String),
    /// Server certificate has less than the threshold left
    ServerCertExpiring {
        /// Seconds of validity left
        remaining_secs: i64,
    },
    /// `tls.key` is absent or empty
    MissingServerKey,
    /// `ca.crt` is absent or empty
    MissingAuthority,
    /// `ca.crt` does not decode or parse
    InvalidAuthority(String),
    /// Authority certificate has less than the threshold left
    AuthorityExpiring {
        /// Seconds of validity left
        remaining_secs: i64,
    },
    /// Server certificate signature does not verify against `ca.crt`
    NotIssuedByAuthority,
}

impl fmt::Display for RenewalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingServerCert => write!(f, "server certificate missing"),
            Self::InvalidServerCert(e) => write!(f, "server certificate invalid: {}", e),
            Self::ServerCertExpiring { remaining_secs } => {
                write!(f, "server certificate expires in {}s", remaining_secs)
            }
            Self::MissingServerKey => write!(f, "server key missing"),
            Self::MissingAuthority => write!(f, "CA certificate missing"),
            Self::InvalidAuthority(e) => write!(f, "CA certificate invalid: {}", e),
            Self::AuthorityExpiring { remaining_secs } => {
                write!(f, "CA certificate expires in {}s", remaining_secs)
            }
            Self::NotIssuedByAuthority => {
                write!(f, "server certificate was not issued by the stored CA")
            }
        }
    }
}

/// Check whether `record` must be regenerated
pub fn needs_renewal(record: &TrustRecord, threshold: Duration) -> bool {
    match renewal_reason(record, threshold) {
        Some(reason) => {
            debug!(reason = %reason, "webhook certs need renewal");
            true
        }
        None => false,
    }
}

/// First reason `record` cannot be reused, `None` if it is still good
pub fn renewal_reason(record: &TrustRecord, threshold: Duration) -> Option<RenewalReason> {
    if record.tls_cert.is_empty() {
        return Some(RenewalReason::MissingServerCert);
    }
    let leaf_der = match parse_pem(&record.tls_cert) {
        Ok(der) => der,
        Err(e) => return Some(RenewalReason::InvalidServerCert(e.to_string())),
    };
    let leaf = match X509Certificate::from_der(&leaf_der) {
        Ok((_, cert)) => cert,
        Err(e) => return Some(RenewalReason::InvalidServerCert(e.to_string())),
    };
    let leaf_info = CertificateInfo::from_x509(&leaf);
    if leaf_info.expires_within(threshold) {
        return Some(RenewalReason::ServerCertExpiring {
            remaining_secs: leaf_info.remaining_secs(),
        });
    }

    if record.tls_key.is_empty() {
        return Some(RenewalReason::MissingServerKey);
    }

    if record.ca_cert.is_empty() {
        return Some(RenewalReason::MissingAuthority);
    }
    let ca_der = match parse_pem(&record.ca_cert) {
        Ok(der) => der,
        Err(e) => return Some(RenewalReason::InvalidAuthority(e.to_string())),
    };
    let ca = match X509Certificate::from_der(&ca_der) {
        Ok((_, cert)) => cert,
        Err(e) => return Some(RenewalReason::InvalidAuthority(e.to_string())),
    };
    let ca_info = CertificateInfo::from_x509(&ca);
    if ca_info.expires_within(threshold) {
        return Some(RenewalReason::AuthorityExpiring {
            remaining_secs: ca_info.remaining_secs(),
        });
    }

    // Signature by the authority's public key
    if leaf.verify_signature(Some(ca.public_key())).is_err() {
        return Some(RenewalReason::NotIssuedByAuthority);
    }

    None
}
