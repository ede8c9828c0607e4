//! Loading a CA certificate and binding a signing backend to it.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use bon::Builder;
use der::flagset::FlagSet;
use log::info;
use rand_core::{OsRng, RngCore};
use time::{Duration, OffsetDateTime};
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::backend::{BackendFactory, SigningBackend};
use crate::cert::extensions::{
    BasicConstraints, KeyUsage, KeyUsages, SubjectKeyIdentifier, ToAndFromX509Extension,
    key_identifier,
};
use crate::cert::params::{DistinguishedName, ExtensionParam, Validity};
use crate::cert::{Certificate, SignatureAlgorithm, from_x509_time};
use crate::error::{CsrForgeError, Result};
use crate::key::{KeyPair, PublicKey};
use crate::tbs_certificate::TbsCertificate;

/// How serial numbers are allocated for certificates issued by one CA.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SerialPolicy {
    /// Random high bits followed by a per-CA counter.
    #[default]
    Random,
    /// 1, 2, 3, ... for the lifetime of the loaded CA.
    Sequential,
}

/// Issuance defaults attached to a loaded CA.
#[derive(Clone, Debug, Builder)]
pub struct CaPolicy {
    /// Lifetime of issued certificates.
    #[builder(default = 365)]
    pub validity_days: i64,
    /// How far `notBefore` is moved into the past to absorb clock skew.
    #[builder(default = 5)]
    pub backdate_minutes: i64,
    /// Never let an issued certificate outlive the CA certificate.
    #[builder(default = true)]
    pub clamp_to_ca_expiry: bool,
    #[builder(default)]
    pub serial: SerialPolicy,
    /// Overrides the signature algorithm derived from the CA key.
    pub signature_algorithm: Option<SignatureAlgorithm>,
}

impl Default for CaPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// A parsed CA certificate together with the policy used when issuing under it.
#[derive(Debug)]
pub struct CaIdentity {
    certificate: Certificate,
    signature_algorithm: SignatureAlgorithm,
    key_identifier: Vec<u8>,
    not_after: OffsetDateTime,
    policy: CaPolicy,
    issued: AtomicU64,
}

impl CaIdentity {
    pub fn new(certificate: Certificate, policy: CaPolicy) -> Result<Self> {
        let tbs = &certificate.inner.tbs_certificate;
        let public_key = PublicKey::from_x509spki(&tbs.subject_public_key_info)
            .map_err(|e| CsrForgeError::KeyConstructionError(e.to_string()))?;

        let signature_algorithm = match policy.signature_algorithm {
            Some(algorithm) if public_key.supports(algorithm) => algorithm,
            Some(algorithm) => {
                return Err(CsrForgeError::KeyConstructionError(format!(
                    "CA key cannot produce {algorithm:?} signatures"
                )));
            }
            None => public_key.default_signature_algorithm(),
        };

        let key_identifier = match certificate.extension(SubjectKeyIdentifier::OID) {
            Some(ext) => SubjectKeyIdentifier::from_x509_extension_value(ext.extn_value.as_bytes())?.0,
            None => key_identifier(&tbs.subject_public_key_info),
        };

        Ok(Self {
            not_after: from_x509_time(&tbs.validity.not_after),
            certificate,
            signature_algorithm,
            key_identifier,
            policy,
            issued: AtomicU64::new(0),
        })
    }

    /// Parses a single PEM `CERTIFICATE` block.
    pub fn from_pem(pem_bytes: &[u8], policy: CaPolicy) -> Result<Self> {
        Self::new(Certificate::from_pem(pem_bytes)?, policy)
    }

    pub fn certificate(&self) -> &Certificate {
        &self.certificate
    }

    /// The CA subject; the issuer name of everything issued under this CA.
    pub fn subject(&self) -> &x509_cert::name::Name {
        self.certificate.subject()
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.certificate.inner.tbs_certificate.subject_public_key_info
    }

    pub fn signature_algorithm(&self) -> SignatureAlgorithm {
        self.signature_algorithm
    }

    /// Identifier placed in the authority key identifier of issued certificates.
    pub fn key_identifier(&self) -> &[u8] {
        &self.key_identifier
    }

    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    pub fn policy(&self) -> &CaPolicy {
        &self.policy
    }

    /// Allocates a serial number, unique for this CA instance.
    pub fn next_serial(&self) -> Vec<u8> {
        let count = self.issued.fetch_add(1, Ordering::Relaxed) + 1;
        match self.policy.serial {
            SerialPolicy::Sequential => {
                let bytes = count.to_be_bytes();
                let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
                bytes[first..].to_vec()
            }
            SerialPolicy::Random => {
                let mut serial = vec![0u8; 8];
                OsRng.fill_bytes(&mut serial);
                // Positive and of constant length.
                serial[0] = (serial[0] & 0x7f) | 0x40;
                serial.extend_from_slice(&count.to_be_bytes());
                serial
            }
        }
    }

    /// The validity window for a certificate issued at `now`.
    ///
    /// Rejects a non-positive lifetime, a negative backdate, windows outside the representable
    /// range and, when clamping, a CA that has already expired.
    pub fn validity_at(&self, now: OffsetDateTime) -> Result<Validity> {
        if self.policy.validity_days <= 0 {
            return Err(CsrForgeError::ValidationError(format!(
                "validity of {} days must be positive",
                self.policy.validity_days
            )));
        }
        if self.policy.backdate_minutes < 0 {
            return Err(CsrForgeError::ValidationError(format!(
                "backdate of {} minutes must not be negative",
                self.policy.backdate_minutes
            )));
        }
        let validity = Validity::starting_at(
            now,
            policy_duration(self.policy.backdate_minutes, 60, "backdate")?,
            policy_duration(self.policy.validity_days, 86_400, "validity")?,
        )?;
        if !self.policy.clamp_to_ca_expiry {
            return Ok(validity);
        }

        let validity = validity.clamp_to(self.not_after);
        if validity.not_after <= validity.not_before {
            return Err(CsrForgeError::ValidationError(format!(
                "CA certificate expired at {}",
                self.not_after
            )));
        }
        Ok(validity)
    }
}

fn policy_duration(value: i64, unit_seconds: i64, what: &str) -> Result<Duration> {
    value
        .checked_mul(unit_seconds)
        .map(Duration::seconds)
        .ok_or_else(|| CsrForgeError::ValidationError(format!("{what} of {value} is out of range")))
}

/// Parses the CA certificate and asks `factory` for a backend bound to it.
pub fn load_ca(
    ca_pem: &[u8],
    policy: CaPolicy,
    factory: &dyn BackendFactory,
) -> Result<(CaIdentity, Box<dyn SigningBackend>)> {
    let ca = CaIdentity::from_pem(ca_pem, policy)?;
    let backend = factory.construct(&ca).map_err(|e| match e {
        CsrForgeError::KeyConstructionError(_) => e,
        other => CsrForgeError::KeyConstructionError(other.to_string()),
    })?;
    info!(
        "loaded CA {} signing with {:?}",
        ca.subject(),
        ca.signature_algorithm()
    );
    Ok((ca, backend))
}

/// Reads the CA certificate from `path`, then behaves like [`load_ca`].
pub fn load_ca_file(
    path: impl AsRef<Path>,
    policy: CaPolicy,
    factory: &dyn BackendFactory,
) -> Result<(CaIdentity, Box<dyn SigningBackend>)> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)
        .map_err(|e| CsrForgeError::ReadError(format!("{}: {e}", path.display())))?;
    load_ca(&bytes, policy, factory)
}

/// Creates a self-signed CA certificate for `key`.
///
/// Used to bootstrap a CA for local testing; the issuance pipeline itself never calls it.
pub fn self_signed_ca(
    subject: &DistinguishedName,
    key: &KeyPair,
    validity: Validity,
) -> Result<Certificate> {
    let spki = key.as_spki()?;
    let name = subject.as_x509_name()?;
    let key_usage: FlagSet<KeyUsages> =
        KeyUsages::KeyCertSign | KeyUsages::CRLSign | KeyUsages::DigitalSignature;

    let tbs = TbsCertificate {
        serial_number: vec![1],
        signature_algorithm: key.default_signature_algorithm(),
        issuer: name.clone(),
        validity,
        subject: name,
        extensions: vec![
            ExtensionParam::from_extension(
                BasicConstraints {
                    is_ca: true,
                    max_path_length: None,
                },
                true,
            )?,
            ExtensionParam::from_extension(KeyUsage(key_usage), true)?,
            ExtensionParam::from_extension(SubjectKeyIdentifier(key_identifier(&spki)), false)?,
        ],
        subject_public_key_info: spki,
    };

    let algorithm = tbs.signature_algorithm;
    tbs.sign_with(|bytes| key.sign_data(bytes, algorithm))
}
