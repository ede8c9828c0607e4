pub mod extensions;
pub mod params;

use std::time::SystemTime;

use der::asn1::{GeneralizedTime, UtcTime};
use der::{Decode, Encode, EncodePem};
use time::OffsetDateTime;
use x509_cert::certificate::CertificateInner;
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{CsrForgeError, Result};

/// Represents the supported signature algorithms for certificates and requests.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA encryption (PKCS#1 v1.5).
    Sha256WithRSA,
    /// SHA-384 with RSA encryption (PKCS#1 v1.5).
    Sha384WithRSA,
    /// SHA-512 with RSA encryption (PKCS#1 v1.5).
    Sha512WithRSA,
    /// ECDSA over P-256 with SHA-256.
    Sha256WithECDSA,
    /// ECDSA over P-384 with SHA-384.
    Sha384WithECDSA,
    /// ECDSA over P-521 with SHA-512.
    Sha512WithECDSA,
    /// Pure Ed25519.
    Ed25519,
}

impl SignatureAlgorithm {
    pub fn is_rsa(&self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::Sha256WithRSA
                | SignatureAlgorithm::Sha384WithRSA
                | SignatureAlgorithm::Sha512WithRSA
        )
    }
}

impl From<SignatureAlgorithm> for AlgorithmIdentifierOwned {
    /// Converts a `SignatureAlgorithm` into an `AlgorithmIdentifierOwned`.
    ///
    /// RSA identifiers carry an explicit NULL parameter, ECDSA and Ed25519 identifiers carry
    /// none (RFC 4055, RFC 5758, RFC 8410).
    fn from(value: SignatureAlgorithm) -> Self {
        let (oid, parameters) = match value {
            SignatureAlgorithm::Sha256WithRSA => (
                const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
                Some(der::Any::null()),
            ),
            SignatureAlgorithm::Sha384WithRSA => (
                const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
                Some(der::Any::null()),
            ),
            SignatureAlgorithm::Sha512WithRSA => (
                const_oid::db::rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
                Some(der::Any::null()),
            ),
            SignatureAlgorithm::Sha256WithECDSA => (const_oid::db::rfc5912::ECDSA_WITH_SHA_256, None),
            SignatureAlgorithm::Sha384WithECDSA => (const_oid::db::rfc5912::ECDSA_WITH_SHA_384, None),
            SignatureAlgorithm::Sha512WithECDSA => (const_oid::db::rfc5912::ECDSA_WITH_SHA_512, None),
            SignatureAlgorithm::Ed25519 => (const_oid::db::rfc8410::ID_ED_25519, None),
        };
        AlgorithmIdentifierOwned { oid, parameters }
    }
}

impl TryFrom<&AlgorithmIdentifierOwned> for SignatureAlgorithm {
    type Error = CsrForgeError;

    fn try_from(value: &AlgorithmIdentifierOwned) -> Result<Self> {
        match value.oid {
            const_oid::db::rfc5912::SHA_256_WITH_RSA_ENCRYPTION => Ok(SignatureAlgorithm::Sha256WithRSA),
            const_oid::db::rfc5912::SHA_384_WITH_RSA_ENCRYPTION => Ok(SignatureAlgorithm::Sha384WithRSA),
            const_oid::db::rfc5912::SHA_512_WITH_RSA_ENCRYPTION => Ok(SignatureAlgorithm::Sha512WithRSA),
            const_oid::db::rfc5912::ECDSA_WITH_SHA_256 => Ok(SignatureAlgorithm::Sha256WithECDSA),
            const_oid::db::rfc5912::ECDSA_WITH_SHA_384 => Ok(SignatureAlgorithm::Sha384WithECDSA),
            const_oid::db::rfc5912::ECDSA_WITH_SHA_512 => Ok(SignatureAlgorithm::Sha512WithECDSA),
            const_oid::db::rfc8410::ID_ED_25519 => Ok(SignatureAlgorithm::Ed25519),
            other => Err(CsrForgeError::ParseError(format!(
                "unsupported signature algorithm {other}"
            ))),
        }
    }
}

/// Converts a timestamp into an X.509 `Time`, using UTCTime through 2049 and GeneralizedTime
/// afterwards (RFC 5280 section 4.1.2.5).
pub fn to_x509_time(at: OffsetDateTime) -> Result<x509_cert::time::Time> {
    let date_time = der::DateTime::from_system_time(SystemTime::from(at))
        .map_err(|e| CsrForgeError::EncodingError(format!("time out of range: {e}")))?;
    if date_time.year() < 2050 {
        Ok(x509_cert::time::Time::UtcTime(UtcTime::from_date_time(
            date_time,
        )?))
    } else {
        Ok(x509_cert::time::Time::GeneralTime(
            GeneralizedTime::from_date_time(date_time),
        ))
    }
}

/// Converts an X.509 `Time` back into an `OffsetDateTime`.
pub fn from_x509_time(value: &x509_cert::time::Time) -> OffsetDateTime {
    OffsetDateTime::from(value.to_system_time())
}

/// Represents a parsed X.509 certificate.
///
/// This struct provides methods to decode and encode the certificate in DER or PEM formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    /// Decodes a DER certificate.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertificateInner::from_der(der)
            .map_err(|e| CsrForgeError::ParseError(format!("malformed certificate: {e}")))?;
        Ok(Self { inner })
    }

    /// Decodes a single PEM block labelled `CERTIFICATE`.
    pub fn from_pem(pem_bytes: &[u8]) -> Result<Self> {
        let block = pem::parse(pem_bytes)?;
        if block.tag() != "CERTIFICATE" {
            return Err(CsrForgeError::ParseError(format!(
                "expected a CERTIFICATE PEM block, found {:?}",
                block.tag()
            )));
        }
        Self::from_der(block.contents())
    }

    /// Encodes the certificate into DER format.
    ///
    /// # Returns
    /// A byte vector containing the DER-encoded certificate.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| CsrForgeError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    ///
    /// # Returns
    /// A string containing the PEM-encoded certificate.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| CsrForgeError::EncodingError(e.to_string()))
    }

    pub fn subject(&self) -> &x509_cert::name::Name {
        &self.inner.tbs_certificate.subject
    }

    pub fn issuer(&self) -> &x509_cert::name::Name {
        &self.inner.tbs_certificate.issuer
    }

    pub fn serial_number(&self) -> &[u8] {
        self.inner.tbs_certificate.serial_number.as_bytes()
    }

    /// The raw signature bits.
    pub fn signature(&self) -> &[u8] {
        self.inner.signature.raw_bytes()
    }

    /// Finds an extension by OID.
    pub fn extension(&self, oid: const_oid::ObjectIdentifier) -> Option<&x509_cert::ext::Extension> {
        self.inner
            .tbs_certificate
            .extensions
            .as_ref()?
            .iter()
            .find(|ext| ext.extn_id == oid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_algorithm_oid_round_trip() {
        for algorithm in [
            SignatureAlgorithm::Sha256WithRSA,
            SignatureAlgorithm::Sha512WithRSA,
            SignatureAlgorithm::Sha384WithECDSA,
            SignatureAlgorithm::Ed25519,
        ] {
            let identifier: AlgorithmIdentifierOwned = algorithm.into();
            assert_eq!(SignatureAlgorithm::try_from(&identifier).unwrap(), algorithm);
        }
    }

    #[test]
    fn test_rsa_identifier_has_null_parameters() {
        let identifier: AlgorithmIdentifierOwned = SignatureAlgorithm::Sha256WithRSA.into();
        assert_eq!(identifier.parameters, Some(der::Any::null()));
        let identifier: AlgorithmIdentifierOwned = SignatureAlgorithm::Ed25519.into();
        assert!(identifier.parameters.is_none());
    }

    #[test]
    fn test_time_encoding_switches_after_2049() {
        let early = time::macros::datetime!(2049-12-31 23:59:59 UTC);
        assert!(matches!(
            to_x509_time(early).unwrap(),
            x509_cert::time::Time::UtcTime(_)
        ));
        let late = time::macros::datetime!(2050-01-01 00:00:00 UTC);
        let encoded = to_x509_time(late).unwrap();
        assert!(matches!(encoded, x509_cert::time::Time::GeneralTime(_)));
        assert_eq!(from_x509_time(&encoded), late);
    }

    #[test]
    fn test_garbage_is_not_a_certificate() {
        assert!(matches!(
            Certificate::from_pem(b"definitely not PEM"),
            Err(CsrForgeError::ParseError(_))
        ));
        assert!(matches!(
            Certificate::from_der(&[0x30, 0x03, 0x02, 0x01, 0x01]),
            Err(CsrForgeError::ParseError(_))
        ));
    }
}
