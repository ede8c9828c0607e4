use der::Encode;
use x509_cert::Version;
use x509_cert::certificate::{CertificateInner, TbsCertificateInner};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::SubjectPublicKeyInfoOwned;

use crate::cert::params::{ExtensionParam, Validity};
use crate::cert::{Certificate, SignatureAlgorithm, to_x509_time};
use crate::error::{CsrForgeError, Result};

/// Represents the "To Be Signed" (TBS) portion of an X.509 certificate.
///
/// # Fields
/// * `serial_number` - The unique identifier for the certificate, big-endian.
/// * `signature_algorithm` - The algorithm the issuer signs with.
/// * `issuer` - The issuer name, copied verbatim from the CA certificate.
/// * `validity` - The `notBefore`/`notAfter` window.
/// * `subject` - The subject name.
/// * `subject_public_key_info` - The subject's public key, copied from the request.
/// * `extensions` - X.509 v3 extensions, in encoding order.
pub struct TbsCertificate {
    pub serial_number: Vec<u8>,
    pub signature_algorithm: SignatureAlgorithm,
    pub issuer: x509_cert::name::Name,
    pub validity: Validity,
    pub subject: x509_cert::name::Name,
    pub subject_public_key_info: SubjectPublicKeyInfoOwned,
    pub extensions: Vec<ExtensionParam>,
}

impl TbsCertificate {
    /// Converts the `TbsCertificate` into a `TbsCertificateInner` for DER encoding.
    pub fn to_tbs_certificate_inner(&self) -> Result<TbsCertificateInner> {
        let serial_number = SerialNumber::new(self.serial_number.as_slice())
            .map_err(|e| CsrForgeError::EncodingError(format!("invalid serial number: {e}")))?;

        let validity = x509_cert::time::Validity {
            not_before: to_x509_time(self.validity.not_before)?,
            not_after: to_x509_time(self.validity.not_after)?,
        };

        let extensions = self
            .extensions
            .iter()
            .map(ExtensionParam::to_x509)
            .collect::<Result<Vec<_>>>()?;

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number,
            signature: self.signature_algorithm.into(),
            issuer: self.issuer.clone(),
            validity,
            subject: self.subject.clone(),
            subject_public_key_info: self.subject_public_key_info.clone(),
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: (!extensions.is_empty()).then_some(extensions),
        })
    }

    /// Encodes the `TbsCertificate` into the DER bytes that get signed.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.to_tbs_certificate_inner()?.to_der()?)
    }

    /// Encodes the TBS, hands the bytes to `sign` and attaches the returned signature verbatim.
    ///
    /// An empty signature is rejected with `SigningError`.
    pub fn sign_with<F>(&self, sign: F) -> Result<Certificate>
    where
        F: FnOnce(&[u8]) -> Result<Vec<u8>>,
    {
        let tbs_certificate = self.to_tbs_certificate_inner()?;
        let tbs_der = tbs_certificate.to_der()?;

        let signature = sign(&tbs_der).map_err(|e| match e {
            CsrForgeError::SigningError(_) => e,
            other => CsrForgeError::SigningError(other.to_string()),
        })?;
        if signature.is_empty() {
            return Err(CsrForgeError::SigningError(
                "signing backend returned an empty signature".to_string(),
            ));
        }

        let inner = CertificateInner {
            tbs_certificate,
            signature_algorithm: self.signature_algorithm.into(),
            signature: der::asn1::BitString::from_bytes(&signature)?,
        };

        Ok(Certificate { inner })
    }
}
