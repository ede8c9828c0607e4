//! Key and PKCS#10 request generation, and parsing of incoming requests.

use der::asn1::{BitString, SetOfVec};
use der::{Any, Decode, Encode};
use log::{debug, info};
use x509_cert::attr::Attribute;
use x509_cert::ext::Extension;
use x509_cert::request::{CertReq, CertReqInfo, Version};
use x509_cert::spki::{ObjectIdentifier, SubjectPublicKeyInfoOwned};

use crate::cert::SignatureAlgorithm;
use crate::cert::extensions::{SubjectAltName, ToAndFromX509Extension};
use crate::cert::params::{DistinguishedName, ExtensionParam};
use crate::error::{CsrForgeError, Result};
use crate::key::{KeyPair, PublicKey};
use crate::request::{CertificateRequest, Host, Validator, parse_hosts};

/// PKCS#9 extensionRequest attribute (RFC 2985).
const EXTENSION_REQUEST: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// A PKCS#10 certificate signing request.
#[derive(Debug, Clone)]
pub struct CertificateSigningRequest {
    inner: CertReq,
}

impl CertificateSigningRequest {
    /// Builds and self-signs a request for `subject` and `hosts` with `key`.
    pub fn new(subject: &DistinguishedName, hosts: &[Host], key: &KeyPair) -> Result<Self> {
        let mut attributes = SetOfVec::new();
        if !hosts.is_empty() {
            let san = ExtensionParam::from_extension(
                SubjectAltName {
                    names: hosts.to_vec(),
                },
                false,
            )?;
            let extensions: Vec<Extension> = vec![san.to_x509()?];
            attributes.insert(Attribute {
                oid: EXTENSION_REQUEST,
                values: SetOfVec::try_from(vec![Any::encode_from(&extensions)?])?,
            })?;
        }

        let info = CertReqInfo {
            version: Version::V1,
            subject: subject.as_x509_name()?,
            public_key: key.as_spki()?,
            attributes,
        };

        let algorithm = key.default_signature_algorithm();
        let signature = key.sign_data(&info.to_der()?, algorithm)?;

        Ok(Self {
            inner: CertReq {
                info,
                algorithm: algorithm.into(),
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }

    /// Parses a DER request. Only the structure is checked; see [`Self::verify_signature`].
    pub fn from_der(der: &[u8]) -> Result<Self> {
        let inner = CertReq::from_der(der)
            .map_err(|e| CsrForgeError::ParseError(format!("malformed certificate request: {e}")))?;
        Ok(Self { inner })
    }

    pub fn to_der(&self) -> Result<Vec<u8>> {
        Ok(self.inner.to_der()?)
    }

    pub fn subject(&self) -> &x509_cert::name::Name {
        &self.inner.info.subject
    }

    pub fn public_key_info(&self) -> &SubjectPublicKeyInfoOwned {
        &self.inner.info.public_key
    }

    /// Checks the proof of possession: the request must be signed by its own key.
    pub fn verify_signature(&self) -> Result<()> {
        let public_key = PublicKey::from_x509spki(&self.inner.info.public_key)?;
        let algorithm = SignatureAlgorithm::try_from(&self.inner.algorithm)?;
        let signature = self.inner.signature.as_bytes().ok_or_else(|| {
            CsrForgeError::ParseError("request signature has unused bits".to_string())
        })?;
        public_key
            .verify(algorithm, &self.inner.info.to_der()?, signature)
            .map_err(|e| {
                CsrForgeError::ParseError(format!("request signature check failed: {e}"))
            })
    }

    /// Extensions carried in the extensionRequest attribute.
    pub fn requested_extensions(&self) -> Result<Vec<Extension>> {
        let mut requested = Vec::new();
        for attribute in self.inner.info.attributes.iter() {
            if attribute.oid != EXTENSION_REQUEST {
                continue;
            }
            for value in attribute.values.iter() {
                let extensions: Vec<Extension> = value.decode_as().map_err(|e| {
                    CsrForgeError::ParseError(format!("malformed extension request: {e}"))
                })?;
                requested.extend(extensions);
            }
        }
        Ok(requested)
    }

    /// Hosts requested through a subjectAltName extension, in order.
    pub fn requested_hosts(&self) -> Result<Vec<Host>> {
        let mut hosts = Vec::new();
        for extension in self.requested_extensions()? {
            if extension.extn_id == SubjectAltName::OID {
                let san = SubjectAltName::from_x509_extension_value(extension.extn_value.as_bytes())?;
                hosts.extend(san.names);
            }
        }
        Ok(hosts)
    }
}

/// A freshly generated request and the key that signed it.
#[derive(Debug)]
pub struct GeneratedRequest {
    /// DER-encoded PKCS#10 request.
    pub csr: Vec<u8>,
    /// DER-encoded PKCS#8 private key.
    pub key: Vec<u8>,
    pub key_pair: KeyPair,
}

/// Generates key pairs and requests from request descriptions.
pub struct Generator {
    validator: Box<dyn Validator>,
}

impl Generator {
    pub fn new(validator: impl Validator + 'static) -> Self {
        Self {
            validator: Box::new(validator),
        }
    }

    /// Validates `req`, generates a fresh key and returns the signed request with the key.
    pub fn generate(&self, req: &CertificateRequest) -> Result<GeneratedRequest> {
        self.validator.validate(req)?;
        let hosts = parse_hosts(&req.hosts)?;
        req.key.validate()?;

        debug!(
            "generating {:?} key of {} bits",
            req.key.algorithm,
            req.key.effective_size()
        );
        let key_pair = KeyPair::generate(&req.key)?;

        let subject = DistinguishedName::builder()
            .common_name(req.cn.clone())
            .names(req.names.clone())
            .build();
        let csr = CertificateSigningRequest::new(&subject, &hosts, &key_pair)?;
        info!(
            "generated certificate request for {:?} with {} host(s)",
            req.cn,
            hosts.len()
        );

        Ok(GeneratedRequest {
            csr: csr.to_der()?,
            key: key_pair.to_pkcs8_der()?,
            key_pair,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{DefaultValidator, KeyAlgorithm, KeyRequest, Name};

    fn request(cn: &str, hosts: &[&str]) -> CertificateRequest {
        CertificateRequest {
            cn: cn.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_request_reflects_description() {
        let mut req = request("example.com", &["example.com", "10.1.2.3"]);
        req.names = vec![Name {
            country: Some("US".to_string()),
            organization: Some("Example Corp".to_string()),
            ..Default::default()
        }];

        let generated = Generator::new(DefaultValidator).generate(&req).unwrap();
        let csr = CertificateSigningRequest::from_der(&generated.csr).unwrap();

        let expected_subject = DistinguishedName::builder()
            .common_name("example.com".to_string())
            .names(req.names.clone())
            .build()
            .as_x509_name()
            .unwrap();
        assert_eq!(csr.subject(), &expected_subject);
        assert_eq!(
            csr.requested_hosts().unwrap(),
            vec![
                Host::Dns("example.com".to_string()),
                Host::Ip("10.1.2.3".parse().unwrap())
            ]
        );
        csr.verify_signature().unwrap();
        assert_eq!(
            csr.public_key_info(),
            &generated.key_pair.as_spki().unwrap()
        );
    }

    #[test]
    fn test_key_bytes_are_pkcs8_of_the_request_key() {
        let generated = Generator::new(DefaultValidator)
            .generate(&request("svc.internal", &[]))
            .unwrap();
        let imported = KeyPair::from_pkcs8_der(&generated.key).unwrap();
        let csr = CertificateSigningRequest::from_der(&generated.csr).unwrap();
        assert_eq!(csr.public_key_info(), &imported.as_spki().unwrap());
        assert!(csr.requested_hosts().unwrap().is_empty());
    }

    #[test]
    fn test_each_key_algorithm_self_signs() {
        for (algorithm, size) in [
            (KeyAlgorithm::Rsa, 2048),
            (KeyAlgorithm::Ecdsa, 384),
            (KeyAlgorithm::Ecdsa, 521),
            (KeyAlgorithm::Ed25519, 0),
        ] {
            let mut req = request("algo.example", &["algo.example"]);
            req.key = KeyRequest { algorithm, size };
            let generated = Generator::new(DefaultValidator).generate(&req).unwrap();
            CertificateSigningRequest::from_der(&generated.csr)
                .unwrap()
                .verify_signature()
                .unwrap();
        }
    }

    #[test]
    fn test_empty_subject_is_validation_error() {
        let err = Generator::new(DefaultValidator)
            .generate(&request("", &[]))
            .unwrap_err();
        assert!(matches!(err, CsrForgeError::ValidationError(_)));
    }

    #[test]
    fn test_invalid_host_is_validation_error() {
        let err = Generator::new(DefaultValidator)
            .generate(&request("", &["not a valid host!!"]))
            .unwrap_err();
        assert!(matches!(err, CsrForgeError::ValidationError(_)));
    }

    #[test]
    fn test_custom_validator_runs_first() {
        let reject_all = |_: &CertificateRequest| -> Result<()> {
            Err(CsrForgeError::ValidationError("closed".to_string()))
        };
        let err = Generator::new(reject_all)
            .generate(&request("example.com", &[]))
            .unwrap_err();
        assert_eq!(err, CsrForgeError::ValidationError("closed".to_string()));
    }

    #[test]
    fn test_tampered_request_fails_signature_check() {
        let generated = Generator::new(DefaultValidator)
            .generate(&request("example.com", &["example.com"]))
            .unwrap();
        let mut csr = CertificateSigningRequest::from_der(&generated.csr).unwrap();
        csr.inner.info.subject = DistinguishedName::builder()
            .common_name("evil.example".to_string())
            .build()
            .as_x509_name()
            .unwrap();
        assert!(matches!(
            csr.verify_signature(),
            Err(CsrForgeError::ParseError(_))
        ));
    }

    #[test]
    fn test_garbage_request_is_parse_error() {
        assert!(matches!(
            CertificateSigningRequest::from_der(b"garbage"),
            Err(CsrForgeError::ParseError(_))
        ));
    }
}
