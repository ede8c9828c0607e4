use der::flagset::FlagSet;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::backend::SigningBackend;
use crate::ca::CaIdentity;
use crate::cert::extensions::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, ExtendedKeyUsageOption, KeyUsage,
    KeyUsages, SubjectAltName, SubjectKeyIdentifier, key_identifier,
};
use crate::cert::params::{DistinguishedName, ExtensionParam, common_name_of};
use crate::csr::CertificateSigningRequest;
use crate::error::Result;
use crate::key::PublicKey;
use crate::request::{CertificateRequest, Host, Name, ensure_usable_subject, parse_hosts};
use crate::tbs_certificate::TbsCertificate;

/// Subject fields that replace whatever the CSR asked for.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectOverride {
    #[serde(rename = "CN", default)]
    pub cn: String,
    #[serde(default)]
    pub names: Vec<Name>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl From<&CertificateRequest> for SubjectOverride {
    /// The subject fields of a request description, as passed along when signing its own CSR.
    fn from(req: &CertificateRequest) -> Self {
        Self {
            cn: req.cn.clone(),
            names: req.names.clone(),
            hosts: req.hosts.clone(),
        }
    }
}

impl SubjectOverride {
    /// An override with no CN, names or hosts leaves the CSR subject in place.
    pub fn is_empty(&self) -> bool {
        self.cn.is_empty() && self.names.is_empty() && self.hosts.is_empty()
    }
}

/// A request to issue a certificate for a DER-encoded CSR.
#[derive(Clone, Debug, Default)]
pub struct SignRequest {
    pub request: Vec<u8>,
    pub subject: Option<SubjectOverride>,
}

/// The subject name and SAN entries an issued certificate will carry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSubject {
    pub name: x509_cert::name::Name,
    pub hosts: Vec<Host>,
}

/// Decides the subject of the issued certificate.
///
/// A non-empty override replaces both the CSR subject and its requested SAN. Either way the
/// result must carry a common name or at least one host.
pub fn resolve_subject(
    csr: &CertificateSigningRequest,
    subject_override: Option<&SubjectOverride>,
) -> Result<ResolvedSubject> {
    match subject_override.filter(|o| !o.is_empty()) {
        Some(o) => {
            ensure_usable_subject(&o.cn, o.hosts.len())?;
            let hosts = parse_hosts(&o.hosts)?;
            let name = DistinguishedName::builder()
                .common_name(o.cn.clone())
                .names(o.names.clone())
                .build()
                .as_x509_name()?;
            debug!("subject override replaces CSR subject");
            Ok(ResolvedSubject { name, hosts })
        }
        None => {
            let hosts = csr.requested_hosts()?;
            let cn = common_name_of(csr.subject()).unwrap_or_default();
            ensure_usable_subject(&cn, hosts.len())?;
            Ok(ResolvedSubject {
                name: csr.subject().clone(),
                hosts,
            })
        }
    }
}

/// Issues end-entity certificates under one CA through a signing backend.
pub struct LocalSigner {
    ca: CaIdentity,
    backend: Box<dyn SigningBackend>,
}

impl LocalSigner {
    pub fn new(ca: CaIdentity, backend: Box<dyn SigningBackend>) -> Self {
        Self { ca, backend }
    }

    pub fn ca(&self) -> &CaIdentity {
        &self.ca
    }

    /// Issues a certificate and returns its DER encoding.
    pub fn sign(&self, req: &SignRequest) -> Result<Vec<u8>> {
        self.sign_at(req, OffsetDateTime::now_utc())
    }

    /// Like [`Self::sign`], with the validity window computed from `now`.
    pub fn sign_at(&self, req: &SignRequest, now: OffsetDateTime) -> Result<Vec<u8>> {
        let csr = CertificateSigningRequest::from_der(&req.request)?;
        csr.verify_signature()?;

        let subject = resolve_subject(&csr, req.subject.as_ref())?;
        let validity = self.ca.validity_at(now)?;
        let subject_key = PublicKey::from_x509spki(csr.public_key_info())?;
        let spki = csr.public_key_info().clone();

        let mut extensions = Vec::with_capacity(6);
        if !subject.hosts.is_empty() {
            // RFC 5280 4.2.1.6: critical when the subject name is empty.
            extensions.push(ExtensionParam::from_extension(
                SubjectAltName {
                    names: subject.hosts.clone(),
                },
                subject.name.0.is_empty(),
            )?);
        }
        extensions.push(ExtensionParam::from_extension(
            BasicConstraints {
                is_ca: false,
                max_path_length: None,
            },
            true,
        )?);

        let mut key_usage: FlagSet<KeyUsages> = KeyUsages::DigitalSignature.into();
        if subject_key.is_rsa() {
            key_usage |= KeyUsages::KeyEncipherment;
        }
        extensions.push(ExtensionParam::from_extension(KeyUsage(key_usage), true)?);
        extensions.push(ExtensionParam::from_extension(
            ExtendedKeyUsage {
                usage: vec![
                    ExtendedKeyUsageOption::ServerAuth,
                    ExtendedKeyUsageOption::ClientAuth,
                ],
            },
            false,
        )?);
        extensions.push(ExtensionParam::from_extension(
            SubjectKeyIdentifier(key_identifier(&spki)),
            false,
        )?);
        extensions.push(ExtensionParam::from_extension(
            AuthorityKeyIdentifier {
                key_identifier: self.ca.key_identifier().to_vec(),
            },
            false,
        )?);

        let tbs = TbsCertificate {
            serial_number: self.ca.next_serial(),
            signature_algorithm: self.ca.signature_algorithm(),
            issuer: self.ca.subject().clone(),
            validity,
            subject: subject.name,
            subject_public_key_info: spki,
            extensions,
        };

        let cert = tbs.sign_with(|bytes| self.backend.sign(bytes))?;
        info!(
            "issued certificate for {} with {} host(s), valid until {}",
            cert.subject(),
            subject.hosts.len(),
            tbs.validity.not_after
        );
        cert.to_der()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PrivateKeyFactory;
    use crate::ca::{CaPolicy, load_ca, self_signed_ca};
    use crate::cert::extensions::ToAndFromX509Extension;
    use crate::cert::params::Validity;
    use crate::cert::{Certificate, SignatureAlgorithm};
    use crate::csr::Generator;
    use crate::error::CsrForgeError;
    use crate::key::KeyPair;
    use crate::request::DefaultValidator;

    fn signer() -> LocalSigner {
        let key = KeyPair::generate_ecdsa_p256();
        let subject = DistinguishedName::builder()
            .common_name("Issuer Test CA".to_string())
            .build();
        let pem = self_signed_ca(&subject, &key, Validity::for_days(3650))
            .unwrap()
            .to_pem()
            .unwrap();
        let (ca, backend) = load_ca(
            pem.as_bytes(),
            CaPolicy::default(),
            &PrivateKeyFactory::new(key),
        )
        .unwrap();
        LocalSigner::new(ca, backend)
    }

    fn csr_for(cn: &str, hosts: &[&str]) -> Vec<u8> {
        let req = CertificateRequest {
            cn: cn.to_string(),
            hosts: hosts.iter().map(|h| h.to_string()).collect(),
            ..Default::default()
        };
        Generator::new(DefaultValidator).generate(&req).unwrap().csr
    }

    #[test]
    fn test_issued_certificate_shape() {
        let signer = signer();
        let der = signer
            .sign(&SignRequest {
                request: csr_for("example.com", &["example.com"]),
                subject: None,
            })
            .unwrap();
        let cert = Certificate::from_der(&der).unwrap();

        assert_eq!(cert.issuer(), signer.ca().subject());
        assert_eq!(common_name_of(cert.subject()).as_deref(), Some("example.com"));
        assert_eq!(
            SignatureAlgorithm::try_from(&cert.inner.signature_algorithm).unwrap(),
            SignatureAlgorithm::Sha256WithECDSA
        );

        let san = ExtensionParam::from_x509(cert.extension(SubjectAltName::OID).unwrap());
        assert!(!san.critical);
        assert_eq!(
            san.to_extension::<SubjectAltName>().unwrap().names,
            vec![Host::Dns("example.com".to_string())]
        );

        let bc = ExtensionParam::from_x509(cert.extension(BasicConstraints::OID).unwrap());
        assert!(bc.critical);
        assert!(!bc.to_extension::<BasicConstraints>().unwrap().is_ca);

        let ku = ExtensionParam::from_x509(cert.extension(KeyUsage::OID).unwrap());
        assert_eq!(
            ku.to_extension::<KeyUsage>().unwrap().0,
            FlagSet::from(KeyUsages::DigitalSignature)
        );

        let aki = ExtensionParam::from_x509(cert.extension(AuthorityKeyIdentifier::OID).unwrap());
        assert_eq!(
            aki.to_extension::<AuthorityKeyIdentifier>()
                .unwrap()
                .key_identifier,
            signer.ca().key_identifier()
        );
    }

    #[test]
    fn test_signature_verifies_under_ca_key() {
        let signer = signer();
        let der = signer
            .sign(&SignRequest {
                request: csr_for("verify.example", &[]),
                subject: None,
            })
            .unwrap();
        let cert = Certificate::from_der(&der).unwrap();
        let ca_key = PublicKey::from_x509spki(signer.ca().public_key_info()).unwrap();
        let tbs = der::Encode::to_der(&cert.inner.tbs_certificate).unwrap();
        ca_key
            .verify(signer.ca().signature_algorithm(), &tbs, cert.signature())
            .unwrap();
    }

    #[test]
    fn test_override_replaces_subject_and_hosts() {
        let signer = signer();
        let subject = SubjectOverride {
            cn: "override.example".to_string(),
            hosts: vec!["10.0.0.1".to_string()],
            ..Default::default()
        };
        let der = signer
            .sign(&SignRequest {
                request: csr_for("original.example", &["original.example"]),
                subject: Some(subject),
            })
            .unwrap();
        let cert = Certificate::from_der(&der).unwrap();
        assert_eq!(
            common_name_of(cert.subject()).as_deref(),
            Some("override.example")
        );
        let san = ExtensionParam::from_x509(cert.extension(SubjectAltName::OID).unwrap());
        assert_eq!(
            san.to_extension::<SubjectAltName>().unwrap().names,
            vec![Host::Ip("10.0.0.1".parse().unwrap())]
        );
    }

    #[test]
    fn test_request_subject_as_override_matches_csr() {
        let req = CertificateRequest {
            cn: "example.com".to_string(),
            hosts: vec!["example.com".to_string(), "192.0.2.10".to_string()],
            ..Default::default()
        };
        let generated = Generator::new(DefaultValidator).generate(&req).unwrap();
        let csr = CertificateSigningRequest::from_der(&generated.csr).unwrap();

        let from_request = resolve_subject(&csr, Some(&SubjectOverride::from(&req))).unwrap();
        let from_csr = resolve_subject(&csr, None).unwrap();
        assert_eq!(from_request, from_csr);
    }

    #[test]
    fn test_empty_override_is_ignored() {
        let csr = CertificateSigningRequest::from_der(&csr_for("keep.example", &[])).unwrap();
        let resolved = resolve_subject(&csr, Some(&SubjectOverride::default())).unwrap();
        assert_eq!(&resolved.name, csr.subject());
        assert!(resolved.hosts.is_empty());
    }

    #[test]
    fn test_hosts_only_subject_marks_san_critical() {
        let signer = signer();
        let der = signer
            .sign(&SignRequest {
                request: csr_for("", &["hosts-only.example"]),
                subject: None,
            })
            .unwrap();
        let cert = Certificate::from_der(&der).unwrap();
        assert!(cert.subject().0.is_empty());
        assert!(cert.extension(SubjectAltName::OID).unwrap().critical);
    }

    #[test]
    fn test_override_with_invalid_host() {
        let signer = signer();
        let err = signer
            .sign(&SignRequest {
                request: csr_for("example.com", &[]),
                subject: Some(SubjectOverride {
                    hosts: vec!["bad host".to_string()],
                    ..Default::default()
                }),
            })
            .unwrap_err();
        assert!(matches!(err, CsrForgeError::ValidationError(_)));
    }

    #[test]
    fn test_expired_ca_refuses_to_issue() {
        let key = KeyPair::generate_ecdsa_p256();
        let subject = DistinguishedName::builder()
            .common_name("Expired CA".to_string())
            .build();
        let pem = self_signed_ca(&subject, &key, Validity::for_days(-1))
            .unwrap()
            .to_pem()
            .unwrap();
        let (ca, backend) = load_ca(
            pem.as_bytes(),
            CaPolicy::default(),
            &PrivateKeyFactory::new(key),
        )
        .unwrap();

        let err = LocalSigner::new(ca, backend)
            .sign(&SignRequest {
                request: csr_for("example.com", &[]),
                subject: None,
            })
            .unwrap_err();
        assert!(matches!(err, CsrForgeError::ValidationError(_)));
    }

    #[test]
    fn test_garbage_csr_is_parse_error() {
        let err = signer()
            .sign(&SignRequest {
                request: b"not a csr".to_vec(),
                subject: None,
            })
            .unwrap_err();
        assert!(matches!(err, CsrForgeError::ParseError(_)));
    }

    #[test]
    fn test_backend_failure_is_signing_error() {
        let key = KeyPair::generate_ed25519();
        let subject = DistinguishedName::builder()
            .common_name("Broken CA".to_string())
            .build();
        let pem = self_signed_ca(&subject, &key, Validity::for_days(30))
            .unwrap()
            .to_pem()
            .unwrap();

        struct Offline;
        impl SigningBackend for Offline {
            fn sign(&self, _tbs: &[u8]) -> Result<Vec<u8>> {
                Err(CsrForgeError::SigningError("backend offline".to_string()))
            }
        }
        let factory = |_: &CaIdentity| -> Result<Box<dyn SigningBackend>> { Ok(Box::new(Offline)) };
        let (ca, backend) = load_ca(pem.as_bytes(), CaPolicy::default(), &factory).unwrap();

        let err = LocalSigner::new(ca, backend)
            .sign(&SignRequest {
                request: csr_for("example.com", &[]),
                subject: None,
            })
            .unwrap_err();
        assert_eq!(
            err,
            CsrForgeError::SigningError("backend offline".to_string())
        );
    }
}
