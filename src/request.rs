//! Certificate request descriptions and their validation.
//!
//! A request description is the JSON document handed to the tool:
//!
//! ```json
//! {
//!     "CN": "example.com",
//!     "hosts": ["example.com", "www.example.com"],
//!     "names": [{ "C": "US", "O": "Example Corp" }],
//!     "key": { "algo": "ecdsa", "size": 256 }
//! }
//! ```

use std::net::IpAddr;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{CsrForgeError, Result};

static DNS_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\*\.)?([A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?\.)*[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$")
        .expect("DNS name pattern is valid")
});

static EMAIL_LOCAL_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+$").expect("e-mail pattern is valid")
});

const MAX_DNS_NAME_LEN: usize = 253;

/// One entry of the `names` list: the non-CN parts of a distinguished name.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Name {
    #[serde(rename = "C", default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(rename = "ST", default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(rename = "L", default, skip_serializing_if = "Option::is_none")]
    pub locality: Option<String>,
    #[serde(rename = "O", default, skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(rename = "OU", default, skip_serializing_if = "Option::is_none")]
    pub organization_unit: Option<String>,
}

/// Key algorithms a request may ask for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    #[default]
    Ecdsa,
    Ed25519,
}

/// The `key` object of a request description.
///
/// A size of zero selects the algorithm's default size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRequest {
    #[serde(rename = "algo", default)]
    pub algorithm: KeyAlgorithm,
    #[serde(default)]
    pub size: u32,
}

impl Default for KeyRequest {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Ecdsa,
            size: 256,
        }
    }
}

impl KeyRequest {
    /// Returns the effective key size, resolving zero to the algorithm default.
    pub fn effective_size(&self) -> u32 {
        match (self.algorithm, self.size) {
            (KeyAlgorithm::Rsa, 0) => 2048,
            (KeyAlgorithm::Ecdsa, 0) => 256,
            (KeyAlgorithm::Ed25519, _) => 256,
            (_, size) => size,
        }
    }

    /// Checks that the algorithm and size combination can be generated.
    pub fn validate(&self) -> Result<()> {
        let size = self.effective_size();
        match self.algorithm {
            KeyAlgorithm::Rsa if !(2048..=8192).contains(&size) || size % 8 != 0 => {
                Err(CsrForgeError::ValidationError(format!(
                    "invalid RSA key size {size}, expected 2048 to 8192 bits"
                )))
            }
            KeyAlgorithm::Ecdsa if !matches!(size, 256 | 384 | 521) => {
                Err(CsrForgeError::ValidationError(format!(
                    "invalid ECDSA curve size {size}, expected 256, 384 or 521"
                )))
            }
            KeyAlgorithm::Ed25519 if !matches!(self.size, 0 | 256) => {
                Err(CsrForgeError::ValidationError(format!(
                    "invalid Ed25519 key size {}",
                    self.size
                )))
            }
            _ => Ok(()),
        }
    }
}

/// A certificate request description.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRequest {
    #[serde(rename = "CN", default)]
    pub cn: String,
    #[serde(default)]
    pub names: Vec<Name>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub key: KeyRequest,
}

impl CertificateRequest {
    /// Parses a request description from its JSON form.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| {
            CsrForgeError::ParseError(format!("malformed request description: {e}"))
        })
    }
}

/// A subject alternative name entry, classified from a host string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Host {
    Dns(String),
    Ip(IpAddr),
    Email(String),
    Uri(String),
}

impl Host {
    /// Classifies a host string as an IP literal, e-mail address, URI or DNS name, in that
    /// order of precedence.
    pub fn parse(host: &str) -> Result<Self> {
        if let Ok(ip) = IpAddr::from_str(host) {
            return Ok(Host::Ip(ip));
        }
        if let Some((local, domain)) = host.split_once('@') {
            if EMAIL_LOCAL_PART.is_match(local) && is_dns_name(domain) && !domain.starts_with('*')
            {
                return Ok(Host::Email(host.to_string()));
            }
            return Err(invalid_host(host));
        }
        if host.contains("://") {
            return match url::Url::parse(host) {
                Ok(uri) if !uri.cannot_be_a_base() => Ok(Host::Uri(host.to_string())),
                _ => Err(invalid_host(host)),
            };
        }
        if is_dns_name(host) {
            return Ok(Host::Dns(host.to_string()));
        }
        Err(invalid_host(host))
    }

    /// Returns the host in the textual form it was written in.
    pub fn as_string(&self) -> String {
        match self {
            Host::Dns(name) | Host::Email(name) | Host::Uri(name) => name.clone(),
            Host::Ip(ip) => ip.to_string(),
        }
    }
}

fn is_dns_name(name: &str) -> bool {
    !name.is_empty() && name.len() <= MAX_DNS_NAME_LEN && DNS_NAME.is_match(name)
}

fn invalid_host(host: &str) -> CsrForgeError {
    CsrForgeError::ValidationError(format!(
        "host {host:?} is not a valid DNS name, IP address, e-mail address or URI"
    ))
}

/// Parses every host string of a request, stopping at the first invalid one.
pub fn parse_hosts(hosts: &[String]) -> Result<Vec<Host>> {
    hosts.iter().map(|h| Host::parse(h)).collect()
}

/// Enforces the rule that a subject needs a common name or at least one host.
pub fn ensure_usable_subject(cn: &str, host_count: usize) -> Result<()> {
    if cn.is_empty() && host_count == 0 {
        return Err(CsrForgeError::ValidationError(
            "missing common name and hosts".to_string(),
        ));
    }
    Ok(())
}

/// Checks a request description before any key material is generated.
pub trait Validator: Send + Sync {
    fn validate(&self, req: &CertificateRequest) -> Result<()>;
}

impl<F> Validator for F
where
    F: Fn(&CertificateRequest) -> Result<()> + Send + Sync,
{
    fn validate(&self, req: &CertificateRequest) -> Result<()> {
        self(req)
    }
}

/// The validator used by the command-line tool.
///
/// Requires a common name or hosts, rejects an empty first host, checks every host's syntax
/// and the key request.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultValidator;

impl Validator for DefaultValidator {
    fn validate(&self, req: &CertificateRequest) -> Result<()> {
        ensure_usable_subject(&req.cn, req.hosts.len())?;
        if req.cn.is_empty() && req.hosts.first().is_some_and(|h| h.is_empty()) {
            return Err(CsrForgeError::ValidationError(
                "missing common name and first host is empty".to_string(),
            ));
        }
        parse_hosts(&req.hosts)?;
        req.key.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_description() {
        let json = br#"{
            "CN": "example.com",
            "hosts": ["example.com", "www.example.com"],
            "names": [{"C": "US", "ST": "California", "O": "Example Corp"}],
            "key": {"algo": "rsa", "size": 2048}
        }"#;
        let req = CertificateRequest::from_json(json).unwrap();
        assert_eq!(req.cn, "example.com");
        assert_eq!(req.hosts, vec!["example.com", "www.example.com"]);
        assert_eq!(req.names[0].country.as_deref(), Some("US"));
        assert_eq!(req.names[0].organization.as_deref(), Some("Example Corp"));
        assert_eq!(req.names[0].locality, None);
        assert_eq!(req.key.algorithm, KeyAlgorithm::Rsa);
        assert_eq!(req.key.size, 2048);
    }

    #[test]
    fn test_missing_key_defaults_to_p256() {
        let req = CertificateRequest::from_json(br#"{"CN": "a"}"#).unwrap();
        assert_eq!(req.key, KeyRequest::default());
        assert_eq!(req.key.effective_size(), 256);
    }

    #[test]
    fn test_malformed_description_is_parse_error() {
        let err = CertificateRequest::from_json(b"{not json").unwrap_err();
        assert!(matches!(err, CsrForgeError::ParseError(_)));
    }

    #[test]
    fn test_host_classification() {
        assert_eq!(
            Host::parse("www.example.com").unwrap(),
            Host::Dns("www.example.com".to_string())
        );
        assert_eq!(
            Host::parse("*.example.com").unwrap(),
            Host::Dns("*.example.com".to_string())
        );
        assert!(matches!(Host::parse("10.0.0.1").unwrap(), Host::Ip(_)));
        assert!(matches!(Host::parse("::1").unwrap(), Host::Ip(_)));
        assert!(matches!(
            Host::parse("admin@example.com").unwrap(),
            Host::Email(_)
        ));
        assert!(matches!(
            Host::parse("spiffe://cluster.local/ns/default").unwrap(),
            Host::Uri(_)
        ));
    }

    #[test]
    fn test_invalid_hosts_rejected() {
        for host in [
            "not a valid host!!",
            "",
            "-leading.example.com",
            "a..b",
            "user@@example.com",
            "foo.*.example.com",
            "example.com.",
            "ops@example.com.",
        ] {
            let err = Host::parse(host).unwrap_err();
            assert!(
                matches!(err, CsrForgeError::ValidationError(_)),
                "{host:?} should be rejected"
            );
        }
        assert!(Host::parse(&"a".repeat(254)).is_err());
    }

    #[test]
    fn test_default_validator() {
        let validator = DefaultValidator;

        let empty = CertificateRequest::default();
        assert!(matches!(
            validator.validate(&empty),
            Err(CsrForgeError::ValidationError(_))
        ));

        let hosts_only = CertificateRequest {
            hosts: vec!["example.com".to_string()],
            ..Default::default()
        };
        assert!(validator.validate(&hosts_only).is_ok());

        let bad_host = CertificateRequest {
            cn: "example.com".to_string(),
            hosts: vec!["not a valid host!!".to_string()],
            ..Default::default()
        };
        assert!(matches!(
            validator.validate(&bad_host),
            Err(CsrForgeError::ValidationError(_))
        ));

        let bad_key = CertificateRequest {
            cn: "example.com".to_string(),
            key: KeyRequest {
                algorithm: KeyAlgorithm::Rsa,
                size: 1024,
            },
            ..Default::default()
        };
        assert!(matches!(
            validator.validate(&bad_key),
            Err(CsrForgeError::ValidationError(_))
        ));
    }

    #[test]
    fn test_closure_validator() {
        let only_internal = |req: &CertificateRequest| {
            if req.cn.ends_with(".internal") {
                Ok(())
            } else {
                Err(CsrForgeError::ValidationError("external name".to_string()))
            }
        };
        let req = CertificateRequest {
            cn: "db.internal".to_string(),
            ..Default::default()
        };
        assert!(only_internal.validate(&req).is_ok());
    }
}
