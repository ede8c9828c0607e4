#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use csrforge::backend::{KeyPairBackend, PrivateKeyFactory, SigningBackend};
use csrforge::ca::{CaIdentity, CaPolicy, load_ca, self_signed_ca};
use csrforge::cert::params::{DistinguishedName, Validity};
use csrforge::error::Result;
use csrforge::issuer::LocalSigner;
use csrforge::key::KeyPair;
use csrforge::request::Name;

/// A self-signed CA and its key.
pub struct TestCa {
    pub key: Arc<KeyPair>,
    pub cert_pem: String,
}

pub fn generate_ca(key: KeyPair, days: i64) -> TestCa {
    let subject = DistinguishedName::builder()
        .common_name("csrforge test root".to_string())
        .names(vec![Name {
            country: Some("US".to_string()),
            organization: Some("csrforge".to_string()),
            ..Default::default()
        }])
        .build();
    let cert = self_signed_ca(&subject, &key, Validity::for_days(days)).unwrap();
    TestCa {
        key: Arc::new(key),
        cert_pem: cert.to_pem().unwrap(),
    }
}

pub fn generate_ca_cert() -> TestCa {
    generate_ca(KeyPair::generate_ecdsa_p256(), 3650)
}

pub fn signer(ca: &TestCa, policy: CaPolicy) -> LocalSigner {
    let factory = PrivateKeyFactory::shared(ca.key.clone());
    let (identity, backend) = load_ca(ca.cert_pem.as_bytes(), policy, &factory).unwrap();
    LocalSigner::new(identity, backend)
}

/// Signs with the CA key and remembers every (TBS, signature) pair it produced.
pub struct RecordingBackend {
    inner: KeyPairBackend,
    pub calls: Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>,
}

impl SigningBackend for RecordingBackend {
    fn sign(&self, tbs: &[u8]) -> Result<Vec<u8>> {
        let signature = self.inner.sign(tbs)?;
        self.calls
            .lock()
            .unwrap()
            .push((tbs.to_vec(), signature.clone()));
        Ok(signature)
    }
}

pub fn recording_signer(ca: &TestCa) -> (LocalSigner, Arc<Mutex<Vec<(Vec<u8>, Vec<u8>)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let key = ca.key.clone();
    let recorded = calls.clone();
    let factory = move |identity: &CaIdentity| -> Result<Box<dyn SigningBackend>> {
        Ok(Box::new(RecordingBackend {
            inner: KeyPairBackend::for_ca(key.clone(), identity)?,
            calls: recorded.clone(),
        }))
    };
    let (identity, backend) =
        load_ca(ca.cert_pem.as_bytes(), CaPolicy::default(), &factory).unwrap();
    (LocalSigner::new(identity, backend), calls)
}
