//! The signing capability the issuer relies on.
//!
//! A [`SigningBackend`] turns TBS bytes into signature bytes and nothing else. Whether it
//! holds a private key or crafts a signature from public CA data is invisible to the
//! pipeline. A [`BackendFactory`] builds one for a loaded CA.

use std::sync::Arc;

use log::debug;

use crate::ca::CaIdentity;
use crate::cert::SignatureAlgorithm;
use crate::error::{CsrForgeError, Result};
use crate::key::KeyPair;

/// Produces a signature over the DER-encoded TBS structure.
///
/// Implementations must be stateless with respect to callers so that `sign` may run
/// concurrently.
pub trait SigningBackend: Send + Sync {
    fn sign(&self, tbs: &[u8]) -> Result<Vec<u8>>;
}

impl<T: SigningBackend + ?Sized> SigningBackend for Box<T> {
    fn sign(&self, tbs: &[u8]) -> Result<Vec<u8>> {
        (**self).sign(tbs)
    }
}

impl<T: SigningBackend + ?Sized> SigningBackend for Arc<T> {
    fn sign(&self, tbs: &[u8]) -> Result<Vec<u8>> {
        (**self).sign(tbs)
    }
}

/// Builds a signing backend bound to a CA.
pub trait BackendFactory {
    fn construct(&self, ca: &CaIdentity) -> Result<Box<dyn SigningBackend>>;
}

impl<F> BackendFactory for F
where
    F: Fn(&CaIdentity) -> Result<Box<dyn SigningBackend>>,
{
    fn construct(&self, ca: &CaIdentity) -> Result<Box<dyn SigningBackend>> {
        self(ca)
    }
}

/// A conventional backend: the CA's private key.
pub struct KeyPairBackend {
    key: Arc<KeyPair>,
    algorithm: SignatureAlgorithm,
}

impl KeyPairBackend {
    /// Binds `key` to `ca`, refusing keys that do not belong to the CA certificate or cannot
    /// produce the CA's declared signature algorithm.
    pub fn for_ca(key: Arc<KeyPair>, ca: &CaIdentity) -> Result<Self> {
        if &key.as_spki()? != ca.public_key_info() {
            return Err(CsrForgeError::KeyConstructionError(
                "private key does not match the CA certificate".to_string(),
            ));
        }
        let algorithm = ca.signature_algorithm();
        if !key.public_key().supports(algorithm) {
            return Err(CsrForgeError::KeyConstructionError(format!(
                "{} key cannot sign with {algorithm:?}",
                key.algorithm_name()
            )));
        }
        debug!("bound {} CA key to {algorithm:?}", key.algorithm_name());
        Ok(Self { key, algorithm })
    }
}

impl SigningBackend for KeyPairBackend {
    fn sign(&self, tbs: &[u8]) -> Result<Vec<u8>> {
        self.key.sign_data(tbs, self.algorithm)
    }
}

/// Builds a [`KeyPairBackend`] from a CA private key.
#[derive(Clone)]
pub struct PrivateKeyFactory {
    key: Arc<KeyPair>,
}

impl PrivateKeyFactory {
    pub fn new(key: KeyPair) -> Self {
        Self::shared(Arc::new(key))
    }

    /// Builds a factory around a key that is also used elsewhere.
    pub fn shared(key: Arc<KeyPair>) -> Self {
        Self { key }
    }
}

impl BackendFactory for PrivateKeyFactory {
    fn construct(&self, ca: &CaIdentity) -> Result<Box<dyn SigningBackend>> {
        Ok(Box::new(KeyPairBackend::for_ca(self.key.clone(), ca)?))
    }
}
