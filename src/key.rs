use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use p256::ecdsa::{SigningKey as P256SigningKey, VerifyingKey as P256VerifyingKey};
use p384::ecdsa::{SigningKey as P384SigningKey, VerifyingKey as P384VerifyingKey};
use pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand_core::OsRng;
use rsa::{
    RsaPrivateKey, RsaPublicKey,
    pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey},
    signature::{SignatureEncoding, Signer, Verifier},
};
use sha2::{Sha256, Sha384, Sha512};
use x509_cert::spki::{ObjectIdentifier, SubjectPublicKeyInfoOwned};

use crate::cert::SignatureAlgorithm;
use crate::error::{CsrForgeError, Result};
use crate::request::{KeyAlgorithm, KeyRequest};

/// Supported key types for certificate operations.
pub enum KeyPair {
    Rsa {
        private: Box<RsaPrivateKey>,
        public: RsaPublicKey,
    },
    EcdsaP256 {
        signing_key: P256SigningKey,
    },
    EcdsaP384 {
        signing_key: P384SigningKey,
    },
    EcdsaP521 {
        secret: p521::SecretKey,
    },
    Ed25519 {
        signing_key: Ed25519SigningKey,
    },
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print private material.
        f.debug_struct("KeyPair")
            .field("algorithm", &self.algorithm_name())
            .finish_non_exhaustive()
    }
}

impl KeyPair {
    /// Generate a key pair as described by a request's `key` object.
    pub fn generate(req: &KeyRequest) -> Result<Self> {
        req.validate()?;
        match (req.algorithm, req.effective_size()) {
            (KeyAlgorithm::Rsa, bits) => Self::generate_rsa(bits as usize),
            (KeyAlgorithm::Ecdsa, 256) => Ok(Self::generate_ecdsa_p256()),
            (KeyAlgorithm::Ecdsa, 384) => Ok(Self::generate_ecdsa_p384()),
            (KeyAlgorithm::Ecdsa, 521) => Ok(Self::generate_ecdsa_p521()),
            (KeyAlgorithm::Ed25519, _) => Ok(Self::generate_ed25519()),
            (KeyAlgorithm::Ecdsa, size) => Err(CsrForgeError::KeyGenerationError(format!(
                "unsupported ECDSA curve size {size}"
            ))),
        }
    }

    /// Generate an RSA key pair with the specified number of bits.
    pub fn generate_rsa(bits: usize) -> Result<Self> {
        let private = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| CsrForgeError::KeyGenerationError(e.to_string()))?;
        let public = RsaPublicKey::from(&private);
        Ok(KeyPair::Rsa {
            private: Box::new(private),
            public,
        })
    }

    /// Generate an ECDSA P-256 key pair.
    pub fn generate_ecdsa_p256() -> Self {
        KeyPair::EcdsaP256 {
            signing_key: P256SigningKey::random(&mut OsRng),
        }
    }

    /// Generate an ECDSA P-384 key pair.
    pub fn generate_ecdsa_p384() -> Self {
        KeyPair::EcdsaP384 {
            signing_key: P384SigningKey::random(&mut OsRng),
        }
    }

    /// Generate an ECDSA P-521 key pair.
    pub fn generate_ecdsa_p521() -> Self {
        KeyPair::EcdsaP521 {
            secret: p521::SecretKey::random(&mut OsRng),
        }
    }

    /// Generate an Ed25519 key pair.
    pub fn generate_ed25519() -> Self {
        KeyPair::Ed25519 {
            signing_key: Ed25519SigningKey::generate(&mut OsRng),
        }
    }

    pub fn algorithm_name(&self) -> &'static str {
        match self {
            KeyPair::Rsa { .. } => "rsa",
            KeyPair::EcdsaP256 { .. } => "ecdsa-p256",
            KeyPair::EcdsaP384 { .. } => "ecdsa-p384",
            KeyPair::EcdsaP521 { .. } => "ecdsa-p521",
            KeyPair::Ed25519 { .. } => "ed25519",
        }
    }

    /// The signature algorithm this key signs with unless told otherwise.
    pub fn default_signature_algorithm(&self) -> SignatureAlgorithm {
        self.public_key().default_signature_algorithm()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from_key_pair(self)
    }

    /// Returns the public half as a SubjectPublicKeyInfo.
    pub fn as_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        self.public_key().to_spki()
    }

    /// Exports the private key as PKCS#8 DER.
    pub fn to_pkcs8_der(&self) -> Result<Vec<u8>> {
        let document = match self {
            KeyPair::Rsa { private, .. } => private.to_pkcs8_der(),
            KeyPair::EcdsaP256 { signing_key } => signing_key.to_pkcs8_der(),
            KeyPair::EcdsaP384 { signing_key } => signing_key.to_pkcs8_der(),
            KeyPair::EcdsaP521 { secret } => secret.to_pkcs8_der(),
            KeyPair::Ed25519 { signing_key } => signing_key.to_pkcs8_der(),
        }
        .map_err(|e| CsrForgeError::EncodingError(format!("PKCS#8 encoding failed: {e}")))?;
        Ok(document.as_bytes().to_vec())
    }

    /// Imports a private key from PKCS#8 DER, trying every supported algorithm.
    pub fn from_pkcs8_der(der: &[u8]) -> Result<Self> {
        if let Ok(private) = RsaPrivateKey::from_pkcs8_der(der) {
            return Ok(Self::from_rsa(private));
        }
        if let Ok(signing_key) = P256SigningKey::from_pkcs8_der(der) {
            return Ok(KeyPair::EcdsaP256 { signing_key });
        }
        if let Ok(signing_key) = P384SigningKey::from_pkcs8_der(der) {
            return Ok(KeyPair::EcdsaP384 { signing_key });
        }
        if let Ok(secret) = p521::SecretKey::from_pkcs8_der(der) {
            return Ok(KeyPair::EcdsaP521 { secret });
        }
        if let Ok(signing_key) = Ed25519SigningKey::from_pkcs8_der(der) {
            return Ok(KeyPair::Ed25519 { signing_key });
        }
        Err(CsrForgeError::ParseError(
            "unsupported or malformed PKCS#8 private key".to_string(),
        ))
    }

    /// Imports a PEM private key: PKCS#8 `PRIVATE KEY`, PKCS#1 `RSA PRIVATE KEY` or SEC1
    /// `EC PRIVATE KEY`.
    pub fn from_pem(pem_str: &str) -> Result<Self> {
        let block = pem::parse(pem_str)?;
        match block.tag() {
            "PRIVATE KEY" => Self::from_pkcs8_der(block.contents()),
            "RSA PRIVATE KEY" => RsaPrivateKey::from_pkcs1_der(block.contents())
                .map(Self::from_rsa)
                .map_err(|e| CsrForgeError::ParseError(format!("malformed RSA key: {e}"))),
            "EC PRIVATE KEY" => Self::from_sec1_der(block.contents()),
            other => Err(CsrForgeError::ParseError(format!(
                "unexpected PEM label {other:?} for a private key"
            ))),
        }
    }

    fn from_sec1_der(der: &[u8]) -> Result<Self> {
        if let Ok(secret) = p256::SecretKey::from_sec1_der(der) {
            return Ok(KeyPair::EcdsaP256 {
                signing_key: P256SigningKey::from(secret),
            });
        }
        if let Ok(secret) = p384::SecretKey::from_sec1_der(der) {
            return Ok(KeyPair::EcdsaP384 {
                signing_key: P384SigningKey::from(secret),
            });
        }
        if let Ok(secret) = p521::SecretKey::from_sec1_der(der) {
            return Ok(KeyPair::EcdsaP521 { secret });
        }
        Err(CsrForgeError::ParseError(
            "unsupported or malformed EC private key".to_string(),
        ))
    }

    fn from_rsa(private: RsaPrivateKey) -> Self {
        let public = RsaPublicKey::from(&private);
        KeyPair::Rsa {
            private: Box::new(private),
            public,
        }
    }

    /// Signs `data` with the given signature algorithm.
    ///
    /// ECDSA signatures are returned DER-encoded, as X.509 and PKCS#10 carry them.
    pub fn sign_data(&self, data: &[u8], algorithm: SignatureAlgorithm) -> Result<Vec<u8>> {
        let signing_failed = |e: rsa::signature::Error| CsrForgeError::SigningError(e.to_string());
        match (self, algorithm) {
            (KeyPair::Rsa { private, .. }, SignatureAlgorithm::Sha256WithRSA) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha256>::new(*private.clone());
                Ok(signing_key.try_sign(data).map_err(signing_failed)?.to_vec())
            }
            (KeyPair::Rsa { private, .. }, SignatureAlgorithm::Sha384WithRSA) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha384>::new(*private.clone());
                Ok(signing_key.try_sign(data).map_err(signing_failed)?.to_vec())
            }
            (KeyPair::Rsa { private, .. }, SignatureAlgorithm::Sha512WithRSA) => {
                let signing_key = rsa::pkcs1v15::SigningKey::<Sha512>::new(*private.clone());
                Ok(signing_key.try_sign(data).map_err(signing_failed)?.to_vec())
            }
            (KeyPair::EcdsaP256 { signing_key }, SignatureAlgorithm::Sha256WithECDSA) => {
                let signature: p256::ecdsa::Signature =
                    signing_key.try_sign(data).map_err(signing_failed)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            (KeyPair::EcdsaP384 { signing_key }, SignatureAlgorithm::Sha384WithECDSA) => {
                let signature: p384::ecdsa::Signature =
                    signing_key.try_sign(data).map_err(signing_failed)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            (KeyPair::EcdsaP521 { secret }, SignatureAlgorithm::Sha512WithECDSA) => {
                let signing_key = p521::ecdsa::SigningKey::from_bytes(&secret.to_bytes())
                    .map_err(signing_failed)?;
                let signature: p521::ecdsa::Signature =
                    signing_key.try_sign(data).map_err(signing_failed)?;
                Ok(signature.to_der().as_bytes().to_vec())
            }
            (KeyPair::Ed25519 { signing_key }, SignatureAlgorithm::Ed25519) => {
                let signature = signing_key.try_sign(data).map_err(signing_failed)?;
                Ok(signature.to_bytes().to_vec())
            }
            (key, algorithm) => Err(CsrForgeError::SigningError(format!(
                "{} key cannot sign with {algorithm:?}",
                key.algorithm_name()
            ))),
        }
    }
}

/// The public half of a supported key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublicKey {
    Rsa(RsaPublicKey),
    EcdsaP256(P256VerifyingKey),
    EcdsaP384(P384VerifyingKey),
    EcdsaP521(p521::PublicKey),
    Ed25519(Ed25519VerifyingKey),
}

impl PublicKey {
    pub fn from_key_pair(key_pair: &KeyPair) -> Self {
        match key_pair {
            KeyPair::Rsa { public, .. } => PublicKey::Rsa(public.clone()),
            KeyPair::EcdsaP256 { signing_key } => PublicKey::EcdsaP256(*signing_key.verifying_key()),
            KeyPair::EcdsaP384 { signing_key } => PublicKey::EcdsaP384(*signing_key.verifying_key()),
            KeyPair::EcdsaP521 { secret } => PublicKey::EcdsaP521(secret.public_key()),
            KeyPair::Ed25519 { signing_key } => PublicKey::Ed25519(signing_key.verifying_key()),
        }
    }

    /// Decodes a SubjectPublicKeyInfo into one of the supported key types.
    pub fn from_x509spki(spki: &SubjectPublicKeyInfoOwned) -> Result<Self> {
        let key_bytes = spki.subject_public_key.raw_bytes();
        let malformed = |e: &dyn std::fmt::Display| {
            CsrForgeError::ParseError(format!("malformed public key: {e}"))
        };

        match spki.algorithm.oid {
            const_oid::db::rfc5912::RSA_ENCRYPTION => RsaPublicKey::from_pkcs1_der(key_bytes)
                .map(PublicKey::Rsa)
                .map_err(|e| malformed(&e)),
            const_oid::db::rfc5912::ID_EC_PUBLIC_KEY => {
                let curve = spki
                    .algorithm
                    .parameters
                    .as_ref()
                    .and_then(|params| params.decode_as::<ObjectIdentifier>().ok());
                match curve {
                    Some(const_oid::db::rfc5912::SECP_256_R_1) => {
                        P256VerifyingKey::from_sec1_bytes(key_bytes)
                            .map(PublicKey::EcdsaP256)
                            .map_err(|e| malformed(&e))
                    }
                    Some(const_oid::db::rfc5912::SECP_384_R_1) => {
                        P384VerifyingKey::from_sec1_bytes(key_bytes)
                            .map(PublicKey::EcdsaP384)
                            .map_err(|e| malformed(&e))
                    }
                    Some(const_oid::db::rfc5912::SECP_521_R_1) => {
                        p521::PublicKey::from_sec1_bytes(key_bytes)
                            .map(PublicKey::EcdsaP521)
                            .map_err(|e| malformed(&e))
                    }
                    _ => Err(CsrForgeError::ParseError(
                        "unsupported elliptic curve".to_string(),
                    )),
                }
            }
            const_oid::db::rfc8410::ID_ED_25519 => {
                let bytes: &[u8; 32] = key_bytes.try_into().map_err(|_| {
                    CsrForgeError::ParseError(format!(
                        "invalid Ed25519 public key length {}",
                        key_bytes.len()
                    ))
                })?;
                Ed25519VerifyingKey::from_bytes(bytes)
                    .map(PublicKey::Ed25519)
                    .map_err(|e| malformed(&e))
            }
            other => Err(CsrForgeError::ParseError(format!(
                "unsupported public key algorithm {other}"
            ))),
        }
    }

    /// Encodes the key as a SubjectPublicKeyInfo.
    pub fn to_spki(&self) -> Result<SubjectPublicKeyInfoOwned> {
        let spki = match self {
            PublicKey::Rsa(public) => SubjectPublicKeyInfoOwned::from_key(public.clone()),
            PublicKey::EcdsaP256(verifying_key) => SubjectPublicKeyInfoOwned::from_key(*verifying_key),
            PublicKey::EcdsaP384(verifying_key) => SubjectPublicKeyInfoOwned::from_key(*verifying_key),
            PublicKey::EcdsaP521(public) => SubjectPublicKeyInfoOwned::from_key(*public),
            PublicKey::Ed25519(verifying_key) => {
                return Ok(SubjectPublicKeyInfoOwned {
                    algorithm: x509_cert::spki::AlgorithmIdentifierOwned {
                        oid: const_oid::db::rfc8410::ID_ED_25519,
                        parameters: None,
                    },
                    subject_public_key: der::asn1::BitString::from_bytes(
                        verifying_key.as_bytes(),
                    )?,
                });
            }
        };
        spki.map_err(|e| CsrForgeError::EncodingError(format!("SPKI encoding failed: {e}")))
    }

    pub fn is_rsa(&self) -> bool {
        matches!(self, PublicKey::Rsa(_))
    }

    /// The signature algorithm a key of this type signs with by default.
    pub fn default_signature_algorithm(&self) -> SignatureAlgorithm {
        match self {
            PublicKey::Rsa(_) => SignatureAlgorithm::Sha256WithRSA,
            PublicKey::EcdsaP256(_) => SignatureAlgorithm::Sha256WithECDSA,
            PublicKey::EcdsaP384(_) => SignatureAlgorithm::Sha384WithECDSA,
            PublicKey::EcdsaP521(_) => SignatureAlgorithm::Sha512WithECDSA,
            PublicKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    /// Whether a signature made with `algorithm` can be verified with this key.
    pub fn supports(&self, algorithm: SignatureAlgorithm) -> bool {
        match self {
            PublicKey::Rsa(_) => algorithm.is_rsa(),
            _ => self.default_signature_algorithm() == algorithm,
        }
    }

    /// Verifies `signature` over `message`.
    pub fn verify(
        &self,
        algorithm: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let rejected =
            |e: rsa::signature::Error| CsrForgeError::ParseError(format!("bad signature: {e}"));
        match (self, algorithm) {
            (PublicKey::Rsa(public), SignatureAlgorithm::Sha256WithRSA) => {
                let signature = rsa::pkcs1v15::Signature::try_from(signature).map_err(rejected)?;
                rsa::pkcs1v15::VerifyingKey::<Sha256>::new(public.clone())
                    .verify(message, &signature)
                    .map_err(rejected)
            }
            (PublicKey::Rsa(public), SignatureAlgorithm::Sha384WithRSA) => {
                let signature = rsa::pkcs1v15::Signature::try_from(signature).map_err(rejected)?;
                rsa::pkcs1v15::VerifyingKey::<Sha384>::new(public.clone())
                    .verify(message, &signature)
                    .map_err(rejected)
            }
            (PublicKey::Rsa(public), SignatureAlgorithm::Sha512WithRSA) => {
                let signature = rsa::pkcs1v15::Signature::try_from(signature).map_err(rejected)?;
                rsa::pkcs1v15::VerifyingKey::<Sha512>::new(public.clone())
                    .verify(message, &signature)
                    .map_err(rejected)
            }
            (PublicKey::EcdsaP256(verifying_key), SignatureAlgorithm::Sha256WithECDSA) => {
                let signature = p256::ecdsa::Signature::from_der(signature).map_err(rejected)?;
                verifying_key.verify(message, &signature).map_err(rejected)
            }
            (PublicKey::EcdsaP384(verifying_key), SignatureAlgorithm::Sha384WithECDSA) => {
                let signature = p384::ecdsa::Signature::from_der(signature).map_err(rejected)?;
                verifying_key.verify(message, &signature).map_err(rejected)
            }
            (PublicKey::EcdsaP521(public), SignatureAlgorithm::Sha512WithECDSA) => {
                let verifying_key =
                    p521::ecdsa::VerifyingKey::from_sec1_bytes(&public.to_sec1_bytes())
                        .map_err(rejected)?;
                let signature = p521::ecdsa::Signature::from_der(signature).map_err(rejected)?;
                verifying_key.verify(message, &signature).map_err(rejected)
            }
            (PublicKey::Ed25519(verifying_key), SignatureAlgorithm::Ed25519) => {
                let signature =
                    ed25519_dalek::Signature::from_slice(signature).map_err(rejected)?;
                verifying_key.verify(message, &signature).map_err(rejected)
            }
            (_, algorithm) => Err(CsrForgeError::ParseError(format!(
                "signature algorithm {algorithm:?} does not match the public key"
            ))),
        }
    }
}
