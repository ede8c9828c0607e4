//! # csrforge - certificate requests in, signed bundles out
//!
//! csrforge turns a small JSON request description into a fresh key pair, a PKCS#10
//! certificate signing request and an X.509 certificate issued under a CA. It is built
//! entirely on the RustCrypto stack.
//!
//! The issuer never touches a CA private key directly. Signatures come from a
//! [`backend::SigningBackend`], which is any `Send + Sync` value able to turn TBS bytes into
//! signature bytes. [`backend::KeyPairBackend`] is the conventional implementation backed by
//! the CA key; other backends plug in through [`backend::BackendFactory`].
//!
//! ## Supported Key Types
//!
//! - **RSA**: 2048 to 8192 bits
//! - **ECDSA**: P-256, P-384 and P-521
//! - **Ed25519**
//!
//! ## Pipeline
//!
//! ```rust,no_run
//! use csrforge::{
//!     backend::PrivateKeyFactory,
//!     bundle::Bundle,
//!     ca::{CaPolicy, load_ca},
//!     csr::Generator,
//!     issuer::{LocalSigner, SignRequest},
//!     key::KeyPair,
//!     request::{CertificateRequest, DefaultValidator},
//! };
//!
//! # fn main() -> Result<(), csrforge::error::CsrForgeError> {
//! let ca_pem = std::fs::read("ca.pem").unwrap();
//! let ca_key = KeyPair::from_pem(&std::fs::read_to_string("ca-key.pem").unwrap())?;
//!
//! let req = CertificateRequest::from_json(br#"{"CN": "example.com", "hosts": ["example.com"]}"#)?;
//! let generated = Generator::new(DefaultValidator).generate(&req)?;
//!
//! let (ca, backend) = load_ca(&ca_pem, CaPolicy::default(), &PrivateKeyFactory::new(ca_key))?;
//! let cert = LocalSigner::new(ca, backend).sign(&SignRequest {
//!     request: generated.csr.clone(),
//!     subject: None,
//! })?;
//!
//! let bundle = Bundle::assemble(generated.key, generated.csr, cert)?;
//! print!("{}", bundle.to_pem());
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`error::CsrForgeError`]; the variant names the stage that
//! failed.
//!
//! ```rust
//! use csrforge::{error::CsrForgeError, request::CertificateRequest};
//!
//! match CertificateRequest::from_json(b"{ not json") {
//!     Err(CsrForgeError::ParseError(msg)) => println!("bad request description: {msg}"),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`request`]: request descriptions, host classification and validation
//! - [`key`]: key generation, import/export, signing and verification
//! - [`csr`]: key and CSR generation
//! - [`backend`]: the signing backend seam
//! - [`ca`]: CA loading and issuance policy
//! - [`issuer`]: subject resolution and certificate issuance
//! - [`bundle`]: PEM and JSON output
//! - [`cert`]: certificate encoding, names, validity and extensions
//! - [`tbs_certificate`]: the to-be-signed structure
//! - [`error`]: error types

pub mod backend;
pub mod bundle;
pub mod ca;
pub mod cert;
pub mod csr;
pub mod error;
pub mod issuer;
pub mod key;
pub mod request;
pub mod tbs_certificate;
