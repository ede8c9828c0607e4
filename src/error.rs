//! use csrforge::error::CsrForgeError;

use thiserror::Error;

/// Represents errors that can occur while turning a request description into a certificate.
///
/// Every variant is fatal to the current invocation; nothing in the pipeline retries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CsrForgeError {
    /// An input source could not be read at all.
    #[error("Failed to read input: {0}")]
    ReadError(String),

    /// Malformed CA certificate, CSR or request description.
    #[error("Failed to parse input: {0}")]
    ParseError(String),

    /// The request description is well-formed but semantically unusable.
    #[error("Invalid request: {0}")]
    ValidationError(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// The signing backend could not be constructed for the CA.
    #[error("Failed to construct signing backend: {0}")]
    KeyConstructionError(String),

    /// The signing backend failed or returned an unusable signature.
    #[error("Signing error: {0}")]
    SigningError(String),

    /// Structural assembly of a CSR or certificate failed.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// The output bundle could not be assembled.
    #[error("Failed to assemble output: {0}")]
    AssemblyError(String),
}

pub type Result<T> = std::result::Result<T, CsrForgeError>;

impl From<der::Error> for CsrForgeError {
    /// Converts a `der::Error` into a `CsrForgeError`.
    ///
    /// Decoding paths map their errors explicitly, so a bare `der::Error` reaching `?` comes
    /// from encoding.
    fn from(err: der::Error) -> Self {
        CsrForgeError::EncodingError(err.to_string())
    }
}

impl From<pem::PemError> for CsrForgeError {
    fn from(err: pem::PemError) -> Self {
        CsrForgeError::ParseError(err.to_string())
    }
}
