//! Error types for signing keys and audit signatures.

use thiserror::Error;

/// Failures while loading keys or checking signatures.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key, hash or signature had the wrong byte count.
    #[error("expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Required byte count.
        expected: usize,
        /// Byte count supplied.
        actual: usize,
    },

    /// The bytes do not form a valid ed25519 point.
    #[error("not a usable public key: {0}")]
    InvalidPublicKey(String),

    /// The signature does not match the message and key.
    #[error("signature does not verify")]
    SignatureVerificationFailed,

    /// Hex decoding failed.
    #[error("bad hex: {0}")]
    InvalidEncoding(String),

    /// The key file could not be read, written or locked down.
    #[error("key file: {0}")]
    IoError(String),
}

/// Result alias for this crate.
pub type CryptoResult<T> = Result<T, CryptoError>;
