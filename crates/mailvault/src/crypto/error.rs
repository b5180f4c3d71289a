//! Crypto error types.

use thiserror::Error;

/// Errors from field encryption and key management.
///
/// Messages deliberately carry no key material and no ciphertext.
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    /// The blob could not be decoded, was truncated, or failed
    /// authentication. Integrity failures are not distinguished further
    /// on purpose.
    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: &'static str },

    #[error("Key store error: {0}")]
    KeyStore(#[from] crate::db::DatabaseError),
}

/// Result type for crypto operations.
pub type Result<T> = std::result::Result<T, CryptoError>;
