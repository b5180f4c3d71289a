//! Mailbox store error types.

use thiserror::Error;

use crate::auth::AuthError;
use crate::crypto::CryptoError;
use crate::db::DatabaseError;
use crate::provider::ProviderError;

/// Errors from the mailbox read/compose surface.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Unknown id, or a thread owned by a different user. Not
    /// distinguished, so ids cannot be probed across users.
    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// The send was cancelled before the provider call completed.
    #[error("Send cancelled")]
    Cancelled,

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Credential error: {0}")]
    Auth(#[from] AuthError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
