//! Sync error types.

use thiserror::Error;

use crate::auth::AuthError;
use crate::crypto::CryptoError;
use crate::db::DatabaseError;
use crate::provider::ProviderError;

/// Errors from mailbox synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Token resolution failed; a `CredentialInvalid` inside means the
    /// user must reconnect and the sync is halted.
    #[error("Credential error: {0}")]
    Auth(#[from] AuthError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Encryption error: {0}")]
    Crypto(#[from] CryptoError),

    /// The caller's cancellation token fired. Nothing was committed for
    /// the in-flight page.
    #[error("Sync cancelled")]
    Cancelled,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
