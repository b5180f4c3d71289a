//! Auth error types.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::provider::ProviderError;

/// Errors from credential lifecycle and OAuth connect operations.
#[derive(Error, Debug)]
pub enum AuthError {
    /// No active credential for the caller. Requires connecting a
    /// mailbox, not a retry.
    #[error("No active mailbox credential")]
    CredentialMissing,

    /// The stored credential can no longer be refreshed. Requires user
    /// reconnection, not a retry.
    #[error("Credential invalid, reconnect required: {0}")]
    CredentialInvalid(String),

    /// The OAuth callback state failed to decode or is stale.
    #[error("Invalid connect state: {0}")]
    InvalidState(String),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;
