//! Crate-level error taxonomy.
//!
//! Module errors are classified into the service-boundary taxonomy:
//! credential problems require user reconnection, provider transport
//! problems are retryable with backoff at the trigger boundary, and
//! decryption failures degrade individual rows rather than requests.

use std::path::PathBuf;
use thiserror::Error;

use crate::auth::AuthError;
use crate::crypto::CryptoError;
use crate::db::DatabaseError;
use crate::provider::ProviderError;
use crate::secrets::SecretError;
use crate::store::StoreError;
use crate::sync::SyncError;

#[derive(Error, Debug)]
pub enum MailvaultError {
    /// No authenticated caller.
    #[error("Not authenticated")]
    Unauthenticated,

    /// No active mailbox account for the caller. Connect one first.
    #[error("No connected mailbox account")]
    CredentialMissing,

    /// The stored credential was rejected and cannot be refreshed.
    /// Surface a reconnect prompt; retrying will not help.
    #[error("Mailbox credential invalid, reconnect required: {0}")]
    CredentialInvalid(String),

    /// Transient provider failure. Retryable with backoff at the
    /// sync-trigger boundary.
    #[error("Provider temporarily unavailable: {0}")]
    ProviderUnavailable(String),

    /// The provider rejected this specific request (bad recipient,
    /// oversized attachment). The reason is safe to show.
    #[error("Provider rejected the request: {0}")]
    ProviderRejected(String),

    /// Ciphertext failed to decrypt. Affected rows surface as
    /// unreadable; whole-request failures carry this only when nothing
    /// else could be returned.
    #[error("Decryption failed")]
    DecryptionFailed,

    /// A reconciliation write hit a constraint. Should not occur given
    /// idempotent upserts.
    #[error("Reconciliation conflict: {0}")]
    ReconciliationConflict(String),

    /// The OAuth callback state failed validation.
    #[error("Invalid connect state: {0}")]
    InvalidState(String),

    /// The requested provider has no client registration in config.
    #[error("Provider not configured: {0}")]
    ProviderNotConfigured(&'static str),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(DatabaseError),

    #[error("Encryption error: {0}")]
    Crypto(CryptoError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Secret resolution failed: {0}")]
    Secret(#[from] SecretError),
}

impl From<DatabaseError> for MailvaultError {
    fn from(err: DatabaseError) -> Self {
        match &err {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(failure, _))
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                MailvaultError::ReconciliationConflict(err.to_string())
            }
            _ => MailvaultError::Database(err),
        }
    }
}

impl From<ProviderError> for MailvaultError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unauthorized(reason) => MailvaultError::CredentialInvalid(reason),
            ProviderError::Http(_) | ProviderError::RateLimited { .. } => {
                MailvaultError::ProviderUnavailable(err.to_string())
            }
            ProviderError::Api { status, .. } if status >= 500 => {
                MailvaultError::ProviderUnavailable(err.to_string())
            }
            ProviderError::Api { .. } => MailvaultError::ProviderRejected(err.to_string()),
            ProviderError::OAuth(_) | ProviderError::Decode(_) => {
                MailvaultError::ProviderUnavailable(err.to_string())
            }
        }
    }
}

impl From<AuthError> for MailvaultError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::CredentialMissing => MailvaultError::CredentialMissing,
            AuthError::CredentialInvalid(reason) => MailvaultError::CredentialInvalid(reason),
            AuthError::InvalidState(reason) => MailvaultError::InvalidState(reason),
            AuthError::Provider(inner) => inner.into(),
            AuthError::Database(inner) => inner.into(),
        }
    }
}

impl From<CryptoError> for MailvaultError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::DecryptionFailed { .. } => MailvaultError::DecryptionFailed,
            CryptoError::KeyStore(inner) => inner.into(),
            other => MailvaultError::Crypto(other),
        }
    }
}

impl From<SyncError> for MailvaultError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Auth(inner) => inner.into(),
            SyncError::Provider(inner) => inner.into(),
            SyncError::Database(inner) => inner.into(),
            SyncError::Crypto(inner) => inner.into(),
            SyncError::Cancelled => MailvaultError::Cancelled,
        }
    }
}

impl From<StoreError> for MailvaultError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ThreadNotFound(id)
            | StoreError::MessageNotFound(id)
            | StoreError::TemplateNotFound(id) => MailvaultError::NotFound(id),
            StoreError::Cancelled => MailvaultError::Cancelled,
            StoreError::Database(inner) => inner.into(),
            StoreError::Crypto(inner) => inner.into(),
            StoreError::Auth(inner) => inner.into(),
            StoreError::Provider(inner) => inner.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MailvaultError>;
