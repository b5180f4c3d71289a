//! Token lifecycle management.
//!
//! Callers always receive a non-expired access token. A token more than
//! five minutes from expiry is returned as-is — the buffer absorbs
//! clock skew and in-flight request latency. Anything closer is
//! refreshed through the provider adapter and persisted, under a
//! per-credential lock with a post-acquisition re-check so concurrent
//! callers trigger at most one refresh.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use log::{info, warn};
use secrecy::SecretString;
use tokio::sync::Mutex;

use crate::db::credential_repo::{self, CredentialRow, CredentialState};
use crate::db::Database;
use crate::provider::MailProvider;
use crate::sanitize::redact_email;

use super::error::{AuthError, Result};

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_BUFFER_SECS: u64 = 300;

/// Hands out valid access tokens for stored credentials, refreshing
/// and persisting as needed. Cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
    db: Database,
    locks: Arc<StdMutex<HashMap<i64, Arc<Mutex<()>>>>>,
}

impl TokenManager {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            locks: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Returns a non-expired access token for the credential, refreshing
    /// through `provider` if the stored one expires within the buffer.
    ///
    /// A failed refresh transitions the credential to `needs_reconnect`
    /// and yields `CredentialInvalid`; callers surface a reconnect
    /// prompt instead of retrying.
    pub async fn get_valid_token(
        &self,
        credential_id: i64,
        provider: &dyn MailProvider,
    ) -> Result<String> {
        let row = self.load_active(credential_id)?;
        if !row.is_expiring(REFRESH_BUFFER_SECS) {
            return Ok(row.access_token);
        }

        let lock = self.lock_for(credential_id);
        let _guard = lock.lock().await;

        // Re-check on a fresh row: another caller holding the lock may
        // have already refreshed.
        let row = self.load_active(credential_id)?;
        if !row.is_expiring(REFRESH_BUFFER_SECS) {
            return Ok(row.access_token);
        }

        self.refresh_locked(&row, provider).await
    }

    async fn refresh_locked(
        &self,
        row: &CredentialRow,
        provider: &dyn MailProvider,
    ) -> Result<String> {
        let Some(refresh_token) = row.refresh_token.clone() else {
            credential_repo::set_state(&self.db, row.id, CredentialState::NeedsReconnect)?;
            return Err(AuthError::CredentialInvalid(
                "no refresh token stored".to_string(),
            ));
        };

        match provider.refresh(&SecretString::from(refresh_token)).await {
            Ok(grant) => {
                credential_repo::update_tokens(
                    &self.db,
                    row.id,
                    &grant.access_token,
                    grant.refresh_token.as_deref(),
                    grant.expires_in,
                )?;
                info!(
                    "Refreshed access token for {} (account {})",
                    redact_email(&row.email),
                    row.id
                );
                Ok(grant.access_token)
            }
            Err(e) if e.is_auth_failure() => {
                warn!(
                    "Refresh rejected for {} (account {}): {}",
                    redact_email(&row.email),
                    row.id,
                    e
                );
                credential_repo::set_state(&self.db, row.id, CredentialState::NeedsReconnect)?;
                Err(AuthError::CredentialInvalid(e.to_string()))
            }
            // Transient failures leave the credential state untouched.
            Err(e) => Err(AuthError::Provider(e)),
        }
    }

    fn load_active(&self, credential_id: i64) -> Result<CredentialRow> {
        let row =
            credential_repo::find(&self.db, credential_id)?.ok_or(AuthError::CredentialMissing)?;
        if !row.is_active {
            return Err(AuthError::CredentialMissing);
        }
        Ok(row)
    }

    fn lock_for(&self, credential_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| {
            // The map only holds lock handles; a poisoned guard is still usable.
            poisoned.into_inner()
        });
        Arc::clone(locks.entry(credential_id).or_default())
    }
}
