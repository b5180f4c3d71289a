//! Per-user encryption key vault.
//!
//! Keys are 256-bit, generated lazily on a user's first encrypted write,
//! persisted once to the `user_keys` table and never regenerated —
//! regenerating would silently orphan everything encrypted under the old
//! key. A bounded read-through cache keeps hot keys in memory; it holds
//! only recomputable data, so there is no teardown.

use std::sync::Arc;

use moka::sync::Cache;

use crate::db::{key_repo, Database};

use super::cipher::{generate_key_hex, parse_key_hex, FieldCipher, KEY_SIZE};
use super::error::{CryptoError, Result};

/// Maximum number of user keys held in memory.
const KEY_CACHE_CAPACITY: u64 = 10_000;

/// Read-through cache of per-user field-encryption keys, backed by the
/// `user_keys` table. Cheap to clone; safe for concurrent readers.
#[derive(Clone)]
pub struct KeyVault {
    db: Database,
    cache: Cache<String, Arc<[u8; KEY_SIZE]>>,
}

impl KeyVault {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            cache: Cache::new(KEY_CACHE_CAPACITY),
        }
    }

    /// Returns the user's key, generating and persisting one on first
    /// use. Concurrent first writes are resolved by INSERT OR IGNORE —
    /// every caller ends up with whichever key actually won.
    pub fn key_for(&self, user_id: &str) -> Result<Arc<[u8; KEY_SIZE]>> {
        if let Some(key) = self.cache.get(user_id) {
            return Ok(key);
        }

        let key_hex = match key_repo::find(&self.db, user_id)? {
            Some(hex) => hex,
            None => {
                let fresh = generate_key_hex()?;
                key_repo::insert_if_absent(&self.db, user_id, &fresh)?;
                log::info!("Generated encryption key for user {}", user_id);
                // Re-read: another writer may have won the race.
                key_repo::find(&self.db, user_id)?.ok_or_else(|| {
                    CryptoError::InvalidKey("key row vanished after insert".to_string())
                })?
            }
        };

        let key = Arc::new(parse_key_hex(&key_hex)?);
        self.cache.insert(user_id.to_string(), Arc::clone(&key));
        Ok(key)
    }

    /// Returns a cipher bound to the user's key.
    pub fn cipher_for(&self, user_id: &str) -> Result<FieldCipher> {
        Ok(FieldCipher::new(&*self.key_for(user_id)?))
    }
}
