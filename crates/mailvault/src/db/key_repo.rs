//! User encryption key repository — the persistent half of the key vault.
//!
//! A key row is written exactly once per user. `insert_if_absent` uses
//! INSERT OR IGNORE so concurrent first writes are idempotent; the caller
//! must re-read after inserting and use whatever actually won.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Finds the stored key (lowercase hex) for a user.
pub fn find(db: &Database, user_id: &str) -> Result<Option<String>, DatabaseError> {
    db.with_conn(|conn| {
        conn.query_row(
            "SELECT key_hex FROM user_keys WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(DatabaseError::Sqlite)
    })
}

/// Inserts a key for a user unless one already exists. Existing keys are
/// never overwritten — regeneration would orphan previously encrypted
/// data.
pub fn insert_if_absent(db: &Database, user_id: &str, key_hex: &str) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR IGNORE INTO user_keys (user_id, key_hex, created_at) VALUES (?1, ?2, ?3)",
            params![user_id, key_hex, now],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("Failed to create test database")
    }

    #[test]
    fn test_find_missing() {
        let db = test_db();
        assert!(find(&db, "u1").unwrap().is_none());
    }

    #[test]
    fn test_insert_and_find() {
        let db = test_db();
        insert_if_absent(&db, "u1", "aabbcc").unwrap();
        assert_eq!(find(&db, "u1").unwrap().as_deref(), Some("aabbcc"));
    }

    #[test]
    fn test_second_insert_is_ignored() {
        let db = test_db();
        insert_if_absent(&db, "u1", "aabbcc").unwrap();
        insert_if_absent(&db, "u1", "ddeeff").unwrap();
        // The first key wins; it is never regenerated.
        assert_eq!(find(&db, "u1").unwrap().as_deref(), Some("aabbcc"));
    }
}
