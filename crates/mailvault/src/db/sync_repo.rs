//! Sync cursor repository — per-account pagination state.
//!
//! A null page token with `history_exhausted` set means the provider
//! reported no further history; "load more" stays disabled until the
//! user explicitly resets pagination.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{Database, DatabaseError};

/// Pagination state for one account.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub page_token: Option<String>,
    pub history_exhausted: bool,
}

/// Loads the sync state for an account. Absent rows read as the default
/// (no token, history not exhausted — a first sync).
pub fn load(db: &Database, account_id: i64) -> Result<SyncState, DatabaseError> {
    db.with_conn(|conn| load_with(conn, account_id))
}

/// Connection-level variant for use inside a transaction.
pub fn load_with(conn: &Connection, account_id: i64) -> Result<SyncState, DatabaseError> {
    let found = conn
        .query_row(
            "SELECT page_token, history_exhausted FROM sync_state WHERE account_id = ?1",
            params![account_id],
            |r| {
                Ok(SyncState {
                    page_token: r.get(0)?,
                    history_exhausted: r.get::<_, i64>(1)? != 0,
                })
            },
        )
        .optional()?;
    Ok(found.unwrap_or_default())
}

/// Persists the cursor after a page. A None token marks history as
/// exhausted.
pub fn store(conn: &Connection, account_id: i64, page_token: Option<&str>) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let exhausted = page_token.is_none() as i64;
    conn.execute(
        "INSERT INTO sync_state (account_id, page_token, history_exhausted, updated_at)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(account_id) DO UPDATE SET
           page_token = ?2,
           history_exhausted = ?3,
           updated_at = ?4",
        params![account_id, page_token, exhausted, now],
    )?;
    Ok(())
}

/// Clears pagination state so the next sync starts from the provider's
/// first page again.
pub fn reset(db: &Database, account_id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "DELETE FROM sync_state WHERE account_id = ?1",
            params![account_id],
        )?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::credential_repo::{self, NewCredential};

    fn test_db() -> (Database, i64) {
        let db = Database::open_in_memory().expect("Failed to create test database");
        let account_id = credential_repo::upsert(
            &db,
            &NewCredential {
                user_id: "u1".to_string(),
                provider: "gmail".to_string(),
                email: "alice@x.com".to_string(),
                access_token: "a".to_string(),
                refresh_token: None,
                expires_in_seconds: 3600,
            },
        )
        .unwrap();
        (db, account_id)
    }

    #[test]
    fn test_load_default_for_unknown_account() {
        let (db, account_id) = test_db();
        let state = load(&db, account_id).unwrap();
        assert_eq!(state, SyncState::default());
    }

    #[test]
    fn test_store_and_load_token() {
        let (db, account_id) = test_db();
        db.with_conn(|conn| store(conn, account_id, Some("cursor-1"))).unwrap();

        let state = load(&db, account_id).unwrap();
        assert_eq!(state.page_token.as_deref(), Some("cursor-1"));
        assert!(!state.history_exhausted);
    }

    #[test]
    fn test_none_token_marks_exhausted() {
        let (db, account_id) = test_db();
        db.with_conn(|conn| store(conn, account_id, Some("cursor-1"))).unwrap();
        db.with_conn(|conn| store(conn, account_id, None)).unwrap();

        let state = load(&db, account_id).unwrap();
        assert!(state.page_token.is_none());
        assert!(state.history_exhausted);
    }

    #[test]
    fn test_reset_reenables_pagination() {
        let (db, account_id) = test_db();
        db.with_conn(|conn| store(conn, account_id, None)).unwrap();
        reset(&db, account_id).unwrap();

        let state = load(&db, account_id).unwrap();
        assert!(!state.history_exhausted);
    }
}
