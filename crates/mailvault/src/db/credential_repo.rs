//! Credential repository — CRUD operations for the `credentials` table.
//!
//! One active credential per (user_id, email). Reconnecting the same
//! mailbox upserts the existing row instead of duplicating it.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{Database, DatabaseError};

/// Maximum expires_in value we accept (1 year in seconds).
/// This prevents overflow when casting u64 to i64.
const MAX_EXPIRES_IN_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Connection state of a credential. Transitioned only by the token
/// lifecycle manager and the user-initiated disconnect action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialState {
    Connected,
    NeedsReconnect,
    Disconnected,
}

impl CredentialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialState::Connected => "connected",
            CredentialState::NeedsReconnect => "needs_reconnect",
            CredentialState::Disconnected => "disconnected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "connected" => Some(CredentialState::Connected),
            "needs_reconnect" => Some(CredentialState::NeedsReconnect),
            "disconnected" => Some(CredentialState::Disconnected),
            _ => None,
        }
    }
}

/// A raw credential row from the database.
#[derive(Debug, Clone)]
pub struct CredentialRow {
    pub id: i64,
    pub user_id: String,
    pub provider: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: String,
    pub is_active: bool,
    pub state: String,
    pub created_at: String,
    pub updated_at: String,
}

impl CredentialRow {
    /// Checks if the access token is expired (or expires within
    /// `buffer_seconds`). An unparseable expiry counts as expired.
    pub fn is_expiring(&self, buffer_seconds: u64) -> bool {
        let Ok(expires) = chrono::DateTime::parse_from_rfc3339(&self.expires_at) else {
            return true;
        };
        let now = Utc::now();
        let buffer = chrono::Duration::seconds(buffer_seconds.min(MAX_EXPIRES_IN_SECONDS) as i64);
        expires <= now + buffer
    }

    /// Checks if the token can be refreshed.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn state(&self) -> Option<CredentialState> {
        CredentialState::parse(&self.state)
    }
}

/// Fields for creating (or re-connecting) a credential.
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub user_id: String,
    pub provider: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_seconds: u64,
}

fn expires_at_from_now(expires_in_seconds: u64) -> String {
    let clamped = expires_in_seconds.min(MAX_EXPIRES_IN_SECONDS);
    (Utc::now() + chrono::Duration::seconds(clamped as i64)).to_rfc3339()
}

/// Inserts or updates a credential keyed by (user_id, email).
/// Returns the row id.
pub fn upsert(db: &Database, new: &NewCredential) -> Result<i64, DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let expires_at = expires_at_from_now(new.expires_in_seconds);

    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO credentials
               (user_id, provider, email, access_token, refresh_token, expires_at,
                is_active, state, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 'connected', ?7, ?7)
             ON CONFLICT(user_id, email) DO UPDATE SET
               provider = ?2,
               access_token = ?4,
               refresh_token = COALESCE(?5, refresh_token),
               expires_at = ?6,
               is_active = 1,
               state = 'connected',
               updated_at = ?7",
            params![
                new.user_id,
                new.provider,
                new.email,
                new.access_token,
                new.refresh_token,
                expires_at,
                now,
            ],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM credentials WHERE user_id = ?1 AND email = ?2",
            params![new.user_id, new.email],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<CredentialRow> {
    Ok(CredentialRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        provider: row.get(2)?,
        email: row.get(3)?,
        access_token: row.get(4)?,
        refresh_token: row.get(5)?,
        expires_at: row.get(6)?,
        is_active: row.get::<_, i64>(7)? != 0,
        state: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
    })
}

const COLUMNS: &str = "id, user_id, provider, email, access_token, refresh_token, expires_at, \
                       is_active, state, created_at, updated_at";

/// Finds a credential by id.
pub fn find(db: &Database, id: i64) -> Result<Option<CredentialRow>, DatabaseError> {
    db.with_conn(|conn| {
        conn.query_row(
            &format!("SELECT {} FROM credentials WHERE id = ?1", COLUMNS),
            params![id],
            row_from,
        )
        .optional()
        .map_err(DatabaseError::Sqlite)
    })
}

/// Finds all active credentials for a user, oldest first.
pub fn find_active_for_user(
    db: &Database,
    user_id: &str,
) -> Result<Vec<CredentialRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM credentials WHERE user_id = ?1 AND is_active = 1 ORDER BY id",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![user_id], row_from)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Updates the access token and expiry after a refresh. A rotated
/// refresh token (Some) replaces the stored one; None keeps it.
pub fn update_tokens(
    db: &Database,
    id: i64,
    access_token: &str,
    rotated_refresh_token: Option<&str>,
    expires_in_seconds: u64,
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let expires_at = expires_at_from_now(expires_in_seconds);

    db.with_conn(|conn| {
        conn.execute(
            "UPDATE credentials SET
               access_token = ?2,
               refresh_token = COALESCE(?3, refresh_token),
               expires_at = ?4,
               state = 'connected',
               updated_at = ?5
             WHERE id = ?1",
            params![id, access_token, rotated_refresh_token, expires_at, now],
        )?;
        Ok(())
    })
}

/// Sets the connection state. `Disconnected` also clears is_active.
pub fn set_state(db: &Database, id: i64, state: CredentialState) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    let is_active = match state {
        CredentialState::Disconnected => 0,
        _ => 1,
    };
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE credentials SET state = ?2, is_active = ?3, updated_at = ?4 WHERE id = ?1",
            params![id, state.as_str(), is_active, now],
        )?;
        Ok(())
    })
}
