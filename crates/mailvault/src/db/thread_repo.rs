//! Thread repository — CRUD and filtered queries for the `threads` table.
//!
//! Functions used inside a sync page's transaction take a raw
//! `&Connection`; the read/mutation surface takes `&Database`.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{Database, DatabaseError};

/// A mail participant: address plus optional display name. The first
/// participant of a thread is the display owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Participant {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: None,
        }
    }

    pub fn named(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            name: Some(name.into()),
        }
    }
}

/// Mailbox listing filter. Maps to boolean predicates on thread flags:
/// inbox = not archived and not draft and not sent; sent = sent and not
/// draft; starred = starred, independent of the other flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailFilter {
    Inbox,
    Sent,
    Starred,
}

impl MailFilter {
    fn predicate(&self) -> &'static str {
        match self {
            MailFilter::Inbox => "is_archived = 0 AND is_draft = 0 AND is_sent = 0",
            MailFilter::Sent => "is_sent = 1 AND is_draft = 0",
            MailFilter::Starred => "is_starred = 1",
        }
    }
}

/// A raw thread row from the database.
#[derive(Debug, Clone)]
pub struct ThreadRow {
    pub id: String,
    pub user_id: String,
    pub account_id: i64,
    pub provider_thread_id: Option<String>,
    pub subject: Option<String>,
    pub subject_enc: Option<String>,
    pub snippet: Option<String>,
    pub snippet_enc: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message_at: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub is_draft: bool,
    pub is_sent: bool,
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for creating a thread.
#[derive(Debug, Clone)]
pub struct NewThread {
    pub id: String,
    pub user_id: String,
    pub account_id: i64,
    pub provider_thread_id: Option<String>,
    pub subject: Option<String>,
    pub subject_enc: Option<String>,
    pub snippet: Option<String>,
    pub snippet_enc: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message_at: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub is_draft: bool,
    pub is_sent: bool,
}

/// Partial flag update; None leaves a flag unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlagUpdate {
    pub is_read: Option<bool>,
    pub is_starred: Option<bool>,
    pub is_archived: Option<bool>,
}

const COLUMNS: &str = "id, user_id, account_id, provider_thread_id, subject, subject_enc, \
                       snippet, snippet_enc, participants, last_message_at, is_read, is_starred, \
                       is_archived, is_draft, is_sent, message_count, created_at, updated_at";

fn decode_participants(json: &str) -> Result<Vec<Participant>, DatabaseError> {
    serde_json::from_str(json).map_err(|e| DatabaseError::CorruptColumn {
        column: "participants",
        reason: e.to_string(),
    })
}

fn encode_participants(participants: &[Participant]) -> String {
    // Serializing a list of plain structs cannot fail.
    serde_json::to_string(participants).unwrap_or_else(|_| "[]".to_string())
}

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<(ThreadRow, String)> {
    let participants_json: String = row.get(8)?;
    Ok((
        ThreadRow {
            id: row.get(0)?,
            user_id: row.get(1)?,
            account_id: row.get(2)?,
            provider_thread_id: row.get(3)?,
            subject: row.get(4)?,
            subject_enc: row.get(5)?,
            snippet: row.get(6)?,
            snippet_enc: row.get(7)?,
            participants: Vec::new(),
            last_message_at: row.get(9)?,
            is_read: row.get::<_, i64>(10)? != 0,
            is_starred: row.get::<_, i64>(11)? != 0,
            is_archived: row.get::<_, i64>(12)? != 0,
            is_draft: row.get::<_, i64>(13)? != 0,
            is_sent: row.get::<_, i64>(14)? != 0,
            message_count: row.get(15)?,
            created_at: row.get(16)?,
            updated_at: row.get(17)?,
        },
        participants_json,
    ))
}

fn finish_row((mut thread, json): (ThreadRow, String)) -> Result<ThreadRow, DatabaseError> {
    thread.participants = decode_participants(&json)?;
    Ok(thread)
}

/// Inserts a new thread row.
pub fn insert(conn: &Connection, new: &NewThread) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO threads
           (id, user_id, account_id, provider_thread_id, subject, subject_enc,
            snippet, snippet_enc, participants, last_message_at, is_read, is_starred,
            is_archived, is_draft, is_sent, message_count, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, ?16, ?16)",
        params![
            new.id,
            new.user_id,
            new.account_id,
            new.provider_thread_id,
            new.subject,
            new.subject_enc,
            new.snippet,
            new.snippet_enc,
            encode_participants(&new.participants),
            new.last_message_at,
            new.is_read as i64,
            new.is_starred as i64,
            new.is_archived as i64,
            new.is_draft as i64,
            new.is_sent as i64,
            now,
        ],
    )?;
    Ok(())
}

/// Finds a synced thread by its provider key (account_id, provider_thread_id).
pub fn find_by_provider_key(
    conn: &Connection,
    account_id: i64,
    provider_thread_id: &str,
) -> Result<Option<ThreadRow>, DatabaseError> {
    let found = conn
        .query_row(
            &format!(
                "SELECT {} FROM threads WHERE account_id = ?1 AND provider_thread_id = ?2",
                COLUMNS
            ),
            params![account_id, provider_thread_id],
            row_from,
        )
        .optional()?;
    found.map(finish_row).transpose()
}

/// Updates the content fields the provider is authoritative for:
/// snippet, last_message_at, participants. Local organizational flags
/// are deliberately not touched here.
pub fn update_sync_content(
    conn: &Connection,
    thread_id: &str,
    snippet: Option<&str>,
    snippet_enc: Option<&str>,
    last_message_at: &str,
    participants: &[Participant],
) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE threads SET
           snippet = ?2,
           snippet_enc = ?3,
           last_message_at = MAX(last_message_at, ?4),
           participants = ?5,
           updated_at = ?6
         WHERE id = ?1",
        params![
            thread_id,
            snippet,
            snippet_enc,
            last_message_at,
            encode_participants(participants),
            now
        ],
    )?;
    Ok(())
}

/// Recomputes message_count from the messages table.
pub fn refresh_message_count(conn: &Connection, thread_id: &str) -> Result<i64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM messages WHERE thread_id = ?1",
        params![thread_id],
        |r| r.get(0),
    )?;
    conn.execute(
        "UPDATE threads SET message_count = ?2 WHERE id = ?1",
        params![thread_id, count],
    )?;
    Ok(count)
}

/// Finds a thread by id.
pub fn find(db: &Database, id: &str) -> Result<Option<ThreadRow>, DatabaseError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                &format!("SELECT {} FROM threads WHERE id = ?1", COLUMNS),
                params![id],
                row_from,
            )
            .optional()?;
        found.map(finish_row).transpose()
    })
}

/// A page of threads plus the unfiltered total for the same predicate.
#[derive(Debug)]
pub struct ThreadPage {
    pub threads: Vec<ThreadRow>,
    pub total: i64,
}

/// Lists threads for an account matching the filter, newest activity
/// first. `page` is 1-based.
pub fn list(
    db: &Database,
    account_id: i64,
    filter: MailFilter,
    page: u32,
    page_size: u32,
) -> Result<ThreadPage, DatabaseError> {
    let page = page.max(1);
    let offset = (page as i64 - 1) * page_size as i64;

    db.with_conn(|conn| {
        let total: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM threads WHERE account_id = ?1 AND {}",
                filter.predicate()
            ),
            params![account_id],
            |r| r.get(0),
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM threads WHERE account_id = ?1 AND {}
             ORDER BY last_message_at DESC LIMIT ?2 OFFSET ?3",
            COLUMNS,
            filter.predicate()
        ))?;
        let threads = stmt
            .query_map(params![account_id, page_size as i64, offset], row_from)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(finish_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ThreadPage { threads, total })
    })
}

/// Applies a partial flag update. Absent flags are left unchanged.
pub fn set_flags(db: &Database, id: &str, update: FlagUpdate) -> Result<(), DatabaseError> {
    let now = Utc::now().to_rfc3339();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE threads SET
               is_read = COALESCE(?2, is_read),
               is_starred = COALESCE(?3, is_starred),
               is_archived = COALESCE(?4, is_archived),
               updated_at = ?5
             WHERE id = ?1",
            params![
                id,
                update.is_read.map(|b| b as i64),
                update.is_starred.map(|b| b as i64),
                update.is_archived.map(|b| b as i64),
                now
            ],
        )?;
        Ok(())
    })
}

/// Deletes a thread; its messages cascade.
pub fn delete(db: &Database, id: &str) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM threads WHERE id = ?1", params![id])?;
        Ok(())
    })
}
