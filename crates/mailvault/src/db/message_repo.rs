//! Message repository — CRUD for the `messages` table.
//!
//! Messages synced from a provider are upserted by
//! (thread_id, provider_message_id) so re-running a sync is idempotent:
//! a duplicate-key write becomes a content update, never an error.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::thread_repo::Participant;
use super::{Database, DatabaseError};

/// A raw message row from the database.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub thread_id: String,
    pub provider_message_id: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_addrs: Vec<Participant>,
    pub cc_addrs: Vec<Participant>,
    pub bcc_addrs: Vec<Participant>,
    pub subject: Option<String>,
    pub subject_enc: Option<String>,
    pub body_text: Option<String>,
    pub body_text_enc: Option<String>,
    pub body_html: Option<String>,
    pub body_html_enc: Option<String>,
    pub received_at: String,
    pub is_draft: bool,
    pub is_sent: bool,
    pub created_at: String,
}

/// Fields for creating or upserting a message.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub thread_id: String,
    pub provider_message_id: Option<String>,
    pub from_email: String,
    pub from_name: Option<String>,
    pub to_addrs: Vec<Participant>,
    pub cc_addrs: Vec<Participant>,
    pub bcc_addrs: Vec<Participant>,
    pub subject: Option<String>,
    pub subject_enc: Option<String>,
    pub body_text: Option<String>,
    pub body_text_enc: Option<String>,
    pub body_html: Option<String>,
    pub body_html_enc: Option<String>,
    pub received_at: String,
    pub is_draft: bool,
    pub is_sent: bool,
}

const COLUMNS: &str = "id, thread_id, provider_message_id, from_email, from_name, to_addrs, \
                       cc_addrs, bcc_addrs, subject, subject_enc, body_text, body_text_enc, \
                       body_html, body_html_enc, received_at, is_draft, is_sent, created_at";

fn decode_addrs(json: &str, column: &'static str) -> Result<Vec<Participant>, DatabaseError> {
    serde_json::from_str(json).map_err(|e| DatabaseError::CorruptColumn {
        column,
        reason: e.to_string(),
    })
}

fn encode_addrs(addrs: &[Participant]) -> String {
    serde_json::to_string(addrs).unwrap_or_else(|_| "[]".to_string())
}

fn row_from(row: &rusqlite::Row<'_>) -> rusqlite::Result<(MessageRow, [String; 3])> {
    let to_json: String = row.get(5)?;
    let cc_json: String = row.get(6)?;
    let bcc_json: String = row.get(7)?;
    Ok((
        MessageRow {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            provider_message_id: row.get(2)?,
            from_email: row.get(3)?,
            from_name: row.get(4)?,
            to_addrs: Vec::new(),
            cc_addrs: Vec::new(),
            bcc_addrs: Vec::new(),
            subject: row.get(8)?,
            subject_enc: row.get(9)?,
            body_text: row.get(10)?,
            body_text_enc: row.get(11)?,
            body_html: row.get(12)?,
            body_html_enc: row.get(13)?,
            received_at: row.get(14)?,
            is_draft: row.get::<_, i64>(15)? != 0,
            is_sent: row.get::<_, i64>(16)? != 0,
            created_at: row.get(17)?,
        },
        [to_json, cc_json, bcc_json],
    ))
}

fn finish_row(
    (mut msg, [to, cc, bcc]): (MessageRow, [String; 3]),
) -> Result<MessageRow, DatabaseError> {
    msg.to_addrs = decode_addrs(&to, "to_addrs")?;
    msg.cc_addrs = decode_addrs(&cc, "cc_addrs")?;
    msg.bcc_addrs = decode_addrs(&bcc, "bcc_addrs")?;
    Ok(msg)
}

/// Inserts a message, or updates its content if a row with the same
/// (thread_id, provider_message_id) already exists. Returns true when a
/// new row was created.
pub fn upsert(conn: &Connection, new: &NewMessage) -> Result<bool, DatabaseError> {
    let existing: Option<String> = match &new.provider_message_id {
        Some(pmid) => conn
            .query_row(
                "SELECT id FROM messages WHERE thread_id = ?1 AND provider_message_id = ?2",
                params![new.thread_id, pmid],
                |r| r.get(0),
            )
            .optional()?,
        None => None,
    };

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE messages SET
                   from_email = ?2, from_name = ?3, to_addrs = ?4, cc_addrs = ?5,
                   bcc_addrs = ?6, subject = ?7, subject_enc = ?8, body_text = ?9,
                   body_text_enc = ?10, body_html = ?11, body_html_enc = ?12,
                   received_at = ?13
                 WHERE id = ?1",
                params![
                    id,
                    new.from_email,
                    new.from_name,
                    encode_addrs(&new.to_addrs),
                    encode_addrs(&new.cc_addrs),
                    encode_addrs(&new.bcc_addrs),
                    new.subject,
                    new.subject_enc,
                    new.body_text,
                    new.body_text_enc,
                    new.body_html,
                    new.body_html_enc,
                    new.received_at,
                ],
            )?;
            Ok(false)
        }
        None => {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO messages
                   (id, thread_id, provider_message_id, from_email, from_name, to_addrs,
                    cc_addrs, bcc_addrs, subject, subject_enc, body_text, body_text_enc,
                    body_html, body_html_enc, received_at, is_draft, is_sent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
                params![
                    new.id,
                    new.thread_id,
                    new.provider_message_id,
                    new.from_email,
                    new.from_name,
                    encode_addrs(&new.to_addrs),
                    encode_addrs(&new.cc_addrs),
                    encode_addrs(&new.bcc_addrs),
                    new.subject,
                    new.subject_enc,
                    new.body_text,
                    new.body_text_enc,
                    new.body_html,
                    new.body_html_enc,
                    new.received_at,
                    new.is_draft as i64,
                    new.is_sent as i64,
                    now,
                ],
            )?;
            Ok(true)
        }
    }
}

/// Finds the thread already holding a provider message anywhere in the
/// account. Locally-sent mail carries its provider id from the send
/// path, so a later sync of the same message lands on the existing
/// thread instead of doubling it.
pub fn find_thread_for_provider_message(
    conn: &Connection,
    account_id: i64,
    provider_message_id: &str,
) -> Result<Option<String>, DatabaseError> {
    conn.query_row(
        "SELECT m.thread_id FROM messages m
         JOIN threads t ON t.id = m.thread_id
         WHERE t.account_id = ?1 AND m.provider_message_id = ?2",
        params![account_id, provider_message_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(DatabaseError::Sqlite)
}

/// Lists all messages of a thread, oldest first.
pub fn list_for_thread(db: &Database, thread_id: &str) -> Result<Vec<MessageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM messages WHERE thread_id = ?1 ORDER BY received_at ASC",
            COLUMNS
        ))?;
        let rows = stmt
            .query_map(params![thread_id], row_from)?
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .map(finish_row)
            .collect();
        rows
    })
}

/// Finds a message by id.
pub fn find(db: &Database, id: &str) -> Result<Option<MessageRow>, DatabaseError> {
    db.with_conn(|conn| {
        let found = conn
            .query_row(
                &format!("SELECT {} FROM messages WHERE id = ?1", COLUMNS),
                params![id],
                row_from,
            )
            .optional()?;
        found.map(finish_row).transpose()
    })
}

/// Fills in the provider message id after a successful send.
pub fn set_provider_message_id(
    db: &Database,
    id: &str,
    provider_message_id: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE messages SET provider_message_id = ?2 WHERE id = ?1",
            params![id, provider_message_id],
        )?;
        Ok(())
    })
}
