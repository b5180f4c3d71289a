//! Idempotent reconciliation of provider messages into local threads.
//!
//! Split in two phases: `prepare` encrypts sensitive fields up front,
//! `apply_page` runs the database writes. The split keeps the page
//! transaction free of non-database failure modes — a page either
//! commits whole or not at all.
//!
//! The provider is authoritative for content and timestamps. Its
//! read/starred flags seed a thread exactly once, at creation; later
//! pages never touch local organizational flags.

use chrono::SecondsFormat;
use rusqlite::Connection;
use uuid::Uuid;

use crate::crypto::{CryptoError, FieldCipher};
use crate::db::thread_repo::{MailFilter, NewThread, Participant};
use crate::db::{message_repo, thread_repo, DatabaseError};
use crate::provider::RemoteMessage;

/// A provider message with its sensitive fields already encrypted.
#[derive(Debug, Clone)]
pub struct PreparedMessage {
    pub provider_message_id: String,
    pub provider_thread_id: String,
    pub from: Participant,
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub subject_enc: Option<String>,
    pub snippet_enc: Option<String>,
    pub body_text_enc: Option<String>,
    pub body_html_enc: Option<String>,
    pub received_at: String,
    pub is_read: bool,
    pub is_starred: bool,
}

/// Counters for one reconciled page.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageStats {
    pub threads_created: u64,
    /// Distinct threads touched (created or updated).
    pub threads_upserted: u64,
    pub messages_created: u64,
    pub messages_updated: u64,
}

/// Encrypts the sensitive fields of each provider message.
pub fn prepare(
    messages: &[RemoteMessage],
    cipher: &FieldCipher,
) -> Result<Vec<PreparedMessage>, CryptoError> {
    messages
        .iter()
        .map(|msg| {
            let encrypt_opt = |value: &Option<String>| -> Result<Option<String>, CryptoError> {
                value.as_deref().map(|v| cipher.encrypt(v)).transpose()
            };

            Ok(PreparedMessage {
                provider_message_id: msg.provider_message_id.clone(),
                provider_thread_id: msg.provider_thread_id.clone(),
                from: msg.from.clone(),
                to: msg.to.clone(),
                cc: msg.cc.clone(),
                subject_enc: encrypt_opt(&msg.subject)?,
                snippet_enc: encrypt_opt(&msg.snippet)?,
                body_text_enc: encrypt_opt(&msg.body_text)?,
                body_html_enc: encrypt_opt(&msg.body_html)?,
                received_at: msg
                    .received_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                is_read: msg.is_read,
                is_starred: msg.is_starred,
            })
        })
        .collect()
}

/// Applies one prepared page inside the caller's transaction. Threads
/// are keyed by (account_id, provider_thread_id); messages upsert by
/// provider_message_id, so re-running a page changes nothing.
pub fn apply_page(
    conn: &Connection,
    user_id: &str,
    account_id: i64,
    filter: MailFilter,
    prepared: &[PreparedMessage],
) -> Result<PageStats, DatabaseError> {
    let mut stats = PageStats::default();
    let mut touched_threads: Vec<String> = Vec::new();

    for msg in prepared {
        // A message already present anywhere in the account (typically
        // locally-sent mail carrying its provider id) stays on its
        // thread; syncing it again must not double the thread.
        if let Some(thread_id) = message_repo::find_thread_for_provider_message(
            conn,
            account_id,
            &msg.provider_message_id,
        )? {
            upsert_message(conn, &thread_id, filter, msg)?;
            stats.messages_updated += 1;
            if !touched_threads.contains(&thread_id) {
                touched_threads.push(thread_id);
            }
            continue;
        }

        let existing = thread_repo::find_by_provider_key(conn, account_id, &msg.provider_thread_id)?;

        let thread_id = match existing {
            Some(thread) => {
                let participants = merge_participants(&thread.participants, msg);
                // Keep the newest snippet: older pages may arrive later.
                let snippet_enc = if msg.received_at.as_str() >= thread.last_message_at.as_str() {
                    msg.snippet_enc.as_deref()
                } else {
                    thread.snippet_enc.as_deref()
                };
                thread_repo::update_sync_content(
                    conn,
                    &thread.id,
                    None,
                    snippet_enc,
                    &msg.received_at,
                    &participants,
                )?;
                thread.id
            }
            None => {
                let thread_id = Uuid::new_v4().to_string();
                thread_repo::insert(
                    conn,
                    &NewThread {
                        id: thread_id.clone(),
                        user_id: user_id.to_string(),
                        account_id,
                        provider_thread_id: Some(msg.provider_thread_id.clone()),
                        subject: None,
                        subject_enc: msg.subject_enc.clone(),
                        snippet: None,
                        snippet_enc: msg.snippet_enc.clone(),
                        participants: merge_participants(&[], msg),
                        last_message_at: msg.received_at.clone(),
                        // Initial import seeds flags from provider truth.
                        is_read: msg.is_read,
                        is_starred: msg.is_starred,
                        is_archived: false,
                        is_draft: false,
                        is_sent: filter == MailFilter::Sent,
                    },
                )?;
                stats.threads_created += 1;
                thread_id
            }
        };

        let created = upsert_message(conn, &thread_id, filter, msg)?;
        if created {
            stats.messages_created += 1;
        } else {
            stats.messages_updated += 1;
        }

        if !touched_threads.contains(&thread_id) {
            touched_threads.push(thread_id);
        }
    }

    for thread_id in &touched_threads {
        thread_repo::refresh_message_count(conn, thread_id)?;
    }
    stats.threads_upserted = touched_threads.len() as u64;

    Ok(stats)
}

fn upsert_message(
    conn: &Connection,
    thread_id: &str,
    filter: MailFilter,
    msg: &PreparedMessage,
) -> Result<bool, DatabaseError> {
    message_repo::upsert(
        conn,
        &message_repo::NewMessage {
            id: Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            provider_message_id: Some(msg.provider_message_id.clone()),
            from_email: msg.from.email.clone(),
            from_name: msg.from.name.clone(),
            to_addrs: msg.to.clone(),
            cc_addrs: msg.cc.clone(),
            bcc_addrs: Vec::new(),
            subject: None,
            subject_enc: msg.subject_enc.clone(),
            body_text: None,
            body_text_enc: msg.body_text_enc.clone(),
            body_html: None,
            body_html_enc: msg.body_html_enc.clone(),
            received_at: msg.received_at.clone(),
            is_draft: false,
            is_sent: filter == MailFilter::Sent,
        },
    )
}

/// Thread participants: existing first, then the message's sender and
/// recipients, deduplicated by address.
fn merge_participants(existing: &[Participant], msg: &PreparedMessage) -> Vec<Participant> {
    let mut merged: Vec<Participant> = existing.to_vec();
    for candidate in std::iter::once(&msg.from).chain(msg.to.iter()) {
        if !merged.iter().any(|p| p.email == candidate.email) {
            merged.push(candidate.clone());
        }
    }
    merged
}
