//! Mailbox store — the reconciled local representation.
//!
//! Serves filtered/paginated thread reads, thread detail, flag
//! mutations and deletes. Encrypted columns are decrypted on the way
//! out; a row whose ciphertext no longer verifies degrades to a
//! placeholder instead of failing the whole page — one corrupt row must
//! not block an inbox view.

use log::warn;

use crate::crypto::{FieldCipher, KeyVault};
use crate::db::thread_repo::{FlagUpdate, MailFilter, Participant, ThreadRow};
use crate::db::{message_repo, thread_repo, Database};

pub mod compose;
pub mod error;

pub use compose::{DraftRequest, Outbox, RenderedTemplate, SendRequest};
pub use error::StoreError;

use error::Result;

/// Shown in place of a field whose ciphertext cannot be decrypted.
pub const UNREADABLE_PLACEHOLDER: &str = "[unreadable]";

/// A thread with sensitive fields decrypted for the caller.
#[derive(Debug, Clone)]
pub struct ThreadView {
    pub id: String,
    pub account_id: i64,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub participants: Vec<Participant>,
    pub last_message_at: String,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_archived: bool,
    pub is_draft: bool,
    pub is_sent: bool,
    pub message_count: i64,
}

/// A message with sensitive fields decrypted for the caller.
#[derive(Debug, Clone)]
pub struct MessageView {
    pub id: String,
    pub thread_id: String,
    pub provider_message_id: Option<String>,
    pub from: Participant,
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub bcc: Vec<Participant>,
    pub subject: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: String,
    pub is_draft: bool,
    pub is_sent: bool,
}

/// One page of a thread listing.
#[derive(Debug, Clone)]
pub struct ThreadList {
    pub threads: Vec<ThreadView>,
    pub total: i64,
    pub has_more: bool,
}

/// A thread with its messages, oldest first.
#[derive(Debug, Clone)]
pub struct ThreadDetail {
    pub thread: ThreadView,
    pub messages: Vec<MessageView>,
}

/// Read/mutation surface over the reconciled mailbox.
#[derive(Clone)]
pub struct MailboxStore {
    db: Database,
    vault: KeyVault,
}

impl MailboxStore {
    pub fn new(db: Database, vault: KeyVault) -> Self {
        Self { db, vault }
    }

    /// Lists threads for an account, newest activity first. `page` is
    /// 1-based.
    pub fn list_threads(
        &self,
        user_id: &str,
        account_id: i64,
        filter: MailFilter,
        page: u32,
        page_size: u32,
    ) -> Result<ThreadList> {
        let cipher = self.vault.cipher_for(user_id)?;
        let page_data = thread_repo::list(&self.db, account_id, filter, page, page_size)?;

        let threads: Vec<ThreadView> = page_data
            .threads
            .into_iter()
            .filter(|t| t.user_id == user_id)
            .map(|t| thread_view(&cipher, t))
            .collect();

        let has_more = (page.max(1) as i64) * (page_size as i64) < page_data.total;
        Ok(ThreadList {
            threads,
            total: page_data.total,
            has_more,
        })
    }

    /// Returns a thread and its messages ordered by receipt/send time
    /// ascending.
    pub fn get_thread(&self, user_id: &str, thread_id: &str) -> Result<ThreadDetail> {
        let row = self.owned_thread(user_id, thread_id)?;
        let cipher = self.vault.cipher_for(user_id)?;

        let messages = message_repo::list_for_thread(&self.db, thread_id)?
            .into_iter()
            .map(|m| message_view(&cipher, m))
            .collect();

        Ok(ThreadDetail {
            thread: thread_view(&cipher, row),
            messages,
        })
    }

    /// Applies a partial flag update to a thread.
    pub fn set_flags(&self, user_id: &str, thread_id: &str, update: FlagUpdate) -> Result<()> {
        self.owned_thread(user_id, thread_id)?;
        thread_repo::set_flags(&self.db, thread_id, update)?;
        Ok(())
    }

    /// Deletes a thread and its messages.
    pub fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<()> {
        self.owned_thread(user_id, thread_id)?;
        thread_repo::delete(&self.db, thread_id)?;
        Ok(())
    }

    fn owned_thread(&self, user_id: &str, thread_id: &str) -> Result<ThreadRow> {
        let row = thread_repo::find(&self.db, thread_id)?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| StoreError::ThreadNotFound(thread_id.to_string()))?;
        Ok(row)
    }
}

/// Decrypts an encrypted column, falling back to the plaintext column.
/// A decryption failure logs and degrades to the placeholder.
fn decrypt_field(
    cipher: &FieldCipher,
    field: &'static str,
    id: &str,
    enc: Option<&str>,
    plain: Option<&str>,
) -> Option<String> {
    match enc {
        Some(blob) => match cipher.decrypt(blob) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Undecryptable {} on row {}: {}", field, id, e);
                Some(UNREADABLE_PLACEHOLDER.to_string())
            }
        },
        None => plain.map(|s| s.to_string()),
    }
}

fn thread_view(cipher: &FieldCipher, row: ThreadRow) -> ThreadView {
    ThreadView {
        subject: decrypt_field(
            cipher,
            "subject",
            &row.id,
            row.subject_enc.as_deref(),
            row.subject.as_deref(),
        ),
        snippet: decrypt_field(
            cipher,
            "snippet",
            &row.id,
            row.snippet_enc.as_deref(),
            row.snippet.as_deref(),
        ),
        id: row.id,
        account_id: row.account_id,
        participants: row.participants,
        last_message_at: row.last_message_at,
        is_read: row.is_read,
        is_starred: row.is_starred,
        is_archived: row.is_archived,
        is_draft: row.is_draft,
        is_sent: row.is_sent,
        message_count: row.message_count,
    }
}

fn message_view(cipher: &FieldCipher, row: message_repo::MessageRow) -> MessageView {
    MessageView {
        subject: decrypt_field(
            cipher,
            "subject",
            &row.id,
            row.subject_enc.as_deref(),
            row.subject.as_deref(),
        ),
        body_text: decrypt_field(
            cipher,
            "body_text",
            &row.id,
            row.body_text_enc.as_deref(),
            row.body_text.as_deref(),
        ),
        body_html: decrypt_field(
            cipher,
            "body_html",
            &row.id,
            row.body_html_enc.as_deref(),
            row.body_html.as_deref(),
        ),
        id: row.id,
        thread_id: row.thread_id,
        provider_message_id: row.provider_message_id,
        from: Participant {
            email: row.from_email,
            name: row.from_name,
        },
        to: row.to_addrs,
        cc: row.cc_addrs,
        bcc: row.bcc_addrs,
        received_at: row.received_at,
        is_draft: row.is_draft,
        is_sent: row.is_sent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::thread_repo::NewThread;

    fn setup() -> (Database, KeyVault, MailboxStore) {
        let db = Database::open_in_memory().unwrap();
        let vault = KeyVault::new(db.clone());
        let store = MailboxStore::new(db.clone(), vault.clone());
        (db, vault, store)
    }

    fn insert_thread(db: &Database, vault: &KeyVault, id: &str, subject: &str) {
        let cipher = vault.cipher_for("u1").unwrap();
        let new = NewThread {
            id: id.to_string(),
            user_id: "u1".to_string(),
            account_id: 1,
            provider_thread_id: Some(format!("pt-{}", id)),
            subject: None,
            subject_enc: Some(cipher.encrypt(subject).unwrap()),
            snippet: None,
            snippet_enc: Some(cipher.encrypt("snippet").unwrap()),
            participants: vec![Participant::new("alice@x.com")],
            last_message_at: "2026-01-02T00:00:00Z".to_string(),
            is_read: false,
            is_starred: false,
            is_archived: false,
            is_draft: false,
            is_sent: false,
        };
        db.with_conn(|conn| thread_repo::insert(conn, &new)).unwrap();
    }

    #[test]
    fn test_list_decrypts_fields() {
        let (db, vault, store) = setup();
        insert_thread(&db, &vault, "t1", "Quarterly review");

        let list = store
            .list_threads("u1", 1, MailFilter::Inbox, 1, 10)
            .unwrap();
        assert_eq!(list.total, 1);
        assert!(!list.has_more);
        assert_eq!(list.threads[0].subject.as_deref(), Some("Quarterly review"));
        assert_eq!(list.threads[0].snippet.as_deref(), Some("snippet"));
    }

    #[test]
    fn test_corrupt_row_degrades_to_placeholder() {
        let (db, vault, store) = setup();
        insert_thread(&db, &vault, "t1", "Readable");
        insert_thread(&db, &vault, "t2", "Will corrupt");

        db.with_conn(|conn| {
            conn.execute(
                "UPDATE threads SET subject_enc = 'deadbeef' WHERE id = 't2'",
                [],
            )?;
            Ok(())
        })
        .unwrap();

        let list = store
            .list_threads("u1", 1, MailFilter::Inbox, 1, 10)
            .unwrap();
        assert_eq!(list.threads.len(), 2);
        let corrupt = list.threads.iter().find(|t| t.id == "t2").unwrap();
        assert_eq!(corrupt.subject.as_deref(), Some(UNREADABLE_PLACEHOLDER));
        // The healthy row is unaffected.
        let healthy = list.threads.iter().find(|t| t.id == "t1").unwrap();
        assert_eq!(healthy.subject.as_deref(), Some("Readable"));
    }

    #[test]
    fn test_plaintext_column_used_when_no_ciphertext() {
        let (db, _vault, store) = setup();
        db.with_conn(|conn| {
            thread_repo::insert(
                conn,
                &NewThread {
                    id: "t1".to_string(),
                    user_id: "u1".to_string(),
                    account_id: 1,
                    provider_thread_id: None,
                    subject: Some("Plain subject".to_string()),
                    subject_enc: None,
                    snippet: None,
                    snippet_enc: None,
                    participants: Vec::new(),
                    last_message_at: "2026-01-01T00:00:00Z".to_string(),
                    is_read: false,
                    is_starred: false,
                    is_archived: false,
                    is_draft: false,
                    is_sent: false,
                },
            )
        })
        .unwrap();

        let detail = store.get_thread("u1", "t1").unwrap();
        assert_eq!(detail.thread.subject.as_deref(), Some("Plain subject"));
    }

    #[test]
    fn test_get_thread_denies_foreign_user() {
        let (db, vault, store) = setup();
        insert_thread(&db, &vault, "t1", "Private");

        assert!(matches!(
            store.get_thread("intruder", "t1"),
            Err(StoreError::ThreadNotFound(_))
        ));
        assert!(matches!(
            store.set_flags("intruder", "t1", FlagUpdate::default()),
            Err(StoreError::ThreadNotFound(_))
        ));
        assert!(matches!(
            store.delete_thread("intruder", "t1"),
            Err(StoreError::ThreadNotFound(_))
        ));
    }

    #[test]
    fn test_set_flags_and_starred_listing() {
        let (db, vault, store) = setup();
        insert_thread(&db, &vault, "t1", "One");
        insert_thread(&db, &vault, "t2", "Two");

        store
            .set_flags(
                "u1",
                "t1",
                FlagUpdate {
                    is_starred: Some(true),
                    ..Default::default()
                },
            )
            .unwrap();

        let starred = store
            .list_threads("u1", 1, MailFilter::Starred, 1, 10)
            .unwrap();
        assert_eq!(starred.total, 1);
        assert_eq!(starred.threads[0].id, "t1");
    }

    #[test]
    fn test_delete_thread() {
        let (db, vault, store) = setup();
        insert_thread(&db, &vault, "t1", "Gone soon");
        store.delete_thread("u1", "t1").unwrap();

        assert!(matches!(
            store.get_thread("u1", "t1"),
            Err(StoreError::ThreadNotFound(_))
        ));
    }

    #[test]
    fn test_has_more_pagination() {
        let (db, vault, store) = setup();
        for i in 0..3 {
            insert_thread(&db, &vault, &format!("t{}", i), "Subject");
        }

        let page1 = store
            .list_threads("u1", 1, MailFilter::Inbox, 1, 2)
            .unwrap();
        assert!(page1.has_more);
        let page2 = store
            .list_threads("u1", 1, MailFilter::Inbox, 2, 2)
            .unwrap();
        assert!(!page2.has_more);
        assert_eq!(page2.threads.len(), 1);
    }
}
