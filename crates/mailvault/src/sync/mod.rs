//! Mailbox synchronization engine.
//!
//! One invocation pulls one page from the provider and reconciles it
//! into the local store: resolve a valid token, list messages from the
//! stored cursor, apply the page in a single transaction, persist the
//! next cursor. Locally-sent mail is written by the compose path and is
//! not re-imported here beyond the idempotent upsert.

use log::debug;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};

use crate::auth::TokenManager;
use crate::crypto::KeyVault;
use crate::db::credential_repo::CredentialRow;
use crate::db::thread_repo::MailFilter;
use crate::db::{sync_repo, Database};
use crate::provider::MailProvider;
use crate::sanitize::redact_email;

pub mod error;
pub mod reconcile;

pub use error::SyncError;
use error::Result;
pub use reconcile::PageStats;

/// Result of one sync invocation.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub threads_upserted: u64,
    pub messages_upserted: u64,
    /// Cursor for the next page; None when the provider has no further
    /// history.
    pub next_page_token: Option<String>,
    pub history_exhausted: bool,
}

/// Pull-based one-way sync from a provider into the mailbox store.
#[derive(Clone)]
pub struct SyncEngine {
    db: Database,
    tokens: TokenManager,
    vault: KeyVault,
}

impl SyncEngine {
    pub fn new(db: Database, tokens: TokenManager, vault: KeyVault) -> Self {
        Self { db, tokens, vault }
    }

    /// Runs one page of the sync state machine for an account. Cancel
    /// fires abort the in-flight network call; the page transaction is
    /// all-or-nothing, so nothing partial is ever committed.
    pub async fn sync_page(
        &self,
        credential: &CredentialRow,
        provider: &dyn MailProvider,
        filter: MailFilter,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let span = info_span!(
            "mailbox_sync",
            account = credential.id,
            email = %redact_email(&credential.email),
        );
        self.sync_page_inner(credential, provider, filter, cancel)
            .instrument(span)
            .await
    }

    async fn sync_page_inner(
        &self,
        credential: &CredentialRow,
        provider: &dyn MailProvider,
        filter: MailFilter,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let state = sync_repo::load(&self.db, credential.id)?;
        if state.history_exhausted {
            // "Load more" is disabled until the user resets pagination.
            debug!(
                "History exhausted for account {}; sync is a no-op",
                credential.id
            );
            return Ok(SyncOutcome {
                history_exhausted: true,
                ..SyncOutcome::default()
            });
        }

        let token = cancellable(cancel, self.tokens.get_valid_token(credential.id, provider))
            .await??;

        let page = cancellable(
            cancel,
            provider.list_messages(&token, filter, state.page_token.as_deref()),
        )
        .await??;

        let cipher = self.vault.cipher_for(&credential.user_id)?;
        let prepared = reconcile::prepare(&page.messages, &cipher)?;

        let next_page_token = page.next_page_token;
        let stats = self.db.with_tx(|conn| {
            let stats = reconcile::apply_page(conn, &credential.user_id, credential.id, filter, &prepared)?;
            sync_repo::store(conn, credential.id, next_page_token.as_deref())?;
            Ok(stats)
        })?;

        info!(
            threads = stats.threads_upserted,
            new_messages = stats.messages_created,
            has_more = next_page_token.is_some(),
            "Reconciled sync page"
        );

        Ok(SyncOutcome {
            threads_upserted: stats.threads_upserted,
            messages_upserted: stats.messages_created,
            history_exhausted: next_page_token.is_none(),
            next_page_token,
        })
    }

    /// Re-enables provider pagination after history was exhausted.
    pub fn reset_pagination(&self, account_id: i64) -> Result<()> {
        sync_repo::reset(&self.db, account_id)?;
        Ok(())
    }
}

/// Races a future against the cancellation token.
async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(SyncError::Cancelled),
        out = fut => Ok(out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use secrecy::SecretString;

    use crate::db::credential_repo::{self, NewCredential};
    use crate::db::thread_repo::{self, Participant};
    use crate::provider::error::{ProviderError, Result as ProviderResult};
    use crate::provider::{
        MessagePage, OutgoingMessage, ProviderKind, RemoteMessage, TokenGrant,
    };

    /// Serves scripted pages keyed by page token.
    struct ScriptedProvider {
        pages: Mutex<Vec<MessagePage>>,
        list_calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new(pages: Vec<MessagePage>) -> Self {
            Self {
                pages: Mutex::new(pages),
                list_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl MailProvider for ScriptedProvider {
        fn kind(&self) -> ProviderKind {
            ProviderKind::Gmail
        }

        fn authorize_url(&self, _redirect_uri: &str, _state: &str) -> ProviderResult<String> {
            Ok("https://example.com/auth".to_string())
        }

        async fn exchange_code(
            &self,
            _code: &str,
            _redirect_uri: &str,
        ) -> ProviderResult<TokenGrant> {
            unimplemented!("not used in these tests")
        }

        async fn refresh(&self, _refresh_token: &SecretString) -> ProviderResult<TokenGrant> {
            Ok(TokenGrant {
                access_token: "refreshed".to_string(),
                refresh_token: None,
                expires_in: 3600,
            })
        }

        async fn fetch_identity(&self, _access_token: &str) -> ProviderResult<String> {
            Ok("alice@x.com".to_string())
        }

        async fn list_messages(
            &self,
            _access_token: &str,
            _filter: MailFilter,
            _page_token: Option<&str>,
        ) -> ProviderResult<MessagePage> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            let mut pages = self.pages.lock().unwrap();
            if pages.is_empty() {
                return Err(ProviderError::Api {
                    status: 500,
                    body: "script exhausted".to_string(),
                });
            }
            Ok(pages.remove(0))
        }

        async fn send_message(
            &self,
            _access_token: &str,
            _outgoing: &OutgoingMessage,
        ) -> ProviderResult<Option<String>> {
            Ok(None)
        }
    }

    fn remote(pmid: &str, thread: &str, day: u32) -> RemoteMessage {
        RemoteMessage {
            provider_message_id: pmid.to_string(),
            provider_thread_id: thread.to_string(),
            from: Participant::new("alice@x.com"),
            to: vec![Participant::new("me@y.com")],
            cc: Vec::new(),
            subject: Some("Hello".to_string()),
            snippet: Some("Hello there".to_string()),
            body_text: Some("body".to_string()),
            body_html: None,
            received_at: Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap(),
            is_read: false,
            is_starred: false,
        }
    }

    fn setup() -> (Database, CredentialRow, SyncEngine) {
        let db = Database::open_in_memory().unwrap();
        let id = credential_repo::upsert(
            &db,
            &NewCredential {
                user_id: "u1".to_string(),
                provider: "gmail".to_string(),
                email: "alice@x.com".to_string(),
                access_token: "token".to_string(),
                refresh_token: Some("refresh".to_string()),
                expires_in_seconds: 3600,
            },
        )
        .unwrap();
        let credential = credential_repo::find(&db, id).unwrap().unwrap();
        let engine = SyncEngine::new(
            db.clone(),
            TokenManager::new(db.clone()),
            KeyVault::new(db.clone()),
        );
        (db, credential, engine)
    }

    #[tokio::test]
    async fn test_two_page_sync_advances_cursor() {
        let (db, credential, engine) = setup();
        let provider = ScriptedProvider::new(vec![
            MessagePage {
                messages: vec![remote("m1", "t1", 1), remote("m2", "t1", 2)],
                next_page_token: Some("page-2".to_string()),
            },
            MessagePage {
                messages: vec![remote("m3", "t1", 3), remote("m4", "t2", 4)],
                next_page_token: None,
            },
        ]);
        let cancel = CancellationToken::new();

        let first = engine
            .sync_page(&credential, &provider, MailFilter::Inbox, &cancel)
            .await
            .unwrap();
        assert_eq!(first.threads_upserted, 1);
        assert_eq!(first.messages_upserted, 2);
        assert_eq!(first.next_page_token.as_deref(), Some("page-2"));
        assert!(!first.history_exhausted);

        let second = engine
            .sync_page(&credential, &provider, MailFilter::Inbox, &cancel)
            .await
            .unwrap();
        assert_eq!(second.threads_upserted, 2);
        assert!(second.history_exhausted);

        // Thread t1 saw messages across both pages.
        let thread = db
            .with_conn(|conn| thread_repo::find_by_provider_key(conn, credential.id, "t1"))
            .unwrap()
            .unwrap();
        assert_eq!(thread.message_count, 3);
        assert_eq!(thread.last_message_at, "2026-01-03T12:00:00Z");
    }

    #[tokio::test]
    async fn test_exhausted_history_is_noop_until_reset() {
        let (_db, credential, engine) = setup();
        let provider = ScriptedProvider::new(vec![
            MessagePage {
                messages: vec![remote("m1", "t1", 1)],
                next_page_token: None,
            },
            MessagePage {
                messages: vec![remote("m2", "t2", 2)],
                next_page_token: None,
            },
        ]);
        let cancel = CancellationToken::new();

        engine
            .sync_page(&credential, &provider, MailFilter::Inbox, &cancel)
            .await
            .unwrap();
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);

        // Second invocation must not hit the provider at all.
        let outcome = engine
            .sync_page(&credential, &provider, MailFilter::Inbox, &cancel)
            .await
            .unwrap();
        assert!(outcome.history_exhausted);
        assert_eq!(outcome.threads_upserted, 0);
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 1);

        // After a reset the provider is paged again from the start.
        engine.reset_pagination(credential.id).unwrap();
        let outcome = engine
            .sync_page(&credential, &provider, MailFilter::Inbox, &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.threads_upserted, 1);
        assert_eq!(provider.list_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_network_call() {
        let (db, credential, engine) = setup();
        let provider = ScriptedProvider::new(vec![MessagePage {
            messages: vec![remote("m1", "t1", 1)],
            next_page_token: None,
        }]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = engine
            .sync_page(&credential, &provider, MailFilter::Inbox, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));

        // Nothing was committed.
        db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM threads", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[tokio::test]
    async fn test_provider_failure_commits_nothing() {
        let (db, credential, engine) = setup();
        // Empty script: the provider errors on the first list call.
        let provider = ScriptedProvider::new(Vec::new());
        let cancel = CancellationToken::new();

        let err = engine
            .sync_page(&credential, &provider, MailFilter::Inbox, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Provider(_)));

        db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_state", [], |r| r.get(0))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }
}
