//! Shared test harness: an in-memory service wired to a scripted
//! provider instead of the REST adapters.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use secrecy::SecretString;

use mailvault::provider::error::{ProviderError, Result as ProviderResult};
use mailvault::{
    Config, Database, MailFilter, MailProvider, MailService, MessagePage, OutgoingMessage,
    Participant, ProviderKind, RemoteMessage, TokenGrant,
};

/// Scripted provider state, shared between the test body and every
/// adapter instance the service constructs.
#[derive(Default)]
pub struct FakeMailbox {
    /// Pages served in order by list_messages.
    pub pages: Mutex<VecDeque<MessagePage>>,
    /// Outgoing messages the provider accepted.
    pub sent: Mutex<Vec<OutgoingMessage>>,
    /// Identity returned for fetch_identity.
    pub identity: Mutex<String>,
    /// Message id returned from send (None mimics Graph).
    pub send_message_id: Mutex<Option<String>>,
    /// When set, refresh calls fail as rejected credentials.
    pub refresh_rejected: Mutex<bool>,
}

impl FakeMailbox {
    pub fn new(identity: &str) -> Arc<Self> {
        Arc::new(Self {
            identity: Mutex::new(identity.to_string()),
            send_message_id: Mutex::new(Some("provider-sent-1".to_string())),
            ..Self::default()
        })
    }

    pub fn push_page(&self, messages: Vec<RemoteMessage>, next_page_token: Option<&str>) {
        self.pages.lock().unwrap().push_back(MessagePage {
            messages,
            next_page_token: next_page_token.map(|s| s.to_string()),
        });
    }
}

pub struct FakeProvider {
    kind: ProviderKind,
    mailbox: Arc<FakeMailbox>,
}

#[async_trait]
impl MailProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> ProviderResult<String> {
        Ok(format!(
            "https://consent.fake.example/authorize?redirect_uri={}&state={}",
            redirect_uri, state
        ))
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> ProviderResult<TokenGrant> {
        if code.is_empty() {
            return Err(ProviderError::OAuth("empty code".to_string()));
        }
        Ok(TokenGrant {
            access_token: format!("access-for-{}", code),
            refresh_token: Some(format!("refresh-for-{}", code)),
            expires_in: 3600,
        })
    }

    async fn refresh(&self, _refresh_token: &SecretString) -> ProviderResult<TokenGrant> {
        if *self.mailbox.refresh_rejected.lock().unwrap() {
            return Err(ProviderError::Unauthorized("invalid_grant".to_string()));
        }
        Ok(TokenGrant {
            access_token: "refreshed-access".to_string(),
            refresh_token: None,
            expires_in: 3600,
        })
    }

    async fn fetch_identity(&self, _access_token: &str) -> ProviderResult<String> {
        Ok(self.mailbox.identity.lock().unwrap().clone())
    }

    async fn list_messages(
        &self,
        _access_token: &str,
        _filter: MailFilter,
        _page_token: Option<&str>,
    ) -> ProviderResult<MessagePage> {
        self.mailbox
            .pages
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api {
                status: 500,
                body: "no scripted page".to_string(),
            })
    }

    async fn send_message(
        &self,
        _access_token: &str,
        outgoing: &OutgoingMessage,
    ) -> ProviderResult<Option<String>> {
        self.mailbox.sent.lock().unwrap().push(outgoing.clone());
        Ok(self.mailbox.send_message_id.lock().unwrap().clone())
    }
}

fn test_config() -> Config {
    mailvault::config::load_config_from_str(
        &serde_json::json!({
            "version": "1.0",
            "redirect_uri": "https://app.example/oauth/callback",
            "providers": {
                "gmail": {"client_id": "gmail-client", "client_secret": "gmail-secret"},
                "outlook": {"client_id": "outlook-client", "client_secret": "outlook-secret"}
            }
        })
        .to_string(),
    )
    .unwrap()
}

/// An in-memory service whose adapters all talk to the same fake
/// mailbox.
pub fn service_with_fake(identity: &str) -> (MailService, Arc<FakeMailbox>) {
    let mailbox = FakeMailbox::new(identity);
    let factory_mailbox = Arc::clone(&mailbox);

    let service = MailService::with_provider_factory(
        Database::open_in_memory().expect("in-memory database"),
        test_config(),
        Arc::new(move |kind, _credentials| {
            Ok(Box::new(FakeProvider {
                kind,
                mailbox: Arc::clone(&factory_mailbox),
            }) as Box<dyn MailProvider>)
        }),
    );

    (service, mailbox)
}

/// Builds a provider message on a given thread and day.
pub fn remote_message(pmid: &str, thread: &str, day: u32) -> RemoteMessage {
    RemoteMessage {
        provider_message_id: pmid.to_string(),
        provider_thread_id: thread.to_string(),
        from: Participant::named("alice@x.com", "Alice"),
        to: vec![Participant::new("me@example.com")],
        cc: Vec::new(),
        subject: Some(format!("Subject for {}", thread)),
        snippet: Some(format!("Snippet {} day {}", pmid, day)),
        body_text: Some(format!("Body of {}", pmid)),
        body_html: None,
        received_at: Utc.with_ymd_and_hms(2026, 1, day, 9, 0, 0).unwrap(),
        is_read: false,
        is_starred: false,
    }
}
