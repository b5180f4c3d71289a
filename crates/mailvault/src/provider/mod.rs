//! Mail provider adapters.
//!
//! Each supported provider (Gmail, Outlook) implements the
//! [`MailProvider`] capability trait over its REST API. Provider JSON
//! shapes never leak past this module: adapters decode into private
//! serde structs and normalize to [`RemoteMessage`] before returning.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod gmail;
pub mod outlook;

pub use crate::db::thread_repo::{MailFilter, Participant};
pub use error::ProviderError;
pub use gmail::GmailProvider;
pub use outlook::OutlookProvider;

use error::Result;

/// Supported mail providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gmail,
    Outlook,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gmail => "gmail",
            ProviderKind::Outlook => "outlook",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "gmail" => Some(ProviderKind::Gmail),
            "outlook" => Some(ProviderKind::Outlook),
            _ => None,
        }
    }
}

/// OAuth client registration for one provider.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl ClientCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: SecretString) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret,
        }
    }

    pub(crate) fn secret(&self) -> &str {
        self.client_secret.expose_secret()
    }
}

/// Tokens returned by a code exchange or refresh. The refresh token is
/// present only when the provider issued (or rotated) one.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: u64,
}

/// A provider message normalized into the internal shape.
#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub provider_message_id: String,
    pub provider_thread_id: String,
    pub from: Participant,
    pub to: Vec<Participant>,
    pub cc: Vec<Participant>,
    pub subject: Option<String>,
    pub snippet: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_starred: bool,
}

/// One page of a provider listing.
#[derive(Debug, Clone)]
pub struct MessagePage {
    pub messages: Vec<RemoteMessage>,
    pub next_page_token: Option<String>,
}

/// An outgoing attachment.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

impl Attachment {
    /// The declared content type, or a guess from the filename.
    pub fn mime_type(&self) -> String {
        match &self.content_type {
            Some(ct) => ct.clone(),
            None => mime_guess::from_path(&self.filename)
                .first_or_octet_stream()
                .to_string(),
        }
    }
}

/// An outgoing message to be sent through a provider.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

/// Capability interface over a provider's REST API. One implementation
/// per provider; callers never see provider wire formats.
#[async_trait]
pub trait MailProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Consent-screen URL for the authorization-code grant. `state` is
    /// the opaque CSRF payload echoed back at the callback.
    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String>;

    /// Exchanges an authorization code for tokens.
    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant>;

    /// Refreshes an access token. Some providers rotate the refresh
    /// token; the caller must persist it when returned.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant>;

    /// Returns the email address behind an access token.
    async fn fetch_identity(&self, access_token: &str) -> Result<String>;

    /// Lists one page of messages matching the filter.
    async fn list_messages(
        &self,
        access_token: &str,
        filter: MailFilter,
        page_token: Option<&str>,
    ) -> Result<MessagePage>;

    /// Sends a message. Returns the provider message id when the
    /// provider reports one (Gmail does; Graph's sendMail does not).
    async fn send_message(
        &self,
        access_token: &str,
        outgoing: &OutgoingMessage,
    ) -> Result<Option<String>>;
}

/// Constructs the adapter for a provider kind.
pub fn make_provider(
    kind: ProviderKind,
    credentials: ClientCredentials,
) -> Result<Box<dyn MailProvider>> {
    Ok(match kind {
        ProviderKind::Gmail => Box::new(GmailProvider::new(credentials)?),
        ProviderKind::Outlook => Box::new(OutlookProvider::new(credentials)?),
    })
}

/// Default connect timeout for HTTP requests (10 seconds).
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default request timeout for HTTP requests (30 seconds).
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates an HTTP client with appropriate timeouts.
pub(crate) fn create_http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
        .timeout(DEFAULT_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ProviderError::OAuth(format!("Failed to create HTTP client: {}", e)))
}

/// Response shape shared by both providers' OAuth token endpoints.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OAuthTokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Fallback access-token lifetime when the endpoint omits expires_in.
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;

impl From<OAuthTokenResponse> for TokenGrant {
    fn from(resp: OAuthTokenResponse) -> Self {
        TokenGrant {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            expires_in: resp.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS),
        }
    }
}

/// Reads a Retry-After header as whole seconds.
pub(crate) fn retry_after_secs(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok())
}
