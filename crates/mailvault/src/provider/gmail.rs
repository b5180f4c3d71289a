//! Gmail REST adapter.
//!
//! Talks to the Gmail API (`users/me`) with OAuth2 bearer tokens.
//! Outgoing mail is built as a raw RFC 2822 MIME document and submitted
//! base64url-encoded with padding stripped — the shape the `send`
//! endpoint requires. Sending through the API lands the message in the
//! account's own Sent folder.

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{TimeZone, Utc};
use log::debug;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use super::error::{ProviderError, Result};
use super::{
    create_http_client, retry_after_secs, ClientCredentials, MailFilter, MailProvider,
    MessagePage, OAuthTokenResponse, OutgoingMessage, Participant, ProviderKind, RemoteMessage,
    TokenGrant,
};

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GMAIL_SCOPE: &str = "https://mail.google.com/";
const DEFAULT_PAGE_SIZE: usize = 50;

/// Gmail API client with OAuth2 authentication.
pub struct GmailProvider {
    client: Client,
    credentials: ClientCredentials,
    api_base: String,
    token_url: String,
    auth_url: String,
}

impl GmailProvider {
    /// Creates a new Gmail adapter against the production endpoints.
    pub fn new(credentials: ClientCredentials) -> Result<Self> {
        Self::with_base_urls(credentials, GMAIL_API_BASE, GOOGLE_TOKEN_URL, GOOGLE_AUTH_URL)
    }

    /// Creates an adapter with custom endpoints (for testing).
    pub fn with_base_urls(
        credentials: ClientCredentials,
        api_base: &str,
        token_url: &str,
        auth_url: &str,
    ) -> Result<Self> {
        Ok(Self {
            client: create_http_client()?,
            credentials,
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            auth_url: auth_url.to_string(),
        })
    }

    async fn token_request(&self, params: &[(&str, &str)]) -> Result<TokenGrant> {
        let response = self
            .client
            .post(&self.token_url)
            .form(params)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status, &body, None));
        }

        let token: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("token response: {}", e)))?;
        Ok(token.into())
    }

    async fn api_get<T: serde::de::DeserializeOwned>(
        &self,
        access_token: &str,
        url: &str,
        what: &str,
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .header("accept", "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status, &body, retry_after));
        }

        response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("{}: {}", what, e)))
    }
}

#[async_trait::async_trait]
impl MailProvider for GmailProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gmail
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", GMAIL_SCOPE),
                // Offline access + forced consent so a refresh token is
                // issued even on reconnect.
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("state", state),
            ],
        )
        .map_err(|e| ProviderError::OAuth(format!("authorize URL: {}", e)))?;
        Ok(url.into())
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant> {
        self.token_request(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.secret()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        self.token_request(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.secret()),
            ("refresh_token", refresh_token.expose_secret()),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<String> {
        let url = format!("{}/profile", self.api_base);
        let profile: GmailProfile = self.api_get(access_token, &url, "profile").await?;
        Ok(profile.email_address)
    }

    async fn list_messages(
        &self,
        access_token: &str,
        filter: MailFilter,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let max_results = DEFAULT_PAGE_SIZE.to_string();
        let mut url = Url::parse_with_params(
            &format!("{}/messages", self.api_base),
            &[
                ("q", filter_query(filter)),
                ("maxResults", max_results.as_str()),
            ],
        )
        .map_err(|e| ProviderError::Decode(format!("list URL: {}", e)))?;
        if let Some(token) = page_token {
            url.query_pairs_mut().append_pair("pageToken", token);
        }

        let list: GmailListResponse = self
            .api_get(access_token, url.as_str(), "message list")
            .await?;
        let refs = list.messages.unwrap_or_default();

        let mut messages = Vec::with_capacity(refs.len());
        for msg_ref in refs {
            let url = format!("{}/messages/{}?format=full", self.api_base, msg_ref.id);
            let full: GmailMessageResponse = self.api_get(access_token, &url, "message").await?;
            messages.push(parse_gmail_message(full));
        }

        Ok(MessagePage {
            messages,
            next_page_token: list.next_page_token,
        })
    }

    async fn send_message(
        &self,
        access_token: &str,
        outgoing: &OutgoingMessage,
    ) -> Result<Option<String>> {
        let boundary = format!("mv_{}", uuid::Uuid::new_v4().simple());
        let raw = build_raw_mime(outgoing, &boundary);
        let encoded = URL_SAFE_NO_PAD.encode(raw.as_bytes());

        let url = format!("{}/messages/send", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&serde_json::json!({ "raw": encoded }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status, &body, retry_after));
        }

        let sent: GmailSendResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(format!("send response: {}", e)))?;
        debug!("sent Gmail message, id={}", sent.id);
        Ok(Some(sent.id))
    }
}

/// Translates the mailbox filter into Gmail search syntax.
fn filter_query(filter: MailFilter) -> &'static str {
    match filter {
        MailFilter::Inbox => "in:inbox",
        MailFilter::Sent => "in:sent",
        MailFilter::Starred => "is:starred",
    }
}

// ---------------------------------------------------------------------------
// Outgoing MIME construction
// ---------------------------------------------------------------------------

/// Builds the raw RFC 2822 message: headers, then a `multipart/mixed`
/// body with the HTML part first and one base64 part per attachment.
fn build_raw_mime(outgoing: &OutgoingMessage, boundary: &str) -> String {
    // Strip CR/LF from recipient-controlled headers to prevent injection.
    let safe_subject = outgoing.subject.replace(['\r', '\n'], " ");
    let to_line = outgoing.to.join(", ");

    let mut mime = String::new();
    mime.push_str(&format!("To: {}\r\n", to_line));
    mime.push_str(&format!("Subject: {}\r\n", safe_subject));
    mime.push_str("MIME-Version: 1.0\r\n");
    mime.push_str(&format!(
        "Content-Type: multipart/mixed; boundary=\"{}\"\r\n\r\n",
        boundary
    ));

    mime.push_str(&format!("--{}\r\n", boundary));
    mime.push_str("Content-Type: text/html; charset=utf-8\r\n\r\n");
    mime.push_str(&outgoing.html_body);
    mime.push_str("\r\n");

    for attachment in &outgoing.attachments {
        let safe_name = attachment.filename.replace(['\r', '\n', '"'], "_");
        mime.push_str(&format!("--{}\r\n", boundary));
        mime.push_str(&format!(
            "Content-Type: {}; name=\"{}\"\r\n",
            attachment.mime_type(),
            safe_name
        ));
        mime.push_str(&format!(
            "Content-Disposition: attachment; filename=\"{}\"\r\n",
            safe_name
        ));
        mime.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        mime.push_str(&wrap_base64(&STANDARD.encode(&attachment.data)));
        mime.push_str("\r\n");
    }

    mime.push_str(&format!("--{}--\r\n", boundary));
    mime
}

/// Wraps base64 content at 76 columns per RFC 2045.
fn wrap_base64(encoded: &str) -> String {
    let mut wrapped = String::with_capacity(encoded.len() + encoded.len() / 76 * 2);
    let bytes = encoded.as_bytes();
    for chunk in bytes.chunks(76) {
        // Base64 output is pure ASCII.
        wrapped.push_str(std::str::from_utf8(chunk).unwrap_or_default());
        wrapped.push_str("\r\n");
    }
    wrapped.trim_end().to_string()
}

// ---------------------------------------------------------------------------
// Incoming message parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GmailProfile {
    #[serde(rename = "emailAddress")]
    email_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailListResponse {
    #[serde(default)]
    messages: Option<Vec<GmailMessageRef>>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailMessageResponse {
    id: String,
    thread_id: String,
    #[serde(default)]
    label_ids: Vec<String>,
    #[serde(default)]
    snippet: Option<String>,
    #[serde(default)]
    internal_date: Option<String>,
    #[serde(default)]
    payload: Option<GmailPart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GmailPart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<GmailHeader>,
    #[serde(default)]
    body: Option<GmailBody>,
    #[serde(default)]
    parts: Vec<GmailPart>,
}

#[derive(Debug, Deserialize)]
struct GmailHeader {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct GmailBody {
    #[serde(default)]
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GmailSendResponse {
    id: String,
}

/// Normalizes a `format=full` Gmail message into the internal shape.
fn parse_gmail_message(raw: GmailMessageResponse) -> RemoteMessage {
    let payload = raw.payload.unwrap_or_default();

    let header = |name: &str| -> Option<&str> {
        payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    };

    let from = header("From")
        .and_then(|v| parse_address_list(v).into_iter().next())
        .unwrap_or_else(|| Participant::new("unknown"));
    let to = header("To").map(parse_address_list).unwrap_or_default();
    let cc = header("Cc").map(parse_address_list).unwrap_or_default();
    let subject = header("Subject").map(|s| s.to_string());

    let received_at = raw
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let (body_text, body_html) = extract_bodies(&payload);

    RemoteMessage {
        provider_message_id: raw.id,
        provider_thread_id: raw.thread_id,
        from,
        to,
        cc,
        subject,
        snippet: raw.snippet,
        body_text,
        body_html,
        received_at,
        is_read: !raw.label_ids.iter().any(|l| l == "UNREAD"),
        is_starred: raw.label_ids.iter().any(|l| l == "STARRED"),
    }
}

/// Walks the MIME part tree for the first text/plain and text/html
/// bodies.
fn extract_bodies(payload: &GmailPart) -> (Option<String>, Option<String>) {
    let mut text = None;
    let mut html = None;
    collect_bodies(payload, &mut text, &mut html);
    (text, html)
}

fn collect_bodies(part: &GmailPart, text: &mut Option<String>, html: &mut Option<String>) {
    if text.is_some() && html.is_some() {
        return;
    }

    let decoded = part
        .body
        .as_ref()
        .and_then(|b| b.data.as_deref())
        .and_then(decode_body_data);

    if let Some(content) = decoded {
        if part.mime_type.starts_with("text/plain") && text.is_none() {
            *text = Some(content);
        } else if part.mime_type.starts_with("text/html") && html.is_none() {
            *html = Some(content);
        }
    }

    for child in &part.parts {
        collect_bodies(child, text, html);
    }
}

/// Gmail body data is base64url, sometimes padded.
fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data)
        .or_else(|_| URL_SAFE.decode(data))
        .ok()?;
    String::from_utf8(bytes).ok()
}

/// Parses an address header like `Alice <alice@x.com>, bob@y.com`.
fn parse_address_list(value: &str) -> Vec<Participant> {
    value
        .split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            match (entry.find('<'), entry.rfind('>')) {
                (Some(start), Some(end)) if start < end => {
                    let email = entry[start + 1..end].trim().to_string();
                    let name = entry[..start].trim().trim_matches('"').trim();
                    if name.is_empty() {
                        Some(Participant::new(email))
                    } else {
                        Some(Participant::named(email, name))
                    }
                }
                _ => Some(Participant::new(entry)),
            }
        })
        .collect()
}
