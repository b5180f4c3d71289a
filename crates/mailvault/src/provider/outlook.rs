//! Outlook adapter over the Microsoft Graph REST API.
//!
//! Unlike Gmail, Graph accepts structured JSON for outgoing mail:
//! attachments ride along as base64 `contentBytes` and
//! `saveToSentItems` makes the provider file the message in its own
//! Sent folder. Graph's `sendMail` responds 202 with an empty body, so
//! no provider message id is available after a send.
//!
//! Paging is the opaque `@odata.nextLink` URL, carried verbatim as the
//! page token.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use log::debug;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;

use super::error::{ProviderError, Result};
use super::{
    create_http_client, retry_after_secs, ClientCredentials, MailFilter, MailProvider,
    MessagePage, OAuthTokenResponse, OutgoingMessage, Participant, ProviderKind, RemoteMessage,
    TokenGrant,
};

const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
const OUTLOOK_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const OUTLOOK_AUTH_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
// offline_access is what makes the token endpoint hand out refresh tokens.
const OUTLOOK_SCOPE: &str = "offline_access User.Read Mail.ReadWrite Mail.Send";
const DEFAULT_PAGE_SIZE: usize = 50;

const MESSAGE_FIELDS: &str = "id,conversationId,subject,bodyPreview,body,from,toRecipients,\
                              ccRecipients,receivedDateTime,sentDateTime,isRead,flag";

/// Microsoft Graph mail client with OAuth2 authentication.
pub struct OutlookProvider {
    client: Client,
    credentials: ClientCredentials,
    api_base: String,
    token_url: String,
    auth_url: String,
}

impl OutlookProvider {
    /// Creates a new Graph adapter against the production endpoints.
    pub fn new(credentials: ClientCredentials) -> Result<Self> {
        Self::with_base_urls(
            credentials,
            GRAPH_API_BASE,
            OUTLOOK_TOKEN_URL,
            OUTLOOK_AUTH_URL,
        )
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

    /// First-page listing URL for a filter. Later pages reuse the
    /// opaque nextLink verbatim.
    fn list_url(&self, filter: MailFilter) -> Result<String> {
        let (path, extra_filter): (String, Option<&str>) = match filter {
            MailFilter::Inbox => (format!("{}/me/mailFolders/inbox/messages", self.api_base), None),
            MailFilter::Sent => (
                format!("{}/me/mailFolders/sentitems/messages", self.api_base),
                None,
            ),
            MailFilter::Starred => (
                format!("{}/me/messages", self.api_base),
                Some("flag/flagStatus eq 'flagged'"),
            ),
        };

        let top = DEFAULT_PAGE_SIZE.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("$top", top.as_str()),
            ("$select", MESSAGE_FIELDS),
            ("$orderby", "receivedDateTime desc"),
        ];
        if let Some(filter_expr) = extra_filter {
            params.push(("$filter", filter_expr));
        }

        let url = Url::parse_with_params(&path, &params)
            .map_err(|e| ProviderError::Decode(format!("list URL: {}", e)))?;
        Ok(url.into())
    }
}

#[async_trait::async_trait]
impl MailProvider for OutlookProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Outlook
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str) -> Result<String> {
        let url = Url::parse_with_params(
            &self.auth_url,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("response_mode", "query"),
                ("scope", OUTLOOK_SCOPE),
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
            ("scope", OUTLOOK_SCOPE),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenGrant> {
        self.token_request(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.secret()),
            ("refresh_token", refresh_token.expose_secret()),
            ("scope", OUTLOOK_SCOPE),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<String> {
        let url = format!("{}/me", self.api_base);
        let me: GraphUser = self.api_get(access_token, &url, "user profile").await?;
        me.mail
            .or(me.user_principal_name)
            .ok_or_else(|| ProviderError::Decode("user profile has no address".to_string()))
    }

    async fn list_messages(
        &self,
        access_token: &str,
        filter: MailFilter,
        page_token: Option<&str>,
    ) -> Result<MessagePage> {
        let url = match page_token {
            Some(next_link) => next_link.to_string(),
            None => self.list_url(filter)?,
        };

        let page: GraphMessagesPage = self.api_get(access_token, &url, "message list").await?;

        let messages = page
            .value
            .into_iter()
            .filter_map(map_graph_message)
            .collect();

        Ok(MessagePage {
            messages,
            next_page_token: page.next_link,
        })
    }

    async fn send_message(
        &self,
        access_token: &str,
        outgoing: &OutgoingMessage,
    ) -> Result<Option<String>> {
        let url = format!("{}/me/sendMail", self.api_base);
        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(&build_send_payload(outgoing))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after_secs(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_response(status, &body, retry_after));
        }

        // sendMail answers 202 Accepted with no body.
        debug!("Graph sendMail accepted ({})", status);
        Ok(None)
    }
}

/// Builds the Graph sendMail payload.
fn build_send_payload(outgoing: &OutgoingMessage) -> serde_json::Value {
    let to_recipients: Vec<_> = outgoing
        .to
        .iter()
        .map(|address| json!({ "emailAddress": { "address": address } }))
        .collect();

    let attachments: Vec<_> = outgoing
        .attachments
        .iter()
        .map(|a| {
            json!({
                "@odata.type": "#microsoft.graph.fileAttachment",
                "name": a.filename,
                "contentType": a.mime_type(),
                "contentBytes": STANDARD.encode(&a.data),
            })
        })
        .collect();

    json!({
        "message": {
            "subject": outgoing.subject,
            "body": {
                "contentType": "HTML",
                "content": outgoing.html_body,
            },
            "toRecipients": to_recipients,
            "attachments": attachments,
        },
        "saveToSentItems": true,
    })
}

// ---------------------------------------------------------------------------
// Incoming message parsing
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct GraphUser {
    #[serde(default)]
    mail: Option<String>,
    #[serde(default, rename = "userPrincipalName")]
    user_principal_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessagesPage {
    value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphMessage {
    id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients")]
    to_recipients: Option<Vec<GraphRecipient>>,
    #[serde(rename = "ccRecipients")]
    cc_recipients: Option<Vec<GraphRecipient>>,
    body: Option<GraphBody>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    #[serde(rename = "isRead")]
    is_read: Option<bool>,
    #[serde(rename = "conversationId")]
    conversation_id: Option<String>,
    flag: Option<GraphFlag>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
    #[serde(rename = "sentDateTime")]
    sent_date_time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

impl GraphRecipient {
    fn participant(&self) -> Option<Participant> {
        let email = self.email_address.as_ref()?;
        let address = email
            .address
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())?;
        let name = email
            .name
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty());
        Some(match name {
            Some(name) => Participant::named(address, name),
            None => Participant::new(address),
        })
    }
}

#[derive(Debug, Deserialize)]
struct GraphEmailAddress {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphFlag {
    #[serde(rename = "flagStatus")]
    flag_status: Option<String>,
}

/// Normalizes a Graph message. Returns None for rows without an id or
/// conversation — nothing local could be keyed on them.
fn map_graph_message(message: GraphMessage) -> Option<RemoteMessage> {
    let id = message.id?;
    let conversation_id = message.conversation_id?;

    let from = message
        .from
        .as_ref()
        .and_then(GraphRecipient::participant)
        .unwrap_or_else(|| Participant::new("unknown"));
    let to = message
        .to_recipients
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| r.participant())
        .collect();
    let cc = message
        .cc_recipients
        .unwrap_or_default()
        .into_iter()
        .filter_map(|r| r.participant())
        .collect();

    let (body_text, body_html) = body_fields(message.body.as_ref());

    let received_at = message
        .received_date_time
        .as_deref()
        .or(message.sent_date_time.as_deref())
        .and_then(parse_graph_timestamp)
        .unwrap_or_else(Utc::now);

    let is_starred = message
        .flag
        .as_ref()
        .and_then(|f| f.flag_status.as_deref())
        .is_some_and(|status| status.eq_ignore_ascii_case("flagged"));

    Some(RemoteMessage {
        provider_message_id: id,
        provider_thread_id: conversation_id,
        from,
        to,
        cc,
        subject: message.subject,
        snippet: message.body_preview,
        body_text,
        body_html,
        received_at,
        is_read: message.is_read.unwrap_or(false),
        is_starred,
    })
}

/// Splits a Graph body into (text, html) by its declared content type.
fn body_fields(body: Option<&GraphBody>) -> (Option<String>, Option<String>) {
    let Some(body) = body else {
        return (None, None);
    };

    let content = body
        .content
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty());
    let Some(content) = content else {
        return (None, None);
    };

    if body
        .content_type
        .as_deref()
        .is_some_and(|kind| kind.eq_ignore_ascii_case("html"))
    {
        (None, Some(content.to_string()))
    } else {
        (Some(content.to_string()), None)
    }
}

fn parse_graph_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
