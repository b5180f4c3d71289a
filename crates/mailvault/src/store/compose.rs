//! Compose, draft and template flows — locally-originated mail.
//!
//! A successful send writes the Thread and Message immediately with
//! `is_sent` set; the provider's own Sent folder copy is reconciled
//! later by the idempotent upsert, so the thread never doubles. When a
//! provider reports no message id (Graph), a locally-generated
//! placeholder is stored instead.

use std::collections::HashMap;

use chrono::{SecondsFormat, Utc};
use log::info;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::auth::TokenManager;
use crate::crypto::KeyVault;
use crate::db::credential_repo::CredentialRow;
use crate::db::thread_repo::{NewThread, Participant};
use crate::db::{message_repo, template_repo, thread_repo, Database};
use crate::provider::{Attachment, MailProvider, OutgoingMessage};
use crate::sanitize::redact_email;

use super::error::{Result, StoreError};

/// Maximum snippet length derived from a message body.
const SNIPPET_MAX_CHARS: usize = 160;

/// An outgoing send request.
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

/// A locally-saved draft.
#[derive(Debug, Clone)]
pub struct DraftRequest {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// A template with its variables substituted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedTemplate {
    pub subject: String,
    pub body: String,
}

/// Send/draft/template operations.
#[derive(Clone)]
pub struct Outbox {
    db: Database,
    vault: KeyVault,
    tokens: TokenManager,
}

impl Outbox {
    pub fn new(db: Database, vault: KeyVault, tokens: TokenManager) -> Self {
        Self { db, vault, tokens }
    }

    /// Sends a message through the account's provider and records it
    /// locally. Returns the new thread's id. Nothing is written when
    /// the provider rejects the send or the caller cancels.
    pub async fn send(
        &self,
        credential: &CredentialRow,
        provider: &dyn MailProvider,
        request: SendRequest,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let token = cancellable(cancel, self.tokens.get_valid_token(credential.id, provider))
            .await??;

        let outgoing = OutgoingMessage {
            to: request.to.clone(),
            subject: request.subject.clone(),
            html_body: request.html_body.clone(),
            attachments: request.attachments,
        };
        let provider_message_id = cancellable(cancel, provider.send_message(&token, &outgoing))
            .await??
            .unwrap_or_else(|| format!("local-{}", Uuid::new_v4()));

        info!(
            "Sent message for {} (account {})",
            redact_email(&credential.email),
            credential.id
        );

        let cipher = self.vault.cipher_for(&credential.user_id)?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let thread_id = Uuid::new_v4().to_string();

        let mut participants = vec![Participant::new(credential.email.clone())];
        participants.extend(request.to.iter().map(|a| Participant::new(a.clone())));

        let snippet = text_snippet(&strip_html(&request.html_body), SNIPPET_MAX_CHARS);
        let subject_enc = cipher.encrypt(&request.subject)?;
        let snippet_enc = cipher.encrypt(&snippet)?;
        let body_html_enc = cipher.encrypt(&request.html_body)?;

        self.db.with_tx(|conn| {
            thread_repo::insert(
                conn,
                &NewThread {
                    id: thread_id.clone(),
                    user_id: credential.user_id.clone(),
                    account_id: credential.id,
                    provider_thread_id: None,
                    subject: None,
                    subject_enc: Some(subject_enc.clone()),
                    snippet: None,
                    snippet_enc: Some(snippet_enc.clone()),
                    participants: participants.clone(),
                    last_message_at: now.clone(),
                    is_read: true,
                    is_starred: false,
                    is_archived: false,
                    is_draft: false,
                    is_sent: true,
                },
            )?;
            message_repo::upsert(
                conn,
                &message_repo::NewMessage {
                    id: Uuid::new_v4().to_string(),
                    thread_id: thread_id.clone(),
                    provider_message_id: Some(provider_message_id.clone()),
                    from_email: credential.email.clone(),
                    from_name: None,
                    to_addrs: request.to.iter().map(|a| Participant::new(a.clone())).collect(),
                    cc_addrs: Vec::new(),
                    bcc_addrs: Vec::new(),
                    subject: None,
                    subject_enc: Some(subject_enc.clone()),
                    body_text: None,
                    body_text_enc: None,
                    body_html: None,
                    body_html_enc: Some(body_html_enc.clone()),
                    received_at: now.clone(),
                    is_draft: false,
                    is_sent: true,
                },
            )?;
            thread_repo::refresh_message_count(conn, &thread_id)?;
            Ok(())
        })?;

        Ok(thread_id)
    }

    /// Saves a local draft thread. Drafts never reach the provider
    /// until sent.
    pub fn save_draft(
        &self,
        user_id: &str,
        account_id: i64,
        email: &str,
        request: DraftRequest,
    ) -> Result<String> {
        let cipher = self.vault.cipher_for(user_id)?;
        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let thread_id = Uuid::new_v4().to_string();

        let mut participants = vec![Participant::new(email.to_string())];
        participants.extend(request.to.iter().map(|a| Participant::new(a.clone())));

        let subject_enc = cipher.encrypt(&request.subject)?;
        let snippet_enc = cipher.encrypt(&text_snippet(&request.body, SNIPPET_MAX_CHARS))?;
        let body_text_enc = cipher.encrypt(&request.body)?;

        self.db.with_tx(|conn| {
            thread_repo::insert(
                conn,
                &NewThread {
                    id: thread_id.clone(),
                    user_id: user_id.to_string(),
                    account_id,
                    provider_thread_id: None,
                    subject: None,
                    subject_enc: Some(subject_enc.clone()),
                    snippet: None,
                    snippet_enc: Some(snippet_enc.clone()),
                    participants: participants.clone(),
                    last_message_at: now.clone(),
                    is_read: true,
                    is_starred: false,
                    is_archived: false,
                    is_draft: true,
                    is_sent: false,
                },
            )?;
            message_repo::upsert(
                conn,
                &message_repo::NewMessage {
                    id: Uuid::new_v4().to_string(),
                    thread_id: thread_id.clone(),
                    provider_message_id: None,
                    from_email: email.to_string(),
                    from_name: None,
                    to_addrs: request.to.iter().map(|a| Participant::new(a.clone())).collect(),
                    cc_addrs: Vec::new(),
                    bcc_addrs: Vec::new(),
                    subject: None,
                    subject_enc: Some(subject_enc.clone()),
                    body_text: None,
                    body_text_enc: Some(body_text_enc.clone()),
                    body_html: None,
                    body_html_enc: None,
                    received_at: now.clone(),
                    is_draft: true,
                    is_sent: false,
                },
            )?;
            thread_repo::refresh_message_count(conn, &thread_id)?;
            Ok(())
        })?;

        Ok(thread_id)
    }

    /// Renders a template with the given variables and bumps its use
    /// counter.
    pub fn apply_template(
        &self,
        user_id: &str,
        template_id: &str,
        vars: &HashMap<String, String>,
    ) -> Result<RenderedTemplate> {
        let template = template_repo::find(&self.db, template_id)?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| StoreError::TemplateNotFound(template_id.to_string()))?;

        let rendered = RenderedTemplate {
            subject: render_vars(&template.subject, vars),
            body: render_vars(&template.body, vars),
        };
        template_repo::bump_use_count(&self.db, template_id)?;
        Ok(rendered)
    }
}

/// Substitutes `{{name}}` placeholders. Unknown placeholders are left
/// in place so a half-filled template is visible, not silently wrong.
fn render_vars(text: &str, vars: &HashMap<String, String>) -> String {
    let mut rendered = text.to_string();
    for (name, value) in vars {
        rendered = rendered.replace(&format!("{{{{{}}}}}", name), value);
    }
    rendered
}

/// Strips tags from an HTML fragment for snippet purposes.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }
    text
}

/// Collapses whitespace and truncates to `max` characters.
fn text_snippet(text: &str, max: usize) -> String {
    let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max).collect()
}

/// Races a future against the cancellation token.
async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T>
where
    F: std::future::Future<Output = T>,
{
    tokio::select! {
        _ = cancel.cancelled() => Err(StoreError::Cancelled),
        out = fut => Ok(out),
    }
}
