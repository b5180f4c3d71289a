//! Service facade — the external interface of the mailbox subsystem.
//!
//! Wires the credential store, provider adapters, token manager, sync
//! engine and mailbox store behind one API. Callers hand in the
//! authenticated user id (resolving who is calling is the embedding
//! application's job) and receive taxonomy-classified errors.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::auth::{ConnectState, TokenManager};
use crate::config::Config;
use crate::crypto::KeyVault;
use crate::db::credential_repo::{self, CredentialRow, CredentialState};
use crate::db::thread_repo::{FlagUpdate, MailFilter};
use crate::db::{template_repo, Database};
use crate::error::{MailvaultError, Result};
use crate::provider::{make_provider, ClientCredentials, MailProvider, ProviderKind};
use crate::store::{DraftRequest, MailboxStore, Outbox, RenderedTemplate, SendRequest, ThreadDetail, ThreadList};
use crate::sync::{SyncEngine, SyncOutcome};

/// A connected account, safe to expose (no token material).
#[derive(Debug, Clone)]
pub struct AccountView {
    pub id: i64,
    pub provider: String,
    pub email: String,
    pub state: String,
}

impl From<CredentialRow> for AccountView {
    fn from(row: CredentialRow) -> Self {
        Self {
            id: row.id,
            provider: row.provider,
            email: row.email,
            state: row.state,
        }
    }
}

/// Builds the adapter for a provider kind. Swappable so tests can
/// substitute scripted providers for the REST adapters.
pub type ProviderFactory = dyn Fn(ProviderKind, ClientCredentials) -> crate::provider::error::Result<Box<dyn MailProvider>>
    + Send
    + Sync;

/// The mailbox subsystem's front door.
#[derive(Clone)]
pub struct MailService {
    db: Database,
    config: Config,
    tokens: TokenManager,
    sync: SyncEngine,
    store: MailboxStore,
    outbox: Outbox,
    provider_factory: Arc<ProviderFactory>,
}

impl MailService {
    /// Builds a service over an opened database and validated config.
    pub fn new(db: Database, config: Config) -> Self {
        Self::with_provider_factory(db, config, Arc::new(make_provider))
    }

    /// Builds a service with a custom provider factory (for testing).
    pub fn with_provider_factory(
        db: Database,
        config: Config,
        provider_factory: Arc<ProviderFactory>,
    ) -> Self {
        let vault = KeyVault::new(db.clone());
        let tokens = TokenManager::new(db.clone());
        Self {
            sync: SyncEngine::new(db.clone(), tokens.clone(), vault.clone()),
            store: MailboxStore::new(db.clone(), vault.clone()),
            outbox: Outbox::new(db.clone(), vault, tokens.clone()),
            tokens,
            db,
            config,
            provider_factory,
        }
    }

    // -- OAuth connect ----------------------------------------------------

    /// Authorization URL for connecting a mailbox. The embedded state
    /// ties the eventual callback to this user.
    pub fn connect_url(&self, user_id: &str, kind: ProviderKind) -> Result<String> {
        let user_id = require_user(user_id)?;
        let provider = self.provider_for(kind)?;
        let state = ConnectState::new(user_id, kind).encode();
        Ok(provider.authorize_url(&self.config.redirect_uri, &state)?)
    }

    /// OAuth callback: verifies state, exchanges the code, resolves the
    /// mailbox address and upserts the credential. Reconnecting the
    /// same address updates the existing row.
    pub async fn complete_connect(&self, state: &str, code: &str) -> Result<i64> {
        let state = ConnectState::decode(state).map_err(MailvaultError::from)?;
        let provider = self.provider_for(state.provider)?;

        let grant = provider
            .exchange_code(code, &self.config.redirect_uri)
            .await?;
        let email = provider.fetch_identity(&grant.access_token).await?;

        let account_id = credential_repo::upsert(
            &self.db,
            &credential_repo::NewCredential {
                user_id: state.user_id,
                provider: state.provider.as_str().to_string(),
                email,
                access_token: grant.access_token,
                refresh_token: grant.refresh_token,
                expires_in_seconds: grant.expires_in,
            },
        )?;
        Ok(account_id)
    }

    /// Lists the caller's active accounts.
    pub fn accounts(&self, user_id: &str) -> Result<Vec<AccountView>> {
        let user_id = require_user(user_id)?;
        Ok(credential_repo::find_active_for_user(&self.db, user_id)?
            .into_iter()
            .map(AccountView::from)
            .collect())
    }

    /// Soft-deletes a credential. Sync stops and sends fail fast until
    /// the user reconnects.
    pub fn disconnect(&self, user_id: &str, account_id: i64) -> Result<()> {
        let credential = self.resolve_account(user_id, Some(account_id))?;
        credential_repo::set_state(&self.db, credential.id, CredentialState::Disconnected)?;
        Ok(())
    }

    // -- Sync -------------------------------------------------------------

    /// Runs one page of mailbox sync. The account defaults to the
    /// caller's first active credential.
    pub async fn sync_mailbox(
        &self,
        user_id: &str,
        account_id: Option<i64>,
        filter: MailFilter,
        cancel: &CancellationToken,
    ) -> Result<SyncOutcome> {
        let credential = self.resolve_account(user_id, account_id)?;
        let provider = self.provider_for_credential(&credential)?;
        Ok(self
            .sync
            .sync_page(&credential, provider.as_ref(), filter, cancel)
            .await?)
    }

    /// Re-enables provider pagination after history was exhausted.
    pub fn reset_pagination(&self, user_id: &str, account_id: i64) -> Result<()> {
        let credential = self.resolve_account(user_id, Some(account_id))?;
        self.sync.reset_pagination(credential.id)?;
        Ok(())
    }

    // -- Compose ----------------------------------------------------------

    /// Sends mail through the account's provider and returns the
    /// locally recorded thread.
    pub async fn send_mail(
        &self,
        user_id: &str,
        account_id: Option<i64>,
        request: SendRequest,
        cancel: &CancellationToken,
    ) -> Result<ThreadDetail> {
        let credential = self.resolve_account(user_id, account_id)?;
        let provider = self.provider_for_credential(&credential)?;
        let thread_id = self
            .outbox
            .send(&credential, provider.as_ref(), request, cancel)
            .await?;
        Ok(self.store.get_thread(&credential.user_id, &thread_id)?)
    }

    /// Saves a local draft on the account.
    pub fn save_draft(
        &self,
        user_id: &str,
        account_id: Option<i64>,
        request: DraftRequest,
    ) -> Result<String> {
        let credential = self.resolve_account(user_id, account_id)?;
        Ok(self
            .outbox
            .save_draft(&credential.user_id, credential.id, &credential.email, request)?)
    }

    // -- Threads ----------------------------------------------------------

    pub fn list_threads(
        &self,
        user_id: &str,
        account_id: Option<i64>,
        filter: MailFilter,
        page: u32,
    ) -> Result<ThreadList> {
        let credential = self.resolve_account(user_id, account_id)?;
        Ok(self.store.list_threads(
            &credential.user_id,
            credential.id,
            filter,
            page,
            self.config.list_page_size,
        )?)
    }

    pub fn get_thread(&self, user_id: &str, thread_id: &str) -> Result<ThreadDetail> {
        let user_id = require_user(user_id)?;
        Ok(self.store.get_thread(user_id, thread_id)?)
    }

    pub fn set_thread_flags(
        &self,
        user_id: &str,
        thread_id: &str,
        update: FlagUpdate,
    ) -> Result<()> {
        let user_id = require_user(user_id)?;
        Ok(self.store.set_flags(user_id, thread_id, update)?)
    }

    pub fn delete_thread(&self, user_id: &str, thread_id: &str) -> Result<()> {
        let user_id = require_user(user_id)?;
        Ok(self.store.delete_thread(user_id, thread_id)?)
    }

    // -- Templates --------------------------------------------------------

    pub fn create_template(&self, user_id: &str, new: NewTemplateRequest) -> Result<String> {
        let user_id = require_user(user_id)?;
        let id = uuid::Uuid::new_v4().to_string();
        template_repo::insert(
            &self.db,
            &template_repo::NewTemplate {
                id: id.clone(),
                user_id: user_id.to_string(),
                name: new.name,
                subject: new.subject,
                body: new.body,
                variables: new.variables,
                category: new.category,
            },
        )?;
        Ok(id)
    }

    pub fn list_templates(&self, user_id: &str) -> Result<Vec<template_repo::TemplateRow>> {
        let user_id = require_user(user_id)?;
        Ok(template_repo::list_for_user(&self.db, user_id)?)
    }

    pub fn delete_template(&self, user_id: &str, template_id: &str) -> Result<()> {
        let user_id = require_user(user_id)?;
        // Scope the delete to the caller's templates.
        let owned = template_repo::find(&self.db, template_id)?
            .filter(|t| t.user_id == user_id)
            .ok_or_else(|| MailvaultError::NotFound(template_id.to_string()))?;
        template_repo::delete(&self.db, &owned.id)?;
        Ok(())
    }

    pub fn apply_template(
        &self,
        user_id: &str,
        template_id: &str,
        vars: &HashMap<String, String>,
    ) -> Result<RenderedTemplate> {
        let user_id = require_user(user_id)?;
        Ok(self.outbox.apply_template(user_id, template_id, vars)?)
    }

    // -- Internals --------------------------------------------------------

    /// Resolves the caller's credential: an explicit account id (which
    /// must belong to the caller and be active) or the first active one.
    fn resolve_account(&self, user_id: &str, account_id: Option<i64>) -> Result<CredentialRow> {
        let user_id = require_user(user_id)?;
        match account_id {
            Some(id) => credential_repo::find(&self.db, id)?
                .filter(|c| c.user_id == user_id && c.is_active)
                .ok_or(MailvaultError::CredentialMissing),
            None => credential_repo::find_active_for_user(&self.db, user_id)?
                .into_iter()
                .next()
                .ok_or(MailvaultError::CredentialMissing),
        }
    }

    fn provider_for(&self, kind: ProviderKind) -> Result<Box<dyn MailProvider>> {
        let client = self
            .config
            .providers
            .get(kind)
            .ok_or(MailvaultError::ProviderNotConfigured(kind.as_str()))?;
        let credentials = client.resolve_credentials()?;
        Ok((self.provider_factory)(kind, credentials)?)
    }

    fn provider_for_credential(&self, credential: &CredentialRow) -> Result<Box<dyn MailProvider>> {
        let kind = ProviderKind::parse(&credential.provider).ok_or_else(|| {
            MailvaultError::CredentialInvalid(format!(
                "unknown provider '{}'",
                credential.provider
            ))
        })?;
        self.provider_for(kind)
    }

    /// Exposes the token manager for embedding applications that drive
    /// adapters directly.
    pub fn token_manager(&self) -> &TokenManager {
        &self.tokens
    }

    /// The underlying database handle.
    pub fn database(&self) -> &Database {
        &self.db
    }
}

/// Fields for creating a template.
#[derive(Debug, Clone)]
pub struct NewTemplateRequest {
    pub name: String,
    pub subject: String,
    pub body: String,
    pub variables: Vec<String>,
    pub category: Option<String>,
}

fn require_user(user_id: &str) -> Result<&str> {
    let trimmed = user_id.trim();
    if trimmed.is_empty() {
        return Err(MailvaultError::Unauthenticated);
    }
    Ok(trimmed)
}
