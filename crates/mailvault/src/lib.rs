pub mod auth;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod provider;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod store;
pub mod sync;
pub mod telemetry;

pub use auth::{ConnectState, TokenManager, REFRESH_BUFFER_SECS};
pub use config::{load_config, Config};
pub use crypto::{FieldCipher, KeyVault};
pub use db::Database;
pub use error::{ConfigError, MailvaultError, Result};
pub use provider::{
    Attachment, ClientCredentials, MailFilter, MailProvider, MessagePage, OutgoingMessage,
    Participant, ProviderKind, RemoteMessage, TokenGrant,
};
pub use secrets::{resolve_secret, SecretError};
pub use service::{AccountView, MailService, NewTemplateRequest, ProviderFactory};
pub use store::{DraftRequest, MailboxStore, Outbox, SendRequest};
pub use sync::{SyncEngine, SyncOutcome};
