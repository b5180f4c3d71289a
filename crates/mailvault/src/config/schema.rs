//! Configuration structures.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::provider::{ClientCredentials, ProviderKind};
use crate::secrets::{has_secret_source, resolve_secret};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: String,

    /// OAuth callback URL registered with both providers.
    pub redirect_uri: String,

    /// Database file path; defaults to `~/.mailvault/data/mailvault.db`.
    #[serde(default)]
    pub database_path: Option<String>,

    /// Page size for local thread listings.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: u32,

    pub providers: ProvidersConfig,
}

fn default_list_page_size() -> u32 {
    25
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub gmail: Option<OAuthClientConfig>,
    #[serde(default)]
    pub outlook: Option<OAuthClientConfig>,
}

impl ProvidersConfig {
    pub fn get(&self, kind: ProviderKind) -> Option<&OAuthClientConfig> {
        match kind {
            ProviderKind::Gmail => self.gmail.as_ref(),
            ProviderKind::Outlook => self.outlook.as_ref(),
        }
    }
}

/// OAuth client registration. The secret resolves from exactly the
/// sources the deployment provides: inline value, secrets file, or
/// environment variable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthClientConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub client_secret_file: Option<String>,
    #[serde(default)]
    pub client_secret_env_var: Option<String>,
}

impl OAuthClientConfig {
    /// Resolves the client secret and pairs it with the client id.
    pub fn resolve_credentials(&self) -> Result<ClientCredentials, ConfigError> {
        let secret = resolve_secret(
            self.client_secret.as_deref(),
            self.client_secret_file.as_deref(),
            self.client_secret_env_var.as_deref(),
        )?;
        Ok(ClientCredentials::new(self.client_id.clone(), secret))
    }

    pub fn has_secret(&self) -> bool {
        has_secret_source(
            self.client_secret.as_deref(),
            self.client_secret_file.as_deref(),
            self.client_secret_env_var.as_deref(),
        )
    }
}
