//! Opaque CSRF state for the OAuth authorization round-trip.
//!
//! The `state` query parameter carries {user_id, provider, issued_at}
//! through the provider's consent screen and back. It is decoded
//! verbatim at the callback; a payload that fails to decode or is older
//! than the allowed window is rejected, which ties the callback to the
//! session that initiated it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

use super::error::{AuthError, Result};

/// How long a connect state stays valid (10 minutes).
const STATE_MAX_AGE_SECS: i64 = 600;

/// Allowed forward clock skew when checking issued_at.
const STATE_SKEW_SECS: i64 = 60;

/// Payload round-tripped through the provider consent screen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectState {
    pub user_id: String,
    pub provider: ProviderKind,
    /// Unix seconds at issue time.
    pub issued_at: i64,
}

impl ConnectState {
    pub fn new(user_id: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            user_id: user_id.into(),
            provider,
            issued_at: Utc::now().timestamp(),
        }
    }

    /// Encodes the payload as base64url JSON without padding — safe to
    /// embed in a query string.
    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    /// Decodes and validates a state parameter returned by a provider
    /// callback.
    pub fn decode(raw: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(raw.trim())
            .map_err(|_| AuthError::InvalidState("undecodable payload".to_string()))?;
        let state: ConnectState = serde_json::from_slice(&bytes)
            .map_err(|_| AuthError::InvalidState("malformed payload".to_string()))?;

        let now = Utc::now().timestamp();
        if state.issued_at > now + STATE_SKEW_SECS {
            return Err(AuthError::InvalidState("issued in the future".to_string()));
        }
        if now - state.issued_at > STATE_MAX_AGE_SECS {
            return Err(AuthError::InvalidState("expired".to_string()));
        }

        Ok(state)
    }
}
