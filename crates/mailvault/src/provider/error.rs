//! Provider adapter error types.

use thiserror::Error;

use crate::sanitize::truncate_error_body;

/// Errors from provider REST/OAuth operations.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// OAuth protocol error outside of token rejection (malformed
    /// response, unusable endpoint).
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// The provider rejected the credential (expired/revoked token,
    /// revoked consent). Requires user reconnection, not retry.
    #[error("Credential rejected by provider: {0}")]
    Unauthorized(String),

    /// Transport-level failure (DNS, TLS, timeout). Transient.
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the provider API.
    #[error("Provider API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// HTTP 429. Retry at the sync-trigger boundary, not inside a page.
    #[error("Rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    /// The response body did not match the expected shape.
    #[error("Failed to decode provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    /// Builds an error from a non-success API response, classifying
    /// auth failures and rate limits. The body is truncated before it
    /// can reach a log line.
    pub fn from_response(status: reqwest::StatusCode, body: &str, retry_after: Option<u64>) -> Self {
        let sanitized = truncate_error_body(body);
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return ProviderError::RateLimited {
                retry_after_secs: retry_after.unwrap_or(1),
            };
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || is_invalid_grant(body) {
            return ProviderError::Unauthorized(sanitized);
        }
        ProviderError::Api {
            status: status.as_u16(),
            body: sanitized,
        }
    }

    /// True when the error means the stored credential is no longer
    /// usable and the user must reconnect.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ProviderError::Unauthorized(_))
    }
}

/// OAuth token endpoints signal a dead refresh token with
/// `invalid_grant`; a bad client registration with `invalid_client`.
fn is_invalid_grant(body: &str) -> bool {
    body.contains("invalid_grant") || body.contains("invalid_client")
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
