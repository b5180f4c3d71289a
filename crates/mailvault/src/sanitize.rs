//! Helpers for sanitizing data before it enters logs or span attributes.
//!
//! Logs are safe to share for debugging — these functions ensure no
//! sensitive data (access tokens, full addresses, raw provider error
//! bodies) leaks into them.

/// Maximum length for sanitized provider error bodies. OAuth error
/// responses can echo request parameters, so they are truncated before
/// logging.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Truncates a provider/OAuth error body to a loggable length.
pub fn truncate_error_body(body: &str) -> String {
    if body.len() > MAX_ERROR_BODY_LENGTH {
        let cut = body
            .char_indices()
            .take_while(|(i, _)| *i <= MAX_ERROR_BODY_LENGTH)
            .last()
            .map(|(i, _)| i)
            .unwrap_or(0);
        format!("{}... (truncated)", &body[..cut])
    } else {
        body.to_string()
    }
}

/// Masks the local part of an email address: `alice@x.com` → `a***@x.com`.
///
/// Safe for span fields — reveals the domain and first character without
/// exposing the full address.
pub fn redact_email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first = local.chars().next().unwrap_or('*');
            format!("{}***@{}", first, domain)
        }
        _ => "***".to_string(),
    }
}

/// Shows only the first and last four characters of a token.
pub fn redact_token(token: &str) -> String {
    if token.len() <= 8 {
        return "****".to_string();
    }
    let head: String = token.chars().take(4).collect();
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_body_unchanged() {
        assert_eq!(truncate_error_body("invalid_grant"), "invalid_grant");
    }

    #[test]
    fn test_truncate_long_body() {
        let body = "x".repeat(500);
        let truncated = truncate_error_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
        assert!(truncated.len() < body.len());
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let body = "é".repeat(300);
        // Must not panic on a multi-byte boundary.
        let truncated = truncate_error_body(&body);
        assert!(truncated.ends_with("... (truncated)"));
    }

    #[test]
    fn test_redact_email() {
        assert_eq!(redact_email("alice@x.com"), "a***@x.com");
        assert_eq!(redact_email("b@y.org"), "b***@y.org");
        assert_eq!(redact_email("not-an-address"), "***");
        assert_eq!(redact_email("@x.com"), "***");
    }

    #[test]
    fn test_redact_token() {
        assert_eq!(redact_token("ya29.a0AfH6SMBxyzw1234"), "ya29...1234");
        assert_eq!(redact_token("short"), "****");
        assert_eq!(redact_token(""), "****");
    }
}
