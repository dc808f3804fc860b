//! Bot token extraction.
//!
//! Tokens ride in the URL path as `/bot<digits>:<secret>/<endpoint...>`; the
//! digits before the first colon identify the tenant.

use once_cell::sync::Lazy;
use regex::Regex;

static BOT_TOKEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^/bot([0-9]+:[A-Za-z0-9_-]+)/").expect("bot token regex"));

/// A syntactically valid bot token and the tenant it identifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotToken {
    token: String,
    tenant: u64,
}

impl BotToken {
    /// Extract the token embedded in a request path.
    ///
    /// Returns `None` when the path does not carry a well-formed token,
    /// including a numeric id too large to represent.
    pub fn from_path(path: &str) -> Option<Self> {
        let captures = BOT_TOKEN_RE.captures(path)?;
        Self::from_token(captures.get(1)?.as_str())
    }

    /// Parse a bare `<digits>:<secret>` token, e.g. one echoed in a header.
    pub fn from_token(token: &str) -> Option<Self> {
        let (id, secret) = token.split_once(':')?;
        if id.is_empty() || secret.is_empty() {
            return None;
        }
        let tenant = id.parse().ok()?;
        Some(Self {
            token: token.to_string(),
            tenant,
        })
    }

    /// The full token as it appeared on the wire.
    pub fn as_str(&self) -> &str {
        &self.token
    }

    /// The numeric tenant identifier (the digits before the first colon).
    pub fn tenant(&self) -> u64 {
        self.tenant
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_path_extracts_token_and_tenant() {
        let token = BotToken::from_path("/bot42:XYZ/getMe").unwrap();
        assert_eq!(token.as_str(), "42:XYZ");
        assert_eq!(token.tenant(), 42);
    }

    #[test]
    fn test_secret_charset_allows_underscore_and_hyphen() {
        let token = BotToken::from_path("/bot7:a_b-C9/sendMessage").unwrap();
        assert_eq!(token.as_str(), "7:a_b-C9");
        assert_eq!(token.tenant(), 7);
    }

    #[test]
    fn test_path_with_no_endpoint_is_valid() {
        let token = BotToken::from_path("/bot123:TOKEN/").unwrap();
        assert_eq!(token.as_str(), "123:TOKEN");
    }

    #[test]
    fn test_query_string_after_endpoint_is_ignored() {
        let token = BotToken::from_path("/bot42:XYZ/sendMessage?chat_id=1").unwrap();
        assert_eq!(token.tenant(), 42);
    }

    #[test]
    fn test_non_numeric_id_rejected() {
        assert!(BotToken::from_path("/botABC/foo").is_none());
        assert!(BotToken::from_path("/botabc:secret/getMe").is_none());
    }

    #[test]
    fn test_missing_trailing_slash_rejected() {
        assert!(BotToken::from_path("/bot123:TOKEN").is_none());
    }

    #[test]
    fn test_token_must_lead_the_path() {
        assert!(BotToken::from_path("/api/bot42:XYZ/getMe").is_none());
    }

    #[test]
    fn test_missing_token_rejected() {
        assert!(BotToken::from_path("/").is_none());
        assert!(BotToken::from_path("").is_none());
        assert!(BotToken::from_path("/bot/getMe").is_none());
        assert!(BotToken::from_path("/bot42:/getMe").is_none());
    }

    #[test]
    fn test_id_too_large_for_u64_rejected() {
        assert!(BotToken::from_path("/bot99999999999999999999999:XYZ/getMe").is_none());
    }

    #[test]
    fn test_bare_token_parsing() {
        let token = BotToken::from_token("42:XYZ").unwrap();
        assert_eq!(token.tenant(), 42);
        assert!(BotToken::from_token("no-colon").is_none());
        assert!(BotToken::from_token(":secret").is_none());
        assert!(BotToken::from_token("42:").is_none());
    }
}
