//! Credential Types
//!
//! Opaque bearer tokens and the access/refresh pair the request pipeline
//! authenticates with. Tokens carry a server-defined expiry that the client
//! never inspects; expiry is only observed as a rejected request.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};

/// Opaque bearer credential.
///
/// `Debug` and `Display` never print the underlying value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wrap a raw token string.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Raw token value, for building the `Authorization` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the token holds no characters.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Username claim carried by a JWT access token.
    ///
    /// Reads the `username` claim, falling back to `sub`. Returns `None` for
    /// anything that is not a decodable three-segment JWT.
    #[must_use]
    pub fn username(&self) -> Option<String> {
        let mut segments = self.0.split('.');
        let (_, payload, _) = (segments.next()?, segments.next()?, segments.next()?);
        if segments.next().is_some() {
            return None;
        }

        let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
        let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;

        ["username", "sub"].iter().find_map(|key| match claims.get(*key)? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token([REDACTED])")
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

/// The access/refresh pair held by the credential store.
///
/// At most one pair is valid at a time; storing a new pair replaces the old
/// one as a whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialPair {
    /// Short-lived credential attached to requests.
    pub access: Token,
    /// Longer-lived credential used only to mint a new access token.
    pub refresh: Option<Token>,
}

impl CredentialPair {
    /// Create a pair with both tokens present.
    #[must_use]
    pub const fn new(access: Token, refresh: Token) -> Self {
        Self {
            access,
            refresh: Some(refresh),
        }
    }

    /// Create a pair with no refresh credential.
    #[must_use]
    pub const fn access_only(access: Token) -> Self {
        Self {
            access,
            refresh: None,
        }
    }

    /// Replace the access token, keeping the refresh token unless a new one
    /// was issued.
    #[must_use]
    pub fn renewed(&self, access: Token, refresh: Option<Token>) -> Self {
        Self {
            access,
            refresh: refresh.or_else(|| self.refresh.clone()),
        }
    }
}
