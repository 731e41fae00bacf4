//! OAuth credential model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The rotating access/refresh token pair issued by Fitbit.
///
/// Both tokens live in one value so they can only be present or absent
/// together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    /// Single use: every refresh invalidates it server-side.
    pub refresh_token: String,
    /// When the access token expires, if the provider told us
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Fitbit encoded user ID the tokens belong to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Granted scopes, space separated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenPair {
    /// Whether the access token expires within `margin_secs` of `now`.
    ///
    /// Without a known expiry the token is assumed valid; a 401 from the
    /// API is the fallback signal in that case.
    pub fn expires_within(&self, now: DateTime<Utc>, margin_secs: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| now + chrono::Duration::seconds(margin_secs) >= expires_at)
    }
}

/// Client credentials plus the current token pair, if authorized.
#[derive(Clone, PartialEq)]
pub struct Credential {
    pub client_id: String,
    pub client_secret: String,
    pub tokens: Option<TokenPair>,
}

impl Credential {
    /// Credential restored from a previously persisted token pair.
    pub fn with_tokens(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        tokens: Option<TokenPair>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            tokens,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.tokens.is_some()
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }
}

// Keep secrets out of logs.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("client_id", &self.client_id)
            .field("authenticated", &self.is_authenticated())
            .field(
                "expires_at",
                &self.tokens.as_ref().and_then(|t| t.expires_at),
            )
            .finish()
    }
}
