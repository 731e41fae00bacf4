// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Authorization request model.

/// Scopes requested when the caller does not narrow them.
pub const DEFAULT_SCOPES: [&str; 9] = [
    "activity",
    "nutrition",
    "heartrate",
    "location",
    "profile",
    "settings",
    "sleep",
    "social",
    "weight",
];

/// A single attempt at the browser authorization flow.
///
/// `state` is freshly generated per attempt and must come back unchanged
/// on the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationRequest {
    /// URL the user opens to grant access
    pub authorization_url: String,
    /// Anti-forgery state token
    pub state: String,
    pub scopes: Vec<String>,
    pub redirect_uri: Option<String>,
}
