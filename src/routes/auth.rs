// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit OAuth callback.

use axum::{
    extract::{Query, State},
    response::Html,
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::CallbackState;
use crate::error::{AppError, Result};
use crate::models::{AuthorizationRequest, Credential};
use crate::services::TokenAuthority;

const SUCCESS_PAGE: &str =
    "<h1>You are now authorized to access the Fitbit API!</h1><br/><h3>You can close this window</h3>";

pub fn routes() -> Router<Arc<CallbackState>> {
    Router::new().route("/", get(auth_callback))
}

/// Query parameters Fitbit appends to the redirect URI.
#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
pub struct CallbackParams {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Pull the callback parameters out of a pasted redirect URL.
    pub fn from_redirect_url(url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(url.trim())
            .map_err(|e| AppError::BadRequest(format!("Invalid redirect URL: {}", e)))?;

        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let value = Some(value.into_owned());
            match key.as_ref() {
                "code" => params.code = value,
                "state" => params.state = value,
                "error" => params.error = value,
                "error_description" => params.error_description = value,
                _ => {}
            }
        }
        Ok(params)
    }
}

/// Finish an authorization attempt: check the state, then trade the code
/// for tokens.
pub async fn complete_authorization(
    authority: &TokenAuthority,
    params: CallbackParams,
) -> Result<Credential> {
    let pending = authority
        .verify_state(params.state.as_deref().unwrap_or_default())
        .await?;
    exchange_callback(authority, &pending, params).await
}

async fn exchange_callback(
    authority: &TokenAuthority,
    pending: &AuthorizationRequest,
    params: CallbackParams,
) -> Result<Credential> {
    if let Some(error) = params.error {
        let description = params.error_description.unwrap_or_default();
        tracing::warn!(error = %error, description = %description, "OAuth error from Fitbit");
        return Err(AppError::TokenExchangeFailed(format!(
            "{} {}",
            error, description
        )
        .trim_end()
        .to_string()));
    }

    let code = params.code.unwrap_or_default();

    tracing::info!("Exchanging authorization code for tokens");
    authority
        .exchange_code(&code, pending.redirect_uri.as_deref())
        .await
}

/// OAuth callback. A request with the wrong state is rejected and leaves
/// the attempt open; anything past the state check ends it.
async fn auth_callback(
    State(state): State<Arc<CallbackState>>,
    Query(params): Query<CallbackParams>,
) -> Result<Html<&'static str>> {
    let pending = state
        .authority
        .verify_state(params.state.as_deref().unwrap_or_default())
        .await?;
    let result = exchange_callback(&state.authority, &pending, params).await;
    state.done.notify_one();

    let credential = result?;
    tracing::info!(
        user_id = ?credential.tokens.as_ref().and_then(|t| t.user_id.as_deref()),
        "Authorization complete"
    );
    Ok(Html(SUCCESS_PAGE))
}
