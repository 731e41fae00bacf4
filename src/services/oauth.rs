// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit OAuth2 token authority.
//!
//! Handles:
//! - Building the browser authorization URL with a fresh state token
//! - Authorization code exchange
//! - Refresh token exchange (refresh tokens are single use)
//! - Transparent refresh-and-reissue when an API call hits an expired token
//! - Mapping Fitbit error statuses onto [`AppError`]
//!
//! Every new token pair is handed to the injected [`TokenStore`] before the
//! call that produced it returns. Losing a rotated refresh token means the
//! user has to authorize again.

use crate::db::TokenStore;
use crate::error::{AppError, Result};
use crate::models::{AuthorizationRequest, Credential, TokenPair, DEFAULT_SCOPES};
use crate::services::transport::{HttpRequest, HttpResponse, HttpTransport, RequestBody};
use base64::{
    engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD},
    Engine as _,
};
use chrono::{DateTime, Utc};
use reqwest::Method;
use ring::rand::{SecureRandom, SystemRandom};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

/// Fitbit authorization endpoint (browser facing).
pub const AUTHORIZE_URL: &str = "https://www.fitbit.com/oauth2/authorize";
/// Fitbit token endpoint.
pub const TOKEN_URL: &str = "https://api.fitbit.com/oauth2/token";

/// Refresh ahead of the tracked expiry by this much.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Used when a 429 arrives without a usable `Retry-After` header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Upper bound on an honored `Retry-After`; Fitbit quotas reset hourly.
pub const MAX_RETRY_AFTER_SECS: u64 = 86_400;

/// OAuth endpoint URLs, overridable for tests.
#[derive(Debug, Clone)]
pub struct OAuthEndpoints {
    pub authorize_url: String,
    pub token_url: String,
}

impl Default for OAuthEndpoints {
    fn default() -> Self {
        Self {
            authorize_url: AUTHORIZE_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }
}

/// Owner of the Fitbit credential set.
///
/// Callers never see a refresh: [`TokenAuthority::send`] refreshes once
/// and reissues the request when the access token turns out to be stale.
pub struct TokenAuthority {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn TokenStore>,
    endpoints: OAuthEndpoints,
    credential: Mutex<Credential>,
    /// Authorization attempt awaiting its callback.
    pending: Mutex<Option<AuthorizationRequest>>,
    redirect_uri: Option<String>,
    timeout: Option<Duration>,
}

impl TokenAuthority {
    pub fn new(
        credential: Credential,
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            transport,
            store,
            endpoints: OAuthEndpoints::default(),
            credential: Mutex::new(credential),
            pending: Mutex::new(None),
            redirect_uri: None,
            timeout: None,
        }
    }

    pub fn with_endpoints(mut self, endpoints: OAuthEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Default redirect URI for authorization and code exchange.
    pub fn with_redirect_uri(mut self, redirect_uri: impl Into<String>) -> Self {
        self.redirect_uri = Some(redirect_uri.into());
        self
    }

    /// Per-request timeout applied to every call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Snapshot of the current credential.
    pub async fn credential(&self) -> Credential {
        self.credential.lock().await.clone()
    }

    pub async fn is_authenticated(&self) -> bool {
        self.credential.lock().await.is_authenticated()
    }

    // ─── Authorization ───────────────────────────────────────────────────────

    /// Build the URL the user visits to grant access.
    ///
    /// Scopes default to [`DEFAULT_SCOPES`]. The generated state token is
    /// remembered until [`TokenAuthority::verify_state`] consumes it.
    pub async fn begin_authorization(
        &self,
        scopes: Option<Vec<String>>,
        redirect_uri: Option<&str>,
    ) -> Result<AuthorizationRequest> {
        let scopes =
            scopes.unwrap_or_else(|| DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect());
        let redirect_uri = redirect_uri
            .map(str::to_string)
            .or_else(|| self.redirect_uri.clone());
        let state = generate_state()?;
        let client_id = self.credential.lock().await.client_id.clone();

        let mut params = vec![
            ("response_type", "code".to_string()),
            ("client_id", client_id),
        ];
        if let Some(uri) = &redirect_uri {
            params.push(("redirect_uri", uri.clone()));
        }
        params.push(("scope", scopes.join(" ")));
        params.push(("state", state.clone()));

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let request = AuthorizationRequest {
            authorization_url: format!("{}?{}", self.endpoints.authorize_url, query),
            state,
            scopes,
            redirect_uri,
        };

        *self.pending.lock().await = Some(request.clone());
        tracing::info!(scopes = %request.scopes.join(" "), "Authorization started");

        Ok(request)
    }

    /// Check the state returned on the callback against the pending
    /// authorization attempt. Only a matching state consumes the attempt,
    /// so a stray callback cannot cancel the real one.
    pub async fn verify_state(&self, received: &str) -> Result<AuthorizationRequest> {
        let mut pending = self.pending.lock().await;
        let expected = pending.as_ref().ok_or_else(|| {
            AppError::TokenExchangeFailed("no authorization in progress".to_string())
        })?;

        if !bool::from(expected.state.as_bytes().ct_eq(received.as_bytes())) {
            tracing::error!("OAuth state mismatch! Potential cross-site request forgery.");
            return Err(AppError::TokenExchangeFailed("state mismatch".to_string()));
        }

        pending.take().ok_or_else(|| {
            AppError::TokenExchangeFailed("no authorization in progress".to_string())
        })
    }

    /// Exchange an authorization code for the initial token pair.
    pub async fn exchange_code(&self, code: &str, redirect_uri: Option<&str>) -> Result<Credential> {
        if code.is_empty() {
            return Err(AppError::TokenExchangeFailed(
                "missing authorization code".to_string(),
            ));
        }

        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
        ];
        if let Some(uri) = redirect_uri.or(self.redirect_uri.as_deref()) {
            form.push(("redirect_uri".to_string(), uri.to_string()));
        }

        let mut credential = self.credential.lock().await;
        let response = self.post_token(&credential, form).await?;

        if !response.is_success() {
            let detail = error_summary(&response);
            tracing::error!(status = response.status, detail = %detail, "Fitbit token exchange failed");
            return Err(AppError::TokenExchangeFailed(detail));
        }

        let pair = parse_token_response(&response, Utc::now())
            .map_err(AppError::TokenExchangeFailed)?;

        self.install(&mut credential, pair).await?;
        tracing::info!("Authorization code exchanged, tokens stored");

        Ok(credential.clone())
    }

    // ─── Refresh ─────────────────────────────────────────────────────────────

    /// Trade the current refresh token for a new pair.
    ///
    /// `RefreshDenied` means the refresh token is dead; the held pair is
    /// dropped and the user must authorize again.
    pub async fn refresh(&self) -> Result<Credential> {
        let mut credential = self.credential.lock().await;
        self.refresh_locked(&mut credential).await?;
        Ok(credential.clone())
    }

    async fn refresh_locked(&self, credential: &mut Credential) -> Result<()> {
        let (refresh_token, previous_user) = match &credential.tokens {
            Some(tokens) => (tokens.refresh_token.clone(), tokens.user_id.clone()),
            None => {
                tracing::warn!("Refresh requested without a refresh token");
                return Err(AppError::RefreshDenied);
            }
        };

        tracing::info!("Refreshing access token");

        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token),
        ];
        let response = self.post_token(credential, form).await?;

        if !response.is_success() {
            if error_types(&response).iter().any(|t| t == "invalid_grant") {
                tracing::warn!("Refresh token rejected (invalid_grant), re-authorization required");
                credential.tokens = None;
                return Err(AppError::RefreshDenied);
            }
            return Err(match response.status {
                429 => AppError::RateLimited {
                    retry_after_seconds: retry_after(&response),
                },
                status if status >= 500 => AppError::ServerError {
                    status,
                    message: error_summary(&response),
                },
                _ => AppError::TokenExchangeFailed(error_summary(&response)),
            });
        }

        let mut pair =
            parse_token_response(&response, Utc::now()).map_err(AppError::TokenExchangeFailed)?;
        if pair.user_id.is_none() {
            pair.user_id = previous_user;
        }

        self.install(credential, pair).await?;
        tracing::info!("Token refreshed and stored");
        Ok(())
    }

    /// Replace the held pair and hand it to the persistence hook.
    async fn install(&self, credential: &mut Credential, pair: TokenPair) -> Result<()> {
        credential.tokens = Some(pair.clone());
        self.store.save_token(&pair).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to persist refreshed tokens");
            e
        })
    }

    async fn post_token(
        &self,
        credential: &Credential,
        form: Vec<(String, String)>,
    ) -> Result<HttpResponse> {
        let basic = BASE64.encode(format!(
            "{}:{}",
            credential.client_id, credential.client_secret
        ));
        let request = HttpRequest::new(Method::POST, &self.endpoints.token_url)
            .header("Authorization", format!("Basic {}", basic))
            .body(Some(RequestBody::Form(form)))
            .timeout(self.timeout);

        Ok(self.transport.request(request).await?)
    }

    // ─── Authenticated calls ─────────────────────────────────────────────────

    /// Make an API call with the current access token.
    pub async fn authenticated_request(
        &self,
        method: Method,
        url: &str,
        body: Option<RequestBody>,
    ) -> Result<HttpResponse> {
        self.send(HttpRequest::new(method, url).body(body)).await
    }

    /// Send `request` with a bearer token, refreshing at most once.
    ///
    /// The refresh happens either before sending (tracked expiry is close)
    /// or after a 401 whose body says the token expired. The request is
    /// then sent one more time; a second 401 is `Unauthorized`.
    pub async fn send(&self, mut request: HttpRequest) -> Result<HttpResponse> {
        if request.timeout.is_none() {
            request.timeout = self.timeout;
        }

        let mut refreshed = false;
        let access_token = {
            let mut credential = self.credential.lock().await;
            let tokens = credential
                .tokens
                .as_ref()
                .ok_or_else(|| AppError::Unauthorized("not authorized".to_string()))?;

            if tokens.expires_within(Utc::now(), TOKEN_REFRESH_MARGIN_SECS) {
                tracing::info!("Access token expired, refreshing before request");
                self.refresh_locked(&mut credential).await?;
                refreshed = true;
            }
            current_access_token(&credential)?
        };

        let response = self.dispatch(&request, &access_token).await?;

        if response.status == 401 && !refreshed && is_token_expiry(&response) {
            tracing::info!(url = %request.url, "Access token rejected as expired, refreshing");
            let access_token = {
                let mut credential = self.credential.lock().await;
                // Another caller may have refreshed while we were waiting.
                if credential.access_token() == Some(access_token.as_str()) {
                    self.refresh_locked(&mut credential).await?;
                }
                current_access_token(&credential)?
            };
            let retried = self.dispatch(&request, &access_token).await?;
            return classify_response(retried);
        }

        classify_response(response)
    }

    async fn dispatch(&self, request: &HttpRequest, access_token: &str) -> Result<HttpResponse> {
        let request = request
            .clone()
            .header("Authorization", format!("Bearer {}", access_token));
        tracing::debug!(method = %request.method, url = %request.url, "Requesting");
        Ok(self.transport.request(request).await?)
    }
}

fn current_access_token(credential: &Credential) -> Result<String> {
    credential
        .access_token()
        .map(str::to_string)
        .ok_or_else(|| AppError::Unauthorized("not authorized".to_string()))
}

/// 32 random bytes, URL-safe base64.
fn generate_state() -> Result<String> {
    let mut bytes = [0u8; 32];
    SystemRandom::new()
        .fill(&mut bytes)
        .map_err(|_| AppError::Internal(anyhow::anyhow!("System RNG unavailable")))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

// ─── Fitbit response parsing ─────────────────────────────────────────────────

/// Token endpoint success body.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Epoch seconds; some clients persist it as a float.
    expires_at: Option<f64>,
    expires_in: Option<i64>,
    user_id: Option<String>,
    scope: Option<String>,
}

fn parse_token_response(
    response: &HttpResponse,
    now: DateTime<Utc>,
) -> std::result::Result<TokenPair, String> {
    let body: TokenResponse = response
        .json()
        .map_err(|e| format!("failed to parse token response: {}", e))?;

    let (access_token, refresh_token) = match (body.access_token, body.refresh_token) {
        (Some(a), Some(r)) if !a.is_empty() && !r.is_empty() => (a, r),
        _ => return Err("token response missing access_token or refresh_token".to_string()),
    };

    let expires_at = match (body.expires_at, body.expires_in) {
        (Some(at), _) => DateTime::from_timestamp(at as i64, 0),
        (None, Some(secs)) => Some(now + chrono::Duration::seconds(secs)),
        (None, None) => None,
    };

    Ok(TokenPair {
        access_token,
        refresh_token,
        expires_at,
        user_id: body.user_id,
        scope: body.scope,
    })
}

/// Fitbit error body: `{"errors": [{"errorType", "fieldName", "message"}]}`.
#[derive(Debug, Default, Deserialize)]
struct FitbitErrorBody {
    #[serde(default)]
    errors: Vec<FitbitErrorDetail>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FitbitErrorDetail {
    error_type: Option<String>,
    field_name: Option<String>,
    message: Option<String>,
}

fn error_body(response: &HttpResponse) -> FitbitErrorBody {
    response.json().unwrap_or_default()
}

fn error_types(response: &HttpResponse) -> Vec<String> {
    error_body(response)
        .errors
        .into_iter()
        .filter_map(|e| e.error_type)
        .collect()
}

fn is_token_expiry(response: &HttpResponse) -> bool {
    error_types(response)
        .first()
        .is_some_and(|t| t == "expired_token" || t == "invalid_token")
}

/// Human-readable summary of a Fitbit error response.
fn error_summary(response: &HttpResponse) -> String {
    if let Some(first) = error_body(response).errors.into_iter().next() {
        let kind = first.error_type.unwrap_or_else(|| "error".to_string());
        return match (first.field_name, first.message) {
            (Some(field), Some(message)) => format!("{} ({}): {}", kind, field, message),
            (None, Some(message)) => format!("{}: {}", kind, message),
            (_, None) => kind,
        };
    }

    let text: String = response.text().chars().take(200).collect();
    format!("HTTP {}: {}", response.status, text)
}

fn retry_after(response: &HttpResponse) -> u64 {
    match response
        .header("Retry-After")
        .and_then(|v| v.trim().parse().ok())
    {
        Some(secs) if secs > MAX_RETRY_AFTER_SECS => {
            tracing::warn!(
                retry_after = secs,
                max = MAX_RETRY_AFTER_SECS,
                "Retry-After out of range, clamping"
            );
            MAX_RETRY_AFTER_SECS
        }
        Some(secs) => secs,
        None => {
            tracing::warn!(
                default = DEFAULT_RETRY_AFTER_SECS,
                "429 without a usable Retry-After header"
            );
            DEFAULT_RETRY_AFTER_SECS
        }
    }
}

/// Map a final response onto the error taxonomy.
pub fn classify_response(response: HttpResponse) -> Result<HttpResponse> {
    match response.status {
        200..=299 => Ok(response),
        401 => Err(AppError::Unauthorized(error_summary(&response))),
        403 => Err(AppError::Forbidden(error_summary(&response))),
        404 => Err(AppError::NotFound(error_summary(&response))),
        409 => Err(AppError::Conflict(error_summary(&response))),
        429 => {
            let retry_after_seconds = retry_after(&response);
            tracing::warn!(retry_after_seconds, "Fitbit rate limit hit (429)");
            Err(AppError::RateLimited {
                retry_after_seconds,
            })
        }
        status if status >= 500 => Err(AppError::ServerError {
            status,
            message: error_summary(&response),
        }),
        _ => Err(AppError::BadRequest(error_summary(&response))),
    }
}
