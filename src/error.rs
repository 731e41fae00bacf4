// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types shared by the OAuth client, the harvester and
//! the local callback server.

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};

/// Application error type.
///
/// The HTTP variants mirror the status classes the Fitbit API reports;
/// the harvest loop pattern-matches on them to decide between retrying,
/// backing off and aborting.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("Refresh token rejected, re-authorization required")]
    RefreshDenied,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Fitbit server error (HTTP {status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request timed out")]
    TransportTimeout,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Delete failed with HTTP {0}")]
    DeleteFailed(u16),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// True when the failure means the user has to run the authorization
    /// flow again.
    pub fn requires_reauthorization(&self) -> bool {
        matches!(self, AppError::RefreshDenied | AppError::Unauthorized(_))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::TokenExchangeFailed(_) | AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::RefreshDenied | AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::TransportTimeout => StatusCode::GATEWAY_TIMEOUT,
            AppError::Conflict(_)
            | AppError::ServerError { .. }
            | AppError::MalformedResponse(_)
            | AppError::Transport(_)
            | AppError::DeleteFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(msg) => {
                tracing::error!(error = %msg, "Storage error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = format!(
            "<h1>ERROR: {}</h1><br/><h3>You can close this window</h3>",
            escape_html(&self.to_string())
        );

        (status, Html(body)).into_response()
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, AppError>;
