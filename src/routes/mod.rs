// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! HTTP route handlers.
//!
//! The only server this crate runs is the short-lived one catching the
//! OAuth redirect during `authorize`.

pub mod auth;

pub use auth::{complete_authorization, CallbackParams};

use crate::services::TokenAuthority;
use axum::Router;
use std::sync::Arc;
use tokio::sync::Notify;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

/// State shared with the callback handler.
pub struct CallbackState {
    pub authority: Arc<TokenAuthority>,
    /// Signalled once a callback has been handled, successfully or not
    pub done: Arc<Notify>,
}

impl CallbackState {
    pub fn new(authority: Arc<TokenAuthority>) -> Self {
        Self {
            authority,
            done: Arc::new(Notify::new()),
        }
    }
}

/// Build the callback router.
pub fn create_router(state: Arc<CallbackState>) -> Router {
    Router::new()
        .merge(auth::routes())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}
