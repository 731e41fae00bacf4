// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod fitbit;
pub mod harvest;
pub mod oauth;
pub mod transport;

pub use fitbit::FitbitClient;
pub use harvest::{
    DaySource, HarvestAbort, HarvestDriver, HarvestReport, RetryState, ScanEnd, Sleeper,
    TokioSleeper,
};
pub use oauth::{classify_response, OAuthEndpoints, TokenAuthority, MAX_RETRY_AFTER_SECS};
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, RequestBody, TransportError,
};
