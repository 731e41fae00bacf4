// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! In-memory fakes shared by the integration tests.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use fitbit_harvest::db::{DumpSink, FirestoreDb, TokenStore};
use fitbit_harvest::error::{AppError, Result};
use fitbit_harvest::models::{Credential, DayDump, ResourceDescriptor, TokenPair};
use fitbit_harvest::services::{
    DaySource, HttpRequest, HttpResponse, HttpTransport, OAuthEndpoints, Sleeper, TokenAuthority,
    TransportError,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[allow(dead_code)]
pub const TOKEN_URL: &str = "https://fitbit.test/oauth2/token";
#[allow(dead_code)]
pub const AUTHORIZE_URL: &str = "https://fitbit.test/oauth2/authorize";
#[allow(dead_code)]
pub const API_URL: &str = "https://api.fitbit.test/1/user/-/profile.json";

/// Check if emulator is available via environment variable.
#[allow(dead_code)]
pub fn emulator_available() -> bool {
    std::env::var("FIRESTORE_EMULATOR_HOST").is_ok()
}

/// Skip test with message if emulator not available.
#[macro_export]
macro_rules! require_emulator {
    () => {
        if !crate::common::emulator_available() {
            eprintln!("⚠️  Skipping: FIRESTORE_EMULATOR_HOST not set");
            return;
        }
    };
}

/// Create a test database connection.
#[allow(dead_code)]
pub async fn test_db() -> FirestoreDb {
    FirestoreDb::new("test-project")
        .await
        .expect("Failed to connect to Firestore emulator")
}

#[allow(dead_code)]
pub fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

// ─── Tokens ──────────────────────────────────────────────────────────────────

#[allow(dead_code)]
pub fn token_pair(access: &str, refresh: &str, expires_in_secs: i64) -> TokenPair {
    TokenPair {
        access_token: access.to_string(),
        refresh_token: refresh.to_string(),
        expires_at: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
        user_id: Some("ABC123".to_string()),
        scope: None,
    }
}

/// Pair valid for another hour.
#[allow(dead_code)]
pub fn fresh_tokens() -> TokenPair {
    token_pair("old_access", "old_refresh", 3600)
}

/// Pair that expired an hour ago.
#[allow(dead_code)]
pub fn expired_tokens() -> TokenPair {
    token_pair("old_access", "old_refresh", -3600)
}

#[allow(dead_code)]
pub fn json_response(status: u16, body: Value) -> HttpResponse {
    HttpResponse::new(status, body.to_string())
}

/// Successful token endpoint reply.
#[allow(dead_code)]
pub fn token_response(access: &str, refresh: &str) -> HttpResponse {
    json_response(
        200,
        json!({
            "access_token": access,
            "refresh_token": refresh,
            "expires_in": 28800,
            "token_type": "Bearer",
            "user_id": "ABC123",
            "scope": "activity sleep"
        }),
    )
}

/// Fitbit error reply with a single `errorType`.
#[allow(dead_code)]
pub fn error_response(status: u16, error_type: &str) -> HttpResponse {
    json_response(
        status,
        json!({
            "errors": [{"errorType": error_type, "message": format!("{} error", error_type)}],
            "success": false
        }),
    )
}

/// Authority wired to a scripted transport and a memory store.
#[allow(dead_code)]
pub fn test_authority(
    transport: Arc<ScriptedTransport>,
    store: Arc<MemoryTokenStore>,
    tokens: Option<TokenPair>,
) -> TokenAuthority {
    TokenAuthority::new(
        Credential::with_tokens("client", "secret", tokens),
        transport,
        store,
    )
    .with_endpoints(OAuthEndpoints {
        authorize_url: AUTHORIZE_URL.to_string(),
        token_url: TOKEN_URL.to_string(),
    })
    .with_redirect_uri("http://127.0.0.1:8080/")
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Transport replaying canned results in order and recording requests.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<std::result::Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(responses.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn push_error(&self, error: TransportError) {
        self.script.lock().unwrap().push_back(Err(error));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Number of requests sent to the token endpoint.
    pub fn token_requests(&self) -> usize {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.url == TOKEN_URL)
            .count()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn request(
        &self,
        request: HttpRequest,
    ) -> std::result::Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Failed("script exhausted".to_string())))
    }
}

// ─── Storage ─────────────────────────────────────────────────────────────────

/// Token store remembering every saved pair.
#[derive(Default)]
pub struct MemoryTokenStore {
    saved: Mutex<Vec<TokenPair>>,
    fail: bool,
}

#[allow(dead_code)]
impl MemoryTokenStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Store whose saves always fail.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            saved: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn saved(&self) -> Vec<TokenPair> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn save_token(&self, tokens: &TokenPair) -> Result<()> {
        if self.fail {
            return Err(AppError::Storage("disk full".to_string()));
        }
        self.saved.lock().unwrap().push(tokens.clone());
        Ok(())
    }

    async fn load_token(&self) -> Result<Option<TokenPair>> {
        Ok(self.saved.lock().unwrap().last().cloned())
    }
}

/// Dump sink keeping committed days in memory.
#[derive(Default)]
pub struct MemorySink {
    days: Mutex<BTreeMap<NaiveDate, DayDump>>,
    commits: Mutex<Vec<NaiveDate>>,
    fail_writes: bool,
}

#[allow(dead_code)]
impl MemorySink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sink that already holds complete dumps for `days`.
    pub fn with_days(days: &[NaiveDate]) -> Arc<Self> {
        let sink = Self::default();
        {
            let mut stored = sink.days.lock().unwrap();
            for day in days {
                stored.insert(*day, DayDump::new(*day));
            }
        }
        Arc::new(sink)
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_writes: true,
            ..Self::default()
        })
    }

    /// Days committed through this sink, in commit order.
    pub fn commits(&self) -> Vec<NaiveDate> {
        self.commits.lock().unwrap().clone()
    }

    pub fn dump(&self, day: NaiveDate) -> Option<DayDump> {
        self.days.lock().unwrap().get(&day).cloned()
    }
}

#[async_trait]
impl DumpSink for MemorySink {
    async fn exists(&self, day: NaiveDate) -> Result<bool> {
        Ok(self.days.lock().unwrap().contains_key(&day))
    }

    async fn write(&self, day: NaiveDate, resource_name: &str, payload: &Value) -> Result<()> {
        if self.fail_writes {
            return Err(AppError::Storage("read-only".to_string()));
        }
        self.days
            .lock()
            .unwrap()
            .entry(day)
            .or_insert_with(|| DayDump::new(day))
            .push(resource_name, payload.clone());
        Ok(())
    }

    async fn write_day(&self, dump: &DayDump) -> Result<()> {
        if self.fail_writes {
            return Err(AppError::Storage("read-only".to_string()));
        }
        self.days.lock().unwrap().insert(dump.day, dump.clone());
        self.commits.lock().unwrap().push(dump.day);
        Ok(())
    }
}

// ─── Harvest ─────────────────────────────────────────────────────────────────

/// Sleeper that only records the requested pauses.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<u64>>,
}

#[allow(dead_code)]
impl RecordingSleeper {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Requested pauses in seconds.
    pub fn sleeps(&self) -> Vec<u64> {
        self.sleeps.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration.as_secs());
    }
}

/// Day source with scripted step totals and failures.
///
/// Every day has 1000 steps unless set otherwise. Failures are queued per
/// day and returned, in order, by that day's steps fetch.
#[derive(Default)]
pub struct ScriptedSource {
    steps: BTreeMap<NaiveDate, u64>,
    failures: Mutex<VecDeque<(NaiveDate, AppError)>>,
    fetches: Mutex<Vec<(NaiveDate, &'static str)>>,
    refreshes: Mutex<u32>,
}

#[allow(dead_code)]
impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_steps(mut self, day: NaiveDate, steps: u64) -> Self {
        self.steps.insert(day, steps);
        self
    }

    pub fn fail(self, day: NaiveDate, error: AppError) -> Self {
        self.failures.lock().unwrap().push_back((day, error));
        self
    }

    pub fn fail_times(self, day: NaiveDate, times: usize, error: impl Fn() -> AppError) -> Self {
        {
            let mut failures = self.failures.lock().unwrap();
            for _ in 0..times {
                failures.push_back((day, error()));
            }
        }
        self
    }

    pub fn fetches(&self) -> Vec<(NaiveDate, &'static str)> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn fetches_for(&self, day: NaiveDate) -> usize {
        self.fetches().iter().filter(|(d, _)| *d == day).count()
    }

    pub fn refreshes(&self) -> u32 {
        *self.refreshes.lock().unwrap()
    }
}

#[async_trait]
impl DaySource for ScriptedSource {
    async fn fetch(&self, resource: &ResourceDescriptor, day: NaiveDate) -> Result<Value> {
        self.fetches.lock().unwrap().push((day, resource.name));

        if resource.name == ResourceDescriptor::STEPS.name {
            let mut failures = self.failures.lock().unwrap();
            if failures.front().is_some_and(|(d, _)| *d == day) {
                if let Some((_, error)) = failures.pop_front() {
                    return Err(error);
                }
            }
            let steps = self.steps.get(&day).copied().unwrap_or(1000);
            return Ok(json!({
                "activities-steps": [{"dateTime": day.to_string(), "value": steps.to_string()}]
            }));
        }

        Ok(json!({ "resource": resource.name, "date": day.to_string() }))
    }

    async fn refresh_credentials(&self) -> Result<()> {
        *self.refreshes.lock().unwrap() += 1;
        Ok(())
    }
}
