// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! A `.env` file in the working directory is honoured for local runs.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Where finished day dumps (and the token pair) are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpBackend {
    /// JSON files under `dump_dir`, token pair in `token_file`.
    Local,
    /// Firestore collections in `gcp_project_id`.
    Firestore,
}

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// Fitbit OAuth client ID
    pub fitbit_client_id: String,
    /// Fitbit OAuth client secret
    pub fitbit_client_secret: String,
    /// Redirect URI registered with the Fitbit application
    pub redirect_uri: String,
    /// Port the local authorization callback server binds to
    pub callback_port: u16,
    /// Token pair file (local backend)
    pub token_file: PathBuf,
    /// Root of the per-day dump tree (local backend)
    pub dump_dir: PathBuf,
    pub dump_backend: DumpBackend,
    /// GCP project ID (Firestore backend)
    pub gcp_project_id: String,
    /// `Accept-Language` sent with resource requests (`en_US` or `en_UK`)
    pub locale: String,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Initial pause between successfully collected days, in seconds
    pub pace_seconds: u64,
    /// Emit JSON log lines instead of human-readable ones
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let dump_backend = match env::var("DUMP_BACKEND")
            .unwrap_or_else(|_| "local".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "local" => DumpBackend::Local,
            "firestore" => DumpBackend::Firestore,
            other => {
                return Err(ConfigError::Invalid {
                    name: "DUMP_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let locale = env::var("FITBIT_LOCALE").unwrap_or_else(|_| "en_US".to_string());
        if locale != "en_US" && locale != "en_UK" {
            return Err(ConfigError::Invalid {
                name: "FITBIT_LOCALE",
                value: locale,
            });
        }

        Ok(Self {
            fitbit_client_id: env::var("FITBIT_CLIENT_ID")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_ID"))?,
            fitbit_client_secret: env::var("FITBIT_CLIENT_SECRET")
                .map(|v| v.trim().to_string())
                .map_err(|_| ConfigError::Missing("FITBIT_CLIENT_SECRET"))?,
            redirect_uri: env::var("FITBIT_REDIRECT_URI")
                .unwrap_or_else(|_| "http://127.0.0.1:8080/".to_string()),
            callback_port: parse_or("CALLBACK_PORT", 8080)?,
            token_file: env::var("FITBIT_TOKEN_FILE")
                .unwrap_or_else(|_| "fitbit-token.json".to_string())
                .into(),
            dump_dir: env::var("DUMP_DIR")
                .unwrap_or_else(|_| "fitbit-dumps".to_string())
                .into(),
            dump_backend,
            gcp_project_id: env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "local-dev".to_string()),
            locale,
            request_timeout: Duration::from_secs(parse_or("FITBIT_REQUEST_TIMEOUT_SECS", 10)?),
            pace_seconds: parse_or("HARVEST_PACE_SECS", 60)?,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

fn parse_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}
