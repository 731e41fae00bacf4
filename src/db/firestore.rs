// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Firestore client wrapper with typed operations.
//!
//! Provides high-level operations for:
//! - Day dumps (one document per day, so a day lands in a single write)
//! - Individually written resources
//! - The OAuth token pair

use crate::db::{collections, DumpSink, TokenStore};
use crate::error::AppError;
use crate::models::{DayDump, TokenPair};
use crate::time_utils::{day_key, format_utc_rfc3339};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Document ID of the token pair; one Fitbit account per deployment.
const TOKEN_DOCUMENT_ID: &str = "default";

/// A complete day stored in Firestore.
///
/// Payloads are kept as JSON text; Fitbit responses nest arrays of
/// objects that do not map cleanly onto Firestore values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayDocument {
    /// `YYYY-MM-DD`, also the document ID
    pub date: String,
    /// Resource name -> JSON payload
    pub resources: BTreeMap<String, String>,
    /// When the day was written (RFC3339)
    pub collected_at: String,
}

/// A single resource written outside a full day commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDocument {
    pub date: String,
    pub resource: String,
    pub payload: String,
    pub collected_at: String,
}

/// Firestore database client.
#[derive(Clone)]
pub struct FirestoreDb {
    client: Option<firestore::FirestoreDb>,
}

impl FirestoreDb {
    /// Create a new Firestore client.
    ///
    /// For local development with emulator, set FIRESTORE_EMULATOR_HOST.
    pub async fn new(project_id: &str) -> Result<Self, AppError> {
        if std::env::var("FIRESTORE_EMULATOR_HOST").is_ok() {
            return Self::create_emulator_client(project_id).await;
        }

        let client = firestore::FirestoreDb::new(project_id)
            .await
            .map_err(|e| AppError::Storage(format!("Failed to connect to Firestore: {}", e)))?;

        tracing::info!(project = project_id, "Connected to Firestore");

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a Firestore client for the emulator with unauthenticated access.
    async fn create_emulator_client(project_id: &str) -> Result<Self, AppError> {
        tracing::info!("Using unauthenticated connection for Firestore Emulator");

        let token_source = gcloud_sdk::ExternalJwtFunctionSource::new(|| async {
            Ok(gcloud_sdk::Token {
                token_type: "Bearer".to_string(),
                token: gcloud_sdk::SecretValue::new(
                    "eyJhbGciOiJub25lIn0.eyJ1aWQiOiJ0ZXN0In0."
                        .to_string()
                        .into(),
                ),
                expiry: chrono::Utc::now() + chrono::Duration::hours(1),
            })
        });

        let options = firestore::FirestoreDbOptions::new(project_id.to_string());

        let client = firestore::FirestoreDb::with_options_token_source(
            options,
            gcloud_sdk::GCP_DEFAULT_SCOPES.clone(),
            gcloud_sdk::TokenSourceType::ExternalSource(Box::new(token_source)),
        )
        .await
        .map_err(|e| {
            AppError::Storage(format!("Failed to connect to Firestore Emulator: {}", e))
        })?;

        tracing::info!(
            project = project_id,
            "Connected to Firestore (Emulator/Unauthenticated)"
        );

        Ok(Self {
            client: Some(client),
        })
    }

    /// Create a mock Firestore client for testing (offline mode).
    ///
    /// All database operations will return an error if called.
    pub fn new_mock() -> Self {
        Self { client: None }
    }

    /// Helper to get the client or return an error if offline.
    fn get_client(&self) -> Result<&firestore::FirestoreDb, AppError> {
        self.client
            .as_ref()
            .ok_or_else(|| AppError::Storage("Database not connected (offline mode)".to_string()))
    }

    // ─── Day Operations ──────────────────────────────────────────

    /// Get the stored dump for a day.
    pub async fn get_day(&self, day: NaiveDate) -> Result<Option<DayDocument>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::DAYS)
            .obj()
            .one(&day_key(day))
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }

    /// Create or replace a day dump.
    pub async fn set_day(&self, document: &DayDocument) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::DAYS)
            .document_id(&document.date)
            .object(document)
            .execute()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }
}

fn to_json_text(payload: &Value) -> Result<String, AppError> {
    serde_json::to_string(payload)
        .map_err(|e| AppError::Storage(format!("Failed to serialize payload: {}", e)))
}

impl DayDocument {
    /// Build the document for a collected day.
    pub fn from_dump(dump: &DayDump) -> Result<Self, AppError> {
        let resources = dump
            .resources
            .iter()
            .map(|(name, payload)| Ok((name.clone(), to_json_text(payload)?)))
            .collect::<Result<BTreeMap<_, _>, AppError>>()?;

        Ok(Self {
            date: day_key(dump.day),
            resources,
            collected_at: format_utc_rfc3339(Utc::now()),
        })
    }
}

#[async_trait]
impl DumpSink for FirestoreDb {
    async fn exists(&self, day: NaiveDate) -> Result<bool, AppError> {
        Ok(self.get_day(day).await?.is_some())
    }

    async fn write(&self, day: NaiveDate, resource_name: &str, payload: &Value) -> Result<(), AppError> {
        let document = ResourceDocument {
            date: day_key(day),
            resource: resource_name.to_string(),
            payload: to_json_text(payload)?,
            collected_at: format_utc_rfc3339(Utc::now()),
        };

        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::RESOURCES)
            .document_id(format!("{}_{}", document.date, resource_name))
            .object(&document)
            .execute()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn write_day(&self, dump: &DayDump) -> Result<(), AppError> {
        let document = DayDocument::from_dump(dump)?;
        self.set_day(&document).await?;
        tracing::debug!(day = %document.date, "Day dump committed to Firestore");
        Ok(())
    }
}

#[async_trait]
impl TokenStore for FirestoreDb {
    async fn save_token(&self, tokens: &TokenPair) -> Result<(), AppError> {
        let _: () = self
            .get_client()?
            .fluent()
            .update()
            .in_col(collections::TOKENS)
            .document_id(TOKEN_DOCUMENT_ID)
            .object(tokens)
            .execute()
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn load_token(&self) -> Result<Option<TokenPair>, AppError> {
        self.get_client()?
            .fluent()
            .select()
            .by_id_in(collections::TOKENS)
            .obj()
            .one(TOKEN_DOCUMENT_ID)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))
    }
}
