// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Local filesystem storage.
//!
//! Layout: `{dump_dir}/{year}/{YYYY-MM-DD}/{resource}.json`. A day directory
//! only appears once every resource file is in it: `write_day` fills a
//! hidden staging directory and renames it into place.

use super::{DumpSink, TokenStore};
use crate::error::{AppError, Result};
use crate::models::{DayDump, TokenPair};
use crate::time_utils::day_key;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// JSON files on local disk.
#[derive(Debug, Clone)]
pub struct LocalStore {
    dump_dir: PathBuf,
    token_file: PathBuf,
}

impl LocalStore {
    pub fn new(dump_dir: impl Into<PathBuf>, token_file: impl Into<PathBuf>) -> Self {
        Self {
            dump_dir: dump_dir.into(),
            token_file: token_file.into(),
        }
    }

    fn year_dir(&self, day: NaiveDate) -> PathBuf {
        self.dump_dir.join(day.year().to_string())
    }

    /// Directory holding the dump for `day`.
    pub fn day_dir(&self, day: NaiveDate) -> PathBuf {
        self.year_dir(day).join(day_key(day))
    }

    fn staging_dir(&self, day: NaiveDate, suffix: &str) -> PathBuf {
        self.year_dir(day)
            .join(format!(".{}.{}", day_key(day), suffix))
    }
}

fn storage_err(context: &str, path: &Path, err: impl std::fmt::Display) -> AppError {
    AppError::Storage(format!("{} {}: {}", context, path.display(), err))
}

async fn write_json(path: &Path, payload: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(payload)
        .map_err(|e| storage_err("Failed to serialize", path, e))?;
    tokio::fs::write(path, text)
        .await
        .map_err(|e| storage_err("Failed to write", path, e))
}

async fn remove_dir_if_present(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(storage_err("Failed to remove", path, e)),
    }
}

#[async_trait]
impl DumpSink for LocalStore {
    async fn exists(&self, day: NaiveDate) -> Result<bool> {
        let dir = self.day_dir(day);
        match tokio::fs::metadata(&dir).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(storage_err("Failed to stat", &dir, e)),
        }
    }

    async fn write(&self, day: NaiveDate, resource_name: &str, payload: &Value) -> Result<()> {
        let dir = self.day_dir(day);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| storage_err("Failed to create", &dir, e))?;
        write_json(&dir.join(format!("{}.json", resource_name)), payload).await
    }

    async fn write_day(&self, dump: &DayDump) -> Result<()> {
        let staging = self.staging_dir(dump.day, "partial");
        let previous = self.staging_dir(dump.day, "old");
        let target = self.day_dir(dump.day);

        // Leftovers from an interrupted run.
        remove_dir_if_present(&staging).await?;
        remove_dir_if_present(&previous).await?;

        tokio::fs::create_dir_all(&staging)
            .await
            .map_err(|e| storage_err("Failed to create", &staging, e))?;
        for (name, payload) in &dump.resources {
            write_json(&staging.join(format!("{}.json", name)), payload).await?;
        }

        let replacing = self.exists(dump.day).await?;
        if replacing {
            tokio::fs::rename(&target, &previous)
                .await
                .map_err(|e| storage_err("Failed to move aside", &target, e))?;
        }
        tokio::fs::rename(&staging, &target)
            .await
            .map_err(|e| storage_err("Failed to commit", &target, e))?;
        if replacing {
            remove_dir_if_present(&previous).await?;
        }

        tracing::debug!(
            day = %dump.day,
            path = %target.display(),
            resources = dump.resources.len(),
            "Day dump committed"
        );
        Ok(())
    }
}

#[async_trait]
impl TokenStore for LocalStore {
    async fn save_token(&self, tokens: &TokenPair) -> Result<()> {
        let path = &self.token_file;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_err("Failed to create", parent, e))?;
        }

        let text = serde_json::to_string_pretty(tokens)
            .map_err(|e| storage_err("Failed to serialize tokens for", path, e))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token".to_string());
        let tmp = path.with_file_name(format!(".{}.tmp", file_name));

        tokio::fs::write(&tmp, text)
            .await
            .map_err(|e| storage_err("Failed to write", &tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| storage_err("Failed to replace", path, e))?;

        tracing::debug!(path = %path.display(), "Token pair saved");
        Ok(())
    }

    async fn load_token(&self) -> Result<Option<TokenPair>> {
        let path = &self.token_file;
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_err("Failed to read", path, e)),
        };

        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| storage_err("Corrupt token file", path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(dir: &tempfile::TempDir) -> LocalStore {
        LocalStore::new(dir.path().join("dumps"), dir.path().join("auth/token.json"))
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 12, 31).unwrap()
    }

    #[tokio::test]
    async fn test_write_day_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert!(!store.exists(day()).await.unwrap());

        let mut dump = DayDump::new(day());
        dump.push("steps", json!({"activities-steps": []}));
        dump.push("sleep", json!({"sleep": []}));
        store.write_day(&dump).await.unwrap();

        assert!(store.exists(day()).await.unwrap());
        let steps_path = dir.path().join("dumps/2023/2023-12-31/steps.json");
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(steps_path).unwrap()).unwrap();
        assert_eq!(written, json!({"activities-steps": []}));
        assert!(!dir.path().join("dumps/2023/.2023-12-31.partial").exists());
    }

    #[tokio::test]
    async fn test_write_day_replaces_existing_dump() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        let mut first = DayDump::new(day());
        first.push("steps", json!({"v": 1}));
        first.push("floors", json!({"v": 1}));
        store.write_day(&first).await.unwrap();

        let mut second = DayDump::new(day());
        second.push("steps", json!({"v": 2}));
        store.write_day(&second).await.unwrap();

        let day_dir = store.day_dir(day());
        let steps: Value =
            serde_json::from_str(&std::fs::read_to_string(day_dir.join("steps.json")).unwrap())
                .unwrap();
        assert_eq!(steps, json!({"v": 2}));
        assert!(!day_dir.join("floors.json").exists());
        assert!(!dir.path().join("dumps/2023/.2023-12-31.old").exists());
    }

    #[tokio::test]
    async fn test_single_resource_write() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        store
            .write(day(), "water", &json!({"water": [{"amount": 250}]}))
            .await
            .unwrap();

        let path = dir.path().join("dumps/2023/2023-12-31/water.json");
        let written: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written, json!({"water": [{"amount": 250}]}));
    }

    #[tokio::test]
    async fn test_token_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);

        assert_eq!(store.load_token().await.unwrap(), None);

        let tokens = TokenPair {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: chrono::DateTime::from_timestamp(1_700_000_000, 0),
            user_id: Some("ABC".to_string()),
            scope: None,
        };
        store.save_token(&tokens).await.unwrap();

        assert_eq!(store.load_token().await.unwrap(), Some(tokens));
    }

    #[tokio::test]
    async fn test_corrupt_token_file_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        std::fs::create_dir_all(dir.path().join("auth")).unwrap();
        std::fs::write(dir.path().join("auth/token.json"), "not json").unwrap();

        assert!(matches!(
            store.load_token().await,
            Err(AppError::Storage(_))
        ));
    }
}
