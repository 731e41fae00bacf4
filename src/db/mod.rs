//! Persistence layer: token pair storage and per-day dump sinks.
//!
//! Two backends: JSON files on the local disk ([`LocalStore`]) and
//! Firestore ([`FirestoreDb`]).

pub mod firestore;
pub mod local;

pub use firestore::FirestoreDb;
pub use local::LocalStore;

use crate::error::Result;
use crate::models::{DayDump, TokenPair};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;

/// Collection names as constants.
pub mod collections {
    /// Complete day dumps, keyed by `YYYY-MM-DD`
    pub const DAYS: &str = "fitbit_days";
    /// Individually written resources, keyed by `YYYY-MM-DD_{resource}`
    pub const RESOURCES: &str = "fitbit_resources";
    /// Token pair (single document)
    pub const TOKENS: &str = "fitbit_tokens";
}

/// Durable home for the rotating token pair.
///
/// `save_token` is the persistence hook the token authority calls after
/// every successful exchange or refresh.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn save_token(&self, tokens: &TokenPair) -> Result<()>;

    async fn load_token(&self) -> Result<Option<TokenPair>>;
}

/// Destination for collected days.
#[async_trait]
pub trait DumpSink: Send + Sync {
    /// Whether a complete dump for `day` already exists.
    async fn exists(&self, day: NaiveDate) -> Result<bool>;

    /// Store a single resource payload for `day`.
    async fn write(&self, day: NaiveDate, resource_name: &str, payload: &Value) -> Result<()>;

    /// Store a whole day. Backends override this to make the day appear
    /// all at once; the default writes resource by resource.
    async fn write_day(&self, dump: &DayDump) -> Result<()> {
        for (name, payload) in &dump.resources {
            self.write(dump.day, name, payload).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ResourceLog {
        writes: Mutex<Vec<(NaiveDate, String)>>,
    }

    #[async_trait]
    impl DumpSink for ResourceLog {
        async fn exists(&self, _day: NaiveDate) -> Result<bool> {
            Ok(false)
        }

        async fn write(&self, day: NaiveDate, resource_name: &str, _payload: &Value) -> Result<()> {
            self.writes
                .lock()
                .unwrap()
                .push((day, resource_name.to_string()));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_write_day_writes_each_resource() {
        let day = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let mut dump = DayDump::new(day);
        dump.push("steps", json!({}));
        dump.push("heart", json!({}));

        let sink = ResourceLog::default();
        sink.write_day(&dump).await.unwrap();

        assert_eq!(
            *sink.writes.lock().unwrap(),
            vec![(day, "steps".to_string()), (day, "heart".to_string())]
        );
    }
}
