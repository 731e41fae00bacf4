// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Table of Fitbit resources collected per day.
//!
//! Every resource is described by data rather than by its own method; the
//! client builds URLs from the descriptor.

use crate::time_utils::day_key;
use chrono::NaiveDate;
use serde_json::Value;

/// How a resource's per-day URL is shaped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// `.../{path}/date/{day}/1d/{detail_level}.json`
    Intraday { detail_level: &'static str },
    /// `.../{path}/date/{day}.json`
    DailyLog,
}

/// A single Fitbit resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    /// Name used for the dump file / document field
    pub name: &'static str,
    /// Path below `/user/-/`
    pub path: &'static str,
    pub kind: ResourceKind,
    pub api_version: &'static str,
    /// Whether individual log entries can be deleted
    pub deletable: bool,
}

impl ResourceDescriptor {
    pub const STEPS: Self = Self::intraday("steps", "activities/steps");
    pub const CALORIES: Self = Self::intraday("calories", "activities/calories");
    pub const DISTANCE: Self = Self::intraday("distance", "activities/distance");
    pub const FLOORS: Self = Self::intraday("floors", "activities/floors");
    pub const HEART: Self = Self::intraday("heart", "activities/heart");
    pub const SLEEP: Self = Self {
        name: "sleep",
        path: "sleep",
        kind: ResourceKind::DailyLog,
        api_version: "1.2",
        deletable: true,
    };
    pub const WEIGHT: Self = Self {
        name: "weight",
        path: "body/log/weight",
        kind: ResourceKind::DailyLog,
        api_version: "1",
        deletable: false,
    };
    pub const FOOD: Self = Self {
        name: "food",
        path: "foods/log",
        kind: ResourceKind::DailyLog,
        api_version: "1",
        deletable: true,
    };
    pub const WATER: Self = Self {
        name: "water",
        path: "foods/log/water",
        kind: ResourceKind::DailyLog,
        api_version: "1",
        deletable: true,
    };

    /// Every resource making up a day, steps first.
    pub const ALL: [Self; 9] = [
        Self::STEPS,
        Self::CALORIES,
        Self::DISTANCE,
        Self::FLOORS,
        Self::HEART,
        Self::SLEEP,
        Self::WEIGHT,
        Self::FOOD,
        Self::WATER,
    ];

    const fn intraday(name: &'static str, path: &'static str) -> Self {
        Self {
            name,
            path,
            kind: ResourceKind::Intraday {
                detail_level: "1min",
            },
            api_version: "1",
            deletable: false,
        }
    }

    /// URL fetching this resource for `day`.
    pub fn day_url(&self, base_url: &str, day: NaiveDate) -> String {
        let date = day_key(day);
        match self.kind {
            ResourceKind::Intraday { detail_level } => format!(
                "{}/{}/user/-/{}/date/{}/1d/{}.json",
                base_url, self.api_version, self.path, date, detail_level
            ),
            ResourceKind::DailyLog => format!(
                "{}/{}/user/-/{}/date/{}.json",
                base_url, self.api_version, self.path, date
            ),
        }
    }

    /// URL deleting a single log entry.
    pub fn delete_url(&self, base_url: &str, log_id: u64) -> String {
        format!(
            "{}/{}/user/-/{}/{}.json",
            base_url, self.api_version, self.path, log_id
        )
    }
}

/// Total step count of a steps payload.
///
/// Sums the intraday dataset; falls back to the daily summary value,
/// which Fitbit reports as a string.
pub fn step_total(payload: &Value) -> Option<u64> {
    if let Some(dataset) = payload
        .get("activities-steps-intraday")
        .and_then(|intraday| intraday.get("dataset"))
        .and_then(Value::as_array)
    {
        return Some(
            dataset
                .iter()
                .filter_map(|point| point.get("value").and_then(Value::as_u64))
                .sum(),
        );
    }

    let summary = payload
        .get("activities-steps")
        .and_then(Value::as_array)
        .and_then(|days| days.first())
        .and_then(|day| day.get("value"))?;

    match summary {
        Value::String(s) => s.parse().ok(),
        other => other.as_u64(),
    }
}
