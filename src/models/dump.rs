// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! One day's worth of collected resources.

use chrono::NaiveDate;
use serde_json::Value;

/// Resources collected for a single day, in collection order.
#[derive(Debug, Clone, PartialEq)]
pub struct DayDump {
    pub day: NaiveDate,
    pub resources: Vec<(String, Value)>,
}

impl DayDump {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            resources: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, payload: Value) {
        self.resources.push((name.into(), payload));
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.resources
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, payload)| payload)
    }
}
