// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Day-by-day harvest of Fitbit data.
//!
//! Walks backwards from a start day, collecting every resource of a day
//! and committing the day as a unit. The loop survives the provider's
//! hourly quota by pacing itself:
//! - 429: grow the pause between days, wait out `Retry-After`, retry the day
//! - timeouts / 5xx: retry the day up to [`MAX_CONSECUTIVE_FAILURES`] times
//! - anything else (including dead credentials): abort with the day to
//!   resume from
//!
//! The scan stops at the first day that is already dumped, or at a day
//! with zero steps, which is taken as the start of the account's history.

use crate::db::DumpSink;
use crate::error::{AppError, Result};
use crate::models::{step_total, DayDump, ResourceDescriptor};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Consecutive timeouts (or server errors) tolerated for a single day.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Default pause between completed days, in seconds.
pub const DEFAULT_PACE_SECS: u64 = 60;

/// Extra wait on top of `Retry-After`.
const RATE_LIMIT_GRACE_SECS: u64 = 10;

/// Waits longer than this get a token refresh part-way through.
const LONG_WAIT_THRESHOLD_SECS: u64 = 1200;
const LONG_WAIT_REFRESH_AFTER_SECS: u64 = 600;

/// Where the harvester gets a day's resources from.
#[async_trait]
pub trait DaySource: Send + Sync {
    async fn fetch(&self, resource: &ResourceDescriptor, day: NaiveDate) -> Result<Value>;

    /// Force a token refresh.
    async fn refresh_credentials(&self) -> Result<()>;
}

/// Blocking pause between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// [`Sleeper`] backed by the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Pacing and failure bookkeeping of a harvest run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Day currently being collected
    pub day: NaiveDate,
    /// Pause after each completed day
    pub pace_seconds: u64,
    pub consecutive_timeouts: u32,
    pub consecutive_server_errors: u32,
    /// Days completed since the last rate-limit event
    pub successful_days: u32,
}

impl RetryState {
    pub fn new(day: NaiveDate, pace_seconds: u64) -> Self {
        Self {
            day,
            pace_seconds,
            consecutive_timeouts: 0,
            consecutive_server_errors: 0,
            successful_days: 0,
        }
    }

    /// Record a 429 and return how long to wait before retrying the day.
    ///
    /// The pace grows by `1 + retry_after / successful_days`: the fewer
    /// days we managed since the last limit, the harder we slow down.
    pub fn on_rate_limited(&mut self, retry_after_seconds: u64) -> u64 {
        let days = u64::from(self.successful_days.max(1));
        self.pace_seconds = self
            .pace_seconds
            .saturating_add(1 + retry_after_seconds / days);
        self.successful_days = 0;
        retry_after_seconds.saturating_add(RATE_LIMIT_GRACE_SECS)
    }

    /// Record a timeout; false once the retry budget is exhausted.
    pub fn on_timeout(&mut self) -> bool {
        self.consecutive_timeouts += 1;
        self.consecutive_timeouts <= MAX_CONSECUTIVE_FAILURES
    }

    /// Record a server error; false once the retry budget is exhausted.
    pub fn on_server_error(&mut self) -> bool {
        self.consecutive_server_errors += 1;
        self.consecutive_server_errors <= MAX_CONSECUTIVE_FAILURES
    }

    /// Record a completed day and move to the previous one.
    pub fn on_day_complete(&mut self) {
        self.successful_days += 1;
        self.consecutive_timeouts = 0;
        self.consecutive_server_errors = 0;
        if let Some(previous) = self.day.pred_opt() {
            self.day = previous;
        }
    }
}

/// Why the scan stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanEnd {
    /// This day was dumped by an earlier run.
    AlreadyDumped(NaiveDate),
    /// This day had zero steps.
    NoMoreData(NaiveDate),
}

/// Outcome of a completed harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestReport {
    /// Days committed, newest first
    pub days_collected: Vec<NaiveDate>,
    pub end: ScanEnd,
    pub pace_seconds: u64,
}

/// Fatal harvest failure. A rerun starting at `resume_day` picks up where
/// this one stopped.
#[derive(Debug, thiserror::Error)]
#[error("harvest aborted at {resume_day}: {error}")]
pub struct HarvestAbort {
    pub resume_day: NaiveDate,
    #[source]
    pub error: AppError,
}

/// Drives the day-by-day collection.
pub struct HarvestDriver {
    source: Arc<dyn DaySource>,
    sink: Arc<dyn DumpSink>,
    sleeper: Arc<dyn Sleeper>,
    pace_seconds: u64,
    resources: Vec<ResourceDescriptor>,
}

impl HarvestDriver {
    pub fn new(source: Arc<dyn DaySource>, sink: Arc<dyn DumpSink>) -> Self {
        Self {
            source,
            sink,
            sleeper: Arc::new(TokioSleeper),
            pace_seconds: DEFAULT_PACE_SECS,
            resources: ResourceDescriptor::ALL.to_vec(),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Initial pause between completed days.
    pub fn with_pace_seconds(mut self, pace_seconds: u64) -> Self {
        self.pace_seconds = pace_seconds;
        self
    }

    /// Harvest backwards from `start_day`.
    pub async fn run(&self, start_day: NaiveDate) -> std::result::Result<HarvestReport, HarvestAbort> {
        let mut state = RetryState::new(start_day, self.pace_seconds);
        let mut days_collected = Vec::new();

        tracing::info!(start_day = %start_day, pace_seconds = state.pace_seconds, "Harvest starting");

        let end = loop {
            let day = state.day;

            if self.sink.exists(day).await.map_err(|error| HarvestAbort {
                resume_day: day,
                error,
            })? {
                tracing::info!(day = %day, "Day already dumped, stopping scan");
                break ScanEnd::AlreadyDumped(day);
            }

            let dump = self.collect_with_retries(&mut state).await?;
            self.commit(&dump).await?;
            days_collected.push(day);

            let more = has_more_data(&dump);
            state.on_day_complete();

            if !more {
                tracing::info!(day = %day, "No steps recorded, assuming no earlier data");
                break ScanEnd::NoMoreData(day);
            }

            tracing::info!(
                day = %day,
                next_day = %state.day,
                pace_seconds = state.pace_seconds,
                "Day complete, pausing"
            );
            self.sleeper
                .sleep(Duration::from_secs(state.pace_seconds))
                .await;
        };

        // The last targeted day may have been dumped before it was over.
        if let ScanEnd::NoMoreData(day) = end {
            tracing::info!(day = %day, "Re-collecting last targeted day");
            state.day = day;
            let dump = self.collect_with_retries(&mut state).await?;
            self.commit(&dump).await?;
        }

        tracing::info!(
            days = days_collected.len(),
            pace_seconds = state.pace_seconds,
            "Harvest finished"
        );

        Ok(HarvestReport {
            days_collected,
            end,
            pace_seconds: state.pace_seconds,
        })
    }

    async fn commit(&self, dump: &DayDump) -> std::result::Result<(), HarvestAbort> {
        self.sink.write_day(dump).await.map_err(|error| {
            tracing::error!(day = %dump.day, error = %error, "Failed to persist day");
            HarvestAbort {
                resume_day: dump.day,
                error,
            }
        })
    }

    /// Collect `state.day`, retrying on rate limits, timeouts and server
    /// errors as the retry budget allows.
    async fn collect_with_retries(
        &self,
        state: &mut RetryState,
    ) -> std::result::Result<DayDump, HarvestAbort> {
        loop {
            let day = state.day;
            tracing::info!(day = %day, "Collecting day");

            let error = match self.collect_day(day).await {
                Ok(dump) => return Ok(dump),
                Err(error) => error,
            };

            match error {
                AppError::RateLimited {
                    retry_after_seconds,
                } => {
                    let wait = state.on_rate_limited(retry_after_seconds);
                    let resume_at = i64::try_from(wait)
                        .ok()
                        .and_then(chrono::TimeDelta::try_seconds)
                        .and_then(|delta| chrono::Local::now().checked_add_signed(delta))
                        .map(|at| at.format("%H:%M:%S").to_string())
                        .unwrap_or_else(|| "never".to_string());
                    tracing::warn!(
                        day = %day,
                        retry_after_seconds,
                        resume_at = %resume_at,
                        pace_seconds = state.pace_seconds,
                        "Too many requests, backing off"
                    );
                    self.wait_out_rate_limit(retry_after_seconds, wait, day)
                        .await?;
                }
                error @ (AppError::TransportTimeout | AppError::Transport(_)) => {
                    if !state.on_timeout() {
                        tracing::error!(
                            day = %day,
                            attempts = state.consecutive_timeouts,
                            "Too many consecutive timeouts, aborting"
                        );
                        return Err(HarvestAbort {
                            resume_day: day,
                            error,
                        });
                    }
                    tracing::warn!(
                        day = %day,
                        error = %error,
                        attempt = state.consecutive_timeouts,
                        pace_seconds = state.pace_seconds,
                        "Request failed in transport, retrying day"
                    );
                    self.sleeper
                        .sleep(Duration::from_secs(state.pace_seconds))
                        .await;
                }
                error @ AppError::ServerError { .. } => {
                    if !state.on_server_error() {
                        tracing::error!(
                            day = %day,
                            attempts = state.consecutive_server_errors,
                            "Too many consecutive server errors, aborting"
                        );
                        return Err(HarvestAbort {
                            resume_day: day,
                            error,
                        });
                    }
                    tracing::warn!(
                        day = %day,
                        error = %error,
                        attempt = state.consecutive_server_errors,
                        pace_seconds = state.pace_seconds,
                        "Fitbit server error, retrying day"
                    );
                    self.sleeper
                        .sleep(Duration::from_secs(state.pace_seconds))
                        .await;
                }
                error => {
                    if error.requires_reauthorization() {
                        tracing::error!(
                            resume_day = %day,
                            error = %error,
                            "Credentials no longer valid, re-authorize and rerun from this day"
                        );
                    } else {
                        tracing::error!(day = %day, error = %error, "Harvest aborted");
                    }
                    return Err(HarvestAbort {
                        resume_day: day,
                        error,
                    });
                }
            }
        }
    }

    /// Sleep `wait` seconds. Waits for long quota resets refresh the
    /// tokens part-way so the pair is fresh when requests resume.
    async fn wait_out_rate_limit(
        &self,
        retry_after_seconds: u64,
        wait: u64,
        day: NaiveDate,
    ) -> std::result::Result<(), HarvestAbort> {
        if retry_after_seconds <= LONG_WAIT_THRESHOLD_SECS {
            self.sleeper.sleep(Duration::from_secs(wait)).await;
            return Ok(());
        }

        self.sleeper
            .sleep(Duration::from_secs(LONG_WAIT_REFRESH_AFTER_SECS))
            .await;

        tracing::info!("Refreshing client tokens during rate-limit wait");
        match self.source.refresh_credentials().await {
            Ok(()) => {}
            Err(error) if error.requires_reauthorization() => {
                tracing::error!(resume_day = %day, error = %error, "Refresh rejected during wait");
                return Err(HarvestAbort {
                    resume_day: day,
                    error,
                });
            }
            Err(error) => {
                tracing::warn!(error = %error, "Refresh during wait failed, continuing");
            }
        }

        self.sleeper
            .sleep(Duration::from_secs(wait - LONG_WAIT_REFRESH_AFTER_SECS))
            .await;
        Ok(())
    }

    /// Fetch every resource of `day`; the first failure aborts the day.
    async fn collect_day(&self, day: NaiveDate) -> Result<DayDump> {
        let mut dump = DayDump::new(day);
        for resource in &self.resources {
            tracing::debug!(day = %day, resource = resource.name, "Fetching resource");
            let payload = self.source.fetch(resource, day).await?;
            dump.push(resource.name, payload);
        }
        Ok(dump)
    }
}

/// False when the day's step total is zero.
fn has_more_data(dump: &DayDump) -> bool {
    match dump.get(ResourceDescriptor::STEPS.name).map(step_total) {
        Some(Some(0)) => false,
        Some(Some(_)) => true,
        Some(None) => {
            tracing::warn!(day = %dump.day, "Unrecognised steps payload, continuing scan");
            true
        }
        None => true,
    }
}
