// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Fitbit-Harvest: archive a Fitbit account day by day
//!
//! This crate holds the OAuth2 token authority for the Fitbit Web API and
//! the harvest loop that walks backwards through an account's history,
//! committing one complete day at a time.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;
