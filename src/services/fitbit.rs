// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Fitbit API client.
//!
//! A thin layer over [`TokenAuthority`]: builds resource URLs from
//! [`ResourceDescriptor`]s, adds the locale header and decodes JSON bodies.

use crate::error::{AppError, Result};
use crate::models::ResourceDescriptor;
use crate::services::harvest::DaySource;
use crate::services::oauth::TokenAuthority;
use crate::services::transport::HttpRequest;
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Method;
use serde_json::Value;
use std::sync::Arc;

/// Fitbit API host.
pub const API_BASE: &str = "https://api.fitbit.com";

/// Fitbit API client.
#[derive(Clone)]
pub struct FitbitClient {
    auth: Arc<TokenAuthority>,
    base_url: String,
    /// `Accept-Language`: selects US or metric units
    locale: String,
}

impl FitbitClient {
    pub fn new(auth: Arc<TokenAuthority>) -> Self {
        Self {
            auth,
            base_url: API_BASE.to_string(),
            locale: "en_US".to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = locale.into();
        self
    }

    pub fn authority(&self) -> &Arc<TokenAuthority> {
        &self.auth
    }

    /// Fetch one resource for one day.
    pub async fn fetch(&self, resource: &ResourceDescriptor, day: NaiveDate) -> Result<Value> {
        let url = resource.day_url(&self.base_url, day);
        self.make_request(Method::GET, &url).await
    }

    /// Profile of the authorized user (`{"user": {...}}`).
    pub async fn user_profile(&self) -> Result<Value> {
        let url = format!("{}/1/user/-/profile.json", self.base_url);
        self.make_request(Method::GET, &url).await
    }

    /// Delete a single log entry of a deletable resource.
    pub async fn delete_log(&self, resource: &ResourceDescriptor, log_id: u64) -> Result<()> {
        if !resource.deletable {
            return Err(AppError::BadRequest(format!(
                "{} entries cannot be deleted",
                resource.name
            )));
        }
        let url = resource.delete_url(&self.base_url, log_id);
        self.make_request(Method::DELETE, &url).await?;
        Ok(())
    }

    /// Authenticated request with JSON response.
    ///
    /// 202 Accepted carries no body and yields `Value::Null`; deletes must
    /// come back as 204.
    async fn make_request(&self, method: Method, url: &str) -> Result<Value> {
        let request =
            HttpRequest::new(method.clone(), url).header("Accept-Language", self.locale.as_str());
        let response = self.auth.send(request).await?;

        if response.status == 202 {
            return Ok(Value::Null);
        }
        if method == Method::DELETE {
            return match response.status {
                204 => Ok(Value::Null),
                status => Err(AppError::DeleteFailed(status)),
            };
        }

        response
            .json()
            .map_err(|e| AppError::MalformedResponse(format!("{}: {}", url, e)))
    }
}

#[async_trait]
impl DaySource for FitbitClient {
    async fn fetch(&self, resource: &ResourceDescriptor, day: NaiveDate) -> Result<Value> {
        FitbitClient::fetch(self, resource, day).await
    }

    async fn refresh_credentials(&self) -> Result<()> {
        self.auth.refresh().await.map(|_| ())
    }
}
