//! SMS notification sink.
//!
//! [`TextLkClient`] delivers through the text.lk v3 API. [`RateLimitedSink`]
//! wraps any sink with a fixed daily quota for the configured sender.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::NotificationError;

/// Contract for anything that can deliver a text message.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotificationError>;
}

/// Client for the text.lk SMS API.
#[derive(Debug, Clone)]
pub struct TextLkClient {
    client: reqwest::Client,
    api_url: String,
    api_token: String,
    sender_id: String,
}

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    recipient: &'a str,
    message: &'a str,
    sender_id: &'a str,
}

impl TextLkClient {
    pub fn new(api_url: &str, api_token: &str, sender_id: &str, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            api_url: api_url.to_string(),
            api_token: api_token.to_string(),
            sender_id: sender_id.to_string(),
        }
    }
}

#[async_trait]
impl NotificationSink for TextLkClient {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .json(&SendRequest {
                recipient: phone,
                message,
                sender_id: &self.sender_id,
            })
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(NotificationError::Rejected(response.status()));
        }
        Ok(())
    }
}

/// Sends used so far on one calendar day.
#[derive(Debug)]
struct QuotaWindow {
    day: NaiveDate,
    used: u32,
}

/// Enforces a per-day send quota in front of another sink.
///
/// Once the quota is used up, `send` fails with `QuotaExceeded` and the inner
/// sink is not called. The count resets when the UTC date changes. A send
/// that the inner sink rejects still uses up one slot.
pub struct RateLimitedSink<S> {
    inner: S,
    daily_quota: u32,
    window: Mutex<QuotaWindow>,
}

impl<S: NotificationSink> RateLimitedSink<S> {
    pub fn new(inner: S, daily_quota: u32) -> Self {
        Self {
            inner,
            daily_quota,
            window: Mutex::new(QuotaWindow {
                day: NaiveDate::MIN,
                used: 0,
            }),
        }
    }

    /// Reserve one send on `day`. Returns `false` if the quota is exhausted.
    fn try_acquire(&self, day: NaiveDate) -> bool {
        let mut window = self
            .window
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if window.day != day {
            window.day = day;
            window.used = 0;
        }
        if window.used >= self.daily_quota {
            return false;
        }
        window.used += 1;
        true
    }
}

#[async_trait]
impl<S: NotificationSink> NotificationSink for RateLimitedSink<S> {
    async fn send(&self, phone: &str, message: &str) -> Result<(), NotificationError> {
        if !self.try_acquire(Utc::now().date_naive()) {
            return Err(NotificationError::QuotaExceeded(self.daily_quota));
        }
        self.inner.send(phone, message).await
    }
}
