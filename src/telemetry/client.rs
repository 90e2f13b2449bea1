//! HTTP client for the remote telemetry provider (ThingSpeak channel API).

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::header::{CACHE_CONTROL, PRAGMA};
use tracing::{debug, info, warn};

use super::normalize::{select_feed, FeedResponse};
use crate::config::ThingSpeakConfig;
use crate::error::TelemetryError;
use crate::models::{DataSource, NewReading};

// ---

/// Timeout of one live-read attempt.
pub const LIVE_TIMEOUT: Duration = Duration::from_secs(2);
/// Timeout of a historical bulk read.
pub const HISTORY_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout of a field write.
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(1500);
/// Upper bound on entries requested by a historical read.
pub const HISTORY_MAX_RESULTS: u32 = 8000;

/// Field carrying the pump flag on the channel.
pub const PUMP_FIELD: &str = "field3";
/// Field carrying the heater flag on the channel.
pub const HEATER_FIELD: &str = "field4";

/// Retry schedule for live reads: `attempts` tries, sleeping
/// `attempt * backoff_step` after each failed one.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff_step: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Pause after the failed `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

/// Outcome of a live read that never fails the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Latest {
    /// A sample the provider actually returned.
    Fresh(NewReading),
    /// Substituted after retries were exhausted or the feed was empty.
    Default(NewReading),
}

impl Latest {
    pub fn reading(&self) -> &NewReading {
        match self {
            Latest::Fresh(r) | Latest::Default(r) => r,
        }
    }

    pub fn is_default(&self) -> bool {
        matches!(self, Latest::Default(_))
    }
}

/// Well-defined stand-in used when no live sample can be obtained.
pub fn default_reading() -> NewReading {
    NewReading {
        temperature: 25.0,
        level: 75.0,
        pump_status: false,
        heater_status: false,
        timestamp: Some(Utc::now()),
        source: DataSource::Remote,
    }
}

#[derive(Debug, Clone)]
pub struct ThingSpeakClient {
    http: reqwest::Client,
    config: ThingSpeakConfig,
    retry: RetryPolicy,
}

impl ThingSpeakClient {
    pub fn new(http: reqwest::Client, config: ThingSpeakConfig) -> Self {
        Self {
            http,
            config,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn feeds_url(&self) -> String {
        format!(
            "{}/channels/{}/feeds.json",
            self.config.base_url, self.config.channel_id
        )
    }

    /// Cache-busting query parameter, mirrors what browsers get from the provider.
    fn nonce() -> String {
        Utc::now().timestamp_millis().to_string()
    }

    /// One read of the most recent entries, bounded by `timeout`.
    async fn fetch_feeds(
        &self,
        params: &[(&str, String)],
        timeout: Duration,
    ) -> Result<FeedResponse, TelemetryError> {
        // ---
        let mut query: Vec<(&str, String)> =
            vec![("api_key", self.config.read_api_key.clone())];
        query.extend(params.iter().cloned());
        query.push(("t", Self::nonce()));

        let request = self
            .http
            .get(self.feeds_url())
            .query(&query)
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .timeout(timeout)
            .send();

        let response = request.await.map_err(|e| {
            if e.is_timeout() {
                TelemetryError::Timeout(timeout)
            } else {
                TelemetryError::Http(e)
            }
        })?;

        if !response.status().is_success() {
            return Err(TelemetryError::Status(response.status()));
        }

        let body = response.text().await?;
        debug!(
            "Raw provider response: {}",
            body.chars().take(200).collect::<String>()
        );
        serde_json::from_str::<FeedResponse>(&body).map_err(|e| TelemetryError::Payload(e.to_string()))
    }

    /// Most recent confirmed sample, without retries or substitution.
    ///
    /// `Ok(None)` means the provider answered with an empty feed.
    pub async fn fetch_latest_confirmed(&self) -> Result<Option<NewReading>, TelemetryError> {
        // ---
        let results = self.config.latest_results.to_string();
        let feeds = self
            .fetch_feeds(&[("results", results)], LIVE_TIMEOUT)
            .await?
            .feeds;
        Ok(select_feed(&feeds).map(|f| f.to_reading(DataSource::Remote)))
    }

    /// Most recent sample, retried with linear backoff. Never fails: after the
    /// last attempt, or when the feed is empty, returns [`Latest::Default`].
    pub async fn fetch_latest(&self) -> Latest {
        // ---
        let attempts = self.retry.attempts.max(1);
        for attempt in 1..=attempts {
            debug!("Fetching latest sample (attempt {}/{})", attempt, attempts);
            match self.fetch_latest_confirmed().await {
                Ok(Some(reading)) => {
                    debug!(?reading, "Fetched latest sample");
                    return Latest::Fresh(reading);
                }
                Ok(None) => {
                    warn!("Provider returned no entries; using default reading");
                    return Latest::Default(default_reading());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Live read failed");
                    if attempt < attempts {
                        tokio::time::sleep(self.retry.backoff(attempt)).await;
                    }
                }
            }
        }
        warn!("All {} attempts failed; using default reading", attempts);
        Latest::Default(default_reading())
    }

    /// Samples of the last `days` days, oldest first. Any failure or an empty
    /// feed yields an empty vector.
    pub async fn fetch_historical(&self, days: u32) -> Vec<NewReading> {
        // ---
        let end = Utc::now();
        let Some(start) = end.checked_sub_signed(ChronoDuration::days(i64::from(days))) else {
            warn!(days, "History window out of range; returning no data");
            return Vec::new();
        };
        let params = [
            ("start", start.to_rfc3339()),
            ("end", end.to_rfc3339()),
            ("results", HISTORY_MAX_RESULTS.to_string()),
        ];

        info!("Fetching {} days of history from provider", days);
        match self.fetch_feeds(&params, HISTORY_TIMEOUT).await {
            Ok(resp) => {
                let readings: Vec<NewReading> = resp
                    .feeds
                    .iter()
                    .map(|f| f.to_reading(DataSource::Import))
                    .collect();
                info!("Provider returned {} historical entries", readings.len());
                readings
            }
            Err(e) => {
                warn!(error = %e, "Historical read failed; returning no data");
                Vec::new()
            }
        }
    }

    /// Post field/value pairs to the write endpoint. `Ok(false)` when the
    /// provider answers with its failure sentinel `"0"` (e.g. rate limited).
    async fn write(&self, fields: &[(&str, &str)]) -> Result<bool, TelemetryError> {
        // ---
        let mut query: Vec<(&str, String)> =
            vec![("api_key", self.config.write_api_key.clone())];
        query.extend(fields.iter().map(|(k, v)| (*k, v.to_string())));
        query.push(("t", Self::nonce()));

        let response = self
            .http
            .post(format!("{}/update", self.config.base_url))
            .query(&query)
            .header(CACHE_CONTROL, "no-cache, no-store, must-revalidate")
            .header(PRAGMA, "no-cache")
            .timeout(WRITE_TIMEOUT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    TelemetryError::Timeout(WRITE_TIMEOUT)
                } else {
                    TelemetryError::Http(e)
                }
            })?;

        if !response.status().is_success() {
            return Err(TelemetryError::Status(response.status()));
        }
        let body = response.text().await?;
        debug!(?fields, result = %body.trim(), "Provider write result");
        Ok(body.trim() != "0")
    }

    /// Write one field; returns whether the provider accepted it.
    pub async fn write_field(&self, field: &str, value: bool) -> bool {
        // ---
        let encoded = if value { "1" } else { "0" };
        match self.write(&[(field, encoded)]).await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(field, error = %e, "Provider write failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn unreachable_client() -> ThingSpeakClient {
        ThingSpeakClient::new(
            reqwest::Client::new(),
            ThingSpeakConfig {
                // Port 9 (discard) on loopback: connection refused immediately.
                base_url: "http://127.0.0.1:9".into(),
                channel_id: "1".into(),
                read_api_key: "read".into(),
                write_api_key: "write".into(),
                latest_results: 1,
            },
        )
        .with_retry(RetryPolicy {
            attempts: 2,
            backoff_step: Duration::from_millis(1),
        })
    }

    #[test]
    fn backoff_is_linear_in_attempt() {
        // ---
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(3));
    }

    #[test]
    fn default_reading_is_neutral() {
        // ---
        let r = default_reading();
        assert_eq!(r.temperature, 25.0);
        assert_eq!(r.level, 75.0);
        assert!(!r.pump_status && !r.heater_status);
        assert!(r.timestamp.is_some());
    }

    #[tokio::test]
    async fn exhausted_live_reads_yield_default() {
        // ---
        let latest = unreachable_client().fetch_latest().await;
        assert!(latest.is_default());
        assert_eq!(latest.reading().level, 75.0);
    }

    #[tokio::test]
    async fn failed_history_read_is_empty() {
        // ---
        let readings = unreachable_client().fetch_historical(3).await;
        assert!(readings.is_empty());
    }

    #[tokio::test]
    async fn out_of_range_history_window_is_empty() {
        // ---
        let readings = unreachable_client().fetch_historical(u32::MAX).await;
        assert!(readings.is_empty());
    }

    #[tokio::test]
    async fn failed_write_reports_false() {
        // ---
        assert!(!unreachable_client().write_field(PUMP_FIELD, true).await);
    }
}
