//! Read paths: latest samples, bucketed history by date range, and a direct
//! pull of provider history.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::aggregate::{self, AggregatedReading, SeriesStats};
use crate::error::{ApiError, ApiResult};
use crate::ingest;
use crate::models::{Reading, SetpointRanges};
use crate::AppState;

// ---

const DEFAULT_LATEST_LIMIT: i64 = 60;
const MAX_LATEST_LIMIT: i64 = 1000;
const MAX_HISTORY_ROWS: i64 = 1000;
const DEFAULT_REMOTE_DAYS: u32 = 7;
const MAX_REMOTE_DAYS: u32 = 90;
/// Ids given to provider samples served without being stored.
const TRANSIENT_ID_BASE: i64 = 10_000;

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/api/readings/latest", get(latest))
        .route("/api/readings/history", get(history))
        .route("/api/thingspeak/history", get(remote_history))
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryQuery {
    start_date: NaiveDate,
    end_date: NaiveDate,
}

#[derive(Debug, Deserialize)]
struct DaysQuery {
    days: Option<u32>,
}

#[derive(Serialize)]
struct LatestResponse {
    readings: Vec<Reading>,
    setpoints: SetpointRanges,
}

#[derive(Serialize)]
struct SeriesResponse<T> {
    readings: Vec<T>,
    setpoints: SetpointRanges,
    stats: SeriesStats,
}

/// `limit` defaults to 60 and must be within `1..=1000`.
fn latest_limit(limit: Option<i64>) -> ApiResult<i64> {
    match limit.unwrap_or(DEFAULT_LATEST_LIMIT) {
        n @ 1..=MAX_LATEST_LIMIT => Ok(n),
        n => Err(ApiError::bad_request(format!(
            "limit must be between 1 and {MAX_LATEST_LIMIT}, got {n}"
        ))),
    }
}

/// `days` defaults to 7 and must be within `1..=90`.
pub(crate) fn day_count(days: Option<u32>) -> ApiResult<u32> {
    match days.unwrap_or(DEFAULT_REMOTE_DAYS) {
        n @ 1..=MAX_REMOTE_DAYS => Ok(n),
        n => Err(ApiError::bad_request(format!(
            "days must be between 1 and {MAX_REMOTE_DAYS}, got {n}"
        ))),
    }
}

/// Resolved date range of a history query.
#[derive(Debug)]
struct HistoryWindow {
    /// Store bounds, `[start 00:00, end 23:59:59.999]` in UTC.
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    /// Requested dates at midnight; these pick the bucket resolution.
    span_start: DateTime<Utc>,
    span_end: DateTime<Utc>,
    /// Days of provider history to fetch when the store has nothing.
    days: u32,
}

fn history_window(start: NaiveDate, end: NaiveDate) -> ApiResult<HistoryWindow> {
    // ---
    if start > end {
        return Err(ApiError::bad_request("startDate must not be after endDate"));
    }
    let span_days = (end - start).num_days();
    if span_days > i64::from(MAX_REMOTE_DAYS) {
        return Err(ApiError::bad_request(format!(
            "date range must not exceed {MAX_REMOTE_DAYS} days, got {span_days}"
        )));
    }
    let last_ms = NaiveTime::from_hms_milli_opt(23, 59, 59, 999)
        .ok_or_else(|| ApiError::internal("invalid end-of-day time"))?;
    let days = u32::try_from(span_days.max(1))
        .map_err(|_| ApiError::bad_request("invalid date range"))?;

    Ok(HistoryWindow {
        from: start.and_time(NaiveTime::MIN).and_utc(),
        to: end.and_time(last_ms).and_utc(),
        span_start: start.and_time(NaiveTime::MIN).and_utc(),
        span_end: end.and_time(NaiveTime::MIN).and_utc(),
        days,
    })
}

async fn latest(
    Query(q): Query<LatestQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<LatestResponse>> {
    // ---
    let limit = latest_limit(q.limit)?;
    let readings = state.store.latest(limit).await?;
    let setpoints = state.store.setpoints().await?;
    Ok(Json(LatestResponse {
        readings,
        setpoints: SetpointRanges::from(&setpoints),
    }))
}

async fn history(
    Query(q): Query<HistoryQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<SeriesResponse<AggregatedReading>>> {
    // ---
    let window = history_window(q.start_date, q.end_date)?;
    let mut readings = state
        .store
        .by_range(window.from, window.to, MAX_HISTORY_ROWS)
        .await?;

    if readings.is_empty() {
        info!(
            days = window.days,
            "No stored readings in range; falling back to provider history"
        );
        readings = state
            .telemetry
            .fetch_historical(window.days)
            .await
            .into_iter()
            .enumerate()
            .map(|(i, sample)| Reading::transient(TRANSIENT_ID_BASE + i as i64, sample))
            .collect();
    }
    if readings.is_empty() {
        return Err(ApiError::not_found("No data found for the specified date range"));
    }

    let setpoints = state.store.setpoints().await?;
    Ok(Json(SeriesResponse {
        readings: aggregate::aggregate(&readings, window.span_start, window.span_end),
        setpoints: SetpointRanges::from(&setpoints),
        stats: aggregate::stats(&readings),
    }))
}

/// Fetch provider history, store what is new, and return the raw samples.
async fn remote_history(
    Query(q): Query<DaysQuery>,
    State(state): State<AppState>,
) -> ApiResult<Json<SeriesResponse<Reading>>> {
    // ---
    let days = day_count(q.days)?;
    let samples = state.telemetry.fetch_historical(days).await;
    if samples.is_empty() {
        return Err(ApiError::not_found("No data available from provider"));
    }

    let mut readings = Vec::with_capacity(samples.len());
    for (i, sample) in samples.into_iter().enumerate() {
        match ingest::ingest(&state.store, &sample).await {
            Ok(stored) => readings.push(stored.into_reading()),
            Err(e) => {
                warn!(index = i, error = %e, "Could not store provider sample");
                readings.push(Reading::transient(TRANSIENT_ID_BASE + i as i64, sample));
            }
        }
    }

    let setpoints = state.store.setpoints().await?;
    let stats = aggregate::stats(&readings);
    Ok(Json(SeriesResponse {
        readings,
        setpoints: SetpointRanges::from(&setpoints),
        stats,
    }))
}
