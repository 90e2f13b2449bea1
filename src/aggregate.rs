//! Aggregation engine: rebucket raw readings for display and compute summary
//! statistics over the raw series.
//!
//! Bucket width depends only on the requested span:
//!
//! | span                | bucket |
//! |---------------------|--------|
//! | `<= 1 day`          | minute |
//! | `< 7 days`          | hour   |
//! | `>= 7 days`         | week (Sunday 00:00 UTC) |
//!
//! All bucket boundaries are computed in UTC.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;

use crate::models::Reading;

// ---

/// Fixed value the temperature probe reports when disconnected.
pub const SENSOR_ERROR_VALUE: f64 = -127.0;
/// Anything at or below this is treated as a sensor fault.
pub const SENSOR_FLOOR: f64 = -100.0;

/// Temperatures that must not enter an average.
pub fn is_sensor_error(temperature: f64) -> bool {
    temperature == SENSOR_ERROR_VALUE || temperature <= SENSOR_FLOOR || !temperature.is_finite()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Minute,
    Hour,
    Week,
}

impl Resolution {
    /// Bucket width for a query span.
    pub fn for_span(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        // ---
        let span = (end - start).abs();
        if span <= Duration::days(1) {
            Resolution::Minute
        } else if span < Duration::days(7) {
            Resolution::Hour
        } else {
            Resolution::Week
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        // ---
        match self {
            Resolution::Minute => floor_seconds(ts, 60),
            Resolution::Hour => floor_seconds(ts, 3600),
            Resolution::Week => {
                let back = i64::from(ts.weekday().num_days_from_sunday());
                let day = ts.date_naive() - Duration::days(back);
                day.and_hms_opt(0, 0, 0)
                    .map(|naive| naive.and_utc())
                    .unwrap_or(ts)
            }
        }
    }
}

fn floor_seconds(ts: DateTime<Utc>, width: i64) -> DateTime<Utc> {
    let secs = ts.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(width), 0).unwrap_or(ts)
}

/// One display bucket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedReading {
    pub timestamp: DateTime<Utc>,
    pub temperature: f64,
    pub level: f64,
    pub pump_status: bool,
    pub heater_status: bool,
}

#[derive(Debug, Default)]
struct Accumulator {
    temp_sum: f64,
    temp_count: u32,
    level_sum: f64,
    level_count: u32,
    pump: bool,
    heater: bool,
}

impl Accumulator {
    fn push(&mut self, r: &Reading) {
        // ---
        if !is_sensor_error(r.temperature) {
            self.temp_sum += r.temperature;
            self.temp_count += 1;
        }
        self.level_sum += r.level;
        self.level_count += 1;
        self.pump |= r.pump_status;
        self.heater |= r.heater_status;
    }

    fn finish(&self, timestamp: DateTime<Utc>) -> AggregatedReading {
        let mean = |sum: f64, n: u32| if n > 0 { sum / f64::from(n) } else { 0.0 };
        AggregatedReading {
            timestamp,
            temperature: mean(self.temp_sum, self.temp_count),
            level: mean(self.level_sum, self.level_count),
            pump_status: self.pump,
            heater_status: self.heater,
        }
    }
}

/// Group `readings` into buckets of `resolution`, ordered by bucket start.
///
/// Temperature averages skip sensor-error values (a bucket with none left
/// reports 0); level averages every sample; actuator flags are OR-ed.
pub fn bucketize(readings: &[Reading], resolution: Resolution) -> Vec<AggregatedReading> {
    // ---
    let mut buckets: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();
    for r in readings {
        buckets
            .entry(resolution.bucket_start(r.timestamp))
            .or_default()
            .push(r);
    }
    buckets
        .iter()
        .map(|(start, acc)| acc.finish(*start))
        .collect()
}

/// Rebucket `readings` at the resolution chosen from `[start, end]`.
pub fn aggregate(
    readings: &[Reading],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<AggregatedReading> {
    // ---
    let resolution = Resolution::for_span(start, end);
    let out = bucketize(readings, resolution);
    tracing::debug!(
        ?resolution,
        input = readings.len(),
        buckets = out.len(),
        "Aggregated readings"
    );
    out
}

/// Summary statistics of one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub std_dev: f64,
}

impl MetricStats {
    /// Population statistics; all zero for an empty series.
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        // ---
        let values: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return MetricStats::default();
        }
        let n = values.len() as f64;
        let avg = values.iter().sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / n;
        MetricStats {
            // Rounding can push the mean a hair outside [min, max].
            avg: avg.clamp(min, max),
            min,
            max,
            std_dev: variance.sqrt(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SeriesStats {
    pub temperature: MetricStats,
    pub level: MetricStats,
}

/// Statistics over the raw (non-bucketed) series.
pub fn stats(readings: &[Reading]) -> SeriesStats {
    SeriesStats {
        temperature: MetricStats::from_values(readings.iter().map(|r| r.temperature)),
        level: MetricStats::from_values(readings.iter().map(|r| r.level)),
    }
}
