//! Ingestion & dedup pipeline.
//!
//! Several sources observe the same physical sample (scheduled polling,
//! historical import, direct history reads). Before appending, the store is
//! searched for a near-duplicate: same actuator flags, metrics within
//! [`DedupWindow::tolerance`], timestamp within [`DedupWindow::half_width`].

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::models::{NewReading, Reading};
use crate::store::PrimaryStore;
use crate::telemetry::ThingSpeakClient;

// ---

#[derive(Debug, Clone, Copy)]
pub struct DedupWindow {
    pub half_width: Duration,
    pub tolerance: f64,
}

impl Default for DedupWindow {
    fn default() -> Self {
        Self {
            half_width: Duration::seconds(5),
            tolerance: 0.1,
        }
    }
}

impl DedupWindow {
    /// Inclusive time bounds searched around `ts`.
    pub fn bounds(&self, ts: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        (ts - self.half_width, ts + self.half_width)
    }
}

/// Whether [`ingest`] wrote a new row or matched an existing one.
#[derive(Debug, Clone, PartialEq)]
pub enum Ingested {
    Inserted(Reading),
    Duplicate(Reading),
}

impl Ingested {
    pub fn reading(&self) -> &Reading {
        match self {
            Ingested::Inserted(r) | Ingested::Duplicate(r) => r,
        }
    }

    pub fn into_reading(self) -> Reading {
        match self {
            Ingested::Inserted(r) | Ingested::Duplicate(r) => r,
        }
    }
}

/// Store `candidate` unless a near-duplicate already exists, in which case the
/// existing row is returned unchanged.
pub async fn ingest(store: &PrimaryStore, candidate: &NewReading) -> Result<Ingested, StoreError> {
    // ---
    let window = DedupWindow::default();
    let timestamp = candidate.timestamp.unwrap_or_else(Utc::now);
    let (from, to) = window.bounds(timestamp);

    if let Some(existing) = store
        .find_similar(candidate, from, to, window.tolerance)
        .await?
    {
        debug!(id = existing.id, "Similar recent reading found; skipping insert");
        return Ok(Ingested::Duplicate(existing));
    }

    let stored = store.insert(candidate, timestamp).await?;
    info!(
        id = stored.id,
        temperature = %format!("{:.1}", stored.temperature),
        level = stored.level,
        pump = stored.pump_status,
        heater = stored.heater_status,
        source = %stored.source,
        "Stored new reading"
    );
    Ok(Ingested::Inserted(stored))
}

/// Counters reported by a historical import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub fetched: usize,
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Ingest a batch sequentially, counting outcomes. A failing row is logged and
/// does not stop the batch.
pub async fn ingest_all(store: &PrimaryStore, samples: &[NewReading]) -> ImportSummary {
    // ---
    let mut summary = ImportSummary {
        fetched: samples.len(),
        ..ImportSummary::default()
    };

    for (i, sample) in samples.iter().enumerate() {
        match ingest(store, sample).await {
            Ok(Ingested::Inserted(_)) => summary.imported += 1,
            Ok(Ingested::Duplicate(_)) => summary.skipped += 1,
            Err(e) => {
                summary.failed += 1;
                warn!(index = i, error = %e, "Failed to import reading");
            }
        }
        if (i + 1) % 100 == 0 {
            info!("Imported {}/{} readings...", i + 1, samples.len());
        }
    }
    summary
}

/// Pull `days` of provider history into the primary store.
pub async fn import_history(
    store: &PrimaryStore,
    client: &ThingSpeakClient,
    days: u32,
) -> ImportSummary {
    // ---
    info!("Importing {} days of provider history", days);
    let samples = client.fetch_historical(days).await;
    if samples.is_empty() {
        warn!("No provider data for the requested period");
        return ImportSummary::default();
    }

    let summary = ingest_all(store, &samples).await;
    info!(
        fetched = summary.fetched,
        imported = summary.imported,
        skipped = summary.skipped,
        failed = summary.failed,
        "History import finished"
    );
    summary
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_spans_five_seconds_each_side() {
        // ---
        let ts = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let (from, to) = DedupWindow::default().bounds(ts);
        assert_eq!(from, Utc.with_ymd_and_hms(2025, 3, 26, 18, 44, 55).unwrap());
        assert_eq!(to, Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 5).unwrap());
    }

    #[test]
    fn tolerance_is_a_tenth() {
        // ---
        assert_eq!(DedupWindow::default().tolerance, 0.1);
    }
}
