//! Backup / derived-stats pipeline.
//!
//! Copies new primary readings into the secondary store in id order, adding
//! trend deltas and critical flags, writing alerts for critical readings and
//! one daily rollup per calendar day (UTC). Each run is a single transaction
//! on the secondary store.
//!
//! Critical thresholds here are fixed constants. They deliberately do not
//! follow the user-editable `settings` thresholds.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tokio::sync::Mutex;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::aggregate::is_sensor_error;
use crate::models::{AlertKind, BackupReading, DailyStat, NewAlert, Reading, Severity};
use crate::schema;
use crate::store::PrimaryStore;

// ---

/// Primary rows copied per run at most.
pub const SYNC_BATCH_SIZE: i64 = 1000;
/// Sync runs kept for `backup_stats`.
const SYNC_HISTORY_LEN: usize = 10;
/// Minutes credited per sample with an active actuator in daily rollups.
pub const MINUTES_PER_SAMPLE: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CriticalThresholds {
    pub temp_min: f64,
    pub temp_max: f64,
    pub level_min: f64,
    pub level_max: f64,
}

pub const CRITICAL: CriticalThresholds = CriticalThresholds {
    temp_min: 18.0,
    temp_max: 30.0,
    level_min: 50.0,
    level_max: 90.0,
};

impl CriticalThresholds {
    pub fn temp_critical(&self, t: f64) -> bool {
        t < self.temp_min || t > self.temp_max
    }

    pub fn level_critical(&self, l: f64) -> bool {
        l < self.level_min || l > self.level_max
    }
}

/// Build the annotated copy of `reading`. `previous` is `(temperature, level)`
/// of the most recent backup row, if any.
pub fn annotate(reading: &Reading, previous: Option<(f64, f64)>) -> BackupReading {
    // ---
    let (temperature_trend, level_trend) = previous
        .map(|(t, l)| (reading.temperature - t, reading.level - l))
        .unwrap_or((0.0, 0.0));

    BackupReading {
        id: reading.id,
        temperature: reading.temperature,
        level: reading.level,
        pump_status: reading.pump_status,
        heater_status: reading.heater_status,
        timestamp: reading.timestamp,
        temperature_trend,
        level_trend,
        is_temp_critical: CRITICAL.temp_critical(reading.temperature),
        is_level_critical: CRITICAL.level_critical(reading.level),
        data_source: reading.source,
        data_quality: if is_sensor_error(reading.temperature) {
            0.0
        } else {
            1.0
        },
    }
}

/// One alert per critical dimension of `reading`.
pub fn alerts_for(reading: &BackupReading) -> Vec<NewAlert> {
    // ---
    [
        (reading.is_temp_critical, AlertKind::Temperature),
        (reading.is_level_critical, AlertKind::WaterLevel),
    ]
    .into_iter()
    .filter(|(critical, _)| *critical)
    .map(|(_, kind)| NewAlert {
        kind,
        severity: Severity::Critical,
        message: kind.message().to_string(),
        reading_id: reading.id,
    })
    .collect()
}

/// Releases the re-entrancy flag when dropped.
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| SyncGuard(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum SyncOutcome {
    /// Another run held the guard; nothing was done.
    AlreadyRunning,
    /// No primary rows past the last backed-up id.
    UpToDate,
    #[serde(rename_all = "camelCase")]
    Synced {
        records: usize,
        alerts: usize,
        daily_stat_created: bool,
    },
}

/// One entry of the in-memory sync history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    pub record_count: usize,
    pub alert_count: usize,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupInfo {
    pub last_sync_id: i64,
    pub last_sync_date: Option<DateTime<Utc>>,
    pub total_backup_records: i64,
    pub sync_in_progress: bool,
    pub last_run: Option<SyncRecord>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupStats {
    pub daily_stats: Vec<DailyStat>,
    pub alert_count: i64,
    pub critical_alerts_count: i64,
    pub sync_history: Vec<SyncRecord>,
}

#[derive(Debug)]
pub struct BackupService {
    primary: Arc<PrimaryStore>,
    pool: PgPool,
    syncing: AtomicBool,
    history: Mutex<VecDeque<SyncRecord>>,
}

impl BackupService {
    /// Apply the secondary schema and build the service.
    pub async fn initialize(primary: Arc<PrimaryStore>, pool: PgPool) -> Result<Self> {
        // ---
        schema::create_backup_schema(&pool).await?;
        info!("Backup service initialized");
        Ok(Self {
            primary,
            pool,
            syncing: AtomicBool::new(false),
            history: Mutex::new(VecDeque::with_capacity(SYNC_HISTORY_LEN)),
        })
    }

    /// Copy the next batch of primary rows. A call made while another run is
    /// in progress returns [`SyncOutcome::AlreadyRunning`] immediately. On error
    /// the whole batch is rolled back.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        // ---
        let Some(_guard) = SyncGuard::try_acquire(&self.syncing) else {
            info!("Backup sync already in progress, skipping");
            return Ok(SyncOutcome::AlreadyRunning);
        };

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let span = tracing::info_span!("backup_sync", %run_id);
        let result = self.run_batch().instrument(span).await;

        let record = |success: bool, records: usize, alerts: usize, error: Option<String>| {
            SyncRecord {
                run_id,
                started_at,
                finished_at: Utc::now(),
                success,
                record_count: records,
                alert_count: alerts,
                error,
            }
        };

        match result {
            Ok(SyncOutcome::Synced {
                records, alerts, ..
            }) => {
                info!(%run_id, records, alerts, "Backup sync committed");
                self.remember(record(true, records, alerts, None)).await;
            }
            Ok(_) => {
                info!(%run_id, "No new readings to back up");
                self.remember(record(true, 0, 0, None)).await;
            }
            Err(ref e) => {
                warn!(%run_id, error = %format!("{e:#}"), "Backup sync failed; batch rolled back");
                self.remember(record(false, 0, 0, Some(format!("{e:#}")))).await;
            }
        }
        result
    }

    async fn remember(&self, record: SyncRecord) {
        let mut history = self.history.lock().await;
        if history.len() == SYNC_HISTORY_LEN {
            history.pop_back();
        }
        history.push_front(record);
    }

    async fn run_batch(&self) -> Result<SyncOutcome> {
        // ---
        let last_id = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM backup_readings")
            .fetch_one(&self.pool)
            .await?
            .unwrap_or(0);

        let batch = self.primary.after_id(last_id, SYNC_BATCH_SIZE).await?;
        if batch.is_empty() {
            return Ok(SyncOutcome::UpToDate);
        }
        info!(last_id, count = batch.len(), "Syncing new readings");

        // Dropping `tx` without commit rolls everything back.
        let mut tx = self.pool.begin().await?;
        let mut alerts = 0;
        for reading in &batch {
            let previous = sqlx::query_as::<_, (f64, f64)>(
                "SELECT temperature, level FROM backup_readings ORDER BY id DESC LIMIT 1",
            )
            .fetch_optional(&mut *tx)
            .await?;

            let annotated = annotate(reading, previous);
            insert_backup_reading(&mut tx, &annotated).await?;
            for alert in alerts_for(&annotated) {
                insert_alert(&mut tx, &alert).await?;
                alerts += 1;
            }
        }

        let daily_stat_created = insert_daily_stat(&mut tx, Utc::now().date_naive()).await?;
        tx.commit().await?;

        Ok(SyncOutcome::Synced {
            records: batch.len(),
            alerts,
            daily_stat_created,
        })
    }

    /// Last backed-up id and timestamp, total rows, whether a run is active,
    /// and the last run outcome.
    pub async fn last_backup_info(&self) -> Result<BackupInfo> {
        // ---
        let last = sqlx::query_as::<_, (i64, DateTime<Utc>)>(
            "SELECT id, recorded_at FROM backup_readings ORDER BY id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let total = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM backup_readings")
            .fetch_one(&self.pool)
            .await?;

        Ok(BackupInfo {
            last_sync_id: last.map(|(id, _)| id).unwrap_or(0),
            last_sync_date: last.map(|(_, ts)| ts),
            total_backup_records: total,
            sync_in_progress: self.is_syncing(),
            last_run: self.history.lock().await.front().cloned(),
        })
    }

    /// Last 7 rollups (newest first), alert counts and recent sync runs.
    pub async fn backup_stats(&self) -> Result<BackupStats> {
        // ---
        let daily_stats = sqlx::query_as::<_, DailyStat>(
            r#"
            SELECT stat_date, min_temp, max_temp, avg_temp, min_level, max_level, avg_level,
                   pump_active_time, heater_active_time, reading_count
            FROM daily_stats
            ORDER BY stat_date DESC
            LIMIT 7
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let (alert_count, critical_alerts_count) = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE severity = $1)
            FROM alerts
            "#,
        )
        .bind(Severity::Critical.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(BackupStats {
            daily_stats,
            alert_count,
            critical_alerts_count,
            sync_history: self.history.lock().await.iter().cloned().collect(),
        })
    }

    /// Whether a sync run is currently in progress.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::Acquire)
    }
}

async fn insert_backup_reading(conn: &mut PgConnection, r: &BackupReading) -> Result<()> {
    // ---
    sqlx::query(
        r#"
        INSERT INTO backup_readings (
            id, temperature, level, pump_status, heater_status, recorded_at,
            temperature_trend, level_trend, is_temp_critical, is_level_critical,
            data_source, data_quality
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
    )
    .bind(r.id)
    .bind(r.temperature)
    .bind(r.level)
    .bind(r.pump_status)
    .bind(r.heater_status)
    .bind(r.timestamp)
    .bind(r.temperature_trend)
    .bind(r.level_trend)
    .bind(r.is_temp_critical)
    .bind(r.is_level_critical)
    .bind(r.data_source.as_str())
    .bind(r.data_quality)
    .execute(conn)
    .await?;
    Ok(())
}

async fn insert_alert(conn: &mut PgConnection, alert: &NewAlert) -> Result<()> {
    // ---
    sqlx::query(
        r#"
        INSERT INTO alerts (alert_type, severity, message, reading_id)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(alert.kind.as_str())
    .bind(alert.severity.as_str())
    .bind(&alert.message)
    .bind(alert.reading_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Create the rollup for `day` unless one exists or the day has no rows.
/// Returns whether a row was written.
async fn insert_daily_stat(conn: &mut PgConnection, day: NaiveDate) -> Result<bool> {
    // ---
    let exists = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS (SELECT 1 FROM daily_stats WHERE stat_date = $1)",
    )
    .bind(day)
    .fetch_one(&mut *conn)
    .await?;
    if exists {
        return Ok(false);
    }

    let Some(start) = day.and_hms_opt(0, 0, 0).map(|d| d.and_utc()) else {
        return Ok(false);
    };
    let end = start + Duration::days(1);

    let inserted = sqlx::query(
        r#"
        INSERT INTO daily_stats (
            stat_date, min_temp, max_temp, avg_temp, min_level, max_level, avg_level,
            pump_active_time, heater_active_time, reading_count
        )
        SELECT $1,
               MIN(temperature), MAX(temperature), AVG(temperature),
               MIN(level), MAX(level), AVG(level),
               COUNT(*) FILTER (WHERE pump_status) * $4,
               COUNT(*) FILTER (WHERE heater_status) * $4,
               COUNT(*)
        FROM backup_readings
        WHERE recorded_at >= $2 AND recorded_at < $3
        HAVING COUNT(*) > 0
        ON CONFLICT (stat_date) DO NOTHING
        "#,
    )
    .bind(day)
    .bind(start)
    .bind(end)
    .bind(MINUTES_PER_SAMPLE)
    .execute(&mut *conn)
    .await?
    .rows_affected();

    if inserted > 0 {
        info!(%day, "Generated daily stats");
    }
    Ok(inserted > 0)
}
