//! Store-backed pipeline tests.
//!
//! Run against PostgreSQL when `TEST_DATABASE_URL` is set; each test works in
//! its own schema (via `search_path`) and drops it afterwards. Without the
//! variable every test returns early.

use std::env;
use std::sync::Arc;

use anyhow::Result;
use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio_test::assert_ok;
use uuid::Uuid;

use aquasense::actuators::ActuatorCache;
use aquasense::backup::{BackupService, SyncOutcome};
use aquasense::device_status::{self, StatusSource};
use aquasense::ingest::{self, Ingested};
use aquasense::store::PrimaryStore;
use aquasense::{DataSource, NewReading};

// ---

struct TestDb {
    url: String,
    schema: String,
    pool: PgPool,
}

impl TestDb {
    async fn setup() -> Result<Option<Self>> {
        // ---
        let Ok(url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set; skipping");
            return Ok(None);
        };
        let schema = format!("aquasense_test_{}", Uuid::new_v4().simple());

        let admin = PgPoolOptions::new().max_connections(1).connect(&url).await?;
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {schema}"))
            .execute(&admin)
            .await?;
        admin.close().await;

        let schema_name = schema.clone();
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .after_connect(move |conn, _meta| {
                let schema = schema_name.clone();
                Box::pin(async move {
                    sqlx::query(&format!("SET search_path TO {schema}"))
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await?;

        Ok(Some(TestDb { url, schema, pool }))
    }

    async fn teardown(self) -> Result<()> {
        // ---
        self.pool.close().await;
        let admin = PgPoolOptions::new()
            .max_connections(1)
            .connect(&self.url)
            .await?;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&admin)
            .await?;
        Ok(())
    }
}

fn sample(temperature: f64, level: f64, pump: bool) -> NewReading {
    NewReading {
        temperature,
        level,
        pump_status: pump,
        heater_status: false,
        timestamp: Some(Utc::now()),
        source: DataSource::Remote,
    }
}

#[tokio::test]
async fn ingest_is_idempotent_within_window() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let store = PrimaryStore::with_pool(db.pool.clone()).await?;

    let candidate = sample(24.3, 71.0, true);
    let first = assert_ok!(ingest::ingest(&store, &candidate).await);
    assert!(matches!(first, Ingested::Inserted(_)));

    // Jitter inside the tolerance and window still matches.
    let mut jittered = candidate.clone();
    jittered.temperature += 0.05;
    jittered.timestamp = candidate.timestamp.map(|t| t + Duration::seconds(3));
    let second = assert_ok!(ingest::ingest(&store, &jittered).await);
    assert!(matches!(second, Ingested::Duplicate(_)));
    assert_eq!(first.reading().id, second.reading().id);
    assert_eq!(store.count().await?, 1);

    db.teardown().await
}

#[tokio::test]
async fn differing_flags_are_not_duplicates() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let store = PrimaryStore::with_pool(db.pool.clone()).await?;

    let on = sample(24.0, 70.0, true);
    let mut off = on.clone();
    off.pump_status = false;
    ingest::ingest(&store, &on).await?;
    let second = ingest::ingest(&store, &off).await?;

    assert!(matches!(second, Ingested::Inserted(_)));
    assert_eq!(store.count().await?, 2);

    db.teardown().await
}

#[tokio::test]
async fn device_status_prefers_stored_row() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let store = PrimaryStore::with_pool(db.pool.clone()).await?;
    let cache = ActuatorCache::new();
    cache.set_pump(true).await;

    let empty = device_status::status(&cache, &store).await?;
    assert_eq!(empty.source, StatusSource::Memory);
    assert!(empty.pending_sync);
    assert!(empty.database_state.is_none());

    ingest::ingest(&store, &sample(25.0, 70.0, false)).await?;
    let status = device_status::status(&cache, &store).await?;
    assert_eq!(status.source, StatusSource::Database);
    assert!(!status.pump_status);
    assert!(status.pending_sync);
    assert!(status.memory_state.pump_status);

    db.teardown().await
}

#[tokio::test]
async fn second_sync_without_new_rows_inserts_nothing() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let primary = Arc::new(PrimaryStore::with_pool(db.pool.clone()).await?);
    let backup = BackupService::initialize(Arc::clone(&primary), db.pool.clone()).await?;

    ingest::ingest(&primary, &sample(24.0, 70.0, false)).await?;
    ingest::ingest(&primary, &sample(25.0, 72.0, true)).await?;

    let first = backup.sync().await?;
    assert!(matches!(first, SyncOutcome::Synced { records: 2, .. }));
    assert_eq!(backup.sync().await?, SyncOutcome::UpToDate);

    let copied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backup_readings")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(copied, 2);

    let trend: f64 =
        sqlx::query_scalar("SELECT temperature_trend FROM backup_readings ORDER BY id DESC LIMIT 1")
            .fetch_one(&db.pool)
            .await?;
    assert!((trend - 1.0).abs() < 1e-9);

    let info = backup.last_backup_info().await?;
    assert_eq!(info.total_backup_records, 2);
    assert!(!info.sync_in_progress);
    assert!(info.last_run.is_some_and(|r| r.success));

    db.teardown().await
}

#[tokio::test]
async fn cold_reading_raises_one_temperature_alert() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let primary = Arc::new(PrimaryStore::with_pool(db.pool.clone()).await?);
    let backup = BackupService::initialize(Arc::clone(&primary), db.pool.clone()).await?;

    let stored = ingest::ingest(&primary, &sample(17.0, 70.0, false))
        .await?
        .into_reading();
    let outcome = backup.sync().await?;
    assert!(matches!(outcome, SyncOutcome::Synced { alerts: 1, .. }));

    let alerts: Vec<(String, String, i64)> =
        sqlx::query_as("SELECT alert_type, severity, reading_id FROM alerts")
            .fetch_all(&db.pool)
            .await?;
    assert_eq!(
        alerts,
        vec![("temperature".to_string(), "critical".to_string(), stored.id)]
    );

    let critical: bool =
        sqlx::query_scalar("SELECT is_temp_critical FROM backup_readings WHERE id = $1")
            .bind(stored.id)
            .fetch_one(&db.pool)
            .await?;
    assert!(critical);

    let stats = backup.backup_stats().await?;
    assert_eq!(stats.alert_count, 1);
    assert_eq!(stats.critical_alerts_count, 1);

    db.teardown().await
}

#[tokio::test]
async fn failed_sync_rolls_back_the_whole_batch() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let primary = Arc::new(PrimaryStore::with_pool(db.pool.clone()).await?);
    let backup = BackupService::initialize(Arc::clone(&primary), db.pool.clone()).await?;

    ingest::ingest(&primary, &sample(17.0, 70.0, false)).await?;
    ingest::ingest(&primary, &sample(24.0, 95.0, true)).await?;

    // The rollup is the last step of a run; without its table the run fails
    // after the readings and alerts were written inside the transaction.
    sqlx::query("DROP TABLE daily_stats")
        .execute(&db.pool)
        .await?;
    assert!(backup.sync().await.is_err());

    let copied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM backup_readings")
        .fetch_one(&db.pool)
        .await?;
    let alerts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM alerts")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!((copied, alerts), (0, 0));

    let info = backup.last_backup_info().await?;
    let last = info.last_run.expect("failed run is recorded");
    assert!(!last.success);
    assert!(last.error.is_some());
    assert!(!info.sync_in_progress);

    // Once the table is back the same batch goes through.
    aquasense::schema::create_backup_schema(&db.pool).await?;
    let retried = backup.sync().await?;
    assert!(matches!(
        retried,
        SyncOutcome::Synced {
            records: 2,
            alerts: 2,
            daily_stat_created: true
        }
    ));
    let rollups: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM daily_stats")
        .fetch_one(&db.pool)
        .await?;
    assert_eq!(rollups, 1);

    db.teardown().await
}

#[tokio::test]
async fn daily_stat_is_written_once_per_day() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let primary = Arc::new(PrimaryStore::with_pool(db.pool.clone()).await?);
    let backup = BackupService::initialize(Arc::clone(&primary), db.pool.clone()).await?;

    ingest::ingest(&primary, &sample(24.0, 70.0, true)).await?;
    let first = backup.sync().await?;
    assert!(matches!(
        first,
        SyncOutcome::Synced {
            daily_stat_created: true,
            ..
        }
    ));

    ingest::ingest(&primary, &sample(26.0, 74.0, false)).await?;
    let second = backup.sync().await?;
    assert!(matches!(
        second,
        SyncOutcome::Synced {
            records: 1,
            daily_stat_created: false,
            ..
        }
    ));

    let stats = backup.backup_stats().await?;
    assert_eq!(stats.daily_stats.len(), 1);
    let today = &stats.daily_stats[0];
    assert_eq!(today.reading_count, 1);
    assert_eq!(today.pump_active_time, 5);
    assert_eq!(stats.sync_history.len(), 2);

    db.teardown().await
}

#[tokio::test]
async fn setpoints_round_trip_through_store() -> Result<()> {
    // ---
    let Some(db) = TestDb::setup().await? else {
        return Ok(());
    };
    let store = PrimaryStore::with_pool(db.pool.clone()).await?;

    let mut sp = store.setpoints().await?;
    assert_eq!((sp.temp_min, sp.temp_max), (20.0, 30.0));

    sp.temp_min = 21.5;
    let saved = store.update_setpoints(&sp).await?;
    assert_eq!(saved.temp_min, 21.5);
    assert_eq!(store.setpoints().await?.temp_min, 21.5);

    let settings = store.settings().await?;
    assert!(settings.validate().is_ok());

    db.teardown().await
}
