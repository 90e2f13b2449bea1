//! Primary store: the append-mostly system of record for raw samples.
//!
//! The pool is opened lazily and checked before every operation. A closed pool
//! or a connection-class error triggers a reconnect (and schema re-apply) on the
//! next call; if that fails only the current caller sees the error.

use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::models::{NewReading, Reading, Setpoints, Settings};
use crate::schema;

// ---

const READING_COLUMNS: &str =
    "id, temperature, level, pump_status, heater_status, recorded_at, source";

/// How to (re)open the pool. Absent when the store wraps a caller-owned pool.
#[derive(Debug, Clone)]
struct ConnectOptions {
    url: String,
    max_connections: u32,
}

#[derive(Debug)]
pub struct PrimaryStore {
    connect: Option<ConnectOptions>,
    pool: RwLock<Option<PgPool>>,
}

impl PrimaryStore {
    /// Open the store and apply its schema.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        // ---
        let store = PrimaryStore {
            connect: Some(ConnectOptions {
                url: url.to_string(),
                max_connections,
            }),
            pool: RwLock::new(None),
        };
        store.pool().await?;
        Ok(store)
    }

    /// Wrap an existing pool. The schema is applied here; reconnecting is not
    /// possible once this pool is closed.
    pub async fn with_pool(pool: PgPool) -> Result<Self, StoreError> {
        // ---
        schema::create_primary_schema(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;
        Ok(PrimaryStore {
            connect: None,
            pool: RwLock::new(Some(pool)),
        })
    }

    /// Return a usable pool, reinitializing it when missing or closed.
    async fn pool(&self) -> Result<PgPool, StoreError> {
        // ---
        if let Some(pool) = self.pool.read().await.as_ref() {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
        }

        let mut slot = self.pool.write().await;
        if let Some(pool) = slot.as_ref() {
            if !pool.is_closed() {
                return Ok(pool.clone());
            }
        }

        let Some(opts) = &self.connect else {
            return Err(StoreError::Unavailable(
                "pool closed and no connection settings to reopen it".into(),
            ));
        };

        tracing::info!("Initializing primary store connection");
        let pool = PgPoolOptions::new()
            .max_connections(opts.max_connections)
            .connect(&opts.url)
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        schema::create_primary_schema(&pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("{e:#}")))?;

        *slot = Some(pool.clone());
        tracing::info!("Primary store ready");
        Ok(pool)
    }

    /// Record a failed query; connection-class failures drop the cached pool
    /// so the next operation reinitializes it.
    async fn fail(&self, err: sqlx::Error) -> StoreError {
        // ---
        if StoreError::is_connection_loss(&err) && self.connect.is_some() {
            tracing::warn!(error = %err, "primary store connection lost; will reinitialize");
            let stale = self.pool.write().await.take();
            if let Some(pool) = stale {
                pool.close().await;
            }
        }
        StoreError::Database(err)
    }

    /// Newest readings first.
    pub async fn latest(&self, limit: i64) -> Result<Vec<Reading>, StoreError> {
        // ---
        let pool = self.pool().await?;
        let sql = format!(
            "SELECT {READING_COLUMNS} FROM readings ORDER BY recorded_at DESC, id DESC LIMIT $1"
        );
        match sqlx::query_as::<_, Reading>(&sql)
            .bind(limit)
            .fetch_all(&pool)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Readings with `start <= recorded_at <= end`, oldest first, capped.
    pub async fn by_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        max: i64,
    ) -> Result<Vec<Reading>, StoreError> {
        // ---
        let pool = self.pool().await?;
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS} FROM readings
            WHERE recorded_at >= $1 AND recorded_at <= $2
            ORDER BY recorded_at ASC, id ASC
            LIMIT $3
            "#
        );
        match sqlx::query_as::<_, Reading>(&sql)
            .bind(start)
            .bind(end)
            .bind(max)
            .fetch_all(&pool)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Readings with id greater than `after_id`, ascending, capped.
    pub async fn after_id(&self, after_id: i64, max: i64) -> Result<Vec<Reading>, StoreError> {
        // ---
        let pool = self.pool().await?;
        let sql =
            format!("SELECT {READING_COLUMNS} FROM readings WHERE id > $1 ORDER BY id ASC LIMIT $2");
        match sqlx::query_as::<_, Reading>(&sql)
            .bind(after_id)
            .bind(max)
            .fetch_all(&pool)
            .await
        {
            Ok(rows) => Ok(rows),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Most recent row within `[from, to]` with the same actuator flags and
    /// metrics within `tolerance` of the candidate.
    pub async fn find_similar(
        &self,
        candidate: &NewReading,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        tolerance: f64,
    ) -> Result<Option<Reading>, StoreError> {
        // ---
        let pool = self.pool().await?;
        let sql = format!(
            r#"
            SELECT {READING_COLUMNS} FROM readings
            WHERE recorded_at BETWEEN $1 AND $2
              AND pump_status = $3 AND heater_status = $4
              AND ABS(temperature - $5) < $7
              AND ABS(level - $6) < $7
            ORDER BY id DESC
            LIMIT 1
            "#
        );
        match sqlx::query_as::<_, Reading>(&sql)
            .bind(from)
            .bind(to)
            .bind(candidate.pump_status)
            .bind(candidate.heater_status)
            .bind(candidate.temperature)
            .bind(candidate.level)
            .bind(tolerance)
            .fetch_optional(&pool)
            .await
        {
            Ok(row) => Ok(row),
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Append a row; the store assigns the id.
    pub async fn insert(
        &self,
        reading: &NewReading,
        timestamp: DateTime<Utc>,
    ) -> Result<Reading, StoreError> {
        // ---
        let pool = self.pool().await?;
        let sql = format!(
            r#"
            INSERT INTO readings (temperature, level, pump_status, heater_status, recorded_at, source)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {READING_COLUMNS}
            "#
        );
        match sqlx::query_as::<_, Reading>(&sql)
            .bind(reading.temperature)
            .bind(reading.level)
            .bind(reading.pump_status)
            .bind(reading.heater_status)
            .bind(timestamp)
            .bind(reading.source.as_str())
            .fetch_one(&pool)
            .await
        {
            Ok(row) => Ok(row),
            Err(e) => Err(self.fail(e).await),
        }
    }

    pub async fn count(&self) -> Result<i64, StoreError> {
        let pool = self.pool().await?;
        match sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM readings")
            .fetch_one(&pool)
            .await
        {
            Ok(n) => Ok(n),
            Err(e) => Err(self.fail(e).await),
        }
    }

    pub async fn setpoints(&self) -> Result<Setpoints, StoreError> {
        // ---
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, Setpoints>(
            "SELECT temp_min, temp_max, level_min, level_max, updated_at FROM setpoints WHERE id = 1",
        )
        .fetch_optional(&pool)
        .await;
        match row {
            Ok(Some(sp)) => Ok(sp),
            // Row removed out from under us; reseed the defaults.
            Ok(None) => {
                let seeded = sqlx::query_as::<_, Setpoints>(
                    r#"
                    INSERT INTO setpoints (id) VALUES (1)
                    ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id
                    RETURNING temp_min, temp_max, level_min, level_max, updated_at
                    "#,
                )
                .fetch_one(&pool)
                .await;
                match seeded {
                    Ok(sp) => Ok(sp),
                    Err(e) => Err(self.fail(e).await),
                }
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    pub async fn update_setpoints(&self, sp: &Setpoints) -> Result<Setpoints, StoreError> {
        // ---
        let pool = self.pool().await?;
        let updated = sqlx::query_as::<_, Setpoints>(
            r#"
            INSERT INTO setpoints (id, temp_min, temp_max, level_min, level_max, updated_at)
            VALUES (1, $1, $2, $3, $4, now())
            ON CONFLICT (id) DO UPDATE SET
                temp_min = EXCLUDED.temp_min,
                temp_max = EXCLUDED.temp_max,
                level_min = EXCLUDED.level_min,
                level_max = EXCLUDED.level_max,
                updated_at = EXCLUDED.updated_at
            RETURNING temp_min, temp_max, level_min, level_max, updated_at
            "#,
        )
        .bind(sp.temp_min)
        .bind(sp.temp_max)
        .bind(sp.level_min)
        .bind(sp.level_max)
        .fetch_one(&pool)
        .await;
        match updated {
            Ok(sp) => Ok(sp),
            Err(e) => Err(self.fail(e).await),
        }
    }

    pub async fn settings(&self) -> Result<Settings, StoreError> {
        // ---
        let pool = self.pool().await?;
        let row = sqlx::query_as::<_, Settings>(
            r#"
            INSERT INTO settings (id) VALUES (1)
            ON CONFLICT (id) DO UPDATE SET id = EXCLUDED.id
            RETURNING *
            "#,
        )
        .fetch_one(&pool)
        .await;
        match row {
            Ok(s) => Ok(s),
            Err(e) => Err(self.fail(e).await),
        }
    }

    pub async fn update_settings(&self, s: &Settings) -> Result<Settings, StoreError> {
        // ---
        let pool = self.pool().await?;
        let updated = sqlx::query_as::<_, Settings>(
            r#"
            INSERT INTO settings (
                id, system_name, update_interval, data_retention, email_alerts, push_alerts,
                alert_email, temp_critical_min, temp_warning_min, temp_warning_max,
                temp_critical_max, level_critical_min, level_warning_min, level_warning_max,
                level_critical_max, chart_type, dark_mode, use_24_hour_time, updated_at
            ) VALUES (1, $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, now())
            ON CONFLICT (id) DO UPDATE SET
                system_name = EXCLUDED.system_name,
                update_interval = EXCLUDED.update_interval,
                data_retention = EXCLUDED.data_retention,
                email_alerts = EXCLUDED.email_alerts,
                push_alerts = EXCLUDED.push_alerts,
                alert_email = EXCLUDED.alert_email,
                temp_critical_min = EXCLUDED.temp_critical_min,
                temp_warning_min = EXCLUDED.temp_warning_min,
                temp_warning_max = EXCLUDED.temp_warning_max,
                temp_critical_max = EXCLUDED.temp_critical_max,
                level_critical_min = EXCLUDED.level_critical_min,
                level_warning_min = EXCLUDED.level_warning_min,
                level_warning_max = EXCLUDED.level_warning_max,
                level_critical_max = EXCLUDED.level_critical_max,
                chart_type = EXCLUDED.chart_type,
                dark_mode = EXCLUDED.dark_mode,
                use_24_hour_time = EXCLUDED.use_24_hour_time,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(&s.system_name)
        .bind(s.update_interval)
        .bind(s.data_retention)
        .bind(s.email_alerts)
        .bind(s.push_alerts)
        .bind(&s.alert_email)
        .bind(s.temp_critical_min)
        .bind(s.temp_warning_min)
        .bind(s.temp_warning_max)
        .bind(s.temp_critical_max)
        .bind(s.level_critical_min)
        .bind(s.level_warning_min)
        .bind(s.level_warning_max)
        .bind(s.level_critical_max)
        .bind(&s.chart_type)
        .bind(s.dark_mode)
        .bind(s.use_24_hour_time)
        .fetch_one(&pool)
        .await;
        match updated {
            Ok(s) => Ok(s),
            Err(e) => Err(self.fail(e).await),
        }
    }
}
